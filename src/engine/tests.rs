use super::*;
use crate::limits::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ulid::Ulid;

fn input(provider: &str, date: &str, time: &str, duration: i64) -> AppointmentInput {
    AppointmentInput::new("John Smith", provider, date, time, duration, "In-person")
}

fn engine() -> Engine {
    Engine::ephemeral(Arc::new(NotifyHub::new()))
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("appointd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn validation_kind(err: EngineError) -> &'static str {
    match err {
        EngineError::Validation(v) => v.kind(),
        other => panic!("expected validation error, got {other:?}"),
    }
}

// ── Create ───────────────────────────────────────────────

#[tokio::test]
async fn create_assigns_id_and_default_status() {
    let engine = engine();
    let appt = engine
        .create(input("Dr. A", "2024-12-29", "09:00", 30))
        .await
        .unwrap();
    assert_eq!(appt.status, Status::Scheduled);
    assert_eq!(appt.provider_name, "Dr. A");
    assert_eq!(appt.duration_minutes, 30);
    assert_eq!(engine.get(appt.id).await, Some(appt));
    assert_eq!(engine.len().await, 1);
}

#[tokio::test]
async fn create_honors_supplied_status() {
    let engine = engine();
    let appt = engine
        .create(input("Dr. A", "2024-12-29", "09:00", 30).with_status("confirmed"))
        .await
        .unwrap();
    assert_eq!(appt.status, Status::Confirmed);
}

#[tokio::test]
async fn create_rejects_bad_input() {
    let engine = engine();

    let mut missing = input("Dr. A", "2024-12-29", "09:00", 30);
    missing.patient_name = None;
    let err = engine.create(missing).await.unwrap_err();
    assert_eq!(validation_kind(err), "missing_field");

    let err = engine
        .create(input("Dr. A", "29/12/2024", "09:00", 30))
        .await
        .unwrap_err();
    assert_eq!(validation_kind(err), "malformed_date");

    let err = engine
        .create(input("Dr. A", "2024-12-29", "9am", 30))
        .await
        .unwrap_err();
    assert_eq!(validation_kind(err), "malformed_time");

    for bad in [0, -15, i64::from(MAX_DURATION_MINUTES) + 1] {
        let err = engine
            .create(input("Dr. A", "2024-12-29", "09:00", bad))
            .await
            .unwrap_err();
        assert_eq!(validation_kind(err), "invalid_duration");
    }

    let err = engine
        .create(input("Dr. A", "2024-12-29", "09:00", 30).with_status("Archived"))
        .await
        .unwrap_err();
    assert_eq!(validation_kind(err), "invalid_status");

    assert!(engine.is_empty().await);
}

#[tokio::test]
async fn adjacent_appointments_do_not_conflict() {
    let engine = engine();
    engine
        .create(input("Dr. A", "2024-12-29", "09:00", 30))
        .await
        .unwrap();
    engine
        .create(input("Dr. A", "2024-12-29", "09:30", 30))
        .await
        .unwrap();
    engine
        .create(input("Dr. A", "2024-12-29", "08:30", 30))
        .await
        .unwrap();
    assert_eq!(engine.len().await, 3);
}

#[tokio::test]
async fn overlap_reports_existing_appointment() {
    let engine = engine();
    let first = engine
        .create(input("Dr. A", "2024-12-29", "09:00", 60))
        .await
        .unwrap();

    let err = engine
        .create(input("Dr. A", "2024-12-29", "09:45", 30))
        .await
        .unwrap_err();
    match err {
        EngineError::Conflict {
            id,
            date,
            start_time,
        } => {
            assert_eq!(id, first.id);
            assert_eq!(date, first.date);
            assert_eq!(start_time, first.start_time);
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    // Fully contained and fully enclosing requests conflict too.
    assert!(matches!(
        engine.create(input("Dr. A", "2024-12-29", "09:15", 15)).await,
        Err(EngineError::Conflict { .. })
    ));
    assert!(matches!(
        engine.create(input("Dr. A", "2024-12-29", "08:00", 180)).await,
        Err(EngineError::Conflict { .. })
    ));
    assert_eq!(engine.len().await, 1);
}

#[tokio::test]
async fn different_providers_share_a_slot() {
    let engine = engine();
    engine
        .create(input("Dr. A", "2024-12-29", "09:00", 30))
        .await
        .unwrap();
    engine
        .create(input("Dr. B", "2024-12-29", "09:00", 30))
        .await
        .unwrap();
    // Provider identity is exact after trimming.
    engine
        .create(input("dr. a", "2024-12-29", "09:00", 30))
        .await
        .unwrap();
    assert!(matches!(
        engine.create(input("  Dr. A ", "2024-12-29", "09:10", 30)).await,
        Err(EngineError::Conflict { .. })
    ));
}

#[tokio::test]
async fn inactive_appointments_free_their_slot() {
    let engine = engine();
    for status in ["Cancelled", "Completed"] {
        engine
            .create(input("Dr. A", "2024-12-29", "09:00", 30).with_status(status))
            .await
            .unwrap();
    }
    engine
        .create(input("Dr. A", "2024-12-29", "09:00", 30))
        .await
        .unwrap();
    assert_eq!(engine.len().await, 3);
}

#[tokio::test]
async fn cancel_then_rebook() {
    let engine = engine();
    let first = engine
        .create(input("Dr. A", "2024-12-29", "09:00", 30))
        .await
        .unwrap();

    assert!(matches!(
        engine.create(input("Dr. A", "2024-12-29", "09:15", 30)).await,
        Err(EngineError::Conflict { id, .. }) if id == first.id
    ));

    let cancelled = engine.update_status(first.id, "Cancelled").await.unwrap();
    assert_eq!(cancelled.status, Status::Cancelled);

    let second = engine
        .create(input("Dr. A", "2024-12-29", "09:15", 30))
        .await
        .unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(engine.len().await, 2);
}

#[tokio::test]
async fn overlap_across_midnight() {
    let engine = engine();
    let late = engine
        .create(input("Dr. A", "2024-12-29", "23:30", 60))
        .await
        .unwrap();

    match engine
        .create(input("Dr. A", "2024-12-30", "00:00", 30))
        .await
        .unwrap_err()
    {
        EngineError::Conflict { id, date, .. } => {
            assert_eq!(id, late.id);
            assert_eq!(date, late.date);
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    engine
        .create(input("Dr. A", "2024-12-30", "00:30", 30))
        .await
        .unwrap();
}

// ── Status updates ───────────────────────────────────────

#[tokio::test]
async fn update_status_errors() {
    let engine = engine();
    let appt = engine
        .create(input("Dr. A", "2024-12-29", "09:00", 30))
        .await
        .unwrap();

    let err = engine.update_status(appt.id, "Archived").await.unwrap_err();
    assert_eq!(validation_kind(err), "invalid_status");

    let missing = Ulid::new();
    assert!(matches!(
        engine.update_status(missing, "Confirmed").await,
        Err(EngineError::NotFound(id)) if id == missing
    ));

    // Status is checked before existence.
    let err = engine.update_status(missing, "nope").await.unwrap_err();
    assert_eq!(validation_kind(err), "invalid_status");

    assert_eq!(engine.get(appt.id).await.unwrap().status, Status::Scheduled);
}

#[tokio::test]
async fn any_transition_is_allowed() {
    let engine = engine();
    let appt = engine
        .create(input("Dr. A", "2024-12-29", "09:00", 30))
        .await
        .unwrap();

    for status in ["Upcoming", "Completed", "Scheduled", "cancelled", "CONFIRMED"] {
        let updated = engine.update_status(appt.id, status).await.unwrap();
        assert_eq!(updated.status, Status::parse(status).unwrap());
        assert_eq!(updated.start_time, appt.start_time);
        assert_eq!(updated.patient_name, appt.patient_name);
    }
}

#[tokio::test]
async fn reactivation_keeps_both_appointments() {
    let engine = engine();
    let first = engine
        .create(input("Dr. A", "2024-12-29", "09:00", 30))
        .await
        .unwrap();
    engine.update_status(first.id, "Cancelled").await.unwrap();
    engine
        .create(input("Dr. A", "2024-12-29", "09:00", 30))
        .await
        .unwrap();

    // Allowed, logged as an overlap.
    let revived = engine.update_status(first.id, "Scheduled").await.unwrap();
    assert!(revived.is_active());
    assert_eq!(
        engine
            .list(&ListFilter {
                status: Some(Status::Scheduled),
                ..Default::default()
            })
            .await
            .len(),
        2
    );
}

// ── Delete ───────────────────────────────────────────────

#[tokio::test]
async fn delete_is_idempotent() {
    let engine = engine();
    let appt = engine
        .create(input("Dr. A", "2024-12-29", "09:00", 30))
        .await
        .unwrap();

    assert!(engine.delete(appt.id).await.unwrap());
    assert!(!engine.delete(appt.id).await.unwrap());
    assert!(!engine.delete(Ulid::new()).await.unwrap());
    assert_eq!(engine.get(appt.id).await, None);

    // Slot is free again.
    engine
        .create(input("Dr. A", "2024-12-29", "09:00", 30))
        .await
        .unwrap();
}

// ── List ─────────────────────────────────────────────────

#[tokio::test]
async fn list_sorts_by_date_then_time() {
    let engine = engine();
    let c = engine
        .create(input("Dr. A", "2024-12-30", "08:00", 30))
        .await
        .unwrap();
    let b = engine
        .create(input("Dr. A", "2024-12-29", "14:00", 30))
        .await
        .unwrap();
    let a = engine
        .create(input("Dr. B", "2024-12-29", "09:00", 30))
        .await
        .unwrap();
    // Same start as `a`: insertion order breaks the tie.
    let a2 = engine
        .create(input("Dr. C", "2024-12-29", "09:00", 30))
        .await
        .unwrap();

    let ids: Vec<Ulid> = engine
        .list(&ListFilter::default())
        .await
        .iter()
        .map(|x| x.id)
        .collect();
    assert_eq!(ids, vec![a.id, a2.id, b.id, c.id]);
}

#[tokio::test]
async fn list_filters_are_conjunctive() {
    let engine = engine();
    let wanted = engine
        .create(input("Dr. Alice Jones", "2024-12-29", "09:00", 30).with_status("Confirmed"))
        .await
        .unwrap();
    engine
        .create(input("Dr. Alice Jones", "2024-12-29", "10:00", 30))
        .await
        .unwrap();
    engine
        .create(input("Dr. Alice Jones", "2024-12-30", "09:00", 30).with_status("Confirmed"))
        .await
        .unwrap();
    engine
        .create(input("Dr. Bob", "2024-12-29", "11:00", 30).with_status("Confirmed"))
        .await
        .unwrap();

    let filter = ListFilter {
        date: parse_date("2024-12-29"),
        status: Some(Status::Confirmed),
        provider_name_contains: Some("alice".into()),
    };
    assert_eq!(engine.list(&filter).await, vec![wanted]);

    let by_date = ListFilter {
        date: parse_date("2024-12-29"),
        ..Default::default()
    };
    assert_eq!(engine.list(&by_date).await.len(), 3);

    let nobody = ListFilter {
        provider_name_contains: Some("carol".into()),
        ..Default::default()
    };
    assert!(engine.list(&nobody).await.is_empty());
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn mutations_notify_provider_subscribers() {
    let engine = engine();
    let mut dr_a = engine.notify.subscribe("Dr. A");
    let mut everyone = engine.notify.subscribe_all();

    let appt = engine
        .create(input("Dr. A", "2024-12-29", "09:00", 30))
        .await
        .unwrap();
    engine
        .create(input("Dr. B", "2024-12-29", "09:00", 30))
        .await
        .unwrap();
    engine.update_status(appt.id, "Confirmed").await.unwrap();
    engine.delete(appt.id).await.unwrap();

    assert!(matches!(
        dr_a.try_recv().unwrap(),
        Notification::Created { appointment } if appointment.id == appt.id
    ));
    assert!(matches!(
        dr_a.try_recv().unwrap(),
        Notification::StatusChanged { appointment, previous: Status::Scheduled }
            if appointment.status == Status::Confirmed
    ));
    assert!(matches!(
        dr_a.try_recv().unwrap(),
        Notification::Deleted { id, .. } if id == appt.id
    ));
    assert!(dr_a.try_recv().is_err());

    let mut seen = 0;
    while everyone.try_recv().is_ok() {
        seen += 1;
    }
    assert_eq!(seen, 4);
}

#[tokio::test]
async fn rejected_create_sends_nothing() {
    let engine = engine();
    engine
        .create(input("Dr. A", "2024-12-29", "09:00", 30))
        .await
        .unwrap();
    let mut rx = engine.notify.subscribe("Dr. A");
    let _ = engine.create(input("Dr. A", "2024-12-29", "09:00", 30)).await;
    let _ = engine.delete(Ulid::new()).await;
    assert!(rx.try_recv().is_err());
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn wal_replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let (kept, cancelled) = {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        let kept = engine
            .create(input("Dr. A", "2024-12-29", "09:00", 30))
            .await
            .unwrap();
        let cancelled = engine
            .create(input("Dr. A", "2024-12-29", "10:00", 30))
            .await
            .unwrap();
        let gone = engine
            .create(input("Dr. B", "2024-12-29", "09:00", 30))
            .await
            .unwrap();
        engine.update_status(cancelled.id, "Cancelled").await.unwrap();
        engine.delete(gone.id).await.unwrap();
        (kept, cancelled)
    };

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(engine.len().await, 2);
    assert_eq!(engine.get(kept.id).await, Some(kept.clone()));
    assert_eq!(
        engine.get(cancelled.id).await.unwrap().status,
        Status::Cancelled
    );

    // Rebuilt schedule still guards the live slot and frees the cancelled one.
    assert!(matches!(
        engine.create(input("Dr. A", "2024-12-29", "09:10", 10)).await,
        Err(EngineError::Conflict { id, .. }) if id == kept.id
    ));
    engine
        .create(input("Dr. A", "2024-12-29", "10:00", 30))
        .await
        .unwrap();
}

#[tokio::test]
async fn compaction_preserves_state_and_order() {
    let path = test_wal_path("compact.wal");
    let before = {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        let mut ids = Vec::new();
        for (provider, time) in [("Dr. B", "09:00"), ("Dr. A", "09:00"), ("Dr. A", "11:00")] {
            ids.push(
                engine
                    .create(input(provider, "2024-12-29", time, 30))
                    .await
                    .unwrap()
                    .id,
            );
        }
        engine.update_status(ids[2], "Completed").await.unwrap();
        engine.delete(ids[0]).await.unwrap();
        engine
            .create(input("Dr. B", "2024-12-29", "09:00", 30))
            .await
            .unwrap();

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        engine.list(&ListFilter::default()).await
    };

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(engine.list(&ListFilter::default()).await, before);
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_creates_for_one_slot_admit_exactly_one() {
    let engine = Arc::new(engine());
    let mut handles = Vec::new();
    for i in 0..32 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            // Staggered starts that all overlap 09:00-09:30.
            let time = format!("09:{:02}", i % 20);
            engine.create(input("Dr. A", "2024-12-29", &time, 30)).await
        }));
    }

    let mut admitted = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(EngineError::Conflict { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(conflicts, 31);
    assert_eq!(engine.len().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_creates_through_wal_admit_exactly_one() {
    let path = test_wal_path("race.wal");
    let engine = Arc::new(Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap());
    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create(input("Dr. A", "2024-12-29", "09:00", 30))
                .await
                .is_ok()
        }));
    }
    let mut admitted = 0;
    for h in handles {
        if h.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(crate::wal::Wal::replay(&path).unwrap().len(), 1);
}

// ── Randomized checks ────────────────────────────────────

struct Booked {
    id: Ulid,
    provider: &'static str,
    start: i64,
    end: i64,
    active: bool,
}

#[tokio::test]
async fn random_workload_matches_brute_force() {
    let mut rng = StdRng::seed_from_u64(0xA11CE);
    let engine = engine();
    let providers = ["Dr. A", "Dr. B", "Dr. C"];
    let mut booked: Vec<Booked> = Vec::new();

    for _ in 0..600 {
        if !booked.is_empty() && rng.gen_bool(0.2) {
            let idx = rng.gen_range(0..booked.len());
            let status = if rng.gen_bool(0.5) { "Cancelled" } else { "Completed" };
            engine.update_status(booked[idx].id, status).await.unwrap();
            booked[idx].active = false;
            continue;
        }

        let provider = providers[rng.gen_range(0..providers.len())];
        let start = rng.gen_range(0..(3 * 24 * 4)) * 15;
        let duration = rng.gen_range(1..=120);
        let end = start + duration;
        let day = start / 1440;
        let date = format!("2024-12-{:02}", 29 + day);
        let time = format!("{:02}:{:02}", (start % 1440) / 60, start % 60);

        // First blocker in (start, insertion) order; `min_by_key` keeps the earliest on ties.
        let expected = booked
            .iter()
            .filter(|b| b.active && b.provider == provider && b.start < end && start < b.end)
            .min_by_key(|b| b.start)
            .map(|b| b.id);

        match engine.create(input(provider, &date, &time, duration)).await {
            Ok(appt) => {
                assert_eq!(expected, None, "admitted overlapping booking at {date} {time}");
                booked.push(Booked {
                    id: appt.id,
                    provider,
                    start,
                    end,
                    active: true,
                });
            }
            Err(EngineError::Conflict { id, .. }) => {
                assert!(expected.is_some(), "rejected free slot at {date} {time}");
                assert_eq!(Some(id), expected, "wrong blocker reported at {date} {time}");
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    // No two active appointments of one provider overlap.
    let all = engine.list(&ListFilter::default()).await;
    assert_eq!(all.len(), booked.len());
    for (i, a) in all.iter().enumerate() {
        for b in &all[i + 1..] {
            if a.is_active() && b.is_active() && a.provider_name == b.provider_name {
                assert!(!a.span().overlaps(&b.span()), "{} overlaps {}", a.id, b.id);
            }
        }
    }
    assert!(all.windows(2).all(|w| w[0].start() <= w[1].start()));
}

#[test]
fn overlap_is_symmetric() {
    let mut rng = StdRng::seed_from_u64(7);
    let base = parse_date("2024-12-29").unwrap().and_hms_opt(0, 0, 0).unwrap();
    for _ in 0..2000 {
        let a = base + chrono::Duration::minutes(rng.gen_range(0..2880));
        let b = base + chrono::Duration::minutes(rng.gen_range(0..2880));
        let da = rng.gen_range(0..240);
        let db = rng.gen_range(0..240);
        assert_eq!(overlaps(a, da, b, db), overlaps(b, db, a, da));
        if da == 0 || db == 0 {
            assert!(!overlaps(a, da, b, db));
        }
    }
}
