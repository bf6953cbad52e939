use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone)]
struct Stored {
    appointment: Appointment,
    /// Insertion sequence; replays in WAL order, so stable across restarts.
    seq: u64,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    id: Ulid,
    span: Span,
}

/// One provider's appointments (any status), sorted by `(span.start, seq)`.
#[derive(Debug, Default)]
struct ProviderSchedule {
    slots: Vec<Slot>,
}

impl ProviderSchedule {
    /// Slots whose span overlaps the query window.
    /// Binary search skips slots starting at or after `query.end`.
    fn overlapping<'a>(&'a self, query: &'a Span) -> impl Iterator<Item = &'a Slot> + 'a {
        let right_bound = self.slots.partition_point(|s| s.span.start < query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |s| s.span.end > query.start)
    }

    /// Newest sequence number always sorts last among equal starts.
    fn insert(&mut self, slot: Slot) {
        let pos = self
            .slots
            .partition_point(|s| s.span.start <= slot.span.start);
        self.slots.insert(pos, slot);
    }

    fn remove(&mut self, id: Ulid) {
        if let Some(pos) = self.slots.iter().position(|s| s.id == id) {
            self.slots.remove(pos);
        }
    }
}

/// The appointment collection: an id index plus a per-provider ordered schedule.
/// No locking here; the engine guards the whole book with one lock.
#[derive(Debug, Default)]
pub struct AppointmentBook {
    by_id: HashMap<Ulid, Stored>,
    schedules: HashMap<String, ProviderSchedule>,
    next_seq: u64,
}

impl AppointmentBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn contains(&self, id: &Ulid) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &Ulid) -> Option<&Appointment> {
        self.by_id.get(id).map(|s| &s.appointment)
    }

    /// Appointments of one provider whose interval touches `span`, in schedule order.
    pub fn overlapping<'a>(
        &'a self,
        provider_name: &'a str,
        span: &'a Span,
    ) -> impl Iterator<Item = &'a Appointment> + 'a {
        self.schedules
            .get(provider_name)
            .into_iter()
            .flat_map(move |sched| sched.overlapping(span))
            .filter_map(|slot| self.get(&slot.id))
    }

    /// All appointments matching the filter, sorted by start then insertion order.
    pub fn matching(&self, filter: &ListFilter) -> Vec<Appointment> {
        let mut hits: Vec<&Stored> = self
            .by_id
            .values()
            .filter(|s| filter.matches(&s.appointment))
            .collect();
        hits.sort_by_key(|s| (s.appointment.start(), s.seq));
        hits.into_iter().map(|s| s.appointment.clone()).collect()
    }

    /// Events that recreate the current state, in insertion order.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut stored: Vec<&Stored> = self.by_id.values().collect();
        stored.sort_by_key(|s| s.seq);
        stored
            .into_iter()
            .map(|s| Event::Created {
                appointment: s.appointment.clone(),
            })
            .collect()
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::Created { appointment } => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.schedules
                    .entry(appointment.provider_name.clone())
                    .or_default()
                    .insert(Slot {
                        id: appointment.id,
                        span: appointment.span(),
                    });
                self.by_id.insert(
                    appointment.id,
                    Stored {
                        appointment: appointment.clone(),
                        seq,
                    },
                );
            }
            Event::StatusChanged { id, status } => {
                if let Some(stored) = self.by_id.get_mut(id) {
                    stored.appointment.status = *status;
                }
            }
            Event::Deleted { id } => {
                let Some(stored) = self.by_id.remove(id) else {
                    return;
                };
                let provider = &stored.appointment.provider_name;
                if let Some(sched) = self.schedules.get_mut(provider) {
                    sched.remove(*id);
                    if sched.slots.is_empty() {
                        self.schedules.remove(provider);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn appt(provider: &str, date: &str, time: &str, minutes: u32) -> Appointment {
        Appointment {
            id: Ulid::new(),
            patient_name: "Patient".into(),
            provider_name: provider.into(),
            date: parse_date(date).unwrap(),
            start_time: parse_time(time).unwrap(),
            duration_minutes: minutes,
            status: Status::Scheduled,
            mode: "Phone".into(),
        }
    }

    fn window(date: &str, time: &str, minutes: u32) -> Span {
        let start: NaiveDateTime = parse_date(date).unwrap().and_time(parse_time(time).unwrap());
        Span::starting_at(start, minutes)
    }

    fn book_with(appts: &[Appointment]) -> AppointmentBook {
        let mut book = AppointmentBook::new();
        for a in appts {
            book.apply(&Event::Created {
                appointment: a.clone(),
            });
        }
        book
    }

    #[test]
    fn overlapping_uses_provider_schedule() {
        let a = appt("Dr. A", "2024-12-29", "09:00", 30);
        let b = appt("Dr. A", "2024-12-29", "11:00", 30);
        let c = appt("Dr. B", "2024-12-29", "09:00", 30);
        let book = book_with(&[a.clone(), b, c]);

        let query = window("2024-12-29", "09:15", 30);
        let hits: Vec<_> = book.overlapping("Dr. A", &query).map(|x| x.id).collect();
        assert_eq!(hits, vec![a.id]);
        assert_eq!(book.overlapping("Dr. Z", &query).count(), 0);
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let a = appt("Dr. A", "2024-12-29", "09:00", 30);
        let book = book_with(&[a]);
        let query = window("2024-12-29", "09:30", 30);
        assert_eq!(book.overlapping("Dr. A", &query).count(), 0);
    }

    #[test]
    fn overlapping_long_slot_spanning_query() {
        let a = appt("Dr. A", "2024-12-29", "08:00", 600);
        let b = appt("Dr. A", "2024-12-29", "12:00", 15);
        let book = book_with(&[a.clone(), b.clone()]);
        let query = window("2024-12-29", "12:05", 5);
        let hits: Vec<_> = book.overlapping("Dr. A", &query).map(|x| x.id).collect();
        assert_eq!(hits, vec![a.id, b.id]);
    }

    #[test]
    fn matching_orders_by_start_then_insertion() {
        let late = appt("Dr. A", "2024-12-30", "08:00", 30);
        let first_tie = appt("Dr. B", "2024-12-29", "10:00", 30);
        let early = appt("Dr. C", "2024-12-29", "09:00", 30);
        let second_tie = appt("Dr. D", "2024-12-29", "10:00", 30);
        let book = book_with(&[
            late.clone(),
            first_tie.clone(),
            early.clone(),
            second_tie.clone(),
        ]);
        let ids: Vec<_> = book
            .matching(&ListFilter::default())
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![early.id, first_tie.id, second_tie.id, late.id]);
    }

    #[test]
    fn status_change_and_delete_apply() {
        let a = appt("Dr. A", "2024-12-29", "09:00", 30);
        let mut book = book_with(&[a.clone()]);

        book.apply(&Event::StatusChanged {
            id: a.id,
            status: Status::Cancelled,
        });
        assert_eq!(book.get(&a.id).unwrap().status, Status::Cancelled);

        book.apply(&Event::Deleted { id: a.id });
        assert!(book.is_empty());
        assert!(book.schedules.is_empty());

        // Unknown ids are ignored
        book.apply(&Event::Deleted { id: a.id });
        book.apply(&Event::StatusChanged {
            id: Ulid::new(),
            status: Status::Confirmed,
        });
        assert!(book.is_empty());
    }

    #[test]
    fn snapshot_preserves_insertion_order_and_status() {
        let a = appt("Dr. A", "2024-12-29", "11:00", 30);
        let b = appt("Dr. A", "2024-12-29", "09:00", 30);
        let mut book = book_with(&[a.clone(), b.clone()]);
        book.apply(&Event::StatusChanged {
            id: b.id,
            status: Status::Completed,
        });

        let events = book.snapshot_events();
        let mut replayed = AppointmentBook::new();
        for e in &events {
            replayed.apply(e);
        }
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed.get(&b.id).unwrap().status, Status::Completed);
        match &events[0] {
            Event::Created { appointment } => assert_eq!(appointment.id, a.id),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
