use tracing::{debug, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::find_conflict;
use super::validate::{parse_status, validate_create};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Validate, conflict-check and insert a new appointment.
    ///
    /// The conflict check and the insert run under the same write guard.
    pub async fn create(&self, input: AppointmentInput) -> Result<Appointment, EngineError> {
        let validated = validate_create(&input)?;

        let mut book = self.book.write().await;
        if book.len() >= MAX_APPOINTMENTS {
            return Err(EngineError::LimitExceeded("too many appointments"));
        }

        let existing = book.overlapping(&validated.provider_name, &validated.span);
        if let Some(conflict) = find_conflict(
            &validated.provider_name,
            validated.span.start,
            validated.duration_minutes,
            existing,
        ) {
            warn!(
                "rejected booking for {} at {}: overlaps {}",
                validated.provider_name, validated.span.start, conflict.id
            );
            metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Conflict {
                id: conflict.id,
                date: conflict.date,
                start_time: conflict.start_time,
            });
        }

        let mut id = Ulid::new();
        while book.contains(&id) {
            id = Ulid::new();
        }
        let appointment = validated.into_appointment(id);
        let event = Event::Created {
            appointment: appointment.clone(),
        };
        self.persist_and_apply(&mut book, &event).await?;
        drop(book);

        debug!(
            "created {} for {} at {}",
            appointment.id,
            appointment.provider_name,
            appointment.start()
        );
        self.notify.send(&Notification::Created {
            appointment: appointment.clone(),
        });
        Ok(appointment)
    }

    /// Set the status of an existing appointment. Every transition is allowed.
    pub async fn update_status(
        &self,
        id: Ulid,
        new_status: &str,
    ) -> Result<Appointment, EngineError> {
        let status = parse_status(new_status)?;

        let mut book = self.book.write().await;
        let current = book.get(&id).ok_or(EngineError::NotFound(id))?;
        let previous = current.status;

        if !previous.is_active() && status.is_active() {
            let span = current.span();
            let others = book
                .overlapping(&current.provider_name, &span)
                .filter(|a| a.id != id);
            if let Some(other) =
                find_conflict(&current.provider_name, span.start, current.duration_minutes, others)
            {
                warn!(
                    "reactivating {id} as {status} overlaps active appointment {}",
                    other.id
                );
            }
        }

        let event = Event::StatusChanged { id, status };
        self.persist_and_apply(&mut book, &event).await?;
        let updated = book
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        drop(book);

        debug!("status of {id}: {previous} -> {status}");
        self.notify.send(&Notification::StatusChanged {
            appointment: updated.clone(),
            previous,
        });
        Ok(updated)
    }

    /// Remove an appointment. `Ok(false)` if the id was unknown.
    pub async fn delete(&self, id: Ulid) -> Result<bool, EngineError> {
        let mut book = self.book.write().await;
        let Some(provider_name) = book.get(&id).map(|a| a.provider_name.clone()) else {
            return Ok(false);
        };

        let event = Event::Deleted { id };
        self.persist_and_apply(&mut book, &event).await?;
        drop(book);

        debug!("deleted {id}");
        self.notify
            .send(&Notification::Deleted { id, provider_name });
        Ok(true)
    }

    /// Rewrite the WAL with one `Created` event per live appointment.
    /// No-op without a WAL.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Held across the rewrite so no append can land between snapshot and swap.
        let book = self.book.write().await;
        let events = book.snapshot_events();
        let result = self
            .wal_control(|response| WalCommand::Compact { events, response })
            .await?;
        drop(book);
        match result {
            Some(r) => r.map_err(|e| EngineError::WalError(e.to_string())),
            None => Ok(()),
        }
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal_control(|response| WalCommand::AppendsSinceCompact { response })
            .await
            .ok()
            .flatten()
            .unwrap_or(0)
    }
}
