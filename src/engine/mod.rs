mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;
mod validate;

pub use conflict::{find_conflict, overlaps};
pub use error::{EngineError, ValidationError};
pub use store::AppointmentBook;
pub use validate::{parse_status, validate_create, ValidatedAppointment};

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::info;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::{self, Wal, WalCommand};

/// The appointment store.
///
/// The whole collection sits behind one `RwLock`. Reads share it; every
/// mutation holds the write half from validation-against-state through WAL
/// commit and apply, so the conflict check and the insert it guards can never
/// interleave with another writer.
pub struct Engine {
    pub(super) book: RwLock<AppointmentBook>,
    /// `None` runs the store without durability.
    pub(super) wal_tx: Option<mpsc::Sender<WalCommand>>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    /// Open a durable store, rebuilding state from the WAL at `wal_path`.
    /// Must be called inside a tokio runtime (spawns the WAL writer).
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;

        let mut book = AppointmentBook::new();
        for event in &events {
            book.apply(event);
        }
        info!(
            "replayed {} events from {}: {} appointments",
            events.len(),
            wal_path.display(),
            book.len()
        );
        metrics::gauge!(crate::observability::APPOINTMENTS).set(book.len() as f64);

        Ok(Self {
            book: RwLock::new(book),
            wal_tx: Some(wal::spawn_writer(wal)),
            notify,
        })
    }

    /// In-memory store with no WAL.
    pub fn ephemeral(notify: Arc<NotifyHub>) -> Self {
        Self {
            book: RwLock::new(AppointmentBook::new()),
            wal_tx: None,
            notify,
        }
    }

    /// Hand one event to the group-commit writer and wait for fsync.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Durably record `event`, then apply it. Caller holds the write lock.
    pub(super) async fn persist_and_apply(
        &self,
        book: &mut AppointmentBook,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        book.apply(event);
        metrics::gauge!(crate::observability::APPOINTMENTS).set(book.len() as f64);
        Ok(())
    }

    /// Send a control command to the WAL writer. `None` when running without a WAL.
    pub(super) async fn wal_control<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> WalCommand,
    ) -> Result<Option<T>, EngineError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(None);
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(make(tx))
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map(Some)
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }
}
