use ulid::Ulid;

use crate::model::*;

use super::Engine;

impl Engine {
    /// Appointments matching every supplied filter, ordered by date and start
    /// time; ties keep insertion order.
    pub async fn list(&self, filter: &ListFilter) -> Vec<Appointment> {
        self.book.read().await.matching(filter)
    }

    pub async fn get(&self, id: Ulid) -> Option<Appointment> {
        self.book.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.book.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.book.read().await.is_empty()
    }
}
