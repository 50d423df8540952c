use ulid::Ulid;

use crate::model::*;

use super::conflict::has_overlap;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let resource_id = self
            .reservation_to_resource
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))?;
        let book = self
            .get_book(&resource_id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = book.read().await;
        guard.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Active reservations on a resource overlapping `window`, ordered by start date.
    /// Unknown resources simply have none.
    pub async fn list_active_for_resource(
        &self,
        resource_id: &str,
        window: DateRange,
    ) -> Vec<Reservation> {
        let Some(book) = self.get_book(resource_id) else {
            return Vec::new();
        };
        let guard = book.read().await;
        guard.active_overlapping(window, None).cloned().collect()
    }

    /// Every reservation currently in `status`, ordered by resource then start date.
    pub async fn list_by_status(&self, status: ReservationStatus) -> Vec<Reservation> {
        let mut books: Vec<_> = self
            .books
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        books.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = Vec::new();
        for (_, book) in books {
            let guard = book.read().await;
            out.extend(guard.reservations.iter().filter(|r| r.status == status).cloned());
        }
        out
    }

    /// Point-in-time overlap check. Takes only a read lock, so the answer may be
    /// stale by the time the caller acts on it; `create_reservation` re-checks
    /// under the write lock.
    pub async fn has_overlap(
        &self,
        resource_id: &str,
        range: DateRange,
        exclude: Option<Ulid>,
    ) -> bool {
        match self.get_book(resource_id) {
            Some(book) => has_overlap(&*book.read().await, range, exclude),
            None => false,
        }
    }
}
