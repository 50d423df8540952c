use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::events::EventKind;
use crate::lifecycle::{self, Actor, PaymentOutcome, Transition};
use crate::limits::*;
use crate::model::*;
use crate::observability::*;

use super::conflict::{check_no_overlap, validate_request};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// The single write path for new reservations.
    ///
    /// Range checks, then under the resource's write lock: re-read the resource,
    /// check the active set for overlap, append to the WAL, apply. Lock-wait
    /// timeouts are retried with exponential backoff; overlaps never are.
    pub async fn create_reservation(
        &self,
        resource_id: &str,
        renter_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        total_amount: u64,
    ) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self
            .create_with_retry(resource_id, renter_id, start, end, total_amount)
            .await;
        metrics::histogram!(CREATE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        match &result {
            Ok(reservation) => {
                metrics::counter!(RESERVATIONS_CREATED_TOTAL).increment(1);
                info!(
                    "reserved {} on {} [{}, {}) for {renter_id}",
                    reservation.id, resource_id, reservation.range.start, reservation.range.end
                );
            }
            Err(e) => {
                metrics::counter!(RESERVATION_REJECTIONS_TOTAL, "reason" => e.label()).increment(1);
                debug!("reservation on {resource_id} refused: {e}");
            }
        }
        result
    }

    async fn create_with_retry(
        &self,
        resource_id: &str,
        renter_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        total_amount: u64,
    ) -> Result<Reservation, EngineError> {
        let range = validate_request(
            resource_id,
            renter_id,
            start,
            end,
            self.clock.today(),
            self.config.allow_past_dates,
        )?;

        // Unknown ids never get a lock entry.
        self.load_bookable(resource_id).await?;

        let mut attempt = 0u32;
        loop {
            match self.try_create(resource_id, renter_id, range, total_amount).await {
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    metrics::counter!(LOCK_RETRIES_TOTAL).increment(1);
                    let backoff = backoff_for(self.config.retry_backoff, attempt);
                    debug!("retrying reservation on {resource_id} in {backoff:?} (attempt {attempt})");
                    tokio::time::sleep(backoff).await;
                }
                result => return result,
            }
        }
    }

    async fn try_create(
        &self,
        resource_id: &str,
        renter_id: &str,
        range: DateRange,
        total_amount: u64,
    ) -> Result<Reservation, EngineError> {
        let book = self.book_for(resource_id);
        let mut guard = self.lock_book(resource_id, book).await?;

        // Re-read under the lock: the approval state may have moved since the pre-check.
        let resource = self.load_bookable(resource_id).await?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many reservations on resource"));
        }
        check_no_overlap(&guard, range, None)?;

        let now = self.clock.now();
        let reservation = Reservation {
            id: Ulid::new(),
            resource_id: resource.id,
            renter_id: renter_id.to_string(),
            owner_id: resource.owner_id,
            range,
            status: ReservationStatus::Pending,
            payment_status: PaymentStatus::Pending,
            total_amount,
            reason: None,
            created_at: now,
            updated_at: now,
        };
        let record = Record::ReservationCreated(reservation.clone());
        self.persist_and_apply(&mut guard, &record).await?;
        // Publish under the lock so subscribers see commit order.
        self.publish(EventKind::Created, &reservation);
        drop(guard);
        Ok(reservation)
    }

    async fn load_bookable(&self, resource_id: &str) -> Result<Resource, EngineError> {
        let resource = self
            .registry
            .get_resource(resource_id)
            .await
            .map_err(|e| EngineError::Registry(e.to_string()))?
            .ok_or_else(|| EngineError::ResourceNotFound(resource_id.to_string()))?;
        if !resource.approval_state.is_bookable() {
            return Err(EngineError::ResourceNotBookable {
                resource_id: resource.id,
                state: resource.approval_state,
            });
        }
        Ok(resource)
    }

    /// Move a reservation along the status axis on behalf of `actor`.
    pub async fn transition(
        &self,
        id: Ulid,
        transition: Transition,
        actor: &Actor,
    ) -> Result<Reservation, EngineError> {
        let result = self.apply_transition(id, &transition, actor).await;
        match &result {
            Ok(r) => {
                metrics::counter!(TRANSITIONS_TOTAL, "transition" => transition.name()).increment(1);
                info!("{} {} by {actor} → {}", transition.name(), id, r.status.as_str());
            }
            Err(e) => {
                metrics::counter!(
                    TRANSITION_FAILURES_TOTAL,
                    "transition" => transition.name(),
                    "reason" => e.label()
                )
                .increment(1);
                debug!("{} {id} by {actor} refused: {e}", transition.name());
            }
        }
        result
    }

    async fn apply_transition(
        &self,
        id: Ulid,
        transition: &Transition,
        actor: &Actor,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let current = guard.get(&id).ok_or(EngineError::NotFound(id))?;
        let applied = lifecycle::apply(current, transition, actor, self.clock.today())?;

        let record = Record::Transitioned {
            id,
            resource_id: guard.resource_id.clone(),
            status: applied.status,
            payment_status: applied.payment_status,
            reason: applied.reason,
            at: self.clock.now(),
        };
        self.persist_and_apply(&mut guard, &record).await?;
        let updated = guard.get(&id).cloned().ok_or(EngineError::NotFound(id))?;
        self.publish(transition.event_kind(), &updated);
        drop(guard);
        Ok(updated)
    }

    /// Record the result of a payment capture. A failed capture leaves the
    /// status untouched; the caller may retry or let the reservation expire.
    pub async fn record_payment(
        &self,
        id: Ulid,
        outcome: PaymentOutcome,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let current = guard.get(&id).ok_or(EngineError::NotFound(id))?;
        let payment_status = lifecycle::next_payment(current, outcome)?;

        let record = Record::PaymentRecorded {
            id,
            resource_id: guard.resource_id.clone(),
            payment_status,
            at: self.clock.now(),
        };
        self.persist_and_apply(&mut guard, &record).await?;
        let updated = guard.get(&id).cloned().ok_or(EngineError::NotFound(id))?;
        self.publish(EventKind::PaymentUpdated, &updated);
        drop(guard);

        metrics::counter!(PAYMENTS_RECORDED_TOTAL, "outcome" => outcome.name()).increment(1);
        info!("payment for {id}: {}", payment_status.as_str());
        Ok(updated)
    }

    /// Approved reservations still unpaid since before `cutoff`.
    pub fn collect_unpaid_expired(&self, cutoff: DateTime<Utc>) -> Vec<Ulid> {
        let mut expired = Vec::new();
        for entry in self.books.iter() {
            // Skip books that are busy; the next sweep will see them.
            let Ok(guard) = entry.value().try_read() else {
                continue;
            };
            expired.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| {
                        r.status == ReservationStatus::Approved
                            && matches!(r.payment_status, PaymentStatus::Pending | PaymentStatus::Failed)
                            && r.updated_at < cutoff
                    })
                    .map(|r| r.id),
            );
        }
        expired
    }

    /// Rewrite the WAL as one creation record per reservation, carrying its current state.
    ///
    /// Writers keep running. The log is fenced first; every book is then read,
    /// and whatever was committed after the fence is copied behind the snapshot,
    /// so a commit the snapshot missed still survives the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _compacting = self.compacting.lock().await;

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Fence { response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        let tail_from = rx
            .await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?;

        // Books are listed after the fence: any record committed before it
        // belongs to a book that already exists, and its writer still holds
        // the write lock until the record is applied.
        let mut records = Vec::new();
        let mut seen = HashSet::new();
        let books: Vec<_> = self.books.iter().map(|e| e.value().clone()).collect();
        for book in books {
            let guard = book.read().await;
            for reservation in &guard.reservations {
                if seen.insert(reservation.id) {
                    records.push(Record::ReservationCreated(reservation.clone()));
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                records,
                tail_from,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// `base * 2^(attempt-1)`, capped so a misconfigured base can't stall forever.
fn backoff_for(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(10);
    base.saturating_mul(factor).min(Duration::from_secs(5))
}
