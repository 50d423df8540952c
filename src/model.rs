use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type ResourceId = String;
pub type PartyId = String;

/// Half-open date range `[start, end)`. `end` is the hand-over day, so a
/// reservation ending on D and another starting on D do not overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateRange start must be before end");
        Self { start, end }
    }

    /// Returns `None` unless `start < end`.
    pub fn checked(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day < self.end
    }
}

/// Approval state of a listed vehicle. Owned by the external approval workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Draft,
    Pending,
    Approved,
    Rejected,
    Active,
    Inactive,
}

impl ApprovalState {
    pub fn is_bookable(self) -> bool {
        matches!(self, ApprovalState::Approved | ApprovalState::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalState::Draft => "draft",
            ApprovalState::Pending => "pending",
            ApprovalState::Approved => "approved",
            ApprovalState::Rejected => "rejected",
            ApprovalState::Active => "active",
            ApprovalState::Inactive => "inactive",
        }
    }
}

/// A bookable vehicle as seen through the resource catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub owner_id: PartyId,
    pub approval_state: ApprovalState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
    Confirmed,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    /// Cancelled and rejected reservations leave the active set.
    pub fn is_active(self) -> bool {
        !matches!(self, ReservationStatus::Cancelled | ReservationStatus::Rejected)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReservationStatus::Rejected | ReservationStatus::Cancelled | ReservationStatus::Completed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: ResourceId,
    pub renter_id: PartyId,
    pub owner_id: PartyId,
    pub range: DateRange,
    pub status: ReservationStatus,
    pub payment_status: PaymentStatus,
    /// Opaque amount in minor currency units, supplied by the caller.
    pub total_amount: u64,
    /// Set when the reservation is rejected.
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// All reservations ever made against one resource, sorted by `range.start`.
/// Reservations are never removed; cancelled and rejected ones are skipped
/// by the active-set queries.
#[derive(Debug, Clone)]
pub struct ResourceBook {
    pub resource_id: ResourceId,
    pub reservations: Vec<Reservation>,
    /// id → start date. Ranges never change, so this narrows a lookup to one
    /// binary search plus the reservations sharing that start.
    starts: HashMap<Ulid, NaiveDate>,
}

impl ResourceBook {
    pub fn new(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            reservations: Vec::new(),
            starts: HashMap::new(),
        }
    }

    /// Insert maintaining sort order by range.start. A reservation already
    /// present is replaced in place.
    pub fn insert(&mut self, reservation: Reservation) {
        if let Some(existing) = self.get_mut(&reservation.id) {
            *existing = reservation;
            return;
        }
        let pos = self
            .reservations
            .partition_point(|r| r.range.start <= reservation.range.start);
        self.starts.insert(reservation.id, reservation.range.start);
        self.reservations.insert(pos, reservation);
    }

    fn position(&self, id: &Ulid) -> Option<usize> {
        let start = *self.starts.get(id)?;
        let first = self.reservations.partition_point(|r| r.range.start < start);
        self.reservations[first..]
            .iter()
            .take_while(|r| r.range.start == start)
            .position(|r| r.id == *id)
            .map(|offset| first + offset)
    }

    pub fn get(&self, id: &Ulid) -> Option<&Reservation> {
        self.position(id).map(|i| &self.reservations[i])
    }

    pub fn get_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        let i = self.position(id)?;
        self.reservations.get_mut(i)
    }

    /// Reservations (any status) whose range overlaps the window.
    /// Binary search skips everything starting at or after `window.end`.
    pub fn overlapping(&self, window: DateRange) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.range.start < window.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.range.end > window.start)
    }

    /// Active-set members overlapping the window, optionally ignoring one reservation.
    pub fn active_overlapping(
        &self,
        window: DateRange,
        exclude: Option<Ulid>,
    ) -> impl Iterator<Item = &Reservation> {
        self.overlapping(window)
            .filter(move |r| r.is_active() && Some(r.id) != exclude)
    }

    pub fn active_count(&self) -> usize {
        self.reservations.iter().filter(|r| r.is_active()).count()
    }
}

/// WAL record format. Flat, one record per committed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    ReservationCreated(Reservation),
    Transitioned {
        id: Ulid,
        resource_id: ResourceId,
        status: ReservationStatus,
        payment_status: PaymentStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    PaymentRecorded {
        id: Ulid,
        resource_id: ResourceId,
        payment_status: PaymentStatus,
        at: DateTime<Utc>,
    },
}

impl Record {
    pub fn resource_id(&self) -> &str {
        match self {
            Record::ReservationCreated(r) => &r.resource_id,
            Record::Transitioned { resource_id, .. } | Record::PaymentRecorded { resource_id, .. } => {
                resource_id
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn day(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

#[cfg(test)]
pub(crate) fn range(start: &str, end: &str) -> DateRange {
    DateRange::new(day(start), day(end))
}
