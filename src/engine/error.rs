use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{ApprovalState, PaymentStatus, ReservationStatus, ResourceId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("invalid range [{start}, {end}): {reason}")]
    InvalidRange {
        start: NaiveDate,
        end: NaiveDate,
        reason: &'static str,
    },
    #[error("resource not found: {0}")]
    ResourceNotFound(ResourceId),
    #[error("resource {resource_id} is not bookable (state: {})", .state.as_str())]
    ResourceNotBookable {
        resource_id: ResourceId,
        state: ApprovalState,
    },
    #[error("resource {resource_id} unavailable: overlaps reservation {conflicting}")]
    ResourceUnavailable {
        resource_id: ResourceId,
        conflicting: Ulid,
    },
    #[error("resource {0} busy: lock wait timed out")]
    ResourceBusy(ResourceId),
    #[error("reservation not found: {0}")]
    NotFound(Ulid),
    #[error("cannot {action} reservation {id} in status {}", .from.as_str())]
    InvalidTransition {
        id: Ulid,
        from: ReservationStatus,
        action: &'static str,
    },
    #[error("cannot record {outcome} for reservation {id} (status {}, payment {})", .status.as_str(), .payment.as_str())]
    InvalidPayment {
        id: Ulid,
        status: ReservationStatus,
        payment: PaymentStatus,
        outcome: &'static str,
    },
    #[error("{actor} may not {action} reservation {id}")]
    NotAuthorized {
        id: Ulid,
        actor: String,
        action: &'static str,
    },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("resource registry error: {0}")]
    Registry(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Transient contention the coordinator (or its caller) may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ResourceBusy(_))
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::InvalidRange { .. } => "invalid_range",
            EngineError::ResourceNotFound(_) => "resource_not_found",
            EngineError::ResourceNotBookable { .. } => "resource_not_bookable",
            EngineError::ResourceUnavailable { .. } => "resource_unavailable",
            EngineError::ResourceBusy(_) => "resource_busy",
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::InvalidPayment { .. } => "invalid_payment",
            EngineError::NotAuthorized { .. } => "not_authorized",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Registry(_) => "registry",
            EngineError::Storage(_) => "storage",
        }
    }
}
