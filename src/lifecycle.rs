//! Reservation state machine.
//!
//! Two independent axes: `status` (pending → approved → confirmed → completed,
//! with rejected/cancelled exits) and `payment_status` (pending → paid/failed,
//! paid → refunded on cancellation). Everything here is pure; the engine
//! persists whatever these functions return.

use std::fmt;

use chrono::NaiveDate;

use crate::engine::EngineError;
use crate::events::EventKind;
use crate::limits::MAX_REASON_LEN;
use crate::model::{PartyId, PaymentStatus, Reservation, ReservationStatus};

/// Who is asking for a state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// A renter or host, by identity.
    Party(PartyId),
    Admin,
    /// The engine's own background tasks and the payment path.
    System,
}

impl Actor {
    pub fn party(id: impl Into<PartyId>) -> Self {
        Actor::Party(id.into())
    }

    fn is(&self, party: &str) -> bool {
        matches!(self, Actor::Party(id) if id == party)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Party(id) => write!(f, "party {id}"),
            Actor::Admin => f.write_str("admin"),
            Actor::System => f.write_str("system"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Approve,
    Reject { reason: String },
    Confirm,
    Cancel,
    Complete,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Approve => "approve",
            Transition::Reject { .. } => "reject",
            Transition::Confirm => "confirm",
            Transition::Cancel => "cancel",
            Transition::Complete => "complete",
        }
    }

    pub fn event_kind(&self) -> EventKind {
        match self {
            Transition::Approve => EventKind::Approved,
            Transition::Reject { .. } => EventKind::Rejected,
            Transition::Confirm => EventKind::Confirmed,
            Transition::Cancel => EventKind::Cancelled,
            Transition::Complete => EventKind::Completed,
        }
    }
}

/// Result of a payment capture attempt reported by the payment collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Captured,
    Failed,
}

impl PaymentOutcome {
    pub fn name(self) -> &'static str {
        match self {
            PaymentOutcome::Captured => "capture",
            PaymentOutcome::Failed => "failed capture",
        }
    }
}

/// New state of a reservation after a legal transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub status: ReservationStatus,
    pub payment_status: PaymentStatus,
    pub reason: Option<String>,
}

/// The transition table. `None` means the move is never legal from `from`.
pub fn next_status(from: ReservationStatus, transition: &Transition) -> Option<ReservationStatus> {
    use ReservationStatus::*;
    match (from, transition) {
        (Pending, Transition::Approve) => Some(Approved),
        (Pending, Transition::Reject { .. }) => Some(Rejected),
        (Approved, Transition::Confirm) => Some(Confirmed),
        (Approved, Transition::Cancel) => Some(Cancelled),
        (Confirmed, Transition::Complete) => Some(Completed),
        (Confirmed, Transition::Cancel) => Some(Cancelled),
        _ => None,
    }
}

pub fn authorize(
    reservation: &Reservation,
    transition: &Transition,
    actor: &Actor,
) -> Result<(), EngineError> {
    let owner = actor.is(&reservation.owner_id);
    let renter = actor.is(&reservation.renter_id);
    let allowed = match actor {
        Actor::Admin => true,
        Actor::System => matches!(
            transition,
            Transition::Confirm | Transition::Cancel | Transition::Complete
        ),
        Actor::Party(_) => match transition {
            Transition::Approve | Transition::Reject { .. } | Transition::Complete => owner,
            Transition::Confirm => renter,
            Transition::Cancel => owner || renter,
        },
    };
    if allowed {
        Ok(())
    } else {
        Err(EngineError::NotAuthorized {
            id: reservation.id,
            actor: actor.to_string(),
            action: transition.name(),
        })
    }
}

/// Validate and compute a status transition: table legality first, then
/// authority, then the date and payment guards.
pub fn apply(
    reservation: &Reservation,
    transition: &Transition,
    actor: &Actor,
    today: NaiveDate,
) -> Result<Applied, EngineError> {
    let invalid = |action: &'static str| EngineError::InvalidTransition {
        id: reservation.id,
        from: reservation.status,
        action,
    };

    let status = next_status(reservation.status, transition)
        .ok_or_else(|| invalid(transition.name()))?;
    authorize(reservation, transition, actor)?;

    let mut payment_status = reservation.payment_status;
    let mut reason = reservation.reason.clone();

    match transition {
        Transition::Reject { reason: why } => {
            let why = why.trim();
            if why.is_empty() {
                return Err(invalid("reject without a reason"));
            }
            if why.len() > MAX_REASON_LEN {
                return Err(EngineError::LimitExceeded("rejection reason too long"));
            }
            reason = Some(why.to_string());
        }
        Transition::Confirm => {
            if reservation.payment_status != PaymentStatus::Paid {
                return Err(invalid("confirm an unpaid"));
            }
        }
        Transition::Cancel => {
            // Parties may only back out of a confirmed rental before it starts.
            if reservation.status == ReservationStatus::Confirmed
                && matches!(actor, Actor::Party(_))
                && today >= reservation.range.start
            {
                return Err(invalid("cancel an already started"));
            }
            if payment_status == PaymentStatus::Paid {
                payment_status = PaymentStatus::Refunded;
            }
        }
        Transition::Complete => {
            if today < reservation.range.end {
                return Err(invalid("complete an unfinished"));
            }
        }
        Transition::Approve => {}
    }

    Ok(Applied {
        status,
        payment_status,
        reason,
    })
}

/// Payment axis. Capture may be retried after a failure; nothing moves once
/// the reservation is terminal or already paid.
pub fn next_payment(
    reservation: &Reservation,
    outcome: PaymentOutcome,
) -> Result<PaymentStatus, EngineError> {
    let rejected = || EngineError::InvalidPayment {
        id: reservation.id,
        status: reservation.status,
        payment: reservation.payment_status,
        outcome: outcome.name(),
    };
    if reservation.status.is_terminal() {
        return Err(rejected());
    }
    match (reservation.payment_status, outcome) {
        (PaymentStatus::Pending | PaymentStatus::Failed, PaymentOutcome::Captured) => {
            Ok(PaymentStatus::Paid)
        }
        (PaymentStatus::Pending | PaymentStatus::Failed, PaymentOutcome::Failed) => {
            Ok(PaymentStatus::Failed)
        }
        _ => Err(rejected()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{day, range};
    use chrono::Utc;
    use ulid::Ulid;

    const ALL_STATUSES: [ReservationStatus; 6] = [
        ReservationStatus::Pending,
        ReservationStatus::Approved,
        ReservationStatus::Rejected,
        ReservationStatus::Confirmed,
        ReservationStatus::Cancelled,
        ReservationStatus::Completed,
    ];

    fn all_transitions() -> Vec<Transition> {
        vec![
            Transition::Approve,
            Transition::Reject {
                reason: "vehicle in service".into(),
            },
            Transition::Confirm,
            Transition::Cancel,
            Transition::Complete,
        ]
    }

    fn reservation(status: ReservationStatus, payment_status: PaymentStatus) -> Reservation {
        let now = Utc::now();
        Reservation {
            id: Ulid::new(),
            resource_id: "V1".into(),
            renter_id: "renter".into(),
            owner_id: "owner".into(),
            range: range("2024-12-01", "2024-12-05"),
            status,
            payment_status,
            total_amount: 40_000,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn table_matches_documented_moves() {
        use ReservationStatus::*;
        let legal = [
            (Pending, "approve", Approved),
            (Pending, "reject", Rejected),
            (Approved, "confirm", Confirmed),
            (Approved, "cancel", Cancelled),
            (Confirmed, "complete", Completed),
            (Confirmed, "cancel", Cancelled),
        ];
        for from in ALL_STATUSES {
            for t in all_transitions() {
                let expected = legal
                    .iter()
                    .find(|(f, name, _)| *f == from && *name == t.name())
                    .map(|(_, _, to)| *to);
                assert_eq!(next_status(from, &t), expected, "{} from {}", t.name(), from.as_str());
            }
        }
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for from in [
            ReservationStatus::Rejected,
            ReservationStatus::Cancelled,
            ReservationStatus::Completed,
        ] {
            for t in all_transitions() {
                let r = reservation(from, PaymentStatus::Paid);
                let err = apply(&r, &t, &Actor::Admin, day("2025-01-01")).unwrap_err();
                assert!(matches!(err, EngineError::InvalidTransition { .. }), "{err}");
            }
        }
    }

    #[test]
    fn completed_to_approved_is_invalid() {
        let r = reservation(ReservationStatus::Completed, PaymentStatus::Paid);
        let err = apply(&r, &Transition::Approve, &Actor::party("owner"), day("2024-12-10")).unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidTransition {
                id: r.id,
                from: ReservationStatus::Completed,
                action: "approve",
            }
        );
    }

    #[test]
    fn owner_approves_renter_cannot() {
        let r = reservation(ReservationStatus::Pending, PaymentStatus::Pending);
        let today = day("2024-11-01");
        let ok = apply(&r, &Transition::Approve, &Actor::party("owner"), today).unwrap();
        assert_eq!(ok.status, ReservationStatus::Approved);

        let err = apply(&r, &Transition::Approve, &Actor::party("renter"), today).unwrap_err();
        assert!(matches!(err, EngineError::NotAuthorized { action: "approve", .. }));

        let err = apply(&r, &Transition::Approve, &Actor::System, today).unwrap_err();
        assert!(matches!(err, EngineError::NotAuthorized { .. }));
    }

    #[test]
    fn strangers_cannot_cancel() {
        let r = reservation(ReservationStatus::Approved, PaymentStatus::Pending);
        let err = apply(&r, &Transition::Cancel, &Actor::party("mallory"), day("2024-11-01")).unwrap_err();
        assert!(matches!(err, EngineError::NotAuthorized { .. }));
    }

    #[test]
    fn reject_requires_reason_and_stores_it() {
        let r = reservation(ReservationStatus::Pending, PaymentStatus::Pending);
        let today = day("2024-11-01");
        let blank = Transition::Reject { reason: "   ".into() };
        assert!(matches!(
            apply(&r, &blank, &Actor::party("owner"), today),
            Err(EngineError::InvalidTransition { .. })
        ));

        let long = Transition::Reject {
            reason: "x".repeat(MAX_REASON_LEN + 1),
        };
        assert_eq!(
            apply(&r, &long, &Actor::party("owner"), today),
            Err(EngineError::LimitExceeded("rejection reason too long"))
        );

        let ok = apply(
            &r,
            &Transition::Reject { reason: " no insurance ".into() },
            &Actor::party("owner"),
            today,
        )
        .unwrap();
        assert_eq!(ok.status, ReservationStatus::Rejected);
        assert_eq!(ok.reason.as_deref(), Some("no insurance"));
    }

    #[test]
    fn confirm_needs_captured_payment() {
        let today = day("2024-11-01");
        let unpaid = reservation(ReservationStatus::Approved, PaymentStatus::Pending);
        assert!(matches!(
            apply(&unpaid, &Transition::Confirm, &Actor::System, today),
            Err(EngineError::InvalidTransition { .. })
        ));

        let paid = reservation(ReservationStatus::Approved, PaymentStatus::Paid);
        let ok = apply(&paid, &Transition::Confirm, &Actor::party("renter"), today).unwrap();
        assert_eq!(ok.status, ReservationStatus::Confirmed);
        assert_eq!(ok.payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn cancel_after_payment_refunds() {
        let r = reservation(ReservationStatus::Confirmed, PaymentStatus::Paid);
        let ok = apply(&r, &Transition::Cancel, &Actor::party("renter"), day("2024-11-20")).unwrap();
        assert_eq!(ok.status, ReservationStatus::Cancelled);
        assert_eq!(ok.payment_status, PaymentStatus::Refunded);
    }

    #[test]
    fn cancel_before_payment_keeps_payment_status() {
        let r = reservation(ReservationStatus::Approved, PaymentStatus::Failed);
        let ok = apply(&r, &Transition::Cancel, &Actor::System, day("2024-11-20")).unwrap();
        assert_eq!(ok.payment_status, PaymentStatus::Failed);
    }

    #[test]
    fn confirmed_cancellation_window_closes_at_start() {
        let r = reservation(ReservationStatus::Confirmed, PaymentStatus::Paid);
        let started = day("2024-12-01");
        assert!(matches!(
            apply(&r, &Transition::Cancel, &Actor::party("owner"), started),
            Err(EngineError::InvalidTransition { .. })
        ));
        // admins override the policy
        let ok = apply(&r, &Transition::Cancel, &Actor::Admin, started).unwrap();
        assert_eq!(ok.status, ReservationStatus::Cancelled);
    }

    #[test]
    fn complete_only_after_range_elapsed() {
        let r = reservation(ReservationStatus::Confirmed, PaymentStatus::Paid);
        assert!(matches!(
            apply(&r, &Transition::Complete, &Actor::party("owner"), day("2024-12-04")),
            Err(EngineError::InvalidTransition { .. })
        ));
        let ok = apply(&r, &Transition::Complete, &Actor::party("owner"), day("2024-12-05")).unwrap();
        assert_eq!(ok.status, ReservationStatus::Completed);
    }

    #[test]
    fn payment_axis() {
        let pending = reservation(ReservationStatus::Approved, PaymentStatus::Pending);
        assert_eq!(next_payment(&pending, PaymentOutcome::Captured), Ok(PaymentStatus::Paid));
        assert_eq!(next_payment(&pending, PaymentOutcome::Failed), Ok(PaymentStatus::Failed));

        let failed = reservation(ReservationStatus::Approved, PaymentStatus::Failed);
        assert_eq!(next_payment(&failed, PaymentOutcome::Captured), Ok(PaymentStatus::Paid));
        assert_eq!(next_payment(&failed, PaymentOutcome::Failed), Ok(PaymentStatus::Failed));

        let paid = reservation(ReservationStatus::Approved, PaymentStatus::Paid);
        assert!(matches!(
            next_payment(&paid, PaymentOutcome::Captured),
            Err(EngineError::InvalidPayment { .. })
        ));

        let refunded = reservation(ReservationStatus::Cancelled, PaymentStatus::Refunded);
        assert!(next_payment(&refunded, PaymentOutcome::Captured).is_err());

        let rejected = reservation(ReservationStatus::Rejected, PaymentStatus::Pending);
        assert!(next_payment(&rejected, PaymentOutcome::Captured).is_err());
    }

    #[test]
    fn transitions_map_to_event_kinds() {
        assert_eq!(Transition::Approve.event_kind().as_str(), "reservation.approved");
        assert_eq!(Transition::Cancel.event_kind().as_str(), "reservation.cancelled");
        assert_eq!(Transition::Complete.event_kind().as_str(), "reservation.completed");
    }
}
