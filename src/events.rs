use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Reservation, ResourceId};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    #[serde(rename = "reservation.created")]
    Created,
    #[serde(rename = "reservation.approved")]
    Approved,
    #[serde(rename = "reservation.rejected")]
    Rejected,
    #[serde(rename = "reservation.confirmed")]
    Confirmed,
    #[serde(rename = "reservation.cancelled")]
    Cancelled,
    #[serde(rename = "reservation.completed")]
    Completed,
    #[serde(rename = "reservation.payment_updated")]
    PaymentUpdated,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Created => "reservation.created",
            EventKind::Approved => "reservation.approved",
            EventKind::Rejected => "reservation.rejected",
            EventKind::Confirmed => "reservation.confirmed",
            EventKind::Cancelled => "reservation.cancelled",
            EventKind::Completed => "reservation.completed",
            EventKind::PaymentUpdated => "reservation.payment_updated",
        }
    }
}

/// One notification per committed change, for the notification/ledger side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub reservation_id: Ulid,
    pub resource_id: ResourceId,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl LifecycleEvent {
    /// Snapshot the reservation's post-change state into the payload.
    pub fn for_reservation(kind: EventKind, reservation: &Reservation) -> Self {
        let payload = serde_json::json!({
            "renter_id": reservation.renter_id,
            "owner_id": reservation.owner_id,
            "start_date": reservation.range.start,
            "end_date": reservation.range.end,
            "status": reservation.status,
            "payment_status": reservation.payment_status,
            "total_amount": reservation.total_amount,
            "reason": reservation.reason,
        });
        Self {
            kind,
            reservation_id: reservation.id,
            resource_id: reservation.resource_id.clone(),
            payload,
            at: reservation.updated_at,
        }
    }
}

/// Fire-and-forget fan-out of lifecycle events. Publishing never blocks and
/// never fails the caller: slow subscribers lag and lose the oldest events.
pub struct EventHub {
    all: broadcast::Sender<LifecycleEvent>,
    channels: DashMap<ResourceId, broadcast::Sender<LifecycleEvent>>,
    capacity: usize,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            all: broadcast::channel(capacity).0,
            channels: DashMap::new(),
            capacity,
        }
    }

    /// Every event for every resource.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.all.subscribe()
    }

    /// Events for one resource. Creates the channel if needed.
    pub fn subscribe_resource(&self, resource_id: &str) -> broadcast::Receiver<LifecycleEvent> {
        let capacity = self.capacity;
        self.channels
            .entry(resource_id.to_string())
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe()
    }

    /// Publish an event. No-op if nobody is listening.
    pub fn publish(&self, event: LifecycleEvent) {
        metrics::counter!(crate::observability::EVENTS_PUBLISHED_TOTAL, "kind" => event.kind.as_str())
            .increment(1);
        let mut abandoned = false;
        if let Some(sender) = self.channels.get(&event.resource_id) {
            abandoned = sender.send(event.clone()).is_err();
        }
        if abandoned {
            // every per-resource receiver is gone
            self.channels
                .remove_if(&event.resource_id, |_, sender| sender.receiver_count() == 0);
        }
        let _ = self.all.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PaymentStatus, ReservationStatus, range};

    fn event(resource_id: &str, kind: EventKind) -> LifecycleEvent {
        let now = Utc::now();
        let reservation = Reservation {
            id: Ulid::new(),
            resource_id: resource_id.into(),
            renter_id: "renter".into(),
            owner_id: "owner".into(),
            range: range("2024-12-01", "2024-12-05"),
            status: ReservationStatus::Pending,
            payment_status: PaymentStatus::Pending,
            total_amount: 12_500,
            reason: None,
            created_at: now,
            updated_at: now,
        };
        LifecycleEvent::for_reservation(kind, &reservation)
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = EventHub::default();
        let mut rx = hub.subscribe_resource("V1");

        let sent = event("V1", EventKind::Created);
        hub.publish(sent.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn global_subscriber_sees_all_resources() {
        let hub = EventHub::default();
        let mut rx = hub.subscribe();
        hub.publish(event("V1", EventKind::Created));
        hub.publish(event("V2", EventKind::Approved));

        assert_eq!(rx.recv().await.unwrap().resource_id, "V1");
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Approved);
    }

    #[tokio::test]
    async fn resource_subscriber_is_scoped() {
        let hub = EventHub::default();
        let mut rx = hub.subscribe_resource("V1");
        hub.publish(event("V2", EventKind::Created));
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let hub = EventHub::default();
        hub.publish(event("V1", EventKind::Cancelled));
    }

    #[test]
    fn dropped_resource_channels_are_pruned() {
        let hub = EventHub::default();
        drop(hub.subscribe_resource("V1"));
        hub.publish(event("V1", EventKind::Created));
        assert!(hub.channels.get("V1").is_none());
    }

    #[test]
    fn payload_is_json_with_dotted_kind() {
        let e = event("V1", EventKind::Created);
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "reservation.created");
        assert_eq!(json["payload"]["start_date"], "2024-12-01");
        assert_eq!(json["payload"]["status"], "pending");
        assert_eq!(json["payload"]["total_amount"], 12_500);
    }
}
