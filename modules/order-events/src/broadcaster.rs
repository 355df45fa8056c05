use event_bus::{BusMessage, EventBus, InMemoryBus};
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;

use crate::models::ShipmentUpdateEvent;
use crate::{OrderEventsError, Result};

/// Subject every shipment-update notification is published under. No
/// wildcards are used on either side — one topic is enough for this
/// service's single broadcast surface.
const SUBJECT: &str = "orders.shipments.updated";

/// In-process pub/sub for the Change Broadcaster (§4.7).
///
/// Built on the platform's in-memory bus rather than a bare
/// `tokio::sync::broadcast::Sender` so the drop-oldest-on-lag backpressure
/// behavior and multi-subscriber fan-out come from the same tested
/// implementation every other module on this platform relies on.
#[derive(Clone)]
pub struct Broadcaster {
    bus: Arc<InMemoryBus>,
}

impl Broadcaster {
    /// `capacity` bounds how many unconsumed notifications a slow SSE
    /// client can fall behind by before the oldest are dropped in its
    /// favor (§4.7, §5).
    pub fn new(capacity: usize) -> Self {
        Self {
            bus: Arc::new(InMemoryBus::with_capacity(capacity)),
        }
    }

    pub async fn publish(&self, event: &ShipmentUpdateEvent) {
        let payload = match serde_json::to_vec(event) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(error = %err, order_id = %event.order_id, "failed to serialize shipment update for broadcast");
                return;
            }
        };

        if let Err(err) = self.bus.publish(SUBJECT, payload).await {
            tracing::warn!(error = %err, order_id = %event.order_id, "failed to publish shipment update");
        }
    }

    /// Subscribe to the stream of shipment-update events. A lagging
    /// subscriber silently skips to the oldest still-buffered event rather
    /// than blocking publishers or erroring out (§4.7).
    pub async fn subscribe(&self) -> Result<BoxStream<'static, ShipmentUpdateEvent>> {
        let stream = self
            .bus
            .subscribe(SUBJECT)
            .await
            .map_err(|e| OrderEventsError::Broadcast(e.to_string()))?;

        Ok(stream
            .filter_map(|msg: BusMessage| async move {
                serde_json::from_slice::<ShipmentUpdateEvent>(&msg.payload).ok()
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_event(order_id: &str) -> ShipmentUpdateEvent {
        ShipmentUpdateEvent {
            order_id: order_id.to_string(),
            server_ts: Utc::now(),
            changed_fields: serde_json::json!({"courier_status": "in_transit"}),
            summary: "shipment updated".to_string(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let broadcaster = Broadcaster::new(16);
        let mut stream = broadcaster.subscribe().await.unwrap();

        broadcaster.publish(&sample_event("o1")).await;

        let received = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");

        assert_eq!(received.order_id, "o1");
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_a_copy() {
        let broadcaster = Broadcaster::new(16);
        let mut s1 = broadcaster.subscribe().await.unwrap();
        let mut s2 = broadcaster.subscribe().await.unwrap();

        broadcaster.publish(&sample_event("o2")).await;

        let r1 = tokio::time::timeout(std::time::Duration::from_secs(1), s1.next())
            .await
            .unwrap()
            .unwrap();
        let r2 = tokio::time::timeout(std::time::Duration::from_secs(1), s2.next())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(r1.order_id, "o2");
        assert_eq!(r2.order_id, "o2");
    }
}
