//! ==============================================================================
//! live.rs - fan-out of readings and transitions to dashboard streams
//! ==============================================================================
//!
//! backed by a bounded tokio broadcast channel:
//!     - every receiver keeps its own cursor into a ring of `capacity` events
//!       (tokio sizes the ring to a power of two, so config insists on one)
//!     - a receiver that falls behind loses its oldest events, nobody else does
//!     - send never waits, so a stuck SSE client cannot stall the control loop
//!     - dropped receivers simply stop counting as subscribers
//!
//! ==============================================================================

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

use crate::domain::LiveEvent;

#[derive(Clone)]
pub struct LiveBroadcaster {
    sender: broadcast::Sender<LiveEvent>,
}

impl LiveBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// push to every current subscriber; returns how many there were
    pub fn publish(&self, event: LiveEvent) -> usize {
        // an error only means nobody is listening right now
        self.sender.send(event).unwrap_or(0)
    }

    /// events published from now on, oldest dropped if this subscriber lags
    pub fn subscribe(&self) -> impl Stream<Item = LiveEvent> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(err) => {
                debug!("live subscriber {}; oldest events dropped", err);
                None
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Transition, TransitionReason};
    use chrono::{Duration, TimeZone, Utc};
    use std::pin::pin;

    fn event(n: i64) -> LiveEvent {
        LiveEvent::Transition(Transition {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(n),
            previous_relay_on: false,
            new_relay_on: true,
            reason: TransitionReason::Hysteresis,
        })
    }

    fn second(event: &LiveEvent) -> i64 {
        match event {
            LiveEvent::Transition(t) => t.timestamp.timestamp() - 1_704_067_200,
            LiveEvent::Reading { .. } => -1,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let live = LiveBroadcaster::new(5);
        let mut a = pin!(live.subscribe());
        let mut b = pin!(live.subscribe());

        assert_eq!(live.publish(event(1)), 2);
        assert_eq!(second(&a.next().await.unwrap()), 1);
        assert_eq!(second(&b.next().await.unwrap()), 1);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_only_future_events() {
        let live = LiveBroadcaster::new(5);
        let _early = live.subscribe();
        live.publish(event(1));

        let mut late = pin!(live.subscribe());
        live.publish(event(2));
        assert_eq!(second(&late.next().await.unwrap()), 2);
    }

    #[tokio::test]
    async fn test_stuck_subscriber_is_bounded_and_does_not_block_others() {
        let live = LiveBroadcaster::new(4);
        let mut stuck = pin!(live.subscribe());
        let mut healthy = pin!(live.subscribe());

        for n in 0..10 {
            live.publish(event(n));
            // the healthy subscriber keeps up
            assert_eq!(second(&healthy.next().await.unwrap()), n);
        }

        // the stuck one only gets the newest `capacity` events
        drop(live);
        let mut seen = Vec::new();
        while let Some(e) = stuck.next().await {
            seen.push(second(&e));
        }
        assert_eq!(seen, vec![6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn test_dropped_subscribers_are_pruned() {
        let live = LiveBroadcaster::new(2);
        let sub = live.subscribe();
        assert_eq!(live.subscriber_count(), 1);
        drop(sub);
        assert_eq!(live.subscriber_count(), 0);
        assert_eq!(live.publish(event(0)), 0);
    }
}
