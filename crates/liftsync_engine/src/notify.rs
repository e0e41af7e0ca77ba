//! Completion events for presentation layers.

use crate::network::NetworkQuality;
use serde::Serialize;
use tokio::sync::broadcast;

/// Something observers may want to refresh after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A full sync finished.
    FullSyncCompleted {
        /// Records written.
        synced: usize,
        /// Records that timed out and may be retried.
        will_retry: usize,
        /// Records that failed permanently.
        failed: usize,
    },
    /// A fetch-and-merge finished and local data may have changed.
    MergeCompleted {
        /// Local mutations applied.
        applied: usize,
    },
    /// The coordinator was enabled or disabled.
    AvailabilityChanged {
        /// New state.
        enabled: bool,
    },
    /// Network quality changed.
    NetworkChanged {
        /// New quality.
        quality: NetworkQuality,
    },
}

/// Receives engine events. Fire-and-forget.
pub trait Notifier: Send + Sync {
    /// Delivers an event.
    fn notify(&self, event: SyncEvent);
}

/// [`Notifier`] fanning events out over a broadcast channel.
///
/// Events sent while nobody is subscribed are discarded.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<SyncEvent>,
}

impl BroadcastNotifier {
    /// Creates a notifier buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, event: SyncEvent) {
        // No receivers is fine.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let notifier = BroadcastNotifier::new(8);
        let mut events = notifier.subscribe();

        notifier.notify(SyncEvent::MergeCompleted { applied: 3 });

        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::MergeCompleted { applied: 3 }
        );
    }

    #[test]
    fn notify_without_subscribers_is_silent() {
        let notifier = BroadcastNotifier::default();
        notifier.notify(SyncEvent::AvailabilityChanged { enabled: true });
    }

    #[test]
    fn events_serialize_tagged() {
        let json = serde_json::to_value(SyncEvent::FullSyncCompleted {
            synced: 9,
            will_retry: 1,
            failed: 0,
        })
        .unwrap();
        assert_eq!(json["event"], "fullSyncCompleted");
        assert_eq!(json["will_retry"], 1);
    }
}
