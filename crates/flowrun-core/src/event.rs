//! Broadcast bus for task lifecycle events.
//!
//! Built on `tokio::sync::broadcast`. Publishing with no active subscribers
//! is a no-op, so the scheduler publishes unconditionally.

use flowrun_types::event::TaskEvent;
use tokio::sync::broadcast;

/// Multi-consumer bus for [`TaskEvent`]s. Cloning shares the channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// A receiver for every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: TaskEvent) {
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowrun_types::Path;
    use uuid::Uuid;

    fn started(task: &str) -> TaskEvent {
        TaskEvent::Started {
            run_id: Uuid::now_v7(),
            task: Path::parse(task).unwrap(),
            kind: "tool/cli.Print".to_string(),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.clone().subscribe();

        bus.publish(started("tasks.a"));

        assert_eq!(rx1.recv().await.unwrap().task().to_string(), "tasks.a");
        assert_eq!(rx2.recv().await.unwrap().task().to_string(), "tasks.a");
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(started("tasks.a"));
        assert_eq!(bus.receiver_count(), 0);
    }

    #[test]
    fn lagged_receiver_reports_lag() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(started(&format!("tasks.t{i}")));
        }
        match rx.try_recv() {
            Err(broadcast::error::TryRecvError::Lagged(n)) => assert_eq!(n, 3),
            other => panic!("expected lag, got {other:?}"),
        }
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let bus = EventBus::new(0);
        let _rx = bus.subscribe();
        bus.publish(started("tasks.a"));
        assert!(format!("{bus:?}").contains("receiver_count"));
    }
}
