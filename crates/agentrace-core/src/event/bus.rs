//! Event bus for distributing `TraceEvent` to subscribers and observers.
//!
//! Two delivery paths share one `publish` call:
//! - a `tokio::sync::broadcast` channel for async subscribers (UI-style
//!   consumers that may lag and drop old events);
//! - a list of registered [`TraceObserver`]s invoked synchronously, so each
//!   observer sees every event.

use std::sync::{Arc, RwLock};

use agentrace_types::event::TraceEvent;
use tokio::sync::broadcast;

use super::observer::TraceObserver;

/// Multi-consumer event bus for trace lifecycle events.
///
/// Cloning the bus clones the sender and shares the observer list.
pub struct EventBus {
    sender: broadcast::Sender<TraceEvent>,
    observers: Arc<RwLock<Vec<Arc<dyn TraceObserver>>>>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            observers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<TraceEvent> {
        self.sender.subscribe()
    }

    /// Register an observer invoked on every published event.
    pub fn add_observer(&self, observer: Arc<dyn TraceObserver>) {
        match self.observers.write() {
            Ok(mut observers) => observers.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    /// Publish an event to observers, then to broadcast subscribers.
    ///
    /// With no subscribers the broadcast send is silently dropped.
    pub fn publish(&self, event: TraceEvent) {
        let observers = match self.observers.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for observer in &observers {
            observer.on_event(&event);
        }
        let _ = self.sender.send(event);
    }

    pub fn observer_count(&self) -> usize {
        match self.observers.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            observers: Arc::clone(&self.observers),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct Recorder {
        names: Mutex<Vec<&'static str>>,
    }

    impl TraceObserver for Recorder {
        fn on_event(&self, event: &TraceEvent) {
            self.names.lock().unwrap().push(event.name());
        }
    }

    fn paused() -> TraceEvent {
        TraceEvent::ExecutionPaused {
            execution_id: Uuid::now_v7(),
        }
    }

    #[tokio::test]
    async fn publish_and_subscribe_delivers_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(paused());

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, TraceEvent::ExecutionPaused { .. }));
    }

    #[test]
    fn observers_receive_every_event_without_subscribers() {
        let bus = EventBus::new(1);
        let recorder = Arc::new(Recorder::default());
        bus.add_observer(recorder.clone());

        for _ in 0..5 {
            bus.publish(paused());
        }

        assert_eq!(recorder.names.lock().unwrap().len(), 5);
    }

    #[test]
    fn clone_shares_channel_and_observers() {
        let bus = EventBus::new(16);
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();
        let recorder = Arc::new(Recorder::default());
        bus2.add_observer(recorder.clone());

        bus2.publish(paused());

        assert!(rx.try_recv().is_ok());
        assert_eq!(bus.observer_count(), 1);
        assert_eq!(recorder.names.lock().unwrap().as_slice(), &["paused"]);
    }

    #[test]
    fn lagged_receiver_does_not_panic() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..10 {
            bus.publish(paused());
        }
        match rx.try_recv() {
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
}
