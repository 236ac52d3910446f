//! Typed lifecycle events and a synchronous fan-out dispatcher.
//!
//! The source relies on a generic pub-sub; per the redesign note in `spec.md` §9 this is instead
//! a tagged `Event` enum dispatched to per-event subscriber lists, synchronously, with subscriber
//! errors surfaced back to the emitter rather than swallowed.

use crate::model::DeployedContract;
use std::sync::Arc;

/// A lifecycle event fanned out to subscribers. Subscribers may run on any worker thread and
/// must not block (`spec.md` §5).
#[derive(Debug, Clone)]
pub enum Event {
    FuzzerStarting,
    FuzzerStopping,
    WorkerCreated { worker_index: usize },
    ContractDeploymentAdded(Arc<DeployedContract>),
    ContractDeploymentRemoved(Arc<DeployedContract>),
    CallSequenceTested { worker_index: usize, sequences_tested: u64 },
}

/// An error raised by a subscriber while handling an [`Event`]. Propagated back to the emitter
/// (`spec.md` §9); the engine treats it the same as a provider error (fatal for the worker).
#[derive(Debug, thiserror::Error)]
#[error("event subscriber failed: {0}")]
pub struct SubscriberError(pub String);

type Subscriber = Box<dyn FnMut(&Event) -> Result<(), SubscriberError> + Send>;

/// Fans events out to subscribers registered for any event, synchronously, in registration order.
///
/// Unlike the teacher's generic pub-sub keyed by payload type, this holds one flat subscriber
/// list and lets each subscriber match on the `Event` variants it cares about — matching the
/// "typed channels or per-event subscriber lists over tagged variants" guidance.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, handler: F)
    where
        F: FnMut(&Event) -> Result<(), SubscriberError> + Send + 'static,
    {
        self.subscribers.push(Box::new(handler));
    }

    /// Dispatches `event` to every subscriber, stopping at (and returning) the first error.
    pub fn emit(&mut self, event: Event) -> Result<(), SubscriberError> {
        for subscriber in &mut self.subscribers {
            subscriber(&event)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("subscriber_count", &self.subscribers.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    #[test]
    fn fans_out_to_all_subscribers_in_order() {
        let mut bus = EventBus::new();
        let calls = StdArc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            bus.subscribe(move |_event| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        bus.emit(Event::FuzzerStarting).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn first_subscriber_error_stops_dispatch_and_propagates() {
        let mut bus = EventBus::new();
        let calls = StdArc::new(AtomicUsize::new(0));
        bus.subscribe(|_event| Err(SubscriberError("boom".into())));
        {
            let calls = calls.clone();
            bus.subscribe(move |_event| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        let err = bus.emit(Event::FuzzerStopping).unwrap_err();
        assert_eq!(err.0, "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
