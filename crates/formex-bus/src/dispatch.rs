use std::sync::{Arc, PoisonError, RwLock};

use formex_core::ChangeEvent;
use tracing::{debug, warn};

/// Receives every ChangeEvent that arrives on the subscribed channel.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, event: &ChangeEvent);
}

impl<F> MessageHandler for F
where
    F: Fn(&ChangeEvent) + Send + Sync,
{
    fn on_message(&self, event: &ChangeEvent) {
        self(event)
    }
}

/// Registry of handlers plus the decode step shared by every transport.
///
/// Single producer (the subscription loop), many consumers (handlers), each
/// invoked once per message in registration order.
pub struct Dispatcher {
    handlers: RwLock<Vec<Arc<dyn MessageHandler>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, handler: Arc<dyn MessageHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.push(handler);
        debug!(count = handlers.len(), "bus handler registered");
    }

    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Decode one raw bus payload and fan it out to the handlers.
    ///
    /// Malformed payloads are logged and dropped; returns whether the payload
    /// was delivered.
    pub fn dispatch_raw(&self, raw: &str) -> bool {
        match ChangeEvent::from_json(raw) {
            Ok(event) => {
                self.dispatch(&event);
                true
            }
            Err(e) => {
                warn!(error = %e, bytes = raw.len(), "dropping malformed bus message");
                false
            }
        }
    }

    pub fn dispatch(&self, event: &ChangeEvent) {
        // snapshot so handlers may register further handlers without deadlock
        let handlers: Vec<Arc<dyn MessageHandler>> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for handler in handlers {
            handler.on_message(event);
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn raw_event(collection: &str) -> String {
        format!(
            r#"{{"collection":"{collection}","event":"update","timestamp":"2026-10-18T07:33:00.000Z","keys":[1]}}"#
        )
    }

    #[test]
    fn every_handler_sees_each_message_once() {
        let dispatcher = Dispatcher::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        dispatcher.register(Arc::new(move |_: &ChangeEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = Arc::clone(&second);
        dispatcher.register(Arc::new(move |_: &ChangeEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(dispatcher.dispatch_raw(&raw_event("posts")));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.handler_count(), 2);
    }

    #[test]
    fn malformed_payload_is_dropped_and_later_ones_delivered() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(RwLock::new(Vec::<String>::new()));

        let sink = Arc::clone(&seen);
        dispatcher.register(Arc::new(move |ev: &ChangeEvent| {
            sink.write().unwrap().push(ev.collection.clone());
        }));

        assert!(!dispatcher.dispatch_raw("{not json"));
        assert!(!dispatcher.dispatch_raw(r#"{"type":"connected"}"#));
        assert!(!dispatcher.dispatch_raw(""));
        assert!(dispatcher.dispatch_raw(&raw_event("pages")));

        assert_eq!(*seen.read().unwrap(), vec!["pages".to_string()]);
    }

    #[test]
    fn no_handlers_is_not_an_error() {
        let dispatcher = Dispatcher::default();
        assert!(dispatcher.dispatch_raw(&raw_event("posts")));
    }
}
