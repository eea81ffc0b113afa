//! Handler dispatch utilities.
//!
//! Every listener keeps its observers in a `HandlerList` and fans received
//! datagrams out to them in registration order.

use std::sync::{Arc, RwLock};

use tracing::error;

use super::MessageHandler;
use crate::datagram::DataGram;

/// Registered observers of one listener.
#[derive(Default, Clone)]
pub struct HandlerList {
    handlers: Arc<RwLock<Vec<Arc<dyn MessageHandler>>>>,
}

impl HandlerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, handler: Arc<dyn MessageHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(handler);
    }

    /// Detach every handler.
    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatch a datagram to all registered handlers.
    ///
    /// Calls each handler in sequence, logging errors but continuing to subsequent
    /// handlers. Returns `true` if all handlers succeeded, `false` if any failed.
    pub async fn dispatch(&self, datagram: &Arc<DataGram>) -> bool {
        // Snapshot under the lock, then release before awaiting handlers
        let handlers: Vec<_> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut all_succeeded = true;
        for handler in handlers {
            if let Err(e) = handler.handle(Arc::clone(datagram)).await {
                error!(channel = %datagram.channel(), error = %e, "Handler failed");
                all_succeeded = false;
            }
        }
        all_succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{CountingHandler, FailingHandler};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_dispatch_all_succeed() {
        let list = HandlerList::new();
        let a = CountingHandler::new();
        let b = CountingHandler::new();
        let (ca, cb) = (a.count(), b.count());
        list.add(Arc::new(a));
        list.add(Arc::new(b));

        let datagram = Arc::new(DataGram::from_string("c", "m").unwrap());
        assert!(list.dispatch(&datagram).await);
        assert_eq!(ca.load(Ordering::SeqCst), 1);
        assert_eq!(cb.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_continues_after_failure() {
        let list = HandlerList::new();
        let counter = CountingHandler::new();
        let count = counter.count();
        list.add(Arc::new(FailingHandler::new("boom")));
        list.add(Arc::new(counter));

        let datagram = Arc::new(DataGram::from_string("c", "m").unwrap());
        assert!(!list.dispatch(&datagram).await);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_detaches_handlers() {
        let list = HandlerList::new();
        list.add(Arc::new(CountingHandler::new()));
        assert_eq!(list.len(), 1);
        list.clear();
        assert!(list.is_empty());
    }
}
