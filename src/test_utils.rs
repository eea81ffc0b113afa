//! Test utilities and mock implementations.
//!
//! Handler and transport doubles for exercising compositions without real
//! transports.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::datagram::DataGram;
use crate::error::{Result, XdError};
use crate::transport::{Broadcaster, HandlerList, Listener, MessageHandler};

/// Handler that counts invocations.
pub struct CountingHandler {
    count: Arc<AtomicUsize>,
}

impl CountingHandler {
    pub fn new() -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.count)
    }
}

impl MessageHandler for CountingHandler {
    fn handle(&self, _datagram: Arc<DataGram>) -> BoxFuture<'static, Result<()>> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

/// Handler that forwards every datagram into a channel.
pub struct RecordingHandler {
    tx: mpsc::UnboundedSender<DataGram>,
}

impl RecordingHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DataGram>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MessageHandler for RecordingHandler {
    fn handle(&self, datagram: Arc<DataGram>) -> BoxFuture<'static, Result<()>> {
        let _ = self.tx.send((*datagram).clone());
        Box::pin(async { Ok(()) })
    }
}

/// Handler that always fails.
pub struct FailingHandler {
    reason: String,
}

impl FailingHandler {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl MessageHandler for FailingHandler {
    fn handle(&self, _datagram: Arc<DataGram>) -> BoxFuture<'static, Result<()>> {
        let reason = self.reason.clone();
        Box::pin(async move { Err(XdError::Transport(reason)) })
    }
}

/// Broadcaster that records what it was asked to send.
pub struct RecordingBroadcaster {
    alive: AtomicBool,
    fail: AtomicBool,
    sent: Mutex<Vec<DataGram>>,
}

impl RecordingBroadcaster {
    pub fn new(alive: bool) -> Self {
        Self {
            alive: AtomicBool::new(alive),
            fail: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<DataGram> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn send_datagram(&self, datagram: DataGram) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(XdError::Transport("mock send failure".to_string()));
        }
        self.sent.lock().unwrap().push(datagram);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Listener whose deliveries are driven by the test.
pub struct ManualListener {
    alive: AtomicBool,
    fail_register: AtomicUsize,
    disposed: AtomicBool,
    channels: Mutex<HashSet<String>>,
    handlers: HandlerList,
}

impl ManualListener {
    pub fn new(alive: bool) -> Self {
        Self {
            alive: AtomicBool::new(alive),
            fail_register: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            channels: Mutex::new(HashSet::new()),
            handlers: HandlerList::new(),
        }
    }

    /// Fail the next `n` register calls.
    pub fn fail_next_registrations(&self, n: usize) {
        self.fail_register.store(n, Ordering::SeqCst);
    }

    pub fn is_registered(&self, channel: &str) -> bool {
        self.channels.lock().unwrap().contains(channel)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Deliver a datagram as if it had arrived on the transport.
    pub async fn deliver(&self, datagram: DataGram) {
        if self.is_registered(datagram.channel()) {
            self.handlers.dispatch(&Arc::new(datagram)).await;
        }
    }
}

#[async_trait]
impl Listener for ManualListener {
    async fn register_channel(&self, channel: &str) -> Result<()> {
        if self.is_disposed() {
            return Err(XdError::Disposed("ManualListener"));
        }
        let remaining = self.fail_register.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_register.store(remaining - 1, Ordering::SeqCst);
            return Err(XdError::Configuration("mock registration failure".to_string()));
        }
        self.channels.lock().unwrap().insert(channel.to_string());
        Ok(())
    }

    async fn unregister_channel(&self, channel: &str) -> Result<()> {
        if self.is_disposed() {
            return Err(XdError::Disposed("ManualListener"));
        }
        self.channels.lock().unwrap().remove(channel);
        Ok(())
    }

    fn add_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.handlers.add(handler);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.handlers.clear();
    }
}
