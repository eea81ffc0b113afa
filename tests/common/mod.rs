//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use xdmessaging::{DataGram, MessageHandler, Result};

/// Handler that counts received datagrams and forwards them to a channel.
pub struct CountingHandler {
    count: Arc<AtomicUsize>,
    tx: mpsc::UnboundedSender<DataGram>,
}

impl CountingHandler {
    pub fn new() -> (Self, Arc<AtomicUsize>, mpsc::UnboundedReceiver<DataGram>) {
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                count: count.clone(),
                tx,
            },
            count,
            rx,
        )
    }
}

impl MessageHandler for CountingHandler {
    fn handle(&self, datagram: Arc<DataGram>) -> BoxFuture<'static, Result<()>> {
        self.count.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send((*datagram).clone());
        Box::pin(async { Ok(()) })
    }
}

/// Wait for the next datagram, failing the test after `secs` seconds.
pub async fn recv_within(rx: &mut mpsc::UnboundedReceiver<DataGram>, secs: u64) -> DataGram {
    tokio::time::timeout(Duration::from_secs(secs), rx.recv())
        .await
        .expect("Timed out waiting for message")
        .expect("Channel closed")
}

/// Poll `condition` every 20ms until it holds or `secs` seconds pass.
pub async fn eventually(secs: u64, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
