//! File-drop transport end to end.
//!
//! Run with: cargo test --test file_drop

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{eventually, recv_within, CountingHandler};
use tempfile::TempDir;
use xdmessaging::config::FileDropConfig;
use xdmessaging::transport::file_drop::{
    channel_directory, FileDropBroadcaster, FileDropListener, MESSAGE_EXTENSION,
};
use xdmessaging::{Broadcaster, Listener};

fn message_files(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| {
                    e.path().extension().and_then(|x| x.to_str()) == Some(MESSAGE_EXTENSION)
                })
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn test_message_is_received_once_and_then_cleaned_up() {
    let root = TempDir::new().unwrap();
    let config = FileDropConfig::with_base_path(root.path()).with_retention_secs(1);

    let listener = FileDropListener::new(&config);
    let (handler, count, mut rx) = CountingHandler::new();
    listener.add_handler(Arc::new(handler));
    listener.register_channel("Status").await.unwrap();

    let broadcaster = FileDropBroadcaster::new(&config);
    broadcaster.send_to_channel("Status", "hello").await.unwrap();

    let received = recv_within(&mut rx, 5).await;
    assert_eq!(received.channel(), "Status");
    assert_eq!(received.message(), "hello");

    // A second watcher tick must not redeliver the same file.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    let dir = channel_directory(root.path(), "Status");
    assert!(eventually(5, || message_files(&dir) == 0).await);

    listener.dispose().await;
}

#[tokio::test]
async fn test_listener_only_sees_registered_channels() {
    let root = TempDir::new().unwrap();
    let config = FileDropConfig::with_base_path(root.path());

    let listener = FileDropListener::new(&config);
    let (handler, count, mut rx) = CountingHandler::new();
    listener.add_handler(Arc::new(handler));
    listener.register_channel("Wanted").await.unwrap();

    let broadcaster = FileDropBroadcaster::new(&config);
    broadcaster.send_to_channel("Ignored", "nope").await.unwrap();
    broadcaster.send_to_channel("Wanted", "yes").await.unwrap();

    assert_eq!(recv_within(&mut rx, 5).await.message(), "yes");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    listener.dispose().await;
}

#[tokio::test]
async fn test_two_listeners_in_one_root_both_receive() {
    let root = TempDir::new().unwrap();
    let config = FileDropConfig::with_base_path(root.path());

    let first = FileDropListener::new(&config);
    let second = FileDropListener::new(&config);
    let (a, _, mut rx_a) = CountingHandler::new();
    let (b, _, mut rx_b) = CountingHandler::new();
    first.add_handler(Arc::new(a));
    second.add_handler(Arc::new(b));
    first.register_channel("Status").await.unwrap();
    second.register_channel("Status").await.unwrap();

    FileDropBroadcaster::new(&config)
        .send_to_channel("Status", "fan-out")
        .await
        .unwrap();

    assert_eq!(recv_within(&mut rx_a, 5).await.message(), "fan-out");
    assert_eq!(recv_within(&mut rx_b, 5).await.message(), "fan-out");

    first.dispose().await;
    second.dispose().await;
}

#[tokio::test]
async fn test_unregistered_channel_stops_delivery() {
    let root = TempDir::new().unwrap();
    let config = FileDropConfig::with_base_path(root.path());

    let listener = FileDropListener::new(&config);
    let (handler, count, mut rx) = CountingHandler::new();
    listener.add_handler(Arc::new(handler));
    listener.register_channel("Status").await.unwrap();

    let broadcaster = FileDropBroadcaster::new(&config);
    broadcaster.send_to_channel("Status", "one").await.unwrap();
    recv_within(&mut rx, 5).await;

    listener.unregister_channel("Status").await.unwrap();
    broadcaster.send_to_channel("Status", "two").await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    listener.dispose().await;
}
