//! Amazon listener.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::SnsEnvelope;
use super::poller::NotificationHandler;
use super::subscriber::{Subscriber, SubscriberRepository};
use super::subscription::SubscriptionService;
use super::topic::{Topic, TopicRepository};
use super::SUBJECT_FRAGMENT;
use crate::config::AmazonConfig;
use crate::datagram::DataGram;
use crate::error::{Result, XdError};
use crate::fragment::{Fragment, FragmentSpool, Reassembler, DEFAULT_REASSEMBLY_TIMEOUT};
use crate::transport::{HandlerList, Listener, MessageHandler};

/// Where fragment sets are collected.
#[derive(Clone)]
enum Assembly {
    /// The queue has one consumer.
    Local(Arc<Reassembler>),
    /// The queue is shared by every process on the machine.
    Spooled(FragmentSpool),
}

impl Assembly {
    async fn accept(&self, piece: Fragment) -> Result<Option<String>> {
        match self {
            Assembly::Local(reassembler) => Ok(reassembler.accept(piece)),
            Assembly::Spooled(spool) => {
                let spool = spool.clone();
                let payload = tokio::task::spawn_blocking(move || spool.accept(piece))
                    .await
                    .map_err(|e| XdError::Transport(e.to_string()))??;
                Ok(payload)
            }
        }
    }

    async fn finish(&self, id: String) {
        match self {
            Assembly::Local(reassembler) => reassembler.finish(&id),
            Assembly::Spooled(spool) => {
                let spool = spool.clone();
                match tokio::task::spawn_blocking(move || spool.finish(&id)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "Failed to remove delivered fragment set"),
                    Err(e) => warn!(error = %e, "Fragment set removal task failed"),
                }
            }
        }
    }
}

/// Unwraps notifications into datagrams for one registered channel.
#[derive(Clone)]
struct EnvelopeDispatcher {
    handlers: HandlerList,
    assembly: Assembly,
}

/// A decoded datagram and, when it came in pieces, the fragment set id.
type Unwrapped = (DataGram, Option<String>);

impl EnvelopeDispatcher {
    async fn unwrap(&self, envelope: SnsEnvelope) -> Result<Option<Unwrapped>> {
        if envelope.subject.as_deref() == Some(SUBJECT_FRAGMENT) {
            let piece: Fragment = match serde_json::from_str(&envelope.message) {
                Ok(piece) => piece,
                Err(e) => {
                    warn!(error = %e, "Dropping malformed fragment");
                    return Ok(None);
                }
            };
            let id = piece.id.clone();
            let Some(payload) = self.assembly.accept(piece).await? else {
                return Ok(None);
            };
            return match DataGram::decode_valid(&payload) {
                Some(datagram) => Ok(Some((datagram, Some(id)))),
                None => {
                    self.assembly.finish(id).await;
                    Ok(None)
                }
            };
        }
        Ok(DataGram::decode_valid(&envelope.message).map(|datagram| (datagram, None)))
    }

    async fn deliver(self, envelope: SnsEnvelope) -> Result<()> {
        let Some((datagram, fragment_id)) = self.unwrap(envelope).await? else {
            return Ok(());
        };
        if !self.handlers.dispatch(&Arc::new(datagram)).await {
            return Err(XdError::Transport(
                "one or more message handlers failed".to_string(),
            ));
        }
        if let Some(id) = fragment_id {
            self.assembly.finish(id).await;
        }
        Ok(())
    }
}

impl NotificationHandler for EnvelopeDispatcher {
    fn handle(&self, envelope: SnsEnvelope) -> BoxFuture<'static, Result<()>> {
        Box::pin(self.clone().deliver(envelope))
    }
}

/// Receives datagrams from SQS queues subscribed to channel topics.
pub struct AmazonListener {
    topics: Arc<TopicRepository>,
    subscribers: Arc<SubscriberRepository>,
    subscriptions: Arc<SubscriptionService>,
    instance_id: String,
    long_lived: bool,
    alive: bool,
    handlers: HandlerList,
    reassembler: Arc<Reassembler>,
    spool_root: PathBuf,
    registered: Mutex<HashMap<String, (Topic, Subscriber)>>,
    disposed: AtomicBool,
}

impl AmazonListener {
    /// Listener with its own queue per channel, deleted on unregister.
    pub fn new(
        topics: Arc<TopicRepository>,
        subscribers: Arc<SubscriberRepository>,
        subscriptions: Arc<SubscriptionService>,
        config: &AmazonConfig,
    ) -> Self {
        let instance_id = Uuid::new_v4().simple().to_string();
        Self::build(topics, subscribers, subscriptions, config, instance_id, false)
    }

    /// Listener sharing one queue per channel with every process that uses the
    /// same `instance_id`; the queue outlives this listener.
    ///
    /// Fragment sets are spooled under the counter path, so a payload split
    /// across the sharing processes is still delivered once.
    pub fn long_lived(
        topics: Arc<TopicRepository>,
        subscribers: Arc<SubscriberRepository>,
        subscriptions: Arc<SubscriptionService>,
        config: &AmazonConfig,
        instance_id: impl Into<String>,
    ) -> Self {
        Self::build(
            topics,
            subscribers,
            subscriptions,
            config,
            instance_id.into(),
            true,
        )
    }

    fn build(
        topics: Arc<TopicRepository>,
        subscribers: Arc<SubscriberRepository>,
        subscriptions: Arc<SubscriptionService>,
        config: &AmazonConfig,
        instance_id: String,
        long_lived: bool,
    ) -> Self {
        Self {
            topics,
            subscribers,
            subscriptions,
            instance_id,
            long_lived,
            alive: config.has_credentials(),
            handlers: HandlerList::new(),
            reassembler: Arc::new(Reassembler::default()),
            spool_root: config.counter_path.clone(),
            registered: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(XdError::Disposed("AmazonListener"));
        }
        Ok(())
    }

    async fn release(&self, channel: &str, topic: &Topic, subscriber: &Subscriber) -> Result<()> {
        self.subscriptions.unsubscribe(topic, subscriber).await?;
        self.subscribers.expire_subscriber(subscriber).await?;
        debug!(channel = %channel, queue = %subscriber.name, "Amazon channel unregistered");
        Ok(())
    }
}

#[async_trait]
impl Listener for AmazonListener {
    async fn register_channel(&self, channel: &str) -> Result<()> {
        self.ensure_usable()?;
        if channel.is_empty() {
            return Err(XdError::empty("channel"));
        }
        if !self.alive {
            return Err(XdError::Configuration(
                "Amazon credentials are not configured".to_string(),
            ));
        }

        let topic = self.topics.get_topic(channel).await?;
        let subscriber = self
            .subscribers
            .get_subscriber(channel, &self.instance_id, self.long_lived)
            .await?;
        let assembly = if self.long_lived {
            Assembly::Spooled(FragmentSpool::new(
                &self.spool_root,
                &subscriber.name,
                DEFAULT_REASSEMBLY_TIMEOUT,
            ))
        } else {
            Assembly::Local(Arc::clone(&self.reassembler))
        };
        let dispatcher = Arc::new(EnvelopeDispatcher {
            handlers: self.handlers.clone(),
            assembly,
        });
        self.subscriptions
            .subscribe(&topic, &subscriber, dispatcher)
            .await?;

        self.registered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel.to_string(), (topic, subscriber));
        info!(channel = %channel, long_lived = self.long_lived, "Amazon channel registered");
        Ok(())
    }

    async fn unregister_channel(&self, channel: &str) -> Result<()> {
        self.ensure_usable()?;
        if channel.is_empty() {
            return Err(XdError::empty("channel"));
        }
        let entry = self
            .registered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(channel);
        match entry {
            Some((topic, subscriber)) => self.release(channel, &topic, &subscriber).await,
            None => Ok(()),
        }
    }

    fn add_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.handlers.add(handler);
    }

    fn is_alive(&self) -> bool {
        self.alive && !self.disposed.load(Ordering::SeqCst)
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let entries: Vec<_> = self
            .registered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (channel, (topic, subscriber)) in entries {
            if let Err(e) = self.release(&channel, &topic, &subscriber).await {
                // The service may already be shut down; it released everything then.
                debug!(channel = %channel, error = %e, "Channel release skipped");
            }
        }
        self.handlers.clear();
        info!(instance = %self.instance_id, "Amazon listener disposed");
    }
}
