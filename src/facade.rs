//! XDMessaging facade for in-process library usage.
//!
//! Resolves a transport mode (and, for broadcasters, a propagation flag)
//! to a composed broadcaster or listener. Callers use the result through
//! the [`Broadcaster`] and [`Listener`] traits without knowing which
//! transport sits underneath.
//!
//! # Example
//!
//! ```ignore
//! use xdmessaging::config::Config;
//! use xdmessaging::facade::XdMessaging;
//! use xdmessaging::transport::TransportMode;
//!
//! let xd = XdMessaging::builder(Config::load(None)?).build();
//!
//! let listener = xd.get_listener_for_mode(TransportMode::FileDrop)?;
//! listener.add_handler(my_handler);
//! listener.register_channel("Status").await?;
//!
//! let broadcaster = xd.get_broadcaster_for_mode(TransportMode::FileDrop, true)?;
//! broadcaster.send_to_channel("Status", "hello").await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Result, XdError};
use crate::multicast::MulticastBroadcaster;
use crate::relay::{NetworkRelayBroadcaster, NetworkRelayListener, RelayLink};
use crate::transport::amazon::{
    AmazonBroadcaster, AmazonListener, CloudBackend, InMemoryBackend, SubscriberRepository,
    SubscriptionService, TopicRepository,
};
use crate::transport::file_drop::{FileDropBroadcaster, FileDropListener};
use crate::transport::window::{InProcessDesktop, WindowBroadcaster, WindowListener, WindowSystem};
use crate::transport::{Broadcaster, Listener, TransportMode};
use crate::utils::machine;

/// Constructors of one transport mode.
pub struct TransportRegistration {
    pub mode: TransportMode,
    pub broadcaster: fn(&XdMessaging) -> Arc<dyn Broadcaster>,
    pub listener: fn(&XdMessaging) -> Arc<dyn Listener>,
}

/// Every transport the facade can build.
pub static TRANSPORT_REGISTRY: &[TransportRegistration] = &[
    TransportRegistration {
        mode: TransportMode::FileDrop,
        broadcaster: file_drop_broadcaster,
        listener: file_drop_listener,
    },
    TransportRegistration {
        mode: TransportMode::Window,
        broadcaster: window_broadcaster,
        listener: window_listener,
    },
    TransportRegistration {
        mode: TransportMode::Amazon,
        broadcaster: amazon_broadcaster,
        listener: amazon_listener,
    },
];

fn file_drop_broadcaster(xd: &XdMessaging) -> Arc<dyn Broadcaster> {
    Arc::new(FileDropBroadcaster::new(&xd.config.file_drop))
}

fn file_drop_listener(xd: &XdMessaging) -> Arc<dyn Listener> {
    Arc::new(FileDropListener::new(&xd.config.file_drop))
}

fn window_broadcaster(xd: &XdMessaging) -> Arc<dyn Broadcaster> {
    Arc::new(WindowBroadcaster::new(
        Arc::clone(&xd.window_system),
        &xd.config.window,
    ))
}

fn window_listener(xd: &XdMessaging) -> Arc<dyn Listener> {
    Arc::new(WindowListener::new(Arc::clone(&xd.window_system)))
}

fn amazon_broadcaster(xd: &XdMessaging) -> Arc<dyn Broadcaster> {
    Arc::new(AmazonBroadcaster::new(
        Arc::clone(&xd.topics),
        &xd.config.amazon,
    ))
}

fn amazon_listener(xd: &XdMessaging) -> Arc<dyn Listener> {
    Arc::new(AmazonListener::new(
        Arc::clone(&xd.topics),
        Arc::clone(&xd.subscribers),
        Arc::clone(&xd.subscriptions),
        &xd.config.amazon,
    ))
}

/// Registration of `mode`.
pub fn registration(mode: TransportMode) -> Result<&'static TransportRegistration> {
    TRANSPORT_REGISTRY
        .iter()
        .find(|r| r.mode == mode)
        .ok_or_else(|| XdError::Configuration(format!("No transport registered for {}", mode)))
}

/// Builder for XdMessaging instance.
pub struct XdMessagingBuilder {
    config: Config,
    backend: Option<Arc<dyn CloudBackend>>,
    window_system: Option<Arc<dyn WindowSystem>>,
    machine_name: Option<String>,
}

impl XdMessagingBuilder {
    /// Create a new builder with given config.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            backend: None,
            window_system: None,
            machine_name: None,
        }
    }

    /// Use a specific cloud backend. Defaults to an [`InMemoryBackend`].
    pub fn with_backend(mut self, backend: Arc<dyn CloudBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use a specific window system. Defaults to an [`InProcessDesktop`].
    ///
    /// The default desktop lives inside this process, so window mode only
    /// reaches listeners built from the same desktop. Inject a native
    /// [`WindowSystem`] for delivery between processes.
    pub fn with_window_system(mut self, system: Arc<dyn WindowSystem>) -> Self {
        self.window_system = Some(system);
        self
    }

    /// Override the machine identity used for relay origin filtering.
    pub fn with_machine_name(mut self, name: impl Into<String>) -> Self {
        self.machine_name = Some(name.into().to_uppercase());
        self
    }

    /// Build the XdMessaging instance.
    pub fn build(self) -> XdMessaging {
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(InMemoryBackend::new()));
        let window_system = self
            .window_system
            .unwrap_or_else(|| Arc::new(InProcessDesktop::new()));
        let machine_name = self.machine_name.unwrap_or_else(machine::machine_name);

        let app_key = self.config.amazon.unique_app_key.clone();
        let topics = Arc::new(TopicRepository::new(Arc::clone(&backend), app_key.clone()));
        let subscribers = Arc::new(SubscriberRepository::new(Arc::clone(&backend), app_key));
        let subscriptions = Arc::new(SubscriptionService::new(
            Arc::clone(&backend),
            Arc::clone(&subscribers),
            &self.config.amazon,
        ));

        info!(
            machine = %machine_name,
            cloud = self.config.amazon.has_credentials(),
            "XDMessaging initialized"
        );

        XdMessaging {
            config: self.config,
            machine_name,
            window_system,
            topics,
            subscribers,
            subscriptions,
            relay_links: Mutex::new(HashMap::new()),
        }
    }

    /// Build with an [`AwsBackend`](crate::transport::amazon::AwsBackend)
    /// connected from the Amazon section of the config.
    #[cfg(feature = "sns-sqs")]
    pub async fn build_aws(mut self) -> Result<XdMessaging> {
        let backend = crate::transport::amazon::AwsBackend::connect(&self.config.amazon).await?;
        self.backend = Some(Arc::new(backend));
        Ok(self.build())
    }
}

/// Main XDMessaging instance.
///
/// Owns the Amazon repositories and subscription service shared by every
/// transport it builds.
pub struct XdMessaging {
    config: Config,
    machine_name: String,
    window_system: Arc<dyn WindowSystem>,
    topics: Arc<TopicRepository>,
    subscribers: Arc<SubscriberRepository>,
    subscriptions: Arc<SubscriptionService>,
    relay_links: Mutex<HashMap<TransportMode, Arc<RelayLink>>>,
}

impl XdMessaging {
    /// Create a new builder with given config.
    pub fn builder(config: Config) -> XdMessagingBuilder {
        XdMessagingBuilder::new(config)
    }

    /// Broadcaster for `mode`.
    ///
    /// With `propagate`, every message is also relayed to other machines.
    /// That needs Amazon credentials: without them this fails with a
    /// configuration error instead of silently sending locally only.
    pub fn get_broadcaster_for_mode(
        &self,
        mode: TransportMode,
        propagate: bool,
    ) -> Result<Arc<dyn Broadcaster>> {
        let base = (registration(mode)?.broadcaster)(self);
        if !propagate || mode.is_network() {
            return Ok(base);
        }

        let network = amazon_broadcaster(self);
        if !network.is_alive() {
            return Err(XdError::Configuration(format!(
                "Propagation of {} messages requires Amazon credentials",
                mode
            )));
        }

        let relay = NetworkRelayBroadcaster::new(mode, network, &self.machine_name);
        debug!(mode = %mode, "Composed propagating broadcaster");
        Ok(Arc::new(MulticastBroadcaster::new(vec![
            base,
            Arc::new(relay),
        ])))
    }

    /// Listener for `mode`.
    ///
    /// Local transports also receive relayed traffic from other machines
    /// when Amazon credentials are configured. Without credentials no relay
    /// is layered and the local listener is returned as is: credentials are
    /// fixed when the facade is built, so a relay registration retried
    /// against them could never succeed. With credentials, a failed relay
    /// registration is retried every `relay.retry_interval_secs` until the
    /// listener is disposed.
    ///
    /// Cloud mode is never wrapped in a relay of itself.
    pub fn get_listener_for_mode(&self, mode: TransportMode) -> Result<Arc<dyn Listener>> {
        let registration = registration(mode)?;
        let local = (registration.listener)(self);
        if mode.is_network() {
            return Ok(local);
        }

        if !self.config.amazon.has_credentials() {
            info!(mode = %mode, "Amazon credentials not configured, listener is local only");
            return Ok(local);
        }

        let mut links = self.relay_links.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(relay) = links
            .get(&mode)
            .and_then(|link| NetworkRelayListener::attach(Arc::clone(&local), link))
        {
            return Ok(Arc::new(relay));
        }

        let network = AmazonListener::long_lived(
            Arc::clone(&self.topics),
            Arc::clone(&self.subscribers),
            Arc::clone(&self.subscriptions),
            &self.config.amazon,
            &self.machine_name,
        );
        let link = RelayLink::start(
            mode,
            Arc::new(network),
            (registration.broadcaster)(self),
            &self.machine_name,
            self.config.relay.retry_interval(),
        );
        let relay = NetworkRelayListener::attach(local, &link).ok_or_else(|| {
            XdError::Transport(format!("Relay link for {} closed while attaching", mode))
        })?;
        links.insert(mode, link);
        debug!(mode = %mode, "Composed relaying listener");
        Ok(Arc::new(relay))
    }

    /// Machine identity stamped on relayed messages.
    pub fn machine_name(&self) -> &str {
        &self.machine_name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get direct access to the subscription service.
    pub fn subscriptions(&self) -> &Arc<SubscriptionService> {
        &self.subscriptions
    }

    /// Close every relay link, stop every subscription poller and release
    /// ephemeral queues.
    pub async fn shutdown(&self) {
        let links: Vec<_> = self
            .relay_links
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, link)| link)
            .collect();
        for link in links {
            link.close().await;
        }
        self.subscriptions.dispose().await;
        info!("XDMessaging shut down");
    }
}
