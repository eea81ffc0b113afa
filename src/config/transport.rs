//! Per-transport configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Directory name used under the system temp directory.
pub const DEFAULT_DIRECTORY_NAME: &str = "XDMessaging";

/// File-drop transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileDropConfig {
    /// Shared root under which each channel gets a subdirectory.
    pub base_path: PathBuf,
    /// How long message files are kept before cleanup (seconds).
    pub retention_secs: u64,
    /// Directory watcher poll interval (milliseconds).
    pub poll_interval_ms: u64,
    /// Empty channel directories untouched for this long are removed (days).
    pub stale_directory_days: u64,
}

impl Default for FileDropConfig {
    fn default() -> Self {
        Self {
            base_path: std::env::temp_dir().join(DEFAULT_DIRECTORY_NAME),
            retention_secs: 5,
            poll_interval_ms: 100,
            stale_directory_days: 30,
        }
    }
}

impl FileDropConfig {
    /// Config rooted at a specific directory (tests, isolated hosts).
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    /// Set retention in seconds.
    pub fn with_retention_secs(mut self, secs: u64) -> Self {
        self.retention_secs = secs;
        self
    }

    /// Retention window, clamped to 1..=30 seconds.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs.clamp(1, 30))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn stale_directory_age(&self) -> Duration {
        Duration::from_secs(self.stale_directory_days * 24 * 60 * 60)
    }
}

/// Amazon SNS/SQS transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AmazonConfig {
    /// AWS access key id.
    pub access_key: Option<String>,
    /// AWS secret access key.
    pub secret_key: Option<String>,
    /// AWS region (e.g., "us-east-1").
    pub region: String,
    /// Custom endpoint URL (for LocalStack or testing).
    pub endpoint_url: Option<String>,
    /// Per-application namespace for topic and queue names.
    pub unique_app_key: String,
    /// Long-poll wait time in seconds (SQS max 20).
    pub wait_time_secs: i32,
    /// Max number of messages to receive in one poll (SQS max 10).
    pub max_messages: i32,
    /// Visibility timeout in seconds for received messages.
    pub visibility_timeout_secs: i32,
    /// Encoded datagrams above this size are fragmented.
    pub max_message_bytes: usize,
    /// Directory holding the cross-process subscriber reference counters.
    pub counter_path: PathBuf,
}

impl Default for AmazonConfig {
    fn default() -> Self {
        Self {
            access_key: None,
            secret_key: None,
            region: "us-east-1".to_string(),
            endpoint_url: None,
            unique_app_key: "xdmessaging".to_string(),
            wait_time_secs: 20,
            max_messages: 10,
            visibility_timeout_secs: 30,
            max_message_bytes: 200 * 1024,
            counter_path: std::env::temp_dir().join(format!("{}.Sync", DEFAULT_DIRECTORY_NAME)),
        }
    }
}

impl AmazonConfig {
    /// Config with explicit credentials.
    pub fn with_credentials(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: Some(access_key.into()),
            secret_key: Some(secret_key.into()),
            ..Self::default()
        }
    }

    /// Set the application key used as naming namespace.
    pub fn with_app_key(mut self, key: impl Into<String>) -> Self {
        self.unique_app_key = key.into();
        self
    }

    /// Set AWS region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set custom endpoint URL (for LocalStack or testing).
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    pub fn with_counter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.counter_path = path.into();
        self
    }

    /// True iff both access key and secret key are set and non-blank.
    pub fn has_credentials(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.access_key) && present(&self.secret_key)
    }

    /// Long-poll wait, clamped to the SQS range 0..=20.
    pub fn wait_time_secs(&self) -> i32 {
        self.wait_time_secs.clamp(0, 20)
    }

    /// Messages per receive, clamped to the SQS range 1..=10.
    pub fn max_messages(&self) -> i32 {
        self.max_messages.clamp(1, 10)
    }

    /// Size of each fragment chunk.
    ///
    /// JSON escaping can inflate a chunk several times over, so chunks are a
    /// fifth of the unfragmented ceiling.
    pub fn fragment_chunk_bytes(&self) -> usize {
        (self.max_message_bytes / 5).max(1)
    }
}

/// Window-messaging transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Per-recipient delivery timeout (milliseconds).
    pub send_timeout_ms: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 1000,
        }
    }
}

impl WindowConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Network relay configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Delay between relay channel registration attempts (seconds).
    pub retry_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: 10,
        }
    }
}

impl RelayConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}
