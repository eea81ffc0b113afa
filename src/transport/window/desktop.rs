//! In-process desktop.
//!
//! Models top-level windows, their property tags and a bounded message queue
//! per window. A window whose queue stays full is an unresponsive recipient.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use super::{CopyDataBlock, WindowId, WindowSystem};
use crate::error::{Result, XdError};

struct WindowEntry {
    properties: HashSet<String>,
    inbox: mpsc::Sender<Vec<u8>>,
}

#[derive(Default)]
struct DesktopState {
    next_id: WindowId,
    windows: BTreeMap<WindowId, WindowEntry>,
}

/// Desktop shared by the window transports of one facade.
pub struct InProcessDesktop {
    interactive: bool,
    state: Mutex<DesktopState>,
}

impl InProcessDesktop {
    /// Desktop with a message loop.
    pub fn new() -> Self {
        Self {
            interactive: true,
            state: Mutex::new(DesktopState::default()),
        }
    }

    /// Desktop of a service or console host: no windows can be created.
    pub fn headless() -> Self {
        Self {
            interactive: false,
            state: Mutex::new(DesktopState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, DesktopState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InProcessDesktop {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowSystem for InProcessDesktop {
    fn create_window(&self, inbox: mpsc::Sender<Vec<u8>>) -> Result<WindowId> {
        if !self.interactive {
            return Err(XdError::Transport(
                "no interactive desktop to create a window on".to_string(),
            ));
        }
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        state.windows.insert(
            id,
            WindowEntry {
                properties: HashSet::new(),
                inbox,
            },
        );
        Ok(id)
    }

    fn destroy_window(&self, window: WindowId) {
        self.state().windows.remove(&window);
    }

    fn set_property(&self, window: WindowId, key: &str) -> Result<()> {
        let mut state = self.state();
        let entry = state
            .windows
            .get_mut(&window)
            .ok_or_else(|| XdError::Transport(format!("window {} does not exist", window)))?;
        entry.properties.insert(key.to_string());
        Ok(())
    }

    fn remove_property(&self, window: WindowId, key: &str) {
        if let Some(entry) = self.state().windows.get_mut(&window) {
            entry.properties.remove(key);
        }
    }

    fn has_property(&self, window: WindowId, key: &str) -> bool {
        self.state()
            .windows
            .get(&window)
            .is_some_and(|entry| entry.properties.contains(key))
    }

    fn enumerate_top_level_windows(&self) -> Vec<WindowId> {
        self.state().windows.keys().copied().collect()
    }

    async fn send_copy_data(
        &self,
        window: WindowId,
        block: &CopyDataBlock,
        timeout: Duration,
    ) -> Result<()> {
        let inbox = self
            .state()
            .windows
            .get(&window)
            .map(|entry| entry.inbox.clone())
            .ok_or_else(|| XdError::Transport(format!("window {} does not exist", window)))?;

        match inbox.send_timeout(block.as_bytes().to_vec(), timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(XdError::Transport(format!(
                "window {} did not respond within {:?}",
                window, timeout
            ))),
            Err(SendTimeoutError::Closed(_)) => Err(XdError::Transport(format!(
                "window {} is closing",
                window
            ))),
        }
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }
}
