//! Fan-out broadcaster.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::datagram::DataGram;
use crate::error::Result;
use crate::transport::Broadcaster;

/// Sends every datagram to each member broadcaster that is alive.
///
/// Members are tried in order; the first failure is returned after the
/// remaining members have been sent to.
pub struct MulticastBroadcaster {
    members: Vec<Arc<dyn Broadcaster>>,
}

impl MulticastBroadcaster {
    pub fn new(members: Vec<Arc<dyn Broadcaster>>) -> Self {
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[async_trait]
impl Broadcaster for MulticastBroadcaster {
    async fn send_datagram(&self, datagram: DataGram) -> Result<()> {
        let mut first_error = None;
        for (index, member) in self.members.iter().enumerate() {
            if !member.is_alive() {
                debug!(member = index, channel = %datagram.channel(), "Skipping broadcaster that is not alive");
                continue;
            }
            if let Err(e) = member.send_datagram(datagram.clone()).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn is_alive(&self) -> bool {
        self.members.iter().any(|member| member.is_alive())
    }
}
