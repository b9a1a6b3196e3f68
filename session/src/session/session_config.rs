use std::{default::Default, time::Duration};

use tether_shared::{ConnectionConfig, TickConfig};

use crate::connection::approval::ApprovalConfig;

/// Contains Config properties which will be used by the Session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Used to configure message framing for every peer
    pub connection: ConnectionConfig,
    /// Whether and how long peers wait for connection approval
    pub approval: ApprovalConfig,
    /// Drives the tick clock and time sync
    pub tick: TickConfig,
    /// How long a deferred message waits for its trigger before it is discarded
    pub deferred_message_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            approval: ApprovalConfig::default(),
            tick: TickConfig::default(),
            deferred_message_timeout: Duration::from_secs(10),
        }
    }
}
