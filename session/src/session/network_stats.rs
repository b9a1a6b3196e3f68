use tether_shared::{MessageStats, Tick};

/// Snapshot handed to telemetry subscribers at the end of every frame
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Frames completed before this one
    pub frame: u64,
    pub local_tick: Tick,
    pub connected_peers: usize,
    pub pending_approvals: usize,
    /// Trigger keys with messages still waiting
    pub deferred_entries: usize,
    /// Deferred messages discarded on expiry since the session started
    pub deferred_expired: u64,
    pub messages: MessageStats,
}
