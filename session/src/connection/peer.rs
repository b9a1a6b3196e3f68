use tether_shared::{PeerId, Tick};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    PendingApproval,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    fn can_become(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, PendingApproval)
                | (Connecting, Connected)
                | (Connecting, Disconnecting)
                | (Connecting, Disconnected)
                | (PendingApproval, Connected)
                | (PendingApproval, Disconnecting)
                | (PendingApproval, Disconnected)
                | (Connected, Disconnecting)
                | (Connected, Disconnected)
                | (Disconnecting, Disconnected)
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeerRoles {
    pub is_server: bool,
    pub is_client: bool,
    pub is_host: bool,
}

impl PeerRoles {
    pub const NONE: PeerRoles = PeerRoles {
        is_server: false,
        is_client: false,
        is_host: false,
    };
    pub const SERVER: PeerRoles = PeerRoles {
        is_server: true,
        is_client: false,
        is_host: false,
    };
    pub const CLIENT: PeerRoles = PeerRoles {
        is_server: false,
        is_client: true,
        is_host: false,
    };
    pub const HOST: PeerRoles = PeerRoles {
        is_server: true,
        is_client: true,
        is_host: true,
    };
}

/// One endpoint known to the session
#[derive(Clone, Debug)]
pub struct Peer {
    id: PeerId,
    roles: PeerRoles,
    state: ConnectionState,
    approved: bool,
    disconnect_reason: Option<String>,
    state_since: Tick,
    history: Vec<ConnectionState>,
}

impl Peer {
    pub fn new(id: PeerId, roles: PeerRoles, now: Tick) -> Self {
        Self {
            id,
            roles,
            state: ConnectionState::Connecting,
            approved: false,
            disconnect_reason: None,
            state_since: now,
            history: vec![ConnectionState::Connecting],
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn roles(&self) -> PeerRoles {
        self.roles
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Once set, never cleared for the life of the session
    pub fn is_approved(&self) -> bool {
        self.approved
    }

    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnect_reason.as_deref()
    }

    /// Tick at which the current state was entered
    pub fn state_since(&self) -> Tick {
        self.state_since
    }

    /// Every state this peer has been in, oldest first
    pub fn history(&self) -> &[ConnectionState] {
        &self.history
    }

    pub fn has_visited(&self, state: ConnectionState) -> bool {
        self.history.contains(&state)
    }

    /// Moves to `next`. Returns false and leaves the peer untouched if the
    /// transition is not allowed.
    pub(crate) fn transition(&mut self, next: ConnectionState, now: Tick) -> bool {
        if !self.state.can_become(next) {
            return false;
        }
        self.state = next;
        self.state_since = now;
        self.history.push(next);
        if next == ConnectionState::Connected {
            self.approved = true;
        }
        true
    }

    pub(crate) fn set_disconnect_reason(&mut self, reason: Option<String>) {
        self.disconnect_reason = reason;
    }
}
