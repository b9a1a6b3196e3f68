use std::{collections::HashMap, default::Default, time::Duration};

use log::warn;

use tether_shared::{PeerId, Tick};

use crate::error::SessionError;

/// Contains Config properties which drive connection approval
#[derive(Clone, Debug)]
pub struct ApprovalConfig {
    /// When false, peers go straight from Connecting to Connected
    pub enabled: bool,
    /// How long a peer may wait for an answer before it is disconnected.
    /// Also bounds how long a server waits for a connection request, and how
    /// long a client waits to be approved.
    pub timeout: Duration,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Handed to the approval callback once per connecting peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionApprovalRequest {
    pub peer_id: PeerId,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionApprovalResponse {
    pub approved: bool,
    /// Sent to the peer on rejection
    pub reason: Option<String>,
}

impl ConnectionApprovalResponse {
    pub fn accept() -> Self {
        Self {
            approved: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
        }
    }
}

/// Outcome of an approval request. `Pending` keeps the request open until
/// the application completes it or it times out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApprovalState {
    Pending,
    Resolved(ConnectionApprovalResponse),
}

pub type ApprovalCallback = dyn FnMut(&ConnectionApprovalRequest) -> ApprovalState;

struct PendingApproval {
    request: ConnectionApprovalRequest,
    state: ApprovalState,
    deadline: Tick,
}

/// Holds the approval callback and every request still waiting on it
#[derive(Default)]
pub struct ApprovalManager {
    callback: Option<Box<ApprovalCallback>>,
    pending: HashMap<PeerId, PendingApproval>,
}

impl ApprovalManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_callback(&mut self, callback: Box<ApprovalCallback>) -> Result<(), SessionError> {
        if self.callback.is_some() {
            return Err(SessionError::ApprovalCallbackAlreadyRegistered);
        }
        self.callback = Some(callback);
        Ok(())
    }

    pub fn clear_callback(&mut self) -> bool {
        self.callback.take().is_some()
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Opens a request for `peer` and runs the callback. Without a callback
    /// the request stays pending until `deadline`.
    pub fn request_approval(
        &mut self,
        peer: PeerId,
        payload: Vec<u8>,
        deadline: Tick,
    ) -> ApprovalState {
        let request = ConnectionApprovalRequest {
            peer_id: peer,
            payload,
        };
        let state = match self.callback.as_mut() {
            Some(callback) => callback(&request),
            None => {
                warn!(
                    "Approval required for peer {} but no approval callback is registered; it will time out at tick {}",
                    peer, deadline
                );
                ApprovalState::Pending
            }
        };
        if state == ApprovalState::Pending {
            self.pending.insert(
                peer,
                PendingApproval {
                    request,
                    state: ApprovalState::Pending,
                    deadline,
                },
            );
        }
        state
    }

    /// Records the answer for a pending request. It is applied during the
    /// next Early stage.
    pub fn complete(
        &mut self,
        peer: PeerId,
        response: ConnectionApprovalResponse,
    ) -> Result<(), SessionError> {
        match self.pending.get_mut(&peer) {
            Some(pending) if pending.state == ApprovalState::Pending => {
                pending.state = ApprovalState::Resolved(response);
                Ok(())
            }
            _ => Err(SessionError::UnknownPendingApproval { peer_id: peer }),
        }
    }

    /// Removes and returns every request that has been answered, ordered by peer id
    pub fn take_resolved(&mut self) -> Vec<(PeerId, ConnectionApprovalResponse)> {
        let mut resolved: Vec<PeerId> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.state != ApprovalState::Pending)
            .map(|(peer, _)| *peer)
            .collect();
        resolved.sort_unstable();

        resolved
            .into_iter()
            .filter_map(|peer| {
                let pending = self.pending.remove(&peer)?;
                match pending.state {
                    ApprovalState::Resolved(response) => Some((peer, response)),
                    ApprovalState::Pending => None,
                }
            })
            .collect()
    }

    /// Removes and returns every unanswered request whose deadline has passed
    pub fn take_timed_out(&mut self, now: Tick) -> Vec<PeerId> {
        let mut timed_out: Vec<PeerId> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.state == ApprovalState::Pending && now >= pending.deadline)
            .map(|(peer, _)| *peer)
            .collect();
        timed_out.sort_unstable();
        for peer in &timed_out {
            self.pending.remove(peer);
        }
        timed_out
    }

    pub fn is_pending(&self, peer: &PeerId) -> bool {
        self.pending.contains_key(peer)
    }

    pub fn request(&self, peer: &PeerId) -> Option<&ConnectionApprovalRequest> {
        self.pending.get(peer).map(|pending| &pending.request)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn remove(&mut self, peer: &PeerId) {
        self.pending.remove(peer);
    }

    /// Drops every request and the callback
    pub fn clear(&mut self) {
        self.pending.clear();
        self.callback = None;
    }
}
