use std::collections::HashMap;

use log::{info, warn};

use crate::{
    messages::envelope::InboundMessage,
    types::{PeerId, Tick, TriggerKey},
};

struct DeferredMessage {
    message: InboundMessage,
    expiry: Tick,
}

struct TriggerEntry {
    messages: Vec<DeferredMessage>,
    // Expiry given to messages deferred here for the first time
    expiry: Tick,
}

impl TriggerEntry {
    // Drops expired messages, returning how many were dropped
    fn discard_expired(&mut self, now: Tick) -> usize {
        let before = self.messages.len();
        self.messages.retain(|deferred| now < deferred.expiry);
        before - self.messages.len()
    }
}

/// Buffers inbound messages that refer to something not yet known locally,
/// replaying them once the key they wait on is resolved
pub struct DeferredMessageManager {
    entries: HashMap<TriggerKey, TriggerEntry>,
    timeout_ticks: u32,
    expired_total: u64,
}

impl DeferredMessageManager {
    pub fn new(timeout_ticks: u32) -> Self {
        Self {
            entries: HashMap::new(),
            timeout_ticks,
            expired_total: 0,
        }
    }

    pub fn set_timeout_ticks(&mut self, timeout_ticks: u32) {
        self.timeout_ticks = timeout_ticks;
    }

    pub fn timeout_ticks(&self) -> u32 {
        self.timeout_ticks
    }

    /// Appends `message` to the entry for `key`, creating the entry with an
    /// expiry of `now + timeout` if there is none
    pub fn defer_until_key_available(
        &mut self,
        key: TriggerKey,
        message: InboundMessage,
        now: Tick,
    ) {
        let entry = self.entry(key, now);
        let expiry = entry.expiry;
        entry.messages.push(DeferredMessage { message, expiry });
    }

    /// Defers a replayed message again. It keeps the expiry it was first
    /// deferred with, so replaying never extends how long a message waits.
    pub fn redefer(&mut self, key: TriggerKey, message: InboundMessage, expiry: Tick, now: Tick) {
        self.entry(key, now)
            .messages
            .push(DeferredMessage { message, expiry });
    }

    fn entry(&mut self, key: TriggerKey, now: Tick) -> &mut TriggerEntry {
        let timeout_ticks = self.timeout_ticks;
        self.entries.entry(key).or_insert_with(|| TriggerEntry {
            messages: Vec::new(),
            expiry: now.saturating_add(timeout_ticks),
        })
    }

    /// Removes the entry for `key` and returns its messages in arrival order.
    /// Messages whose expiry has passed are discarded instead of replayed.
    pub fn resolve_key(&mut self, key: &TriggerKey, now: Tick) -> Vec<InboundMessage> {
        self.take_key(key, now)
            .into_iter()
            .map(|(message, _)| message)
            .collect()
    }

    /// Like [`resolve_key`](Self::resolve_key), but also hands back the
    /// expiry of every message, for replays that may defer again
    pub fn take_key(&mut self, key: &TriggerKey, now: Tick) -> Vec<(InboundMessage, Tick)> {
        let Some(mut entry) = self.entries.remove(key) else {
            return Vec::new();
        };
        let expired = entry.discard_expired(now);
        if expired > 0 {
            self.expired_total += expired as u64;
            warn!(
                "Deferred trigger {:?} resolved after {} message(s) expired, discarding them",
                key, expired
            );
        }
        info!(
            "Deferred trigger {:?} resolved, replaying {} message(s)",
            key,
            entry.messages.len()
        );
        entry
            .messages
            .into_iter()
            .map(|deferred| (deferred.message, deferred.expiry))
            .collect()
    }

    /// Discards every message whose expiry has passed, and entries left
    /// empty. Expiry is expected under normal jitter, so it is logged rather
    /// than reported as an error. Returns the number of messages discarded.
    pub fn cleanup_stale_triggers(&mut self, now: Tick) -> usize {
        let mut expired = 0;
        self.entries.retain(|key, entry| {
            let discarded = entry.discard_expired(now);
            if discarded > 0 {
                warn!(
                    "Deferred trigger {:?} expired without resolution, discarding {} message(s)",
                    key, discarded
                );
            }
            expired += discarded;
            !entry.messages.is_empty()
        });
        self.expired_total += expired as u64;
        expired
    }

    /// Discards everything, used during shutdown
    pub fn cleanup_all_triggers(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Drops messages buffered from `peer`. Entries left empty are removed.
    pub fn purge_peer(&mut self, peer: &PeerId) -> usize {
        let mut purged = 0;
        self.entries.retain(|_, entry| {
            let before = entry.messages.len();
            entry
                .messages
                .retain(|deferred| deferred.message.sender != *peer);
            purged += before - entry.messages.len();
            !entry.messages.is_empty()
        });
        purged
    }

    pub fn has_key(&self, key: &TriggerKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn buffered_messages(&self, key: &TriggerKey) -> usize {
        self.entries
            .get(key)
            .map_or(0, |entry| entry.messages.len())
    }

    /// The earliest tick at which a message waiting on `key` expires
    pub fn expiry(&self, key: &TriggerKey) -> Option<Tick> {
        self.entries
            .get(key)
            .and_then(|entry| entry.messages.iter().map(|deferred| deferred.expiry).min())
    }

    /// Messages discarded on expiry since the manager was created
    pub fn expired_total(&self) -> u64 {
        self.expired_total
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
