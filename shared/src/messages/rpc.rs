use std::collections::HashMap;

use crate::messages::{error::RpcError, handler::MessageHandler};

pub type RpcHash = u32;

/// Stable hash of an RPC's declared signature, identical on every peer
pub fn rpc_hash(signature: &str) -> RpcHash {
    crc32fast::hash(signature.as_bytes())
}

struct RpcEntry {
    signature: String,
    handler: Box<MessageHandler>,
}

/// Maps signature hashes to handlers. Built before the session starts and
/// locked for the rest of its life.
#[derive(Default)]
pub struct RpcTable {
    entries: HashMap<RpcHash, RpcEntry>,
    locked: bool,
}

impl RpcTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        signature: &str,
        handler: Box<MessageHandler>,
    ) -> Result<RpcHash, RpcError> {
        if self.locked {
            return Err(RpcError::TableLocked {
                signature: signature.to_string(),
            });
        }

        let hash = rpc_hash(signature);
        if let Some(existing) = self.entries.get(&hash) {
            if existing.signature == signature {
                return Err(RpcError::DuplicateSignature {
                    signature: signature.to_string(),
                });
            }
            return Err(RpcError::HashCollision {
                hash,
                existing: existing.signature.clone(),
                signature: signature.to_string(),
            });
        }

        self.entries.insert(
            hash,
            RpcEntry {
                signature: signature.to_string(),
                handler,
            },
        );
        Ok(hash)
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn contains(&self, hash: &RpcHash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn signature(&self, hash: &RpcHash) -> Option<&str> {
        self.entries.get(hash).map(|entry| entry.signature.as_str())
    }

    pub fn handler_mut(&mut self, hash: &RpcHash) -> Result<&mut Box<MessageHandler>, RpcError> {
        self.entries
            .get_mut(hash)
            .map(|entry| &mut entry.handler)
            .ok_or(RpcError::UnknownHash { hash: *hash })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
