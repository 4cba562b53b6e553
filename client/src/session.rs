//! Per-(conversation, peer device) ratchet sessions (§9 "Global mutable state"): a
//! `SessionStore` owns a mapping to a mutex-guarded [`Ratchet`], exactly the shape the
//! spec's design notes call for — no process-wide mutable state survives a session drop.

use protocol::primitives::{encode_b64, AeadAlgorithm};
use protocol::ratchet::{Ratchet, Role, SessionDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SessionKey {
    pub conversation_id: String,
    pub peer_device_id: String,
}

/// Owns every session for one local device. Each session's ratchet is behind its own mutex
/// so concurrent `Encrypt` calls on *different* sessions never contend, but a single
/// session's `{snapshot -> Encrypt -> transport-send -> commit-or-rollback}` sequence is
/// always serialized (§5 "Ordering guarantees").
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionKey, Arc<Mutex<Ratchet>>>>,
}

impl SessionStore {
    pub fn new() -> SessionStore {
        SessionStore::default()
    }

    pub async fn insert(&self, key: SessionKey, ratchet: Ratchet) {
        self.sessions.write().await.insert(key, Arc::new(Mutex::new(ratchet)));
    }

    pub async fn get(&self, key: &SessionKey) -> Option<Arc<Mutex<Ratchet>>> {
        self.sessions.read().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.read().await.contains_key(key)
    }
}

pub fn initiator_descriptor(
    conversation_id: &str,
    peer_device_id: &str,
    peer_identity_key: &protocol::primitives::IdentityPublicKey,
) -> SessionDescriptor {
    SessionDescriptor {
        role: Role::Initiator,
        peer_account_digest: encode_b64(&peer_identity_key.hash().0),
        peer_device_id: peer_device_id.to_string(),
        conversation_id: conversation_id.to_string(),
    }
}

pub fn responder_descriptor(
    conversation_id: &str,
    peer_device_id: &str,
    peer_identity_key: &protocol::primitives::IdentityPublicKey,
) -> SessionDescriptor {
    SessionDescriptor {
        role: Role::Responder,
        peer_account_digest: encode_b64(&peer_identity_key.hash().0),
        peer_device_id: peer_device_id.to_string(),
        conversation_id: conversation_id.to_string(),
    }
}

pub const DEFAULT_AEAD: AeadAlgorithm = AeadAlgorithm::Aes256Gcm;
