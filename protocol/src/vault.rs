//! The message-key vault (§4.6): lets a sender persist the AEAD-wrapped message key for a
//! delivered message so it can re-render that message locally later, after the ratchet has
//! moved past the chain position that produced it. A receiver may use the same contract.

use crate::errors::VaultError;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Direction {
    Sent,
    Received,
}

/// Records which AEAD, IV, and KDF parameters wrapped `wrapped_mk` (§4.6). The wrapping key
/// derivation itself is out of scope for the core; this struct only records the context a
/// caller needs to later unwrap it.
#[derive(Clone, Debug)]
pub struct WrapContext {
    pub aead: String,
    pub iv_b64: String,
    pub kdf: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct VaultKey {
    pub conversation_id: String,
    pub message_id: String,
    pub sender_device_id: String,
}

#[derive(Clone, Debug)]
pub struct VaultEntry {
    pub target_device_id: String,
    pub direction: Direction,
    pub header_counter: u64,
    pub wrapped_mk_b64: String,
    pub wrap_context: WrapContext,
}

/// In-memory reference implementation of the vault contract. Production storage is a
/// durable append-mostly table (§5 "Resource policy"); this type exists so session and
/// server code can depend on the contract without committing to a storage engine here.
#[derive(Default)]
pub struct MessageKeyVault {
    entries: HashMap<VaultKey, VaultEntry>,
}

impl MessageKeyVault {
    pub fn new() -> MessageKeyVault {
        MessageKeyVault::default()
    }

    /// One row per `(account, conversation, sender_device, target_device, message_id)`; the
    /// account dimension is the caller's partitioning (each account owns its own vault), so
    /// it is not part of `VaultKey` here.
    pub fn put(&mut self, key: VaultKey, entry: VaultEntry) {
        self.entries.insert(key, entry);
    }

    pub fn get(&self, key: &VaultKey) -> Result<&VaultEntry, VaultError> {
        self.entries.get(key).ok_or(VaultError::NotFound)
    }

    /// Idempotent: deleting a missing entry is not an error.
    pub fn delete(&mut self, key: &VaultKey) {
        self.entries.remove(key);
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// The most recent stored `(counter, message_id)` per direction for `conversation_id`,
    /// used to detect a stale local snapshot (§4.6 "VaultLatestState").
    pub fn latest_state(&self, conversation_id: &str) -> HashMap<Direction, (u64, String)> {
        let mut latest: HashMap<Direction, (u64, String)> = HashMap::new();
        for (key, entry) in &self.entries {
            if key.conversation_id != conversation_id {
                continue;
            }
            let slot = latest.entry(entry.direction).or_insert((0, String::new()));
            if entry.header_counter >= slot.0 {
                *slot = (entry.header_counter, key.message_id.clone());
            }
        }
        latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(counter: u64) -> VaultEntry {
        VaultEntry {
            target_device_id: "device-b".to_string(),
            direction: Direction::Sent,
            header_counter: counter,
            wrapped_mk_b64: "wrapped".to_string(),
            wrap_context: WrapContext {
                aead: "aes-256-gcm".to_string(),
                iv_b64: "iv".to_string(),
                kdf: "hkdf-sha256".to_string(),
            },
        }
    }

    #[test]
    fn put_then_get_returns_same_entry() {
        let mut vault = MessageKeyVault::new();
        let key = VaultKey {
            conversation_id: "c1".to_string(),
            message_id: "m1".to_string(),
            sender_device_id: "device-a".to_string(),
        };
        vault.put(key.clone(), sample_entry(1));
        let got = vault.get(&key).unwrap();
        assert_eq!(got.wrapped_mk_b64, "wrapped");
    }

    #[test]
    fn delete_then_get_returns_missing() {
        let mut vault = MessageKeyVault::new();
        let key = VaultKey {
            conversation_id: "c1".to_string(),
            message_id: "m1".to_string(),
            sender_device_id: "device-a".to_string(),
        };
        vault.put(key.clone(), sample_entry(1));
        vault.delete(&key);
        assert!(matches!(vault.get(&key), Err(VaultError::NotFound)));
    }

    #[test]
    fn delete_of_missing_key_is_not_an_error() {
        let mut vault = MessageKeyVault::new();
        let key = VaultKey {
            conversation_id: "c1".to_string(),
            message_id: "ghost".to_string(),
            sender_device_id: "device-a".to_string(),
        };
        vault.delete(&key);
    }

    #[test]
    fn latest_state_tracks_highest_counter_per_direction() {
        let mut vault = MessageKeyVault::new();
        vault.put(
            VaultKey { conversation_id: "c1".to_string(), message_id: "m1".to_string(), sender_device_id: "a".to_string() },
            sample_entry(1),
        );
        vault.put(
            VaultKey { conversation_id: "c1".to_string(), message_id: "m2".to_string(), sender_device_id: "a".to_string() },
            sample_entry(5),
        );
        let latest = vault.latest_state("c1");
        assert_eq!(latest.get(&Direction::Sent).unwrap().0, 5);
    }
}
