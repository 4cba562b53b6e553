//! The per-(conversation, sender-device) counter & ordering contract enforced at the
//! server boundary (§4.5). The ratchet only ever sees `Ns`/`Nr`, which reset on every DH
//! ratchet; this module tracks the transport-layer `NsTotal`/`last_accepted_counter` pair
//! that must stay monotone across ratchets.

use crate::errors::CounterError;
use std::collections::HashMap;

/// Identifies the ordering domain the counter is monotone within.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CounterKey {
    pub conversation_id: String,
    pub sender_device_id: String,
}

/// Server-side tracker of `last_accepted_counter` per `(conversation, sender_device)`
/// (§4.5 "Send protocol"). Accepts a send iff `counter == last_accepted + 1`.
#[derive(Default)]
pub struct CounterLedger {
    last_accepted: HashMap<CounterKey, u64>,
}

impl CounterLedger {
    pub fn new() -> CounterLedger {
        CounterLedger::default()
    }

    pub fn last_accepted(&self, key: &CounterKey) -> u64 {
        self.last_accepted.get(key).copied().unwrap_or(0)
    }

    /// Attempts to accept `counter` for `key`. On success, persists the new high-water mark
    /// and returns it. On failure, returns `CounterTooLow { max_counter }` without mutating
    /// the ledger — the caller (store endpoint) must not partially apply the write either.
    pub fn try_accept(&mut self, key: &CounterKey, counter: u64) -> Result<(), CounterError> {
        let expected = self.last_accepted(key) + 1;
        if counter != expected {
            return Err(CounterError::CounterTooLow { max_counter: self.last_accepted(key) });
        }
        self.last_accepted.insert(key.clone(), counter);
        Ok(())
    }
}

/// The transport-layer send payload constructed around an `Encrypt` output (§4.5 step 1).
#[derive(Clone, Debug)]
pub struct SendRequest {
    pub conversation_id: String,
    pub sender_device_id: String,
    pub receiver_account_id: String,
    pub receiver_device_id: String,
    pub header_json: String,
    pub ciphertext_b64: String,
    pub counter: u64,
    pub message_id: uuid::Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// The server's signed view of a `(conversation, sender_device)` pair's counter state
/// (§4.5 "Send-state endpoint"). `expected_counter = last_accepted_counter + 1`.
#[derive(Clone, Debug)]
pub struct SendState {
    pub expected_counter: u64,
    pub last_accepted_counter: u64,
    pub last_accepted_message_id: Option<String>,
    pub server_time: chrono::DateTime<chrono::Utc>,
}

impl SendState {
    pub fn from_ledger(ledger: &CounterLedger, key: &CounterKey, last_message_id: Option<String>) -> SendState {
        let last_accepted = ledger.last_accepted(key);
        SendState {
            expected_counter: last_accepted + 1,
            last_accepted_counter: last_accepted,
            last_accepted_message_id: last_message_id,
            server_time: chrono::Utc::now(),
        }
    }

    /// Canonical bytes signed/verified for the send-state HMAC (`§4.5`/`§6`): a stable,
    /// delimiter-joined encoding rather than JSON, so signing and verifying never depend on
    /// a serializer's field-ordering behavior.
    pub fn signing_bytes(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}",
            self.expected_counter,
            self.last_accepted_counter,
            self.last_accepted_message_id.as_deref().unwrap_or(""),
            self.server_time.timestamp_millis()
        )
        .into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CounterKey {
        CounterKey { conversation_id: "c1".to_string(), sender_device_id: "d1".to_string() }
    }

    #[test]
    fn accepts_strictly_incrementing_counters() {
        let mut ledger = CounterLedger::new();
        let k = key();
        ledger.try_accept(&k, 1).unwrap();
        ledger.try_accept(&k, 2).unwrap();
        assert_eq!(ledger.last_accepted(&k), 2);
    }

    #[test]
    fn rejects_out_of_order_counter_with_max_counter() {
        let mut ledger = CounterLedger::new();
        let k = key();
        ledger.try_accept(&k, 1).unwrap();
        ledger.try_accept(&k, 2).unwrap();
        ledger.try_accept(&k, 3).unwrap();

        let err = ledger.try_accept(&k, 1).unwrap_err();
        match err {
            CounterError::CounterTooLow { max_counter } => assert_eq!(max_counter, 3),
            _ => panic!("expected CounterTooLow"),
        }
        // Rejection must not have mutated the ledger.
        assert_eq!(ledger.last_accepted(&k), 3);
    }

    #[test]
    fn send_state_expected_counter_follows_last_accepted() {
        let mut ledger = CounterLedger::new();
        let k = key();
        ledger.try_accept(&k, 1).unwrap();
        let state = SendState::from_ledger(&ledger, &k, Some("msg-1".to_string()));
        assert_eq!(state.expected_counter, 2);
        assert_eq!(state.last_accepted_counter, 1);
    }
}
