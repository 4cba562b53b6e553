//! This module defines the custom error types used throughout the cryptographic protocol
//! implementation. `X3DHError` covers the pre-key bundle manager and X3DH handshake,
//! `RatchetError` covers the Double Ratchet session, and `CounterError`/`VaultError`/
//! `SnapshotError` cover the remaining external-collaborator components. `CoreError` is the
//! umbrella type a session-level caller sees.

use std::fmt::{Display, Formatter};

/// Represents errors that can occur during pre-key bundle handling and the X3DH handshake.
#[derive(Debug)]
pub enum X3DHError {
    /// Error occurring during signature verification with Ed25519.
    InvalidSignature(ed25519_dalek::SignatureError),

    /// Error indicating an invalid key material length during HKDF key derivation.
    HkdfInvalidLengthError(hkdf::InvalidLength),

    /// General AEAD encryption or decryption error (includes authentication failure).
    AeadError,

    /// Error occurring during Base64 decoding of encoded data.
    Base64DecodeError(base64::DecodeError),

    /// Error indicating that a [`crate::prekey::PreKeyBundle`] is invalid or corrupted.
    InvalidPreKeyBundle,

    /// The signed pre-key's signature does not verify against `ik_pub`.
    BundleSignatureInvalid,

    /// Malformed X3DH initial message.
    InvalidInitialMessage,

    /// Invalid or corrupted private key.
    InvalidPrivateKey,

    /// Invalid or corrupted public key.
    InvalidPublicKey,

    /// Claim was attempted against a device with no published bundle.
    PrekeyUnavailable,

    /// Server-side replay of an already-consumed `opk_id`: a fatal protocol violation.
    OpkReplay,
}

impl Display for X3DHError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            X3DHError::InvalidSignature(e) => write!(f, "invalid signature: {}", e),
            X3DHError::HkdfInvalidLengthError(e) => write!(f, "invalid hkdf output length: {}", e),
            X3DHError::AeadError => write!(f, "aead encryption or decryption failed"),
            X3DHError::Base64DecodeError(e) => write!(f, "base64 decode error: {}", e),
            X3DHError::InvalidPreKeyBundle => write!(f, "invalid prekey bundle"),
            X3DHError::BundleSignatureInvalid => write!(f, "prekey bundle signature does not verify"),
            X3DHError::InvalidInitialMessage => write!(f, "invalid initial message"),
            X3DHError::InvalidPrivateKey => write!(f, "invalid private key"),
            X3DHError::InvalidPublicKey => write!(f, "invalid public key"),
            X3DHError::PrekeyUnavailable => write!(f, "no prekey bundle published for device"),
            X3DHError::OpkReplay => write!(f, "one-time prekey was already consumed"),
        }
    }
}

impl std::error::Error for X3DHError {}

impl From<hkdf::InvalidLength> for X3DHError {
    fn from(value: hkdf::InvalidLength) -> Self {
        X3DHError::HkdfInvalidLengthError(value)
    }
}

impl From<ed25519_dalek::SignatureError> for X3DHError {
    fn from(value: ed25519_dalek::SignatureError) -> Self {
        X3DHError::InvalidSignature(value)
    }
}

impl From<aes_gcm::Error> for X3DHError {
    fn from(_value: aes_gcm::Error) -> Self {
        X3DHError::AeadError
    }
}

impl From<base64::DecodeError> for X3DHError {
    fn from(value: base64::DecodeError) -> Self {
        X3DHError::Base64DecodeError(value)
    }
}

/// Represents errors that can occur during Double Ratchet encrypt/decrypt.
#[derive(Debug)]
pub enum RatchetError {
    HkdfInvalidLengthError(hkdf::InvalidLength),

    /// The wire header failed structural validation before any key derivation was attempted
    /// (§4.4 "Header validation"). Carries a short machine-readable reason.
    HeaderInvalid(&'static str),

    /// AEAD authentication failed, or a lower-level crypto error propagated from X3DH.
    DecryptionError(X3DHError),

    /// The number of messages that would need to be skipped exceeds `MAX_SKIPS`.
    MaxSkipsExceeded,

    /// A cache or wire-format conversion failed (malformed base64, wrong-length buffer).
    ConversionError,
}

impl Display for RatchetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RatchetError::HkdfInvalidLengthError(e) => write!(f, "invalid hkdf output length: {}", e),
            RatchetError::HeaderInvalid(reason) => write!(f, "invalid header: {}", reason),
            RatchetError::DecryptionError(e) => write!(f, "decryption error: {}", e),
            RatchetError::MaxSkipsExceeded => write!(f, "max skipped messages exceeded"),
            RatchetError::ConversionError => write!(f, "conversion error"),
        }
    }
}

impl std::error::Error for RatchetError {}

impl From<hkdf::InvalidLength> for RatchetError {
    fn from(value: hkdf::InvalidLength) -> Self {
        RatchetError::HkdfInvalidLengthError(value)
    }
}

impl From<X3DHError> for RatchetError {
    fn from(value: X3DHError) -> Self {
        RatchetError::DecryptionError(value)
    }
}

/// Server-boundary counter/ordering errors (§4.5).
#[derive(Debug)]
pub enum CounterError {
    /// The sender's `counter` was behind the server's `last_accepted_counter`.
    CounterTooLow { max_counter: u64 },
    /// A counter value was reused for a `(conversation, sender_device)` pair that already
    /// accepted it: a fatal protocol violation, never silently repaired.
    CounterReplay,
}

impl Display for CounterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CounterError::CounterTooLow { max_counter } => {
                write!(f, "counter too low, server max is {}", max_counter)
            }
            CounterError::CounterReplay => write!(f, "counter value already accepted"),
        }
    }
}

impl std::error::Error for CounterError {}

/// Message-key vault errors (§4.6).
#[derive(Debug)]
pub enum VaultError {
    NotFound,
    MalformedEnvelope,
}

impl Display for VaultError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultError::NotFound => write!(f, "vault entry not found"),
            VaultError::MalformedEnvelope => write!(f, "malformed vault envelope"),
        }
    }
}

impl std::error::Error for VaultError {}

/// Snapshot/restore errors (§4.7).
#[derive(Debug)]
pub enum SnapshotError {
    Base64DecodeError(base64::DecodeError),
    MalformedState(&'static str),
}

impl Display for SnapshotError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::Base64DecodeError(e) => write!(f, "base64 decode error: {}", e),
            SnapshotError::MalformedState(reason) => write!(f, "malformed snapshot: {}", reason),
        }
    }
}

impl std::error::Error for SnapshotError {}

impl From<base64::DecodeError> for SnapshotError {
    fn from(value: base64::DecodeError) -> Self {
        SnapshotError::Base64DecodeError(value)
    }
}

/// Umbrella error seen by session-level callers (client/server crates). Validation, crypto,
/// counter, and snapshot failures keep their own variant so callers apply the right (and
/// only the right) recovery rule rather than catch-all retrying.
#[derive(Debug)]
pub enum CoreError {
    X3DH(X3DHError),
    Ratchet(RatchetError),
    Counter(CounterError),
    Vault(VaultError),
    Snapshot(SnapshotError),
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::X3DH(e) => write!(f, "{}", e),
            CoreError::Ratchet(e) => write!(f, "{}", e),
            CoreError::Counter(e) => write!(f, "{}", e),
            CoreError::Vault(e) => write!(f, "{}", e),
            CoreError::Snapshot(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<X3DHError> for CoreError {
    fn from(value: X3DHError) -> Self {
        CoreError::X3DH(value)
    }
}

impl From<RatchetError> for CoreError {
    fn from(value: RatchetError) -> Self {
        CoreError::Ratchet(value)
    }
}

impl From<CounterError> for CoreError {
    fn from(value: CounterError) -> Self {
        CoreError::Counter(value)
    }
}

impl From<VaultError> for CoreError {
    fn from(value: VaultError) -> Self {
        CoreError::Vault(value)
    }
}

impl From<SnapshotError> for CoreError {
    fn from(value: SnapshotError) -> Self {
        CoreError::Snapshot(value)
    }
}
