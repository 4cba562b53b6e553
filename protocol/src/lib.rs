//! Cryptographic core: X3DH key agreement, the Double Ratchet session, the counter/ordering
//! contract, the message-key vault, and snapshot/restore. Transport, storage, and HTTP
//! concerns live in `common`, `server`, and `client`; this crate only knows about keys,
//! chains, and envelopes.

pub mod constants;
pub mod counter;
pub mod envelope;
pub mod errors;
pub mod prekey;
pub mod primitives;
pub mod ratchet;
pub mod snapshot;
pub mod vault;
pub mod x3dh;
