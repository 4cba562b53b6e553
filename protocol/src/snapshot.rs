//! Snapshot & restore (§4.7): the only sanctioned way to roll back a ratchet session, used
//! after a rejected send or a crashed `Send`. A snapshot serializes the full state as base64
//! byte strings plus integer counters and role; restoring drops `skippedKeys` (§3, §4.7).

use crate::constants::CURRENT_SNAPSHOT_VERSION;
use crate::errors::SnapshotError;
use crate::primitives::{decode_b64, encode_b64, AeadAlgorithm, PrivateKey, PublicKey};
use crate::ratchet::{Ratchet, Role, SessionDescriptor};

/// A point-in-time capture of a [`Ratchet`]'s state, serializable to a compact line format.
/// Key material is present only here, and a `Snapshot` must never be logged (§4.7).
pub struct Snapshot {
    version: u32,
    role: Role,
    peer_account_digest: String,
    peer_device_id: String,
    conversation_id: String,
    aead: AeadAlgorithm,
    rk_b64: String,
    ck_s_b64: Option<String>,
    ck_r_b64: Option<String>,
    ns: u64,
    nr: u64,
    pn: u64,
    ns_total: u64,
    nr_total: u64,
    my_ratchet_priv_b64: String,
    their_ratchet_pub_b64: Option<String>,
    pending_send_ratchet: bool,
}

impl Snapshot {
    /// `snapshot(state)`: captures everything needed to fully reconstruct the session.
    /// `skippedKeys` is deliberately not captured — restoring a snapshot legitimately empties
    /// it (§4.7), and caching it separately would let a restored session skip the "no silent
    /// recovery" rule via stale keys.
    pub fn capture(ratchet: &Ratchet) -> Snapshot {
        let raw = ratchet.raw_state();
        Snapshot {
            version: CURRENT_SNAPSHOT_VERSION,
            role: raw.descriptor.role,
            peer_account_digest: raw.descriptor.peer_account_digest.clone(),
            peer_device_id: raw.descriptor.peer_device_id.clone(),
            conversation_id: raw.descriptor.conversation_id.clone(),
            aead: raw.aead,
            rk_b64: encode_b64(&raw.rk),
            ck_s_b64: raw.ck_s.map(|k| encode_b64(&k)),
            ck_r_b64: raw.ck_r.map(|k| encode_b64(&k)),
            ns: raw.ns,
            nr: raw.nr,
            pn: raw.pn,
            ns_total: raw.ns_total,
            nr_total: raw.nr_total,
            my_ratchet_priv_b64: raw.my_ratchet_priv.to_base64(),
            their_ratchet_pub_b64: raw.their_ratchet_pub.map(|k| k.to_base64()),
            pending_send_ratchet: raw.pending_send_ratchet,
        }
    }

    /// `restore(snapshot) -> state`: rebuilds a [`Ratchet`] with an empty skipped-key cache.
    pub fn restore(&self) -> Result<Ratchet, SnapshotError> {
        if self.version != CURRENT_SNAPSHOT_VERSION {
            return Err(SnapshotError::MalformedState("unsupported snapshot version"));
        }
        let rk = fixed_32(&self.rk_b64)?;
        let ck_s = self.ck_s_b64.as_deref().map(fixed_32).transpose()?;
        let ck_r = self.ck_r_b64.as_deref().map(fixed_32).transpose()?;
        let my_ratchet_priv = PrivateKey::from_base64(&self.my_ratchet_priv_b64)
            .map_err(|_| SnapshotError::MalformedState("my_ratchet_priv_b64"))?;
        let my_ratchet_pub = PublicKey::from(&my_ratchet_priv);
        let their_ratchet_pub = self
            .their_ratchet_pub_b64
            .as_deref()
            .map(PublicKey::from_base64)
            .transpose()
            .map_err(|_| SnapshotError::MalformedState("their_ratchet_pub_b64"))?;

        Ok(Ratchet::from_raw_state(crate::ratchet::RawState {
            descriptor: SessionDescriptor {
                role: self.role,
                peer_account_digest: self.peer_account_digest.clone(),
                peer_device_id: self.peer_device_id.clone(),
                conversation_id: self.conversation_id.clone(),
            },
            aead: self.aead,
            rk,
            ck_s,
            ck_r,
            ns: self.ns,
            nr: self.nr,
            pn: self.pn,
            ns_total: self.ns_total,
            nr_total: self.nr_total,
            my_ratchet_priv,
            my_ratchet_pub,
            their_ratchet_pub,
            pending_send_ratchet: self.pending_send_ratchet,
        }))
    }
}

fn fixed_32(value: &str) -> Result<[u8; 32], SnapshotError> {
    let bytes = decode_b64(value)?;
    if bytes.len() != 32 {
        return Err(SnapshotError::MalformedState("expected 32-byte field"));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prekey::DeviceKeyMaterial;
    use crate::primitives::IdentityKeyPair;
    use crate::x3dh;

    #[test]
    fn snapshot_then_restore_is_identity_on_observable_state() {
        let alice_ik = IdentityKeyPair::generate();
        let mut bob = DeviceKeyMaterial::generate(1);
        let bundle = bob.publish_bundle();
        let (initial, ephemeral_priv) = x3dh::initiate(&alice_ik, &bundle).unwrap();

        let ephemeral_pub = PublicKey::from(&ephemeral_priv);
        let mut ratchet = Ratchet::init_initiator(
            initial.root_key,
            ephemeral_priv,
            ephemeral_pub,
            SessionDescriptor {
                role: Role::Initiator,
                peer_account_digest: "digest".to_string(),
                peer_device_id: "bob-device".to_string(),
                conversation_id: "c1".to_string(),
            },
            AeadAlgorithm::Aes256Gcm,
        )
        .unwrap();

        let (_env, _mk) = ratchet.encrypt(b"hello", "alice-device").unwrap();
        let snapshot = Snapshot::capture(&ratchet);
        let restored = snapshot.restore().unwrap();

        assert_eq!(restored.ns_total(), ratchet.ns_total());
        assert_eq!(restored.nr_total(), ratchet.nr_total());
    }
}
