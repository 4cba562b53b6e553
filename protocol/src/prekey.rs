//! Pre-key bundle construction, verification, and atomic one-time pre-key consumption (§4.2).
//!
//! A device's long-term material is an [`IdentityKeyPair`] plus a signed pre-key and a pool
//! of one-time pre-keys. What goes over the wire is a [`PreKeyBundle`]: public material only,
//! plus the Ed25519 signature over the signed pre-key's public bytes.

use crate::errors::X3DHError;
use crate::primitives::{IdentityKeyPair, IdentityPublicKey, PrivateKey, PublicKey, Signature};
use std::collections::HashMap;

/// A signed pre-key (`SPK`): rotated periodically, its public half is authenticated by the
/// identity key's signature so a claimant can detect tampering before running X3DH.
pub struct SignedPreKeyPair {
    pub key_id: u32,
    pub private: PrivateKey,
    pub public: PublicKey,
    pub signature: Signature,
}

impl SignedPreKeyPair {
    pub fn generate(identity_key: &IdentityKeyPair, key_id: u32) -> SignedPreKeyPair {
        let private = PrivateKey::generate();
        let public = PublicKey::from(&private);
        let signature = identity_key.sign(&public.0);
        SignedPreKeyPair { key_id, private, public, signature }
    }
}

/// A one-time pre-key (`OPK`): consumed by at most one X3DH handshake, never reused.
pub struct OneTimePreKey {
    pub key_id: u32,
    pub private: PrivateKey,
    pub public: PublicKey,
}

impl OneTimePreKey {
    pub fn generate(key_id: u32) -> OneTimePreKey {
        let private = PrivateKey::generate();
        let public = PublicKey::from(&private);
        OneTimePreKey { key_id, private, public }
    }
}

/// The public material published for a device: what a claimant downloads to run X3DH
/// against this device (§3 "PreKeyBundle").
#[derive(Clone)]
pub struct PreKeyBundle {
    pub identity_key: IdentityPublicKey,
    pub signed_prekey_id: u32,
    pub signed_prekey: PublicKey,
    pub signature: Signature,
    pub one_time_prekey: Option<(u32, PublicKey)>,
}

impl PreKeyBundle {
    /// Verifies the signed pre-key's signature against the bundle's own identity key.
    /// Does not check freshness or revocation; callers compare `identity_key` against a
    /// separately-trusted value when one is available (e.g. a prior session's IK).
    pub fn verify(&self) -> Result<(), X3DHError> {
        self.identity_key
            .verify(&self.signature, &self.signed_prekey.0)
            .map_err(|_| X3DHError::BundleSignatureInvalid)
    }
}

/// A device's full key material: the long-term identity key, one signed pre-key, and a pool
/// of one-time pre-keys awaiting consumption. Held by the owning client, never transmitted.
pub struct DeviceKeyMaterial {
    pub identity_key: IdentityKeyPair,
    pub signed_prekey: SignedPreKeyPair,
    one_time_prekeys: HashMap<u32, OneTimePreKey>,
    next_otpk_id: u32,
}

impl DeviceKeyMaterial {
    /// Generates a fresh identity key, signed pre-key, and `otpk_count` one-time pre-keys
    /// (`generateInitialBundle`, §4.2).
    pub fn generate(otpk_count: u32) -> DeviceKeyMaterial {
        let identity_key = IdentityKeyPair::generate();
        let signed_prekey = SignedPreKeyPair::generate(&identity_key, 0);
        let mut material = DeviceKeyMaterial {
            identity_key,
            signed_prekey,
            one_time_prekeys: HashMap::new(),
            next_otpk_id: 0,
        };
        material.replenish(otpk_count);
        material
    }

    /// Generates `count` additional one-time pre-keys and adds them to the local pool.
    pub fn replenish(&mut self, count: u32) {
        for _ in 0..count {
            let id = self.next_otpk_id;
            self.next_otpk_id += 1;
            self.one_time_prekeys.insert(id, OneTimePreKey::generate(id));
        }
    }

    pub fn otpk_pool_size(&self) -> usize {
        self.one_time_prekeys.len()
    }

    /// The public half of every one-time pre-key currently in the local pool, for uploading
    /// a fresh batch to the server's store (`PublishBundleRequest.one_time_prekeys`). Unlike
    /// [`DeviceKeyMaterial::publish_bundle`] (which names at most one, the shape a claimant
    /// receives), this is the whole pool awaiting consumption.
    pub fn one_time_prekeys_public(&self) -> Vec<(u32, PublicKey)> {
        self.one_time_prekeys.values().map(|otpk| (otpk.key_id, otpk.public.clone())).collect()
    }

    /// Builds the bundle to publish to the server: the identity key, signed pre-key, and at
    /// most one one-time pre-key. Does not remove anything from the local pool — publishing
    /// only copies public material; consumption happens on [`DeviceKeyMaterial::take_one_time_prekey`]
    /// when the owner later needs the matching private half to process an initial message.
    pub fn publish_bundle(&self) -> PreKeyBundle {
        let otpk = self
            .one_time_prekeys
            .values()
            .next()
            .map(|otpk| (otpk.key_id, otpk.public.clone()));
        PreKeyBundle {
            identity_key: self.identity_key.verifying_key(),
            signed_prekey_id: self.signed_prekey.key_id,
            signed_prekey: self.signed_prekey.public.clone(),
            signature: self.signed_prekey.signature.clone(),
            one_time_prekey: otpk,
        }
    }

    /// Atomically removes and returns the one-time private key for `key_id`, so it can never
    /// be used to process a second initial message. Replaces the teacher's clone-then-pop
    /// pattern, which left the canonical pool untouched and made OTPKs effectively reusable.
    pub fn take_one_time_prekey(&mut self, key_id: u32) -> Result<OneTimePreKey, X3DHError> {
        self.one_time_prekeys.remove(&key_id).ok_or(X3DHError::OpkReplay)
    }
}

/// Server-side store of published bundles, keyed by device id. Mirrors the atomicity
/// requirement of [`DeviceKeyMaterial::take_one_time_prekey`]: claiming a bundle for a
/// handshake removes its one-time pre-key from the store in the same step a caller observes
/// it, so two concurrent claimants can never receive the same `opk_id` (§4.2, §5).
#[derive(Default)]
pub struct PreKeyBundleStore {
    bundles: HashMap<String, StoredBundle>,
}

struct StoredBundle {
    identity_key: IdentityPublicKey,
    signed_prekey_id: u32,
    signed_prekey: PublicKey,
    signature: Signature,
    one_time_prekeys: Vec<(u32, PublicKey)>,
}

impl PreKeyBundleStore {
    pub fn new() -> PreKeyBundleStore {
        PreKeyBundleStore::default()
    }

    /// Publishes (or replaces) a device's bundle and appends its one-time pre-keys to the
    /// store's pool for that device.
    pub fn publish(
        &mut self,
        device_id: &str,
        identity_key: IdentityPublicKey,
        signed_prekey_id: u32,
        signed_prekey: PublicKey,
        signature: Signature,
        one_time_prekeys: Vec<(u32, PublicKey)>,
    ) {
        let entry = self.bundles.entry(device_id.to_string()).or_insert_with(|| StoredBundle {
            identity_key: identity_key.clone(),
            signed_prekey_id,
            signed_prekey: signed_prekey.clone(),
            signature: signature.clone(),
            one_time_prekeys: Vec::new(),
        });
        entry.identity_key = identity_key;
        entry.signed_prekey_id = signed_prekey_id;
        entry.signed_prekey = signed_prekey;
        entry.signature = signature;
        entry.one_time_prekeys.extend(one_time_prekeys);
    }

    /// Claims a bundle for `device_id`: builds the [`PreKeyBundle`] a claimant will run X3DH
    /// against, consuming exactly one one-time pre-key from the store (if any remain) so it
    /// can never be handed out again (§4.2 "claimBundle").
    pub fn claim(&mut self, device_id: &str) -> Result<PreKeyBundle, X3DHError> {
        let stored = self.bundles.get_mut(device_id).ok_or(X3DHError::PrekeyUnavailable)?;
        let one_time_prekey = stored.one_time_prekeys.pop();
        Ok(PreKeyBundle {
            identity_key: stored.identity_key.clone(),
            signed_prekey_id: stored.signed_prekey_id,
            signed_prekey: stored.signed_prekey.clone(),
            signature: stored.signature.clone(),
            one_time_prekey,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn published_bundle_verifies() {
        let material = DeviceKeyMaterial::generate(5);
        let bundle = material.publish_bundle();
        assert!(bundle.verify().is_ok());
        assert!(bundle.one_time_prekey.is_some());
    }

    #[test]
    fn tampered_bundle_fails_verification() {
        let material = DeviceKeyMaterial::generate(1);
        let mut bundle = material.publish_bundle();
        bundle.signed_prekey = PublicKey::from(&PrivateKey::generate());
        assert!(bundle.verify().is_err());
    }

    #[test]
    fn one_time_prekey_is_consumed_exactly_once() {
        let mut material = DeviceKeyMaterial::generate(1);
        let bundle = material.publish_bundle();
        let (id, _) = bundle.one_time_prekey.unwrap();
        assert!(material.take_one_time_prekey(id).is_ok());
        assert!(matches!(material.take_one_time_prekey(id), Err(X3DHError::OpkReplay)));
    }

    #[test]
    fn store_claim_never_hands_out_same_otpk_twice() {
        let mut store = PreKeyBundleStore::new();
        let material = DeviceKeyMaterial::generate(1);
        let bundle = material.publish_bundle();
        store.publish(
            "device-a",
            bundle.identity_key.clone(),
            bundle.signed_prekey_id,
            bundle.signed_prekey.clone(),
            bundle.signature.clone(),
            bundle.one_time_prekey.clone().into_iter().collect(),
        );

        let claim1 = store.claim("device-a").unwrap();
        let claim2 = store.claim("device-a").unwrap();
        assert!(claim1.one_time_prekey.is_some());
        assert!(claim2.one_time_prekey.is_none());
    }

    #[test]
    fn claim_against_unpublished_device_fails() {
        let mut store = PreKeyBundleStore::new();
        assert!(matches!(store.claim("ghost"), Err(X3DHError::PrekeyUnavailable)));
    }
}
