//! The Double Ratchet session (§4.4): symmetric chain advancement, DH ratchet, the bounded
//! skipped-message-key cache, and the encrypt/decrypt entry points. `Encrypt` and `Decrypt`
//! follow the reference pseudocode field-for-field, including the deferred-ratchet behavior
//! where a receive-triggered DH ratchet does not regenerate the sender's own ephemeral key —
//! that happens lazily on the next `Encrypt` via `pending_send_ratchet`.

use crate::constants::{AES256_SECRET_LENGTH, CURRENT_DR_VERSION, MAX_SKIPS};
use crate::envelope::{Envelope, Header};
use crate::errors::RatchetError;
use crate::primitives::{
    aead_open, aead_seal, decode_b64, encode_b64, generate_nonce, kdf_ck, kdf_rk, AeadAlgorithm,
    PrivateKey, PublicKey,
};
use std::collections::{HashMap, VecDeque};

/// Which side of the handshake created this session (§3 "baseKey").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Identifies the conversation and peer device a ratchet session belongs to. Held by value;
/// peer devices are opaque string ids, never object references (§9 "Cyclic references").
#[derive(Clone, Debug)]
pub struct SessionDescriptor {
    pub role: Role,
    pub peer_account_digest: String,
    pub peer_device_id: String,
    pub conversation_id: String,
}

/// Bounded per-chain cache of not-yet-used message keys, for out-of-order delivery
/// (§4.4 "Skipped-key cache policy"). Capacity is enforced per ratchet-public chain, FIFO.
#[derive(Clone, Default)]
struct SkippedKeyCache {
    keys: HashMap<[u8; 32], HashMap<u64, [u8; AES256_SECRET_LENGTH]>>,
    insertion_order: HashMap<[u8; 32], VecDeque<u64>>,
}

impl SkippedKeyCache {
    fn insert(&mut self, chain: [u8; 32], index: u64, mk: [u8; AES256_SECRET_LENGTH]) {
        let entry = self.keys.entry(chain).or_default();
        let order = self.insertion_order.entry(chain).or_default();
        if entry.insert(index, mk).is_none() {
            order.push_back(index);
        }
        while entry.len() > MAX_SKIPS as usize {
            if let Some(oldest) = order.pop_front() {
                entry.remove(&oldest);
            }
        }
    }

    fn take(&mut self, chain: &[u8; 32], index: u64) -> Option<[u8; AES256_SECRET_LENGTH]> {
        let entry = self.keys.get_mut(chain)?;
        let mk = entry.remove(&index)?;
        if let Some(order) = self.insertion_order.get_mut(chain) {
            order.retain(|&i| i != index);
        }
        Some(mk)
    }

    #[cfg(test)]
    fn chain_len(&self, chain: &[u8; 32]) -> usize {
        self.keys.get(chain).map(HashMap::len).unwrap_or(0)
    }
}

/// The fields of a [`Ratchet`] needed to snapshot and restore it, minus the skipped-key
/// cache (§4.7 "A snapshot serializes the full ratchet state").
pub struct RawState {
    pub descriptor: SessionDescriptor,
    pub aead: AeadAlgorithm,
    pub rk: [u8; AES256_SECRET_LENGTH],
    pub ck_s: Option<[u8; AES256_SECRET_LENGTH]>,
    pub ck_r: Option<[u8; AES256_SECRET_LENGTH]>,
    pub ns: u64,
    pub nr: u64,
    pub pn: u64,
    pub ns_total: u64,
    pub nr_total: u64,
    pub my_ratchet_priv: PrivateKey,
    pub my_ratchet_pub: PublicKey,
    pub their_ratchet_pub: Option<PublicKey>,
    pub pending_send_ratchet: bool,
}

/// Full Double Ratchet session state for one `(conversation, peer device)` pair (§3).
pub struct Ratchet {
    descriptor: SessionDescriptor,
    aead: AeadAlgorithm,
    rk: [u8; AES256_SECRET_LENGTH],
    ck_s: Option<[u8; AES256_SECRET_LENGTH]>,
    ck_r: Option<[u8; AES256_SECRET_LENGTH]>,
    ns: u64,
    nr: u64,
    pn: u64,
    ns_total: u64,
    nr_total: u64,
    my_ratchet_priv: PrivateKey,
    my_ratchet_pub: PublicKey,
    their_ratchet_pub: Option<PublicKey>,
    pending_send_ratchet: bool,
    skipped_keys: SkippedKeyCache,
}

impl Ratchet {
    /// `X3DH-Initiate` (§4.3): starts with `ckR = null`, the X3DH ephemeral as the current
    /// ratchet keypair, and no peer ratchet public key yet.
    pub fn init_initiator(
        root_key: [u8; AES256_SECRET_LENGTH],
        ephemeral_priv: PrivateKey,
        ephemeral_pub: PublicKey,
        descriptor: SessionDescriptor,
        aead: AeadAlgorithm,
    ) -> Result<Ratchet, RatchetError> {
        let (ck_s, _) = kdf_ck(&root_key)?;
        Ok(Ratchet {
            descriptor,
            aead,
            rk: root_key,
            ck_s: Some(ck_s),
            ck_r: None,
            ns: 0,
            nr: 0,
            pn: 0,
            ns_total: 0,
            nr_total: 0,
            my_ratchet_priv: ephemeral_priv,
            my_ratchet_pub: ephemeral_pub,
            their_ratchet_pub: None,
            pending_send_ratchet: false,
            skipped_keys: SkippedKeyCache::default(),
        })
    }

    /// `X3DH-Respond` (§4.3): both chains seeded from `rk₀`, a fresh ratchet keypair is
    /// generated, and `pending_send_ratchet` is set so the first `Encrypt` still performs a
    /// DH ratchet step before sending (mirrors the reference's "ratchet once before first
    /// send" responder behavior).
    pub fn init_responder(
        root_key: [u8; AES256_SECRET_LENGTH],
        their_ephemeral_pub: PublicKey,
        descriptor: SessionDescriptor,
        aead: AeadAlgorithm,
    ) -> Result<Ratchet, RatchetError> {
        let (ck_s, ck_r) = kdf_ck(&root_key)?;
        let my_ratchet_priv = PrivateKey::generate();
        let my_ratchet_pub = PublicKey::from(&my_ratchet_priv);
        Ok(Ratchet {
            descriptor,
            aead,
            rk: root_key,
            ck_s: Some(ck_s),
            ck_r: Some(ck_r),
            ns: 0,
            nr: 0,
            pn: 0,
            ns_total: 0,
            nr_total: 0,
            my_ratchet_priv,
            my_ratchet_pub,
            their_ratchet_pub: Some(their_ephemeral_pub),
            pending_send_ratchet: true,
            skipped_keys: SkippedKeyCache::default(),
        })
    }

    pub fn ns_total(&self) -> u64 {
        self.ns_total
    }

    pub fn nr_total(&self) -> u64 {
        self.nr_total
    }

    pub fn descriptor(&self) -> &SessionDescriptor {
        &self.descriptor
    }

    /// Exposes the full state for [`crate::snapshot::Snapshot::capture`]. The skipped-key
    /// cache is intentionally not part of `RawState` — a snapshot never captures it (§4.7).
    pub fn raw_state(&self) -> RawState {
        RawState {
            descriptor: self.descriptor.clone(),
            aead: self.aead,
            rk: self.rk,
            ck_s: self.ck_s,
            ck_r: self.ck_r,
            ns: self.ns,
            nr: self.nr,
            pn: self.pn,
            ns_total: self.ns_total,
            nr_total: self.nr_total,
            my_ratchet_priv: self.my_ratchet_priv.clone(),
            my_ratchet_pub: self.my_ratchet_pub.clone(),
            their_ratchet_pub: self.their_ratchet_pub.clone(),
            pending_send_ratchet: self.pending_send_ratchet,
        }
    }

    /// Rebuilds a session from a restored snapshot, with an empty skipped-key cache
    /// (§4.7 "Restore").
    pub fn from_raw_state(raw: RawState) -> Ratchet {
        Ratchet {
            descriptor: raw.descriptor,
            aead: raw.aead,
            rk: raw.rk,
            ck_s: raw.ck_s,
            ck_r: raw.ck_r,
            ns: raw.ns,
            nr: raw.nr,
            pn: raw.pn,
            ns_total: raw.ns_total,
            nr_total: raw.nr_total,
            my_ratchet_priv: raw.my_ratchet_priv,
            my_ratchet_pub: raw.my_ratchet_pub,
            their_ratchet_pub: raw.their_ratchet_pub,
            pending_send_ratchet: raw.pending_send_ratchet,
            skipped_keys: SkippedKeyCache::default(),
        }
    }

    /// Forces the next `Encrypt` to perform a fresh DH ratchet and resets `ns_total` to
    /// `max_counter`, the only sanctioned counter adjustment (§4.5 "CounterTooLow recovery").
    pub fn reseed_after_counter_mismatch(&mut self, max_counter: u64) {
        self.ns_total = max_counter;
        self.ck_s = None;
        self.pending_send_ratchet = true;
    }

    /// Reconciles a restored snapshot against the server's send-state ledger (§4.5 "Seeding
    /// after crash recovery"): `ns_total` is reseeded from the server's authoritative
    /// `expected_counter` rather than trusted from whatever the snapshot carried, the
    /// chain-local counters are reset, and the next `Encrypt` is forced through a fresh DH
    /// ratchet.
    pub fn reseed_after_stale_restore(&mut self, expected_counter: u64) {
        self.ns_total = expected_counter.saturating_sub(1);
        self.ns = 0;
        self.pn = 0;
        self.ck_s = None;
        self.pending_send_ratchet = true;
    }

    /// `Encrypt(state, plaintext, { deviceId, version }) -> packet` (§4.4). Returns the
    /// envelope to transmit plus the raw message key, which is never itself transmitted but
    /// handed to the caller for the message-key vault (§4.6).
    pub fn encrypt(
        &mut self,
        plaintext: &[u8],
        device_id: &str,
    ) -> Result<(Envelope, [u8; AES256_SECRET_LENGTH]), RatchetError> {
        if self.pending_send_ratchet {
            self.pending_send_ratchet = false;
            self.ck_s = None;
        }

        if self.ck_s.is_none() {
            match &self.their_ratchet_pub {
                None => {
                    let (ck_s, _) = kdf_ck(&self.rk)?;
                    self.ck_s = Some(ck_s);
                }
                Some(their_pub) => {
                    let new_priv = PrivateKey::generate();
                    let new_pub = PublicKey::from(&new_priv);
                    let dh = new_priv.diffie_hellman(their_pub);
                    let (new_root, chain_seed) = kdf_rk(&self.rk, dh.as_bytes())?;
                    self.rk = new_root;
                    self.ck_s = Some(chain_seed);
                    self.pn = self.ns;
                    self.ns = 0;
                    self.my_ratchet_priv = new_priv;
                    self.my_ratchet_pub = new_pub;
                }
            }
        }

        let ck_s = self.ck_s.expect("ck_s seeded above");
        let (mk, next_ck_s) = kdf_ck(&ck_s)?;
        self.ck_s = Some(next_ck_s);
        self.ns += 1;
        self.ns_total += 1;

        let nonce = generate_nonce(self.aead);
        let header = Header {
            v: CURRENT_DR_VERSION,
            dr: 1,
            ek_pub_b64: encode_b64(&self.my_ratchet_pub.0),
            pn: self.pn,
            n: self.ns,
            iv_b64: encode_b64(&nonce),
            device_id: device_id.to_string(),
            meta: None,
        };
        let aad = header.canonical_aad();
        let ciphertext = aead_seal(self.aead, &mk, &nonce, &aad, plaintext)?;

        Ok((
            Envelope { header, ciphertext_b64: encode_b64(&ciphertext) },
            mk,
        ))
    }

    /// `Decrypt(state, packet) -> plaintext` (§4.4). On any failure the session is left
    /// byte-for-byte as it was before the call: every mutation below is staged in locals and
    /// only committed to `self` once the AEAD tag has verified. Returns the derived message
    /// key alongside the plaintext, symmetric with [`Ratchet::encrypt`]'s return shape, so a
    /// receiver can persist it to the message-key vault the same way a sender does (§4.6).
    pub fn decrypt(&mut self, envelope: &Envelope) -> Result<(Vec<u8>, [u8; AES256_SECRET_LENGTH]), RatchetError> {
        envelope.header.validate(self.aead.nonce_len())?;
        let header = &envelope.header;
        let nonce = decode_b64(&header.iv_b64).map_err(|_| RatchetError::ConversionError)?;
        let ciphertext =
            decode_b64(&envelope.ciphertext_b64).map_err(|_| RatchetError::ConversionError)?;
        let aad = header.canonical_aad();

        let ek_bytes = decode_b64(&header.ek_pub_b64).map_err(|_| RatchetError::ConversionError)?;
        let mut ek_arr = [0u8; 32];
        ek_arr.copy_from_slice(&ek_bytes);
        let header_ek = PublicKey::from_bytes(ek_arr);

        // Step 1: skipped-key cache hit. Pure read until the decrypt itself succeeds — no
        // chain state changes on this path at all, by design (§4.4 step 1).
        if let Some(mk) = self.skipped_keys.keys.get(&ek_arr).and_then(|m| m.get(&header.n)).copied() {
            let plaintext = aead_open(self.aead, &mk, &nonce, &aad, &ciphertext)
                .map_err(RatchetError::DecryptionError)?;
            self.skipped_keys.take(&ek_arr, header.n);
            return Ok((plaintext, mk));
        }

        // Stage every subsequent mutation; nothing below touches `self` until the final
        // `aead_open` succeeds.
        let mut staged_rk = self.rk;
        let mut staged_ck_r = self.ck_r;
        let mut staged_ck_s = self.ck_s;
        let mut staged_nr = self.nr;
        let mut staged_pn = self.pn;
        let mut staged_ns = self.ns;
        let mut staged_their_pub = self.their_ratchet_pub.clone();
        let mut staged_pending_send_ratchet = self.pending_send_ratchet;
        let mut staged_skips: Vec<([u8; 32], u64, [u8; AES256_SECRET_LENGTH])> = Vec::new();

        let needs_dh_ratchet = match &staged_their_pub {
            None => true,
            Some(current) => current != &header_ek,
        };

        if needs_dh_ratchet {
            // Cache any unreceived indices of the *previous* receive chain up to header.pn
            // under the *previous* ratchet public key, before that chain is replaced.
            if let (Some(prev_ck_r), Some(prev_pub)) = (staged_ck_r, &staged_their_pub) {
                let mut chain = prev_ck_r;
                let mut index = staged_nr;
                let mut prev_bytes = [0u8; 32];
                prev_bytes.copy_from_slice(&prev_pub.0);
                while index + 1 < header.pn {
                    let (skipped_mk, next_chain) = kdf_ck(&chain)?;
                    chain = next_chain;
                    index += 1;
                    staged_skips.push((prev_bytes, index, skipped_mk));
                }
            }

            let dh = self.my_ratchet_priv.diffie_hellman(&header_ek);
            let (new_root, chain_seed) = kdf_rk(&staged_rk, dh.as_bytes())?;
            staged_rk = new_root;
            staged_ck_r = Some(chain_seed);
            staged_their_pub = Some(header_ek.clone());
            staged_pn = staged_ns;
            staged_ns = 0;
            staged_nr = 0;
            staged_ck_s = None;
            staged_pending_send_ratchet = false;
        }

        let mut ck_r = staged_ck_r.ok_or(RatchetError::ConversionError)?;
        while staged_nr + 1 < header.n {
            let (skipped_mk, next_ck_r) = kdf_ck(&ck_r)?;
            ck_r = next_ck_r;
            staged_nr += 1;
            staged_skips.push((ek_arr, staged_nr, skipped_mk));
        }

        let (mk, next_ck_r) = kdf_ck(&ck_r)?;
        ck_r = next_ck_r;
        staged_nr += 1;

        let plaintext =
            aead_open(self.aead, &mk, &nonce, &aad, &ciphertext).map_err(RatchetError::DecryptionError)?;

        // Commit.
        self.rk = staged_rk;
        self.ck_r = Some(ck_r);
        self.ck_s = staged_ck_s;
        self.nr = staged_nr;
        self.nr_total += 1;
        self.pn = staged_pn;
        self.ns = staged_ns;
        self.their_ratchet_pub = staged_their_pub;
        self.pending_send_ratchet = staged_pending_send_ratchet;
        for (chain, index, key) in staged_skips {
            self.skipped_keys.insert(chain, index, key);
        }

        Ok((plaintext, mk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prekey::DeviceKeyMaterial;
    use crate::x3dh;
    use crate::primitives::IdentityKeyPair;

    fn descriptor(role: Role) -> SessionDescriptor {
        SessionDescriptor {
            role,
            peer_account_digest: "digest".to_string(),
            peer_device_id: "peer-device".to_string(),
            conversation_id: "conversation-1".to_string(),
        }
    }

    fn bootstrap() -> (Ratchet, Ratchet) {
        let alice_ik = IdentityKeyPair::generate();
        let mut bob = DeviceKeyMaterial::generate(1);
        let bundle = bob.publish_bundle();
        let (initial, ephemeral_priv) = x3dh::initiate(&alice_ik, &bundle).unwrap();
        let otpk = bob.take_one_time_prekey(initial.one_time_prekey_id.unwrap()).unwrap();
        let bob_root = x3dh::process_initial_message(
            &bob.identity_key,
            &bob.signed_prekey.private,
            Some(&otpk.private),
            &initial,
        )
        .unwrap();

        // Alice's initial X3DH ephemeral is her ratchet's starting keypair.
        let ephemeral_pub = PublicKey::from(&ephemeral_priv);
        let alice_ratchet = Ratchet::init_initiator(
            initial.root_key,
            ephemeral_priv,
            ephemeral_pub.clone(),
            descriptor(Role::Initiator),
            AeadAlgorithm::Aes256Gcm,
        )
        .unwrap();
        let bob_ratchet = Ratchet::init_responder(
            bob_root,
            ephemeral_pub,
            descriptor(Role::Responder),
            AeadAlgorithm::Aes256Gcm,
        )
        .unwrap();
        (alice_ratchet, bob_ratchet)
    }

    #[test]
    fn initiate_and_echo() {
        let (mut alice, mut bob) = bootstrap();

        let (env1, _mk) = alice.encrypt(b"hello", "alice-device").unwrap();
        assert_eq!(env1.header.n, 1);
        assert_eq!(env1.header.pn, 0);
        let (plaintext, _mk) = bob.decrypt(&env1).unwrap();
        assert_eq!(plaintext, b"hello");

        let (env2, _mk) = bob.encrypt(b"hi", "bob-device").unwrap();
        let (plaintext, _mk) = alice.decrypt(&env2).unwrap();
        assert_eq!(plaintext, b"hi");

        assert_eq!(alice.ns_total(), 1);
        assert_eq!(alice.nr_total(), 1);
        assert_eq!(bob.ns_total(), 1);
        assert_eq!(bob.nr_total(), 1);
    }

    #[test]
    fn burst_then_reply_triggers_dh_ratchet_on_alice() {
        let (mut alice, mut bob) = bootstrap();

        for i in 0..5 {
            let (env, _mk) = alice.encrypt(format!("m{}", i + 1).as_bytes(), "alice-device").unwrap();
            bob.decrypt(&env).unwrap();
        }

        let (reply, _mk) = bob.encrypt(b"r1", "bob-device").unwrap();
        alice.decrypt(&reply).unwrap();

        assert_eq!(alice.nr, 1);
        assert_eq!(alice.pn, 5);
    }

    #[test]
    fn out_of_order_within_chain_uses_skipped_cache_without_mutating_chain() {
        let (mut alice, mut bob) = bootstrap();

        let (env1, _) = alice.encrypt(b"m1", "alice-device").unwrap();
        let (env2, _) = alice.encrypt(b"m2", "alice-device").unwrap();
        let (env3, _) = alice.encrypt(b"m3", "alice-device").unwrap();

        bob.decrypt(&env3).unwrap();
        assert_eq!(bob.nr, 3);

        bob.decrypt(&env1).unwrap();
        bob.decrypt(&env2).unwrap();
        assert_eq!(bob.nr, 3);
    }

    #[test]
    fn replay_of_delivered_ciphertext_fails() {
        let (mut alice, mut bob) = bootstrap();
        let (env, _) = alice.encrypt(b"m1", "alice-device").unwrap();
        bob.decrypt(&env).unwrap();
        let nr_before = bob.nr;
        assert!(bob.decrypt(&env).is_err());
        assert_eq!(bob.nr, nr_before);
    }

    #[test]
    fn bit_flip_in_ciphertext_fails_and_preserves_state() {
        let (mut alice, mut bob) = bootstrap();
        let (mut env, _) = alice.encrypt(b"m1", "alice-device").unwrap();
        let mut raw = decode_b64(&env.ciphertext_b64).unwrap();
        raw[0] ^= 0x01;
        env.ciphertext_b64 = encode_b64(&raw);

        let nr_before = bob.nr;
        let nr_total_before = bob.nr_total;
        assert!(bob.decrypt(&env).is_err());
        assert_eq!(bob.nr, nr_before);
        assert_eq!(bob.nr_total, nr_total_before);
    }

    #[test]
    fn bit_flip_in_device_id_fails_and_preserves_state() {
        let (mut alice, mut bob) = bootstrap();
        let (mut env, _) = alice.encrypt(b"m1", "alice-device").unwrap();
        env.header.device_id = "tampered-device".to_string();

        let nr_before = bob.nr;
        assert!(bob.decrypt(&env).is_err());
        assert_eq!(bob.nr, nr_before);
    }

    #[test]
    fn counter_too_low_rollback_reseed_and_retry_forces_dh_ratchet() {
        use crate::snapshot::Snapshot;

        let (mut alice, mut bob) = bootstrap();

        // Establish `alice.their_ratchet_pub` via one round trip so a reseeded retry has a
        // peer ratchet key to DH against (the very first message never forces a DH ratchet:
        // there is nothing to ratchet against until a reply has been received, §4.4 step 2).
        let (env1, _mk) = alice.encrypt(b"hello", "alice-device").unwrap();
        bob.decrypt(&env1).unwrap();
        let (reply, _mk) = bob.encrypt(b"hi", "bob-device").unwrap();
        alice.decrypt(&reply).unwrap();

        let snapshot = Snapshot::capture(&alice);
        let (first_attempt, _mk) = alice.encrypt(b"x", "alice-device").unwrap();
        let original_ek = first_attempt.header.ek_pub_b64.clone();

        // Server rejects with CounterTooLow{max_counter: 7}; sender rolls back and retries.
        alice = snapshot.restore().unwrap();
        alice.reseed_after_counter_mismatch(7);
        assert_eq!(alice.ns_total(), 7);

        let (retry, _mk) = alice.encrypt(b"x", "alice-device").unwrap();
        assert_eq!(alice.ns_total(), 8);
        assert_eq!(retry.header.n, 1);
        assert_ne!(retry.header.ek_pub_b64, original_ek);

        let (plaintext, _mk) = bob.decrypt(&retry).unwrap();
        assert_eq!(plaintext, b"x");
    }

    #[test]
    fn previous_chain_skip_bounds_on_header_pn_not_stale_local_pn() {
        // Bob already has an established previous receive chain (one message consumed)
        // and carries an unrelated, stale `pn` of his own (99) — nothing to do with the
        // sender's reported previous-chain length. Only `header.pn` (3) must bound the
        // previous-chain skip caching when the incoming message ratchets to a new chain.
        let old_chain_pub = PublicKey::from(&PrivateKey::generate());
        let my_priv = PrivateKey::generate();
        let my_priv_for_dh = my_priv.clone();
        let my_pub = PublicKey::from(&my_priv);

        let old_ck_r = [11u8; AES256_SECRET_LENGTH];
        let (expected_mk_index2, _) = kdf_ck(&old_ck_r).unwrap();

        let mut bob = Ratchet::from_raw_state(RawState {
            descriptor: descriptor(Role::Responder),
            aead: AeadAlgorithm::Aes256Gcm,
            rk: [3u8; AES256_SECRET_LENGTH],
            ck_s: None,
            ck_r: Some(old_ck_r),
            ns: 0,
            nr: 1,
            pn: 99,
            ns_total: 0,
            nr_total: 1,
            my_ratchet_priv: my_priv,
            my_ratchet_pub: my_pub,
            their_ratchet_pub: Some(old_chain_pub.clone()),
            pending_send_ratchet: false,
        });

        let new_priv = PrivateKey::generate();
        let new_pub = PublicKey::from(&new_priv);
        let dh = my_priv_for_dh.diffie_hellman(&new_pub);
        let (_new_root, new_chain_seed) = kdf_rk(&[3u8; AES256_SECRET_LENGTH], dh.as_bytes()).unwrap();
        let (mk1, _) = kdf_ck(&new_chain_seed).unwrap();

        let nonce = generate_nonce(AeadAlgorithm::Aes256Gcm);
        let header = Header {
            v: CURRENT_DR_VERSION,
            dr: 1,
            ek_pub_b64: encode_b64(&new_pub.0),
            pn: 3,
            n: 1,
            iv_b64: encode_b64(&nonce),
            device_id: "alice-device".to_string(),
            meta: None,
        };
        let aad = header.canonical_aad();
        let ciphertext =
            aead_seal(AeadAlgorithm::Aes256Gcm, &mk1, &nonce, &aad, b"new-chain-msg1").unwrap();
        let envelope = Envelope { header, ciphertext_b64: encode_b64(&ciphertext) };

        let (plaintext, _mk) = bob.decrypt(&envelope).unwrap();
        assert_eq!(plaintext, b"new-chain-msg1");

        let old_chain_bytes = old_chain_pub.0;
        assert_eq!(bob.skipped_keys.chain_len(&old_chain_bytes), 1);
        let cached = bob.skipped_keys.keys.get(&old_chain_bytes).and_then(|m| m.get(&2)).copied();
        assert_eq!(cached, Some(expected_mk_index2));
    }

    #[test]
    fn skipped_cache_is_capped_at_twenty_per_chain() {
        let mut cache = SkippedKeyCache::default();
        let chain = [9u8; 32];
        for i in 0..30u64 {
            cache.insert(chain, i, [i as u8; 32]);
        }
        assert_eq!(cache.chain_len(&chain), MAX_SKIPS as usize);
        assert!(cache.take(&chain, 0).is_none());
        assert!(cache.take(&chain, 29).is_some());
    }
}
