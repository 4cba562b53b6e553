//! HKDF-SHA-256, AEAD (AES-256-GCM baseline / XChaCha20-Poly1305 alternate), X25519 scalar
//! multiplication, Ed25519↔X25519 conversion, and base64 helpers. Every other module builds
//! on these; nothing here knows about sessions, conversations, or the wire format.

use crate::constants::{
    AEAD_TAG_LENGTH, AES256_GCM_NONCE_LENGTH, AES256_SECRET_LENGTH, CURVE25519_PUBLIC_LENGTH,
    CURVE25519_SECRET_LENGTH, DR_CK_INFO, DR_CK_SALT, DR_RK_INFO, DR_RK_SALT, SHA256_HASH_LENGTH,
    XCHACHA20_NONCE_LENGTH,
};
use crate::errors::X3DHError;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, KeyInit};
use base64::{engine::general_purpose, Engine as _};
use chacha20poly1305::XChaCha20Poly1305;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use std::hash::{Hash, Hasher};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The AEAD primitive negotiated for a session. Immutable once a session picks one (§4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AeadAlgorithm {
    Aes256Gcm,
    XChaCha20Poly1305,
}

impl AeadAlgorithm {
    pub fn nonce_len(self) -> usize {
        match self {
            AeadAlgorithm::Aes256Gcm => AES256_GCM_NONCE_LENGTH,
            AeadAlgorithm::XChaCha20Poly1305 => XCHACHA20_NONCE_LENGTH,
        }
    }
}

/// Generates a fresh random nonce of the length required by `alg`.
pub fn generate_nonce(alg: AeadAlgorithm) -> Vec<u8> {
    let mut nonce = vec![0u8; alg.nonce_len()];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Seals `plaintext` under `key` with the given AEAD, nonce, and associated data.
pub fn aead_seal(
    alg: AeadAlgorithm,
    key: &[u8; AES256_SECRET_LENGTH],
    nonce: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, X3DHError> {
    let payload = Payload { msg: plaintext, aad };
    match alg {
        AeadAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| X3DHError::AeadError)?;
            let nonce = aes_gcm::Nonce::from_slice(nonce);
            Ok(cipher.encrypt(nonce, payload)?)
        }
        AeadAlgorithm::XChaCha20Poly1305 => {
            let cipher =
                XChaCha20Poly1305::new_from_slice(key).map_err(|_| X3DHError::AeadError)?;
            let nonce = chacha20poly1305::XNonce::from_slice(nonce);
            cipher.encrypt(nonce, payload).map_err(|_| X3DHError::AeadError)
        }
    }
}

/// Opens an AEAD ciphertext produced by [`aead_seal`]. Authentication failure is always
/// reported as [`X3DHError::AeadError`]; callers must never branch on the underlying cause.
pub fn aead_open(
    alg: AeadAlgorithm,
    key: &[u8; AES256_SECRET_LENGTH],
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, X3DHError> {
    if ciphertext.len() < AEAD_TAG_LENGTH {
        return Err(X3DHError::AeadError);
    }
    let payload = Payload { msg: ciphertext, aad };
    match alg {
        AeadAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| X3DHError::AeadError)?;
            let nonce = aes_gcm::Nonce::from_slice(nonce);
            cipher.decrypt(nonce, payload).map_err(|_| X3DHError::AeadError)
        }
        AeadAlgorithm::XChaCha20Poly1305 => {
            let cipher =
                XChaCha20Poly1305::new_from_slice(key).map_err(|_| X3DHError::AeadError)?;
            let nonce = chacha20poly1305::XNonce::from_slice(nonce);
            cipher.decrypt(nonce, payload).map_err(|_| X3DHError::AeadError)
        }
    }
}

/// Runs HKDF-SHA-256 with the given salt/info and fills `okm` (may be any length).
pub(crate) fn hkdf_expand(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
    okm: &mut [u8],
) -> Result<(), hkdf::InvalidLength> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, okm)
}

/// `kdfRK(rk, dh) -> (newRoot, chainSeed)`, salt `"dr-rk"`, info `"root"` (§4.1).
pub fn kdf_rk(
    rk: &[u8; AES256_SECRET_LENGTH],
    dh: &[u8; AES256_SECRET_LENGTH],
) -> Result<([u8; AES256_SECRET_LENGTH], [u8; AES256_SECRET_LENGTH]), hkdf::InvalidLength> {
    let mut ikm = Vec::with_capacity(AES256_SECRET_LENGTH * 2);
    ikm.extend_from_slice(rk);
    ikm.extend_from_slice(dh);
    let mut okm = [0u8; AES256_SECRET_LENGTH * 2];
    hkdf_expand(Some(DR_RK_SALT), &ikm, DR_RK_INFO, &mut okm)?;
    let mut new_root = [0u8; AES256_SECRET_LENGTH];
    let mut chain_seed = [0u8; AES256_SECRET_LENGTH];
    new_root.copy_from_slice(&okm[..AES256_SECRET_LENGTH]);
    chain_seed.copy_from_slice(&okm[AES256_SECRET_LENGTH..]);
    Ok((new_root, chain_seed))
}

/// `kdfCK(ck) -> (mk, nextCk)`, salt `"dr-ck"`, info `"chain"` (§4.1).
pub fn kdf_ck(
    ck: &[u8; AES256_SECRET_LENGTH],
) -> Result<([u8; AES256_SECRET_LENGTH], [u8; AES256_SECRET_LENGTH]), hkdf::InvalidLength> {
    let mut okm = [0u8; AES256_SECRET_LENGTH * 2];
    hkdf_expand(Some(DR_CK_SALT), ck, DR_CK_INFO, &mut okm)?;
    let mut mk = [0u8; AES256_SECRET_LENGTH];
    let mut next_ck = [0u8; AES256_SECRET_LENGTH];
    mk.copy_from_slice(&okm[..AES256_SECRET_LENGTH]);
    next_ck.copy_from_slice(&okm[AES256_SECRET_LENGTH..]);
    Ok((mk, next_ck))
}

/// Encodes bytes as padded standard base64 (the emitted, canonical wire form, §4.1).
pub fn encode_b64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

/// Decodes either padded or unpadded standard base64, per §4.1's acceptance rule.
pub fn decode_b64(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    general_purpose::STANDARD
        .decode(value)
        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(value))
}

/// A Curve25519 (X25519) private scalar, used for DH in both X3DH and the ratchet.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; CURVE25519_SECRET_LENGTH]);

impl PrivateKey {
    pub fn generate() -> PrivateKey {
        let key = x25519_dalek::StaticSecret::random_from_rng(&mut OsRng);
        PrivateKey(key.to_bytes())
    }

    pub fn from_scalar_bytes(bytes: [u8; CURVE25519_SECRET_LENGTH]) -> PrivateKey {
        PrivateKey(bytes)
    }

    pub fn diffie_hellman(&self, public_key: &PublicKey) -> SharedSecret {
        let secret = x25519_dalek::StaticSecret::from(self.0);
        let public = x25519_dalek::PublicKey::from(public_key.0);
        SharedSecret(secret.diffie_hellman(&public).to_bytes())
    }

    pub fn to_bytes(&self) -> [u8; CURVE25519_SECRET_LENGTH] {
        self.0
    }

    pub fn to_base64(&self) -> String {
        encode_b64(&self.0)
    }

    pub fn from_base64(value: &str) -> Result<PrivateKey, X3DHError> {
        let bytes = decode_b64(value)?;
        if bytes.len() != CURVE25519_SECRET_LENGTH {
            return Err(X3DHError::InvalidPrivateKey);
        }
        let mut arr = [0u8; CURVE25519_SECRET_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(PrivateKey(arr))
    }
}

impl From<&PrivateKey> for PublicKey {
    fn from(private_key: &PrivateKey) -> PublicKey {
        let secret = x25519_dalek::StaticSecret::from(private_key.0);
        let public = x25519_dalek::PublicKey::from(&secret);
        PublicKey(public.to_bytes())
    }
}

/// A Curve25519 (X25519) public key.
#[derive(Clone, Debug, Eq)]
pub struct PublicKey(pub [u8; CURVE25519_PUBLIC_LENGTH]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; CURVE25519_PUBLIC_LENGTH]) -> PublicKey {
        PublicKey(bytes)
    }

    pub fn hash(&self) -> Sha256Hash {
        let digest = Sha256::digest(self.0);
        let mut out = [0u8; SHA256_HASH_LENGTH];
        out.copy_from_slice(&digest);
        Sha256Hash(out)
    }

    pub fn to_base64(&self) -> String {
        encode_b64(&self.0)
    }

    pub fn from_base64(value: &str) -> Result<PublicKey, X3DHError> {
        let bytes = decode_b64(value)?;
        if bytes.len() != CURVE25519_PUBLIC_LENGTH {
            return Err(X3DHError::InvalidPublicKey);
        }
        let mut arr = [0u8; CURVE25519_PUBLIC_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(PublicKey(arr))
    }
}

impl AsRef<[u8; CURVE25519_PUBLIC_LENGTH]> for PublicKey {
    fn as_ref(&self) -> &[u8; CURVE25519_PUBLIC_LENGTH] {
        &self.0
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

/// The output of an X25519 Diffie-Hellman operation.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; AES256_SECRET_LENGTH]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; AES256_SECRET_LENGTH] {
        &self.0
    }
}

impl AsRef<[u8]> for SharedSecret {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A SHA-256 digest, used to reference pre-keys without transmitting them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Sha256Hash(pub [u8; SHA256_HASH_LENGTH]);

/// An Ed25519 long-term identity keypair (`IK`). Its X25519 form is derived by curve
/// conversion rather than reusing the raw seed as a scalar (§4.1, §3).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    seed: [u8; 32],
}

impl IdentityKeyPair {
    pub fn generate() -> IdentityKeyPair {
        let signing_key = ed25519_dalek::SigningKey::generate(&mut OsRng);
        IdentityKeyPair { seed: signing_key.to_bytes() }
    }

    pub fn from_seed(seed: [u8; 32]) -> IdentityKeyPair {
        IdentityKeyPair { seed }
    }

    pub fn to_seed_base64(&self) -> String {
        encode_b64(&self.seed)
    }

    pub fn from_seed_base64(value: &str) -> Result<IdentityKeyPair, X3DHError> {
        let bytes = decode_b64(value)?;
        if bytes.len() != 32 {
            return Err(X3DHError::InvalidPrivateKey);
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes);
        Ok(IdentityKeyPair { seed })
    }

    fn dalek_signing_key(&self) -> ed25519_dalek::SigningKey {
        ed25519_dalek::SigningKey::from_bytes(&self.seed)
    }

    /// The Ed25519 public identity key, as published in pre-key bundles.
    pub fn verifying_key(&self) -> IdentityPublicKey {
        let dalek = ed25519_dalek::VerifyingKey::from(&self.dalek_signing_key());
        IdentityPublicKey(dalek.to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        use ed25519_dalek::Signer;
        let sig = self.dalek_signing_key().sign(message);
        Signature(sig.to_bytes())
    }

    /// Recovers the clamped X25519 scalar from the Ed25519 seed per RFC 8032 (hash the seed
    /// with SHA-512, clamp the low 32 bytes per RFC 7748), as used for the IK's DH role in X3DH.
    pub fn to_x25519_private(&self) -> PrivateKey {
        let digest = Sha512::digest(self.seed);
        let mut scalar = [0u8; 32];
        scalar.copy_from_slice(&digest[..32]);
        clamp_scalar(&mut scalar);
        PrivateKey(scalar)
    }
}

/// Clamps a 32-byte scalar per RFC 7748 §5 (the same clamping X25519 applies internally;
/// done explicitly here because we're handing the converted Ed25519 seed to `PrivateKey`
/// as an already-clamped scalar).
fn clamp_scalar(scalar: &mut [u8; 32]) {
    scalar[0] &= 248;
    scalar[31] &= 127;
    scalar[31] |= 64;
}

/// The Ed25519 public identity key, convertible to its X25519 Montgomery form for DH.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IdentityPublicKey(pub [u8; 32]);

impl IdentityPublicKey {
    pub fn verify(&self, signature: &Signature, message: &[u8]) -> Result<(), X3DHError> {
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&self.0)
            .map_err(X3DHError::InvalidSignature)?;
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        use ed25519_dalek::Verifier;
        verifying_key.verify(message, &sig).map_err(X3DHError::InvalidSignature)
    }

    /// Converts the Ed25519 Edwards-form public key to its Montgomery (X25519) form
    /// (§4.1 "Ed25519↔X25519 conversion").
    pub fn to_x25519_public(&self) -> Result<PublicKey, X3DHError> {
        let compressed = curve25519_dalek::edwards::CompressedEdwardsY(self.0);
        let point = compressed.decompress().ok_or(X3DHError::InvalidPublicKey)?;
        Ok(PublicKey(point.to_montgomery().to_bytes()))
    }

    pub fn to_base64(&self) -> String {
        encode_b64(&self.0)
    }

    pub fn from_base64(value: &str) -> Result<IdentityPublicKey, X3DHError> {
        let bytes = decode_b64(value)?;
        if bytes.len() != 32 {
            return Err(X3DHError::InvalidPublicKey);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(IdentityPublicKey(arr))
    }

    pub fn hash(&self) -> Sha256Hash {
        let digest = Sha256::digest(self.0);
        let mut out = [0u8; SHA256_HASH_LENGTH];
        out.copy_from_slice(&digest);
        Sha256Hash(out)
    }
}

/// An Ed25519 signature over a signed pre-key's public bytes.
#[derive(Clone, Debug)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub fn to_base64(&self) -> String {
        encode_b64(&self.0)
    }

    pub fn from_base64(value: &str) -> Result<Signature, X3DHError> {
        let bytes = decode_b64(value)?;
        if bytes.len() != 64 {
            return Err(X3DHError::InvalidPreKeyBundle);
        }
        let mut arr = [0u8; 64];
        arr.copy_from_slice(&bytes);
        Ok(Signature(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x25519_dh_is_symmetric() {
        let a = PrivateKey::generate();
        let b = PrivateKey::generate();
        let pa = PublicKey::from(&a);
        let pb = PublicKey::from(&b);
        assert_eq!(a.diffie_hellman(&pb).as_bytes(), b.diffie_hellman(&pa).as_bytes());
    }

    #[test]
    fn ed25519_sign_verify_roundtrip() {
        let ik = IdentityKeyPair::generate();
        let vk = ik.verifying_key();
        let msg = b"signed prekey bytes";
        let sig = ik.sign(msg);
        assert!(vk.verify(&sig, msg).is_ok());
        assert!(vk.verify(&sig, b"tampered").is_err());
    }

    #[test]
    fn ed25519_to_x25519_conversion_is_dh_compatible() {
        // The IK, converted to its X25519 form, must still be usable for DH: Bob's
        // converted public key paired with Alice's converted private key (and vice
        // versa) must agree, exactly like a native X25519 keypair would.
        let ik_a = IdentityKeyPair::generate();
        let ik_b = IdentityKeyPair::generate();

        let a_priv = ik_a.to_x25519_private();
        let b_pub = ik_b.verifying_key().to_x25519_public().unwrap();
        let b_priv = ik_b.to_x25519_private();
        let a_pub = ik_a.verifying_key().to_x25519_public().unwrap();

        assert_eq!(
            a_priv.diffie_hellman(&b_pub).as_bytes(),
            b_priv.diffie_hellman(&a_pub).as_bytes()
        );
    }

    #[test]
    fn kdf_ck_is_deterministic_and_advances() {
        let ck = [7u8; 32];
        let (mk1, ck1) = kdf_ck(&ck).unwrap();
        let (mk1_again, ck1_again) = kdf_ck(&ck).unwrap();
        assert_eq!(mk1, mk1_again);
        assert_eq!(ck1, ck1_again);
        let (mk2, _) = kdf_ck(&ck1).unwrap();
        assert_ne!(mk1, mk2);
    }

    #[test]
    fn aead_roundtrip_aes256gcm() {
        let key = [1u8; 32];
        let nonce = generate_nonce(AeadAlgorithm::Aes256Gcm);
        let aad = b"header bytes";
        let ct = aead_seal(AeadAlgorithm::Aes256Gcm, &key, &nonce, aad, b"hello").unwrap();
        let pt = aead_open(AeadAlgorithm::Aes256Gcm, &key, &nonce, aad, &ct).unwrap();
        assert_eq!(pt, b"hello");
    }

    #[test]
    fn aead_rejects_tampered_aad() {
        let key = [1u8; 32];
        let nonce = generate_nonce(AeadAlgorithm::Aes256Gcm);
        let ct = aead_seal(AeadAlgorithm::Aes256Gcm, &key, &nonce, b"aad-a", b"hello").unwrap();
        assert!(aead_open(AeadAlgorithm::Aes256Gcm, &key, &nonce, b"aad-b", &ct).is_err());
    }
}
