
// byte size of a Curve25519 private key
pub const CURVE25519_SECRET_LENGTH: usize = 32;
// byte size of a Curve25519 public key
pub const CURVE25519_PUBLIC_LENGTH: usize = CURVE25519_SECRET_LENGTH;

pub const SIGNATURE_LENGTH: usize = 64;
// byte size of a sha256 hash
pub const SHA256_HASH_LENGTH: usize = 32;
// byte size of an aes256/xchacha20 key
pub const AES256_SECRET_LENGTH: usize = 32;
// byte size of an aes-256-gcm nonce
pub const AES256_GCM_NONCE_LENGTH: usize = 12;
// byte size of an xchacha20-poly1305 nonce
pub const XCHACHA20_NONCE_LENGTH: usize = 24;
// byte size of an AEAD authentication tag
pub const AEAD_TAG_LENGTH: usize = 16;

/// Per-chain cap on the skipped-message-key cache.
pub const MAX_SKIPS: u64 = 20;

/// HKDF domain-separation strings for the X3DH root-key derivation.
pub const X3DH_SALT: &str = "x3dh-salt";
pub const X3DH_INFO: &str = "x3dh-root";

/// HKDF domain-separation bytes for the Double Ratchet's root-chain step.
pub const DR_RK_SALT: &[u8] = b"dr-rk";
pub const DR_RK_INFO: &[u8] = b"root";

/// HKDF domain-separation bytes for the Double Ratchet's symmetric chain step.
pub const DR_CK_SALT: &[u8] = b"dr-ck";
pub const DR_CK_INFO: &[u8] = b"chain";

// 32 bytes of 0xFF prepended to the X3DH DH-output concatenation for cryptographic
// domain separation, per the Signal X3DH spec.
pub const X3DH_DOMAIN_SEPARATION_BYTE: u8 = 0xFF;
pub const X3DH_DOMAIN_SEPARATION_LENGTH: usize = 32;

pub const CURRENT_WIRE_VERSION: u32 = 1;
pub const CURRENT_DR_VERSION: u32 = 1;
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;
