//! Client-side wrapping of message keys before they go into the [`MessageKeyVault`]
//! (§4.6: "`wrapped_mk` is an AEAD envelope over the 32-byte `mk`; the wrapping key
//! derivation is local and out of scope"). This module supplies that local derivation: one
//! random 32-byte key per device, held in memory for the process lifetime.

use protocol::errors::X3DHError;
use protocol::primitives::{aead_open, aead_seal, decode_b64, encode_b64, generate_nonce, AeadAlgorithm};
use protocol::vault::WrapContext;

const WRAP_AEAD: AeadAlgorithm = AeadAlgorithm::Aes256Gcm;
const WRAP_KDF_LABEL: &str = "local-device-key";

pub struct VaultWrapKey([u8; 32]);

impl VaultWrapKey {
    pub fn generate() -> VaultWrapKey {
        use rand::RngCore;
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        VaultWrapKey(key)
    }

    pub fn wrap(&self, mk: &[u8; 32]) -> Result<(String, WrapContext), X3DHError> {
        let nonce = generate_nonce(WRAP_AEAD);
        let ciphertext = aead_seal(WRAP_AEAD, &self.0, &nonce, b"vault-mk", mk)?;
        let wrap_context = WrapContext {
            aead: "aes256gcm".to_string(),
            iv_b64: encode_b64(&nonce),
            kdf: WRAP_KDF_LABEL.to_string(),
        };
        Ok((encode_b64(&ciphertext), wrap_context))
    }

    pub fn unwrap(&self, wrapped_mk_b64: &str, wrap_context: &WrapContext) -> Result<[u8; 32], X3DHError> {
        let nonce = decode_b64(&wrap_context.iv_b64).map_err(X3DHError::from)?;
        let ciphertext = decode_b64(wrapped_mk_b64).map_err(X3DHError::from)?;
        let plaintext = aead_open(WRAP_AEAD, &self.0, &nonce, b"vault-mk", &ciphertext)?;
        if plaintext.len() != 32 {
            return Err(X3DHError::InvalidPrivateKey);
        }
        let mut mk = [0u8; 32];
        mk.copy_from_slice(&plaintext);
        Ok(mk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_then_unwrap_round_trips() {
        let key = VaultWrapKey::generate();
        let mk = [7u8; 32];
        let (wrapped_b64, context) = key.wrap(&mk).unwrap();
        let recovered = key.unwrap(&wrapped_b64, &context).unwrap();
        assert_eq!(recovered, mk);
    }

    #[test]
    fn unwrap_fails_under_a_different_key() {
        let key = VaultWrapKey::generate();
        let other = VaultWrapKey::generate();
        let (wrapped_b64, context) = key.wrap(&[1u8; 32]).unwrap();
        assert!(other.unwrap(&wrapped_b64, &context).is_err());
    }
}
