//! The wire envelope: header fields, canonical AAD serialization, and structural header
//! validation (§3 "Envelope (wire)", §4.4 "AAD canonical form" / "Header validation").

use crate::errors::RatchetError;
use crate::primitives::decode_b64;
use serde::{Deserialize, Serialize};

/// A ratchet message header. Field order here matches the canonical AAD order; do not
/// reorder without also updating [`Header::canonical_aad`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Header {
    pub v: u32,
    pub dr: u32,
    pub ek_pub_b64: String,
    pub pn: u64,
    pub n: u64,
    pub iv_b64: String,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl Header {
    /// The UTF-8 bytes both sides feed to the AEAD as associated data: keys in the fixed
    /// order `v, dr, ek_pub_b64, pn, n, iv_b64, device_id[, meta]`, integers without a
    /// trailing `.0`. Hand-built rather than routed through `serde_json::to_vec` so that key
    /// order is never at the mercy of a future field reordering or map implementation change.
    pub fn canonical_aad(&self) -> Vec<u8> {
        let mut s = String::new();
        s.push('{');
        s.push_str(&format!("\"v\":{},", self.v));
        s.push_str(&format!("\"dr\":{},", self.dr));
        s.push_str(&format!("\"ek_pub_b64\":{},", json_string(&self.ek_pub_b64)));
        s.push_str(&format!("\"pn\":{},", self.pn));
        s.push_str(&format!("\"n\":{},", self.n));
        s.push_str(&format!("\"iv_b64\":{},", json_string(&self.iv_b64)));
        s.push_str(&format!("\"device_id\":{}", json_string(&self.device_id)));
        if let Some(meta) = &self.meta {
            s.push_str(&format!(",\"meta\":{}", meta));
        }
        s.push('}');
        s.into_bytes()
    }

    /// Structural validation that must pass before any key derivation is attempted
    /// (§4.4 "Header validation"). Does not check the sender device binding against a
    /// session; callers compare `device_id` against the session's bound peer device
    /// themselves, since the header alone cannot know that binding.
    pub fn validate(&self, expected_iv_len: usize) -> Result<(), RatchetError> {
        if self.dr != 1 {
            return Err(RatchetError::HeaderInvalid("dr must be 1"));
        }
        if self.v == 0 {
            return Err(RatchetError::HeaderInvalid("v must be positive"));
        }
        if self.device_id.is_empty() {
            return Err(RatchetError::HeaderInvalid("device_id missing"));
        }
        let ek_bytes = decode_b64(&self.ek_pub_b64)
            .map_err(|_| RatchetError::HeaderInvalid("ek_pub_b64 malformed"))?;
        if ek_bytes.len() != 32 {
            return Err(RatchetError::HeaderInvalid("ek_pub_b64 wrong length"));
        }
        let iv_bytes = decode_b64(&self.iv_b64)
            .map_err(|_| RatchetError::HeaderInvalid("iv_b64 malformed"))?;
        if iv_bytes.len() != expected_iv_len {
            return Err(RatchetError::HeaderInvalid("iv_b64 wrong length"));
        }
        Ok(())
    }
}

fn json_string(value: &str) -> String {
    serde_json::to_string(value).expect("string serialization cannot fail")
}

/// A fully-formed outbound or inbound message: header plus AEAD ciphertext. The IV lives in
/// `header.iv_b64`, so it isn't duplicated as a separate top-level field here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub header: Header,
    pub ciphertext_b64: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            v: 1,
            dr: 1,
            ek_pub_b64: "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string(),
            pn: 0,
            n: 1,
            iv_b64: "AAAAAAAAAAAAAAAAAAAA".to_string(),
            device_id: "device-a".to_string(),
            meta: None,
        }
    }

    #[test]
    fn canonical_aad_has_no_trailing_float_dot() {
        let header = sample_header();
        let aad = String::from_utf8(header.canonical_aad()).unwrap();
        assert!(aad.contains("\"pn\":0,"));
        assert!(!aad.contains(".0"));
    }

    #[test]
    fn canonical_aad_is_key_order_stable() {
        let header = sample_header();
        let aad = String::from_utf8(header.canonical_aad()).unwrap();
        let v_pos = aad.find("\"v\"").unwrap();
        let dr_pos = aad.find("\"dr\"").unwrap();
        let ek_pos = aad.find("\"ek_pub_b64\"").unwrap();
        let pn_pos = aad.find("\"pn\"").unwrap();
        let n_pos = aad.find("\"n\":").unwrap();
        let iv_pos = aad.find("\"iv_b64\"").unwrap();
        let device_pos = aad.find("\"device_id\"").unwrap();
        assert!(v_pos < dr_pos);
        assert!(dr_pos < ek_pos);
        assert!(ek_pos < pn_pos);
        assert!(pn_pos < n_pos);
        assert!(n_pos < iv_pos);
        assert!(iv_pos < device_pos);
    }

    #[test]
    fn rejects_wrong_dr_version() {
        let mut header = sample_header();
        header.dr = 2;
        assert!(header.validate(12).is_err());
    }

    #[test]
    fn rejects_zero_version() {
        let mut header = sample_header();
        header.v = 0;
        assert!(header.validate(12).is_err());
    }

    #[test]
    fn rejects_wrong_iv_length() {
        let header = sample_header();
        assert!(header.validate(24).is_err());
    }
}
