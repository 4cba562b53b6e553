//! Wire DTOs shared between `server` and `client`: JSON-serializable mirrors of the
//! protocol crate's internal types, plus the request/response shapes for the external
//! interfaces in §6 (message store, pre-key publish/claim, vault, send-state).
//!
//! Field names are pinned and unknown fields are rejected at the parser (`serde`'s default
//! behavior for structs is additive; callers that need strict rejection should deserialize
//! through [`serde_json::from_str`] with `#[serde(deny_unknown_fields)]`, applied per DTO
//! below where the spec calls for it).

use protocol::prekey::PreKeyBundle;
use protocol::primitives::{IdentityPublicKey, PublicKey, Signature};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OneTimePreKeyDto {
    pub id: u32,
    pub pub_b64: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreKeyBundleDto {
    pub ik_pub_b64: String,
    pub spk_id: u32,
    pub spk_pub_b64: String,
    pub spk_sig_b64: String,
    pub opk: Option<OneTimePreKeyDto>,
}

impl From<&PreKeyBundle> for PreKeyBundleDto {
    fn from(bundle: &PreKeyBundle) -> Self {
        PreKeyBundleDto {
            ik_pub_b64: bundle.identity_key.to_base64(),
            spk_id: bundle.signed_prekey_id,
            spk_pub_b64: bundle.signed_prekey.to_base64(),
            spk_sig_b64: bundle.signature.to_base64(),
            opk: bundle.one_time_prekey.as_ref().map(|(id, key)| OneTimePreKeyDto {
                id: *id,
                pub_b64: key.to_base64(),
            }),
        }
    }
}

impl TryFrom<&PreKeyBundleDto> for PreKeyBundle {
    type Error = protocol::errors::X3DHError;

    fn try_from(dto: &PreKeyBundleDto) -> Result<Self, Self::Error> {
        Ok(PreKeyBundle {
            identity_key: IdentityPublicKey::from_base64(&dto.ik_pub_b64)?,
            signed_prekey_id: dto.spk_id,
            signed_prekey: PublicKey::from_base64(&dto.spk_pub_b64)?,
            signature: Signature::from_base64(&dto.spk_sig_b64)?,
            one_time_prekey: match &dto.opk {
                Some(opk) => Some((opk.id, PublicKey::from_base64(&opk.pub_b64)?)),
                None => None,
            },
        })
    }
}

/// `POST publish(deviceId, bundle)` (§6). `additional_one_time_prekeys` lets a device top up
/// its published pool without republishing the signed pre-key.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishBundleRequest {
    pub device_id: String,
    pub identity_key_b64: String,
    pub signed_prekey_id: u32,
    pub signed_prekey_b64: String,
    pub signature_b64: String,
    pub one_time_prekeys: Vec<OneTimePreKeyDto>,
}

/// `GET claim(peerDeviceId) -> bundle` (§6). A claim that found no bundle at all is a
/// transport-level 404, not part of this type.
pub type ClaimBundleResponse = PreKeyBundleDto;

/// The public half of an X3DH [`InitialMessage`](protocol::x3dh::InitialMessage), carried
/// alongside the first ratchet message of a new session so the responder can run
/// `process_initial_message` before it can decrypt anything. The server stores and forwards
/// this opaquely; it never inspects or validates it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct X3dhInitialDto {
    pub identity_key_b64: String,
    pub ephemeral_key_b64: String,
    pub signed_prekey_id: u32,
    pub one_time_prekey_id: Option<u32>,
}

/// The message-store request body (§4.5 step 1, §6). `x3dh_initial` is present only on the
/// first message a session's initiator sends; every later message on that session is `None`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub conversation_id: String,
    pub sender_device_id: String,
    pub receiver_account_id: String,
    pub receiver_device_id: String,
    pub header_json: String,
    pub ciphertext_b64: String,
    pub counter: u64,
    pub id: uuid::Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub x3dh_initial: Option<X3dhInitialDto>,
}

/// `409 { error: "CounterTooLow", maxCounter }` (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CounterTooLowResponse {
    pub error: String,
    pub max_counter: u64,
}

impl CounterTooLowResponse {
    pub fn new(max_counter: u64) -> CounterTooLowResponse {
        CounterTooLowResponse { error: "CounterTooLow".to_string(), max_counter }
    }
}

/// A single stored message as the list-messages endpoint returns it, ordered by
/// `(created_at, counter, id)` ascending (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: uuid::Uuid,
    pub conversation_id: String,
    pub sender_device_id: String,
    pub header_json: String,
    pub ciphertext_b64: String,
    pub counter: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub x3dh_initial: Option<X3dhInitialDto>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListMessagesQuery {
    pub conversation_id: String,
    pub cursor_ts: Option<chrono::DateTime<chrono::Utc>>,
    pub cursor_id: Option<uuid::Uuid>,
    pub cursor_counter: Option<u64>,
    pub limit: Option<u32>,
}

/// The send-state endpoint's signed response body (§4.5, §6). `signature_b64` is an
/// HMAC-SHA-256 over [`sign_send_state`]'s canonical bytes, base64-encoded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendStateResponse {
    pub expected_counter: u64,
    pub last_accepted_counter: u64,
    pub last_accepted_message_id: Option<String>,
    pub server_time: chrono::DateTime<chrono::Utc>,
    pub signature_b64: String,
}

impl SendStateResponse {
    pub fn sign(state: &protocol::counter::SendState, secret: &[u8]) -> SendStateResponse {
        let signature = hmac_sha256(secret, &state.signing_bytes());
        SendStateResponse {
            expected_counter: state.expected_counter,
            last_accepted_counter: state.last_accepted_counter,
            last_accepted_message_id: state.last_accepted_message_id.clone(),
            server_time: state.server_time,
            signature_b64: protocol::primitives::encode_b64(&signature),
        }
    }

    /// Verifies the embedded signature against `secret`, reconstructing the same canonical
    /// bytes [`SendStateResponse::sign`] signed.
    pub fn verify(&self, secret: &[u8]) -> bool {
        let state = protocol::counter::SendState {
            expected_counter: self.expected_counter,
            last_accepted_counter: self.last_accepted_counter,
            last_accepted_message_id: self.last_accepted_message_id.clone(),
            server_time: self.server_time,
        };
        let expected = hmac_sha256(secret, &state.signing_bytes());
        match protocol::primitives::decode_b64(&self.signature_b64) {
            Ok(actual) => constant_time_eq(&expected, &actual),
            Err(_) => false,
        }
    }
}

/// HMAC-SHA-256, used for signing the send-state response body (§4.5, §6).
pub fn hmac_sha256(secret: &[u8], message: &[u8]) -> Vec<u8> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// A vault entry as exchanged over the wire (§4.6, §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultEntryDto {
    pub conversation_id: String,
    pub message_id: String,
    pub sender_device_id: String,
    pub target_device_id: String,
    pub direction: String,
    pub header_counter: u64,
    pub wrapped_mk_b64: String,
    pub wrap_aead: String,
    pub wrap_iv_b64: String,
    pub wrap_kdf: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::prekey::DeviceKeyMaterial;

    #[test]
    fn prekey_bundle_dto_roundtrip() {
        let material = DeviceKeyMaterial::generate(1);
        let bundle = material.publish_bundle();
        let dto = PreKeyBundleDto::from(&bundle);
        let back = PreKeyBundle::try_from(&dto).unwrap();
        assert!(back.verify().is_ok());
    }

    #[test]
    fn send_state_signature_round_trips() {
        let state = protocol::counter::SendState {
            expected_counter: 5,
            last_accepted_counter: 4,
            last_accepted_message_id: Some("msg-4".to_string()),
            server_time: chrono::Utc::now(),
        };
        let secret = b"shared-secret";
        let response = SendStateResponse::sign(&state, secret);
        assert!(response.verify(secret));
        assert!(!response.verify(b"wrong-secret"));
    }
}
