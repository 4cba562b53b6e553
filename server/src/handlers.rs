//! Request handlers for the external interfaces in §6: pre-key publish/claim, the
//! message-store endpoint with its counter enforcement, list-messages with cursor
//! pagination, the vault endpoints, and the HMAC-signed send-state endpoint.

use crate::errors::ServerError;
use crate::state::AppState;
use common::wire::{
    CounterTooLowResponse, ListMessagesQuery, OneTimePreKeyDto, PreKeyBundleDto,
    PublishBundleRequest, SendMessageRequest, SendStateResponse, StoredMessage, VaultEntryDto,
};
use protocol::counter::{CounterKey, SendState};
use protocol::errors::CounterError;
use protocol::primitives::{IdentityPublicKey, PublicKey, Signature};
use protocol::vault::{Direction, VaultEntry, VaultKey, WrapContext};
use std::sync::Arc;

pub(crate) async fn publish_bundle(state: &Arc<AppState>, req: PublishBundleRequest) -> Result<(), ServerError> {
    let identity_key = IdentityPublicKey::from_base64(&req.identity_key_b64)?;
    let signed_prekey = PublicKey::from_base64(&req.signed_prekey_b64)?;
    let signature = Signature::from_base64(&req.signature_b64)?;
    let one_time_prekeys = req
        .one_time_prekeys
        .iter()
        .map(|otpk| -> Result<(u32, PublicKey), ServerError> {
            Ok((otpk.id, PublicKey::from_base64(&otpk.pub_b64)?))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut prekeys = state.prekeys.write().await;
    prekeys.publish(
        &req.device_id,
        identity_key,
        req.signed_prekey_id,
        signed_prekey,
        signature,
        one_time_prekeys,
    );
    Ok(())
}

pub(crate) async fn claim_bundle(state: &Arc<AppState>, device_id: &str) -> Result<PreKeyBundleDto, ServerError> {
    let mut prekeys = state.prekeys.write().await;
    let bundle = prekeys.claim(device_id)?;
    Ok(PreKeyBundleDto::from(&bundle))
}

/// `POST store(message)` (§4.5, §6): accepts iff `counter == last_accepted + 1` for
/// `(conversation_id, sender_device_id)`.
pub(crate) async fn store_message(
    state: &Arc<AppState>,
    req: SendMessageRequest,
) -> Result<(), CounterTooLowResponse> {
    let key = CounterKey {
        conversation_id: req.conversation_id.clone(),
        sender_device_id: req.sender_device_id.clone(),
    };

    let mut counters = state.counters.write().await;
    if let Err(CounterError::CounterTooLow { max_counter }) = counters.try_accept(&key, req.counter) {
        return Err(CounterTooLowResponse::new(max_counter));
    }
    drop(counters);

    let stored = StoredMessage {
        id: req.id,
        conversation_id: req.conversation_id.clone(),
        sender_device_id: req.sender_device_id,
        header_json: req.header_json,
        ciphertext_b64: req.ciphertext_b64,
        counter: req.counter,
        created_at: req.created_at,
        x3dh_initial: req.x3dh_initial,
    };
    let mut messages = state.messages.write().await;
    messages.entry(req.conversation_id).or_default().push(stored);
    Ok(())
}

/// `GET list(conversation_id, cursor*, limit)` (§6): sorted by `(created_at, counter, id)`
/// ascending; cursor pagination is inclusive-exclusive on `(cursor_ts, cursor_id)`.
pub(crate) async fn list_messages(state: &Arc<AppState>, query: ListMessagesQuery) -> Vec<StoredMessage> {
    let messages = state.messages.read().await;
    let mut items: Vec<StoredMessage> = messages
        .get(&query.conversation_id)
        .cloned()
        .unwrap_or_default();
    items.sort_by(|a, b| (a.created_at, a.counter, a.id).cmp(&(b.created_at, b.counter, b.id)));

    if let (Some(cursor_ts), Some(cursor_id)) = (query.cursor_ts, query.cursor_id) {
        items.retain(|m| (m.created_at, m.id) > (cursor_ts, cursor_id));
    } else if let Some(cursor_counter) = query.cursor_counter {
        items.retain(|m| m.counter > cursor_counter);
    }

    if let Some(limit) = query.limit {
        items.truncate(limit as usize);
    }
    items
}

pub(crate) async fn send_state(
    state: &Arc<AppState>,
    conversation_id: &str,
    sender_device_id: &str,
) -> SendStateResponse {
    let key = CounterKey {
        conversation_id: conversation_id.to_string(),
        sender_device_id: sender_device_id.to_string(),
    };
    let counters = state.counters.read().await;
    let messages = state.messages.read().await;
    let last_message_id = messages
        .get(conversation_id)
        .and_then(|items| items.iter().filter(|m| m.sender_device_id == sender_device_id).last())
        .map(|m| m.id.to_string());
    let send_state = SendState::from_ledger(&counters, &key, last_message_id);
    SendStateResponse::sign(&send_state, &state.send_state_hmac_secret)
}

pub(crate) async fn vault_put(state: &Arc<AppState>, dto: VaultEntryDto) {
    let direction = if dto.direction == "sent" { Direction::Sent } else { Direction::Received };
    let key = VaultKey {
        conversation_id: dto.conversation_id,
        message_id: dto.message_id,
        sender_device_id: dto.sender_device_id,
    };
    let entry = VaultEntry {
        target_device_id: dto.target_device_id,
        direction,
        header_counter: dto.header_counter,
        wrapped_mk_b64: dto.wrapped_mk_b64,
        wrap_context: WrapContext { aead: dto.wrap_aead, iv_b64: dto.wrap_iv_b64, kdf: dto.wrap_kdf },
    };
    state.vault.write().await.put(key, entry);
}

pub(crate) async fn vault_get(
    state: &Arc<AppState>,
    conversation_id: &str,
    message_id: &str,
    sender_device_id: &str,
) -> Option<VaultEntryDto> {
    let key = VaultKey {
        conversation_id: conversation_id.to_string(),
        message_id: message_id.to_string(),
        sender_device_id: sender_device_id.to_string(),
    };
    let vault = state.vault.read().await;
    vault.get(&key).ok().map(|entry| VaultEntryDto {
        conversation_id: key.conversation_id.clone(),
        message_id: key.message_id.clone(),
        sender_device_id: key.sender_device_id.clone(),
        target_device_id: entry.target_device_id.clone(),
        direction: match entry.direction {
            Direction::Sent => "sent".to_string(),
            Direction::Received => "received".to_string(),
        },
        header_counter: entry.header_counter,
        wrapped_mk_b64: entry.wrapped_mk_b64.clone(),
        wrap_aead: entry.wrap_context.aead.clone(),
        wrap_iv_b64: entry.wrap_context.iv_b64.clone(),
        wrap_kdf: entry.wrap_context.kdf.clone(),
    })
}

pub(crate) async fn vault_delete(state: &Arc<AppState>, conversation_id: &str, message_id: &str, sender_device_id: &str) {
    let key = VaultKey {
        conversation_id: conversation_id.to_string(),
        message_id: message_id.to_string(),
        sender_device_id: sender_device_id.to_string(),
    };
    state.vault.write().await.delete(&key);
}

pub(crate) async fn vault_count(state: &Arc<AppState>) -> usize {
    state.vault.read().await.count()
}

pub(crate) async fn vault_latest_state(
    state: &Arc<AppState>,
    conversation_id: &str,
) -> std::collections::HashMap<String, (u64, String)> {
    let vault = state.vault.read().await;
    vault
        .latest_state(conversation_id)
        .into_iter()
        .map(|(direction, value)| {
            let key = match direction {
                Direction::Sent => "sent".to_string(),
                Direction::Received => "received".to_string(),
            };
            (key, value)
        })
        .collect()
}

