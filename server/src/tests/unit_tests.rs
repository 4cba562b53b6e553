use crate::handlers;
use crate::state::AppState;
use common::wire::{ListMessagesQuery, OneTimePreKeyDto, PublishBundleRequest, SendMessageRequest, VaultEntryDto};
use protocol::prekey::DeviceKeyMaterial;

fn test_state() -> std::sync::Arc<AppState> {
    AppState::new(b"test-hmac-secret".to_vec())
}

fn publish_request(device_id: &str, material: &DeviceKeyMaterial) -> PublishBundleRequest {
    let bundle = material.publish_bundle();
    PublishBundleRequest {
        device_id: device_id.to_string(),
        identity_key_b64: bundle.identity_key.to_base64(),
        signed_prekey_id: bundle.signed_prekey_id,
        signed_prekey_b64: bundle.signed_prekey.to_base64(),
        signature_b64: bundle.signature.to_base64(),
        one_time_prekeys: bundle
            .one_time_prekey
            .into_iter()
            .map(|(id, key)| OneTimePreKeyDto { id, pub_b64: key.to_base64() })
            .collect(),
    }
}

fn send_request(conversation_id: &str, sender_device_id: &str, counter: u64) -> SendMessageRequest {
    SendMessageRequest {
        conversation_id: conversation_id.to_string(),
        sender_device_id: sender_device_id.to_string(),
        receiver_account_id: "bob".to_string(),
        receiver_device_id: "bob-device-1".to_string(),
        header_json: "{}".to_string(),
        ciphertext_b64: "ZGF0YQ==".to_string(),
        counter,
        id: uuid::Uuid::new_v4(),
        created_at: chrono::Utc::now(),
        x3dh_initial: None,
    }
}

#[tokio::test]
async fn publish_then_claim_returns_verifiable_bundle() {
    let state = test_state();
    let material = DeviceKeyMaterial::generate(2);
    let req = publish_request("alice-device-1", &material);

    handlers::publish_bundle(&state, req).await.expect("publish should succeed");
    let dto = handlers::claim_bundle(&state, "alice-device-1").await.expect("claim should succeed");
    let bundle = protocol::prekey::PreKeyBundle::try_from(&dto).unwrap();
    assert!(bundle.verify().is_ok());
    assert!(dto.opk.is_some());
}

#[tokio::test]
async fn claiming_unpublished_device_fails() {
    let state = test_state();
    assert!(handlers::claim_bundle(&state, "ghost-device").await.is_err());
}

#[tokio::test]
async fn repeated_claims_never_hand_out_the_same_one_time_prekey() {
    let state = test_state();
    let material = DeviceKeyMaterial::generate(1);
    handlers::publish_bundle(&state, publish_request("alice-device-1", &material)).await.unwrap();

    let first = handlers::claim_bundle(&state, "alice-device-1").await.unwrap();
    let second = handlers::claim_bundle(&state, "alice-device-1").await.unwrap();
    assert!(first.opk.is_some());
    assert!(second.opk.is_none());
}

#[tokio::test]
async fn store_message_accepts_strictly_incrementing_counters() {
    let state = test_state();
    handlers::store_message(&state, send_request("conv-1", "alice-device-1", 1)).await.unwrap();
    handlers::store_message(&state, send_request("conv-1", "alice-device-1", 2)).await.unwrap();
    handlers::store_message(&state, send_request("conv-1", "alice-device-1", 3)).await.unwrap();

    let query = ListMessagesQuery {
        conversation_id: "conv-1".to_string(),
        cursor_ts: None,
        cursor_id: None,
        cursor_counter: None,
        limit: None,
    };
    let messages = handlers::list_messages(&state, query).await;
    assert_eq!(messages.len(), 3);
    assert_eq!(messages.iter().map(|m| m.counter).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[tokio::test]
async fn store_message_rejects_replayed_and_stale_counters() {
    let state = test_state();
    handlers::store_message(&state, send_request("conv-1", "alice-device-1", 1)).await.unwrap();
    handlers::store_message(&state, send_request("conv-1", "alice-device-1", 2)).await.unwrap();

    let rejection = handlers::store_message(&state, send_request("conv-1", "alice-device-1", 2)).await;
    assert_eq!(rejection.unwrap_err().max_counter, 2);

    let skip_ahead = handlers::store_message(&state, send_request("conv-1", "alice-device-1", 10)).await;
    assert_eq!(skip_ahead.unwrap_err().max_counter, 2);
}

#[tokio::test]
async fn list_messages_respects_cursor_and_limit() {
    let state = test_state();
    for counter in 1..=5 {
        handlers::store_message(&state, send_request("conv-1", "alice-device-1", counter)).await.unwrap();
    }

    let query = ListMessagesQuery {
        conversation_id: "conv-1".to_string(),
        cursor_ts: None,
        cursor_id: None,
        cursor_counter: Some(2),
        limit: Some(2),
    };
    let messages = handlers::list_messages(&state, query).await;
    assert_eq!(messages.iter().map(|m| m.counter).collect::<Vec<_>>(), vec![3, 4]);
}

#[tokio::test]
async fn send_state_reflects_last_accepted_counter_and_verifies() {
    let state = test_state();
    handlers::store_message(&state, send_request("conv-1", "alice-device-1", 1)).await.unwrap();
    handlers::store_message(&state, send_request("conv-1", "alice-device-1", 2)).await.unwrap();

    let response = handlers::send_state(&state, "conv-1", "alice-device-1").await;
    assert_eq!(response.last_accepted_counter, 2);
    assert_eq!(response.expected_counter, 3);
    assert!(response.verify(b"test-hmac-secret"));
    assert!(!response.verify(b"wrong-secret"));
}

#[tokio::test]
async fn vault_put_get_delete_round_trips() {
    let state = test_state();
    let entry = VaultEntryDto {
        conversation_id: "conv-1".to_string(),
        message_id: "msg-1".to_string(),
        sender_device_id: "alice-device-1".to_string(),
        target_device_id: "bob-device-1".to_string(),
        direction: "sent".to_string(),
        header_counter: 1,
        wrapped_mk_b64: "d3JhcHBlZA==".to_string(),
        wrap_aead: "aes256gcm".to_string(),
        wrap_iv_b64: "aXY=".to_string(),
        wrap_kdf: "hkdf-sha256".to_string(),
    };
    handlers::vault_put(&state, entry.clone()).await;

    let fetched = handlers::vault_get(&state, "conv-1", "msg-1", "alice-device-1").await;
    assert_eq!(fetched.unwrap().wrapped_mk_b64, entry.wrapped_mk_b64);
    assert_eq!(handlers::vault_count(&state).await, 1);

    handlers::vault_delete(&state, "conv-1", "msg-1", "alice-device-1").await;
    assert!(handlers::vault_get(&state, "conv-1", "msg-1", "alice-device-1").await.is_none());
}

#[tokio::test]
async fn vault_latest_state_tracks_highest_counter_per_direction() {
    let state = test_state();
    for (message_id, counter) in [("msg-1", 1u64), ("msg-2", 2u64)] {
        let entry = VaultEntryDto {
            conversation_id: "conv-1".to_string(),
            message_id: message_id.to_string(),
            sender_device_id: "alice-device-1".to_string(),
            target_device_id: "bob-device-1".to_string(),
            direction: "sent".to_string(),
            header_counter: counter,
            wrapped_mk_b64: "d3JhcHBlZA==".to_string(),
            wrap_aead: "aes256gcm".to_string(),
            wrap_iv_b64: "aXY=".to_string(),
            wrap_kdf: "hkdf-sha256".to_string(),
        };
        handlers::vault_put(&state, entry).await;
    }

    let latest = handlers::vault_latest_state(&state, "conv-1").await;
    let (counter, message_id) = latest.get("sent").expect("sent direction present");
    assert_eq!(*counter, 2);
    assert_eq!(message_id, "msg-2");
}
