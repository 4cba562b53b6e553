//! The envelope of requests and responses exchanged over the client/server WebSocket
//! connection (§6). Both sides deserialize through these tagged enums so an unrecognized
//! `type` field is rejected outright rather than silently ignored.

use crate::wire::{
    ClaimBundleResponse, ListMessagesQuery, PublishBundleRequest, SendMessageRequest,
    SendStateResponse, StoredMessage, VaultEntryDto,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    PublishBundle(PublishBundleRequest),
    ClaimBundle { device_id: String },
    SendMessage(SendMessageRequest),
    ListMessages(ListMessagesQuery),
    SendState { conversation_id: String, sender_device_id: String },
    VaultPut(VaultEntryDto),
    VaultGet { conversation_id: String, message_id: String, sender_device_id: String },
    VaultDelete { conversation_id: String, message_id: String, sender_device_id: String },
    VaultLatestState { conversation_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerResponse {
    Accepted,
    Bundle(ClaimBundleResponse),
    Messages(Vec<StoredMessage>),
    SendState(SendStateResponse),
    VaultEntry(Option<VaultEntryDto>),
    VaultLatestState(HashMap<String, (u64, String)>),
    CounterTooLow { max_counter: u64 },
    Error { message: String },
}
