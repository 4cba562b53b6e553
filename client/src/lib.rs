//! The end-to-end client: wires the transport, per-session ratchets, and the message-key
//! vault together on top of the X3DH/Double-Ratchet core in `protocol`. A `Client` owns one
//! device's identity, one connection, and a [`SessionStore`] of mutex-guarded ratchets — the
//! shape the session/concurrency notes call for (§5, §9).

pub mod error;
pub mod session;
pub mod transport;
pub mod vault;

use crate::error::ClientError;
use crate::session::{initiator_descriptor, responder_descriptor, SessionKey, SessionStore, DEFAULT_AEAD};
use crate::transport::Connection;
use crate::vault::VaultWrapKey;
use common::message::{ClientRequest, ServerResponse};
use common::wire::{
    ListMessagesQuery, OneTimePreKeyDto, PublishBundleRequest, SendMessageRequest, VaultEntryDto,
    X3dhInitialDto,
};
use common::CONFIG;
use protocol::envelope::{Envelope, Header};
use protocol::prekey::{DeviceKeyMaterial, PreKeyBundle};
use protocol::primitives::{IdentityPublicKey, PublicKey};
use protocol::ratchet::Ratchet;
use protocol::snapshot::Snapshot;
use protocol::vault::Direction;
use protocol::x3dh;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};

/// How many one-time pre-keys a freshly generated device publishes (§4.2 "generateInitialBundle").
const OTPK_POOL_SIZE: u32 = 10;

/// A send is retried exactly once after a `CounterTooLow` rejection, rolling back to the
/// pre-encrypt snapshot and reseeding from the server's reported `max_counter` (§4.5
/// "CounterTooLow recovery"). A second rejection is treated as unrecoverable.
const MAX_SEND_RETRIES: u32 = 1;

/// One device's end-to-end state: its long-term key material, its connection to the server,
/// and every ratchet session it currently holds.
pub struct Client {
    device_id: String,
    material: Mutex<DeviceKeyMaterial>,
    connection: Mutex<Connection>,
    sessions: SessionStore,
    /// X3DH initial messages awaiting delivery, keyed by the session they started. Removed
    /// once the session's first `SendMessage` has been accepted — every later message on
    /// that session carries no `x3dh_initial` at all.
    pending_initial: RwLock<HashMap<SessionKey, X3dhInitialDto>>,
    vault_key: VaultWrapKey,
}

impl Client {
    /// Connects to `server_url`, generates a fresh device identity, and publishes its bundle.
    pub async fn new(server_url: &str, device_id: &str) -> Result<Client, ClientError> {
        let mut connection = Connection::connect(server_url).await?;
        let material = DeviceKeyMaterial::generate(OTPK_POOL_SIZE);
        let bundle = material.publish_bundle();

        let publish = PublishBundleRequest {
            device_id: device_id.to_string(),
            identity_key_b64: bundle.identity_key.to_base64(),
            signed_prekey_id: bundle.signed_prekey_id,
            signed_prekey_b64: bundle.signed_prekey.to_base64(),
            signature_b64: bundle.signature.to_base64(),
            one_time_prekeys: material
                .one_time_prekeys_public()
                .into_iter()
                .map(|(id, key)| OneTimePreKeyDto { id, pub_b64: key.to_base64() })
                .collect(),
        };
        match connection.call(&ClientRequest::PublishBundle(publish)).await? {
            ServerResponse::Accepted => {}
            _ => return Err(ClientError::ServerResponseError),
        }

        Ok(Client {
            device_id: device_id.to_string(),
            material: Mutex::new(material),
            connection: Mutex::new(connection),
            sessions: SessionStore::new(),
            pending_initial: RwLock::new(HashMap::new()),
            vault_key: VaultWrapKey::generate(),
        })
    }

    async fn call(&self, request: ClientRequest) -> Result<ServerResponse, ClientError> {
        self.connection.lock().await.call(&request).await
    }

    /// Starts a new session with `peer_device_id` by claiming its published bundle and
    /// running X3DH as the initiator. A no-op if a session already exists for this pair.
    /// The resulting X3DH initial message is queued to piggyback on the conversation's first
    /// `send_message` call (§1, §6) — the server never parses it, only stores and forwards it.
    pub async fn start_conversation(
        &self,
        conversation_id: &str,
        peer_device_id: &str,
    ) -> Result<(), ClientError> {
        let key = SessionKey {
            conversation_id: conversation_id.to_string(),
            peer_device_id: peer_device_id.to_string(),
        };
        if self.sessions.contains(&key).await {
            return Ok(());
        }

        let bundle_dto = match self.call(ClientRequest::ClaimBundle { device_id: peer_device_id.to_string() }).await? {
            ServerResponse::Bundle(dto) => dto,
            ServerResponse::Error { .. } => return Err(ClientError::UserNotFoundError),
            _ => return Err(ClientError::ServerResponseError),
        };
        let bundle = PreKeyBundle::try_from(&bundle_dto)?;
        let peer_identity = bundle.identity_key.clone();

        let (initial, ephemeral_priv) = {
            let material = self.material.lock().await;
            x3dh::initiate(&material.identity_key, &bundle)?
        };
        let ephemeral_pub = PublicKey::from(&ephemeral_priv);

        let descriptor = initiator_descriptor(conversation_id, peer_device_id, &peer_identity);
        let ratchet =
            Ratchet::init_initiator(initial.root_key, ephemeral_priv, ephemeral_pub, descriptor, DEFAULT_AEAD)?;

        let dto = X3dhInitialDto {
            identity_key_b64: initial.identity_key.to_base64(),
            ephemeral_key_b64: initial.ephemeral_key.to_base64(),
            signed_prekey_id: initial.signed_prekey_id,
            one_time_prekey_id: initial.one_time_prekey_id,
        };

        self.sessions.insert(key.clone(), ratchet).await;
        self.pending_initial.write().await.insert(key, dto);
        Ok(())
    }

    /// Restores a previously captured session snapshot — e.g. after the process holding it
    /// crashed and restarted — and reconciles it against the server's send-state ledger before
    /// it can be used to send (§4.5 "Seeding after crash recovery"). A restored snapshot may be
    /// stale relative to what the server actually accepted, so `ns_total` is never trusted as-is:
    /// this always queries send-state and reseeds from the server's `expected_counter`.
    pub async fn resume_session(
        &self,
        conversation_id: &str,
        peer_device_id: &str,
        snapshot: &Snapshot,
    ) -> Result<(), ClientError> {
        let key = SessionKey {
            conversation_id: conversation_id.to_string(),
            peer_device_id: peer_device_id.to_string(),
        };
        let mut ratchet = snapshot.restore()?;

        let response = self
            .call(ClientRequest::SendState {
                conversation_id: conversation_id.to_string(),
                sender_device_id: self.device_id.clone(),
            })
            .await?;
        let send_state = match response {
            ServerResponse::SendState(dto) => dto,
            _ => return Err(ClientError::ServerResponseError),
        };
        let secret = CONFIG.get_send_state_hmac_secret();
        if !send_state.verify(secret.as_bytes()) {
            return Err(ClientError::SendStateVerificationFailed);
        }
        ratchet.reseed_after_stale_restore(send_state.expected_counter);

        self.sessions.insert(key, ratchet).await;
        Ok(())
    }

    /// Encrypts `plaintext` for `(conversation_id, peer_device_id)` and sends it, applying
    /// the single sanctioned retry on `CounterTooLow` (§4.5, §8 scenario 5). Every mutation to
    /// the ratchet is rolled back to the pre-encrypt snapshot whenever the send does not end
    /// in `Accepted`.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        peer_account_id: &str,
        peer_device_id: &str,
        plaintext: &[u8],
    ) -> Result<uuid::Uuid, ClientError> {
        let key = SessionKey {
            conversation_id: conversation_id.to_string(),
            peer_device_id: peer_device_id.to_string(),
        };
        let ratchet_lock = self.sessions.get(&key).await.ok_or(ClientError::UserNotFoundError)?;
        let mut ratchet = ratchet_lock.lock().await;

        let message_id = uuid::Uuid::new_v4();
        let mut attempt = 0u32;
        loop {
            let snapshot = Snapshot::capture(&ratchet);
            let (envelope, mk) = ratchet.encrypt(plaintext, &self.device_id)?;
            let header_json =
                serde_json::to_string(&envelope.header).map_err(|_| ClientError::SerializationError)?;
            let counter = ratchet.ns_total();

            let x3dh_initial = if attempt == 0 {
                self.pending_initial.read().await.get(&key).cloned()
            } else {
                None
            };

            let request = SendMessageRequest {
                conversation_id: conversation_id.to_string(),
                sender_device_id: self.device_id.clone(),
                receiver_account_id: peer_account_id.to_string(),
                receiver_device_id: peer_device_id.to_string(),
                header_json,
                ciphertext_b64: envelope.ciphertext_b64.clone(),
                counter,
                id: message_id,
                created_at: chrono::Utc::now(),
                x3dh_initial,
            };

            match self.call(ClientRequest::SendMessage(request)).await? {
                ServerResponse::Accepted => {
                    self.pending_initial.write().await.remove(&key);
                    drop(ratchet);
                    self.vault_put_key(
                        conversation_id,
                        &message_id.to_string(),
                        peer_device_id,
                        Direction::Sent,
                        counter,
                        &mk,
                    )
                    .await?;
                    return Ok(message_id);
                }
                ServerResponse::CounterTooLow { max_counter } => {
                    *ratchet = snapshot.restore()?;
                    if attempt >= MAX_SEND_RETRIES {
                        return Err(ClientError::CounterTooLowRetryExhausted);
                    }
                    ratchet.reseed_after_counter_mismatch(max_counter);
                    attempt += 1;
                }
                ServerResponse::Error { .. } => {
                    *ratchet = snapshot.restore()?;
                    return Err(ClientError::SendError);
                }
                _ => {
                    *ratchet = snapshot.restore()?;
                    return Err(ClientError::ServerResponseError);
                }
            }
        }
    }

    /// Fetches new messages for `conversation_id`, decrypting each and persisting its
    /// derived key to the vault with `direction: Received` (§4.6 "the receiver may perform
    /// the symmetric operation on its side"). Bootstraps a responder session the first time a
    /// message for a peer device arrives without one already held locally, from that
    /// message's stored `x3dh_initial`.
    pub async fn receive_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<(uuid::Uuid, Vec<u8>)>, ClientError> {
        let query = ListMessagesQuery {
            conversation_id: conversation_id.to_string(),
            cursor_ts: None,
            cursor_id: None,
            cursor_counter: None,
            limit: None,
        };
        let messages = match self.call(ClientRequest::ListMessages(query)).await? {
            ServerResponse::Messages(messages) => messages,
            _ => return Err(ClientError::ServerResponseError),
        };

        let mut plaintexts = Vec::new();
        for message in messages {
            if message.sender_device_id == self.device_id {
                continue;
            }
            let key = SessionKey {
                conversation_id: conversation_id.to_string(),
                peer_device_id: message.sender_device_id.clone(),
            };

            if !self.sessions.contains(&key).await {
                let dto = message.x3dh_initial.as_ref().ok_or(ClientError::ServerResponseError)?;
                self.bootstrap_responder(&key, dto).await?;
            }

            let header: Header =
                serde_json::from_str(&message.header_json).map_err(|_| ClientError::SerializationError)?;
            // `sender_device_id` is the server's routing field on `StoredMessage`; `header.device_id`
            // is inside the AEAD-authenticated header. They're independent wire fields — a relay
            // swapping the former without touching `header_json` must not be allowed to silently
            // redirect decryption to the wrong peer-device session.
            if header.device_id != message.sender_device_id {
                return Err(ClientError::DeviceIdMismatch);
            }

            let ratchet_lock = self.sessions.get(&key).await.ok_or(ClientError::ServerResponseError)?;
            let mut ratchet = ratchet_lock.lock().await;
            let envelope = Envelope { header, ciphertext_b64: message.ciphertext_b64.clone() };
            let (plaintext, mk) = ratchet.decrypt(&envelope)?;
            drop(ratchet);

            self.vault_put_key(
                conversation_id,
                &message.id.to_string(),
                &message.sender_device_id,
                Direction::Received,
                message.counter,
                &mk,
            )
            .await?;
            plaintexts.push((message.id, plaintext));
        }
        Ok(plaintexts)
    }

    async fn bootstrap_responder(&self, key: &SessionKey, dto: &X3dhInitialDto) -> Result<(), ClientError> {
        let identity_key = IdentityPublicKey::from_base64(&dto.identity_key_b64)?;
        let ephemeral_key = PublicKey::from_base64(&dto.ephemeral_key_b64)?;
        // `root_key` is computed below, not carried by the wire DTO; the zero filler is
        // never read by `process_initial_message`, which only consumes the other four fields.
        let initial = x3dh::InitialMessage {
            identity_key: identity_key.clone(),
            ephemeral_key: ephemeral_key.clone(),
            signed_prekey_id: dto.signed_prekey_id,
            one_time_prekey_id: dto.one_time_prekey_id,
            root_key: [0u8; 32],
        };

        let otpk_private = match dto.one_time_prekey_id {
            Some(id) => {
                let mut material = self.material.lock().await;
                Some(material.take_one_time_prekey(id)?.private)
            }
            None => None,
        };

        let root_key = {
            let material = self.material.lock().await;
            x3dh::process_initial_message(
                &material.identity_key,
                &material.signed_prekey.private,
                otpk_private.as_ref(),
                &initial,
            )?
        };

        let descriptor = responder_descriptor(&key.conversation_id, &key.peer_device_id, &identity_key);
        let ratchet = Ratchet::init_responder(root_key, ephemeral_key, descriptor, DEFAULT_AEAD)?;
        self.sessions.insert(key.clone(), ratchet).await;
        Ok(())
    }

    async fn vault_put_key(
        &self,
        conversation_id: &str,
        message_id: &str,
        peer_device_id: &str,
        direction: Direction,
        header_counter: u64,
        mk: &[u8; 32],
    ) -> Result<(), ClientError> {
        let (wrapped_mk_b64, wrap_context) = self.vault_key.wrap(mk)?;
        let dto = VaultEntryDto {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
            sender_device_id: self.device_id.clone(),
            target_device_id: peer_device_id.to_string(),
            direction: match direction {
                Direction::Sent => "sent".to_string(),
                Direction::Received => "received".to_string(),
            },
            header_counter,
            wrapped_mk_b64,
            wrap_aead: wrap_context.aead,
            wrap_iv_b64: wrap_context.iv_b64,
            wrap_kdf: wrap_context.kdf,
        };
        self.call(ClientRequest::VaultPut(dto)).await?;
        Ok(())
    }
}
