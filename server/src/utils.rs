//! The WebSocket listener and per-connection request dispatch. The teacher's retrieved
//! sources referenced a `Server` type from `main.rs` without ever defining one; this module
//! supplies it, built on the standard `tokio-tungstenite` accept loop (the same library the
//! client side already uses via `connect_async`).

use crate::errors::ServerError;
use crate::handlers;
use crate::state::AppState;
use common::message::{ClientRequest, ServerResponse};
use futures_util::{SinkExt, StreamExt};
use log::{error, info};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

pub(crate) struct Server {
    host: String,
    port: String,
    state: Arc<AppState>,
}

impl Server {
    pub(crate) fn new(host: String, port: String, send_state_hmac_secret: Vec<u8>) -> Server {
        Server { host, port, state: AppState::new(send_state_hmac_secret) }
    }

    pub(crate) async fn listen(&mut self) {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("failed to bind {}: {}", addr, e);
                return;
            }
        };
        info!("listening on {}", addr);

        while let Ok((stream, peer_addr)) = listener.accept().await {
            let state = self.state.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, state).await {
                    error!("connection from {} closed with error: {}", peer_addr, e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    state: Arc<AppState>,
) -> Result<(), ServerError> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| ServerError::GenericError(anyhow::anyhow!(e)))?;
    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(_) => break,
        };
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let response = match serde_json::from_str::<ClientRequest>(&text) {
            Ok(request) => dispatch(&state, request).await,
            Err(_) => ServerResponse::Error { message: "invalid request".to_string() },
        };

        let encoded = serde_json::to_string(&response).unwrap_or_else(|_| {
            "{\"type\":\"Error\",\"message\":\"failed to encode response\"}".to_string()
        });
        if write.send(Message::Text(encoded)).await.is_err() {
            break;
        }
    }
    Ok(())
}

async fn dispatch(state: &Arc<AppState>, request: ClientRequest) -> ServerResponse {
    match request {
        ClientRequest::PublishBundle(req) => match handlers::publish_bundle(state, req).await {
            Ok(()) => ServerResponse::Accepted,
            Err(e) => ServerResponse::Error { message: e.to_string() },
        },
        ClientRequest::ClaimBundle { device_id } => match handlers::claim_bundle(state, &device_id).await {
            Ok(bundle) => ServerResponse::Bundle(bundle),
            Err(e) => ServerResponse::Error { message: e.to_string() },
        },
        ClientRequest::SendMessage(req) => match handlers::store_message(state, req).await {
            Ok(()) => ServerResponse::Accepted,
            Err(counter_too_low) => ServerResponse::CounterTooLow { max_counter: counter_too_low.max_counter },
        },
        ClientRequest::ListMessages(query) => {
            ServerResponse::Messages(handlers::list_messages(state, query).await)
        }
        ClientRequest::SendState { conversation_id, sender_device_id } => {
            ServerResponse::SendState(handlers::send_state(state, &conversation_id, &sender_device_id).await)
        }
        ClientRequest::VaultPut(dto) => {
            handlers::vault_put(state, dto).await;
            ServerResponse::Accepted
        }
        ClientRequest::VaultGet { conversation_id, message_id, sender_device_id } => {
            let entry = handlers::vault_get(state, &conversation_id, &message_id, &sender_device_id).await;
            ServerResponse::VaultEntry(entry)
        }
        ClientRequest::VaultDelete { conversation_id, message_id, sender_device_id } => {
            handlers::vault_delete(state, &conversation_id, &message_id, &sender_device_id).await;
            ServerResponse::Accepted
        }
        ClientRequest::VaultLatestState { conversation_id } => {
            ServerResponse::VaultLatestState(handlers::vault_latest_state(state, &conversation_id).await)
        }
    }
}
