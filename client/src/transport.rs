//! The WebSocket connection to the server and the request/response round trip. One request
//! is ever in flight at a time per connection, mirroring the teacher's original single
//! `write`/`read` split with no concurrent multiplexing.

use crate::error::ClientError;
use common::message::{ClientRequest, ServerResponse};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Sender = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type Receiver = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub struct Connection {
    write: Sender,
    read: Receiver,
}

impl Connection {
    pub async fn connect(server_url: &str) -> Result<Connection, ClientError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(server_url).await?;
        let (write, read) = ws_stream.split();
        Ok(Connection { write, read })
    }

    /// Sends `request` and waits for the matching response. The protocol here is strictly
    /// request/response: the server never pushes unsolicited messages on this connection.
    pub async fn call(&mut self, request: &ClientRequest) -> Result<ServerResponse, ClientError> {
        let encoded = serde_json::to_string(request).map_err(|_| ClientError::SerializationError)?;
        self.write.send(Message::Text(encoded.into())).await?;

        match self.read.next().await {
            Some(Ok(Message::Text(text))) => {
                serde_json::from_str(&text).map_err(|_| ClientError::ServerResponseError)
            }
            Some(Ok(_)) => Err(ClientError::ServerResponseError),
            Some(Err(e)) => Err(ClientError::from(e)),
            None => Err(ClientError::ServerResponseError),
        }
    }
}
