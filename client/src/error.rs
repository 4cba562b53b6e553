use protocol::errors::CoreError;
use std::fmt::{Display, Formatter};
use tokio_tungstenite::tungstenite::Error as WsError;

#[derive(Debug)]
pub enum ClientError {
    ConnectionError(WsError),
    ProtocolError(CoreError),
    ServerResponseError,
    UserAlreadyExistsError,
    UserNotFoundError,
    SerializationError,
    SendError,
    CounterTooLowRetryExhausted,
    SendStateVerificationFailed,
    DeviceIdMismatch,
}

impl Display for ClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::ConnectionError(e) => write!(f, "connection error: {}", e),
            ClientError::ProtocolError(e) => write!(f, "protocol error: {}", e),
            ClientError::ServerResponseError => write!(f, "server response error"),
            ClientError::UserAlreadyExistsError => write!(f, "user already exists"),
            ClientError::UserNotFoundError => write!(f, "user not found"),
            ClientError::SerializationError => write!(f, "serialization error"),
            ClientError::SendError => write!(f, "failed to send message"),
            ClientError::CounterTooLowRetryExhausted => {
                write!(f, "send rejected twice with CounterTooLow, giving up")
            }
            ClientError::SendStateVerificationFailed => {
                write!(f, "send-state response failed HMAC verification")
            }
            ClientError::DeviceIdMismatch => {
                write!(f, "header device_id does not match the message's sender_device_id")
            }
        }
    }
}

impl std::error::Error for ClientError {}

impl From<WsError> for ClientError {
    fn from(value: WsError) -> Self {
        ClientError::ConnectionError(value)
    }
}

impl From<CoreError> for ClientError {
    fn from(value: CoreError) -> Self {
        ClientError::ProtocolError(value)
    }
}

impl From<protocol::errors::X3DHError> for ClientError {
    fn from(value: protocol::errors::X3DHError) -> Self {
        ClientError::ProtocolError(CoreError::X3DH(value))
    }
}

impl From<protocol::errors::RatchetError> for ClientError {
    fn from(value: protocol::errors::RatchetError) -> Self {
        ClientError::ProtocolError(CoreError::Ratchet(value))
    }
}

impl From<protocol::errors::SnapshotError> for ClientError {
    fn from(value: protocol::errors::SnapshotError) -> Self {
        ClientError::ProtocolError(CoreError::Snapshot(value))
    }
}

impl From<protocol::errors::VaultError> for ClientError {
    fn from(value: protocol::errors::VaultError) -> Self {
        ClientError::ProtocolError(CoreError::Vault(value))
    }
}
