use protocol::errors::{CounterError, VaultError, X3DHError};
use std::env;
use std::fmt::Display;

#[derive(Debug)]
pub(crate) enum ServerError {
    X3DHError(X3DHError),
    CounterError(CounterError),
    VaultError(VaultError),
    VarError(env::VarError),
    DeviceNotFound,
    InvalidPreKeyBundle,
    InvalidRequest,
    Base64DecodeError(base64::DecodeError),
    GenericError(anyhow::Error),
}

impl Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::X3DHError(e) => write!(f, "x3dh error: {}", e),
            ServerError::CounterError(e) => write!(f, "counter error: {}", e),
            ServerError::VaultError(e) => write!(f, "vault error: {}", e),
            ServerError::VarError(e) => write!(f, "environment variable error: {}", e),
            ServerError::DeviceNotFound => write!(f, "device not found"),
            ServerError::InvalidPreKeyBundle => write!(f, "invalid prekey bundle"),
            ServerError::InvalidRequest => write!(f, "invalid request"),
            ServerError::Base64DecodeError(e) => write!(f, "base64 decode error: {}", e),
            ServerError::GenericError(e) => write!(f, "generic error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<anyhow::Error> for ServerError {
    fn from(value: anyhow::Error) -> Self {
        ServerError::GenericError(value)
    }
}

impl From<X3DHError> for ServerError {
    fn from(value: X3DHError) -> Self {
        ServerError::X3DHError(value)
    }
}

impl From<CounterError> for ServerError {
    fn from(value: CounterError) -> Self {
        ServerError::CounterError(value)
    }
}

impl From<VaultError> for ServerError {
    fn from(value: VaultError) -> Self {
        ServerError::VaultError(value)
    }
}

impl From<env::VarError> for ServerError {
    fn from(value: env::VarError) -> Self {
        ServerError::VarError(value)
    }
}

impl From<base64::DecodeError> for ServerError {
    fn from(value: base64::DecodeError) -> Self {
        ServerError::Base64DecodeError(value)
    }
}
