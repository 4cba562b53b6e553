use protocol::errors::CoreError;
use std::env;
use std::fmt::Display;

#[derive(Debug)]
pub enum CommonError {
    Core(CoreError),
    VarError(env::VarError),
    ConfigError(toml::de::Error),
    IoError(std::io::Error),
    Base64DecodeError(base64::DecodeError),
    GenericError(anyhow::Error),
}

impl Display for CommonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommonError::Core(e) => write!(f, "protocol error: {}", e),
            CommonError::VarError(e) => write!(f, "environment variable error: {}", e),
            CommonError::ConfigError(e) => write!(f, "config error: {}", e),
            CommonError::IoError(e) => write!(f, "io error: {}", e),
            CommonError::Base64DecodeError(e) => write!(f, "base64 decode error: {}", e),
            CommonError::GenericError(e) => write!(f, "generic error: {}", e),
        }
    }
}

impl std::error::Error for CommonError {}

impl From<CoreError> for CommonError {
    fn from(value: CoreError) -> Self {
        CommonError::Core(value)
    }
}

impl From<env::VarError> for CommonError {
    fn from(value: env::VarError) -> Self {
        CommonError::VarError(value)
    }
}

impl From<toml::de::Error> for CommonError {
    fn from(value: toml::de::Error) -> Self {
        CommonError::ConfigError(value)
    }
}

impl From<std::io::Error> for CommonError {
    fn from(value: std::io::Error) -> Self {
        CommonError::IoError(value)
    }
}

impl From<base64::DecodeError> for CommonError {
    fn from(value: base64::DecodeError) -> Self {
        CommonError::Base64DecodeError(value)
    }
}

impl From<anyhow::Error> for CommonError {
    fn from(value: anyhow::Error) -> Self {
        CommonError::GenericError(value)
    }
}
