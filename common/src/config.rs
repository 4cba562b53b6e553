//! Process-wide configuration, loaded once from `config/config.toml` (or `/app/config/config.toml`
//! under Docker) and exposed as the `CONFIG` static. Mirrors the on-disk shape the `config`
//! binary writes the server's identity key pair into.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn is_running_in_docker() -> bool {
    Path::new("/.dockerenv").exists()
}

fn config_path() -> &'static str {
    if is_running_in_docker() {
        "/app/config/config.toml"
    } else {
        "config/config.toml"
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    server_ip: String,
    server_port: String,
    private_key_server: String,
    public_key_server: String,
    log_level: String,
    #[serde(default = "default_send_state_hmac_secret")]
    send_state_hmac_secret: String,
    #[serde(default = "default_otpk_replenish_threshold")]
    otpk_replenish_threshold: u32,
}

fn default_send_state_hmac_secret() -> String {
    "change-me-in-production".to_string()
}

fn default_otpk_replenish_threshold() -> u32 {
    10
}

impl Config {
    fn load() -> Config {
        let path = config_path();
        let content = fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("failed to read config file {}: {}", path, e));
        toml::from_str(&content).unwrap_or_else(|e| panic!("failed to parse {}: {}", path, e))
    }

    pub fn get_server_ip(&self) -> String {
        self.server_ip.clone()
    }

    pub fn get_server_port(&self) -> String {
        self.server_port.clone()
    }

    pub fn get_private_key_server(&self) -> String {
        self.private_key_server.clone()
    }

    pub fn get_public_key_server(&self) -> String {
        self.public_key_server.clone()
    }

    pub fn get_log_level(&self) -> String {
        self.log_level.clone()
    }

    pub fn get_send_state_hmac_secret(&self) -> String {
        self.send_state_hmac_secret.clone()
    }

    pub fn get_otpk_replenish_threshold(&self) -> u32 {
        self.otpk_replenish_threshold
    }
}

pub static CONFIG: Lazy<Config> = Lazy::new(Config::load);
