//! Configuration for the gateway server (§A.1).

use alloy_primitives::B256;
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// CLI arguments for the gateway server.
#[derive(Parser, Debug)]
#[command(name = "gateway")]
#[command(about = "Asynchronous deploy/execute/subscribe gateway")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// A single EVM private key, 0x-prefixed 32-byte hex.
#[derive(Debug, Clone, Copy)]
pub struct WalletConfig(pub B256);

impl FromStr for WalletConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s.trim())
            .map(WalletConfig)
            .map_err(|e| format!("invalid EVM private key: {e}"))
    }
}

/// Parses `EVM_PRIVATE_KEY` as a comma-separated list of private keys, the way the
/// teacher's signer configuration accepts one entry per configured wallet.
fn wallets_from_env() -> Result<Vec<WalletConfig>, String> {
    let raw = std::env::var("EVM_PRIVATE_KEY")
        .map_err(|_| "EVM_PRIVATE_KEY is not set".to_string())?;
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(WalletConfig::from_str)
        .collect()
}

/// Server configuration.
///
/// Fields use serde defaults that fall back to environment variables, then to
/// hardcoded defaults, mirroring the teacher's `config.rs` layering.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    #[serde(default)]
    rpc_url: Option<Url>,
    #[serde(default)]
    wallets: Option<Vec<WalletConfig>>,
    #[serde(default = "config_defaults::default_max_inactivity_secs")]
    max_inactivity_secs: u64,
    #[serde(default = "config_defaults::default_mailbox_max_size")]
    mailbox_max_size: usize,
    #[serde(default = "config_defaults::default_event_channel_capacity")]
    event_channel_capacity: usize,
    #[serde(default = "config_defaults::default_retry_max_attempts_default")]
    retry_max_attempts_default: u32,
    #[serde(default = "config_defaults::default_retry_max_attempts_nonce")]
    retry_max_attempts_nonce: u32,
}

impl<'de> serde::de::Deserialize<'de> for WalletConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        WalletConfig::from_str(&s).map_err(serde::de::Error::custom)
    }
}

mod config_defaults {
    use super::*;
    use std::env;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_MAX_INACTIVITY_SECS: u64 = 600;
    pub const DEFAULT_MAILBOX_MAX_SIZE: usize = 1024;
    pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;
    pub const DEFAULT_RETRY_MAX_ATTEMPTS_DEFAULT: u32 = 2;
    pub const DEFAULT_RETRY_MAX_ATTEMPTS_NONCE: u32 = 10;

    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(DEFAULT_HOST.parse().unwrap()))
    }

    pub fn default_max_inactivity_secs() -> u64 {
        DEFAULT_MAX_INACTIVITY_SECS
    }

    pub fn default_mailbox_max_size() -> usize {
        DEFAULT_MAILBOX_MAX_SIZE
    }

    pub fn default_event_channel_capacity() -> usize {
        DEFAULT_EVENT_CHANNEL_CAPACITY
    }

    pub fn default_retry_max_attempts_default() -> u32 {
        DEFAULT_RETRY_MAX_ATTEMPTS_DEFAULT
    }

    pub fn default_retry_max_attempts_nonce() -> u32 {
        DEFAULT_RETRY_MAX_ATTEMPTS_NONCE
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: config_defaults::default_port(),
            host: config_defaults::default_host(),
            rpc_url: None,
            wallets: None,
            max_inactivity_secs: config_defaults::default_max_inactivity_secs(),
            mailbox_max_size: config_defaults::default_mailbox_max_size(),
            event_channel_capacity: config_defaults::default_event_channel_capacity(),
            retry_max_attempts_default: config_defaults::default_retry_max_attempts_default(),
            retry_max_attempts_nonce: config_defaults::default_retry_max_attempts_nonce(),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("RPC_URL is not set and no rpc_url is configured: {0}")]
    MissingRpcUrl(url::ParseError),
    #[error("EVM_PRIVATE_KEY is not set and no wallets are configured: {0}")]
    MissingWallets(String),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn rpc_url(&self) -> &Url {
        self.rpc_url
            .as_ref()
            .expect("Config::resolve_env must run before rpc_url() is called")
    }

    pub fn wallets(&self) -> &[WalletConfig] {
        self.wallets
            .as_deref()
            .expect("Config::resolve_env must run before wallets() is called")
    }

    pub fn max_inactivity(&self) -> Duration {
        Duration::from_secs(self.max_inactivity_secs)
    }

    pub fn mailbox_max_size(&self) -> usize {
        self.mailbox_max_size
    }

    pub fn event_channel_capacity(&self) -> usize {
        self.event_channel_capacity
    }

    pub fn retry_max_attempts_default(&self) -> u32 {
        self.retry_max_attempts_default
    }

    pub fn retry_max_attempts_nonce(&self) -> u32 {
        self.retry_max_attempts_nonce
    }

    /// Load configuration from CLI arguments and JSON file.
    ///
    /// The config file path is determined by `--config <path>` (default `./config.json`).
    /// Values absent from the file are resolved via environment variables or hardcoded
    /// defaults during deserialization, the same two-layer precedence as the teacher's
    /// `Config::load`.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let mut config = if !cli_args.config.exists() {
            Config::default()
        } else {
            let config_path = Path::new(&cli_args.config)
                .canonicalize()
                .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
            Self::load_from_path(config_path)?
        };
        config.resolve_env()?;
        Ok(config)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Fills `rpc_url`/`wallets` from the environment when the config file left
    /// them unset, the way the teacher's chain config resolves `LiteralOrEnv` entries.
    fn resolve_env(&mut self) -> Result<(), ConfigError> {
        if self.rpc_url.is_none() {
            let url = std::env::var("RPC_URL")
                .unwrap_or_default()
                .parse()
                .map_err(ConfigError::MissingRpcUrl)?;
            self.rpc_url = Some(url);
        }
        if self.wallets.is_none() {
            let wallets = wallets_from_env().map_err(ConfigError::MissingWallets)?;
            self.wallets = Some(wallets);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_config_parses_0x_prefixed_hex() {
        let key = "0xcafe000000000000000000000000000000000000000000000000000000000001";
        let parsed = WalletConfig::from_str(key).unwrap();
        assert_eq!(parsed.0.as_slice()[31], 0x01);
    }

    #[test]
    fn wallet_config_rejects_malformed_hex() {
        assert!(WalletConfig::from_str("not-a-key").is_err());
    }
}
