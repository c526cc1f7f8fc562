//! Coprocessor configuration with TOML file and environment support.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use veil_types::Address;

use crate::logging::LogFormat;
use crate::CoprocError;

/// Environment variable names read by [`CoprocConfig::apply_env`].
pub mod env {
    pub const EXECUTOR_URL: &str = "FHEVM_EXECUTOR_URL";
    pub const CONTRACT_ADDRESS: &str = "FHEVM_CONTRACT_ADDRESS";
    pub const ACL_CONTRACT_ADDRESS: &str = "ACL_CONTRACT_ADDRESS";
    pub const STORAGE_ADDRESS: &str = "FHEVM_STORAGE_ADDRESS";
    pub const COMMIT_BLOCK_OFFSET: &str = "FHEVM_COMMIT_BLOCK_OFFSET";
    pub const RPC_TIMEOUT_MS: &str = "FHEVM_RPC_TIMEOUT_MS";
}

/// Configuration for the FHE coprocessor.
///
/// Can be loaded from a TOML file via [`CoprocConfig::from_toml_file`], from
/// the process environment via [`CoprocConfig::from_env`], or built
/// programmatically (e.g. for tests). Call [`CoprocConfig::validate`] before
/// use; [`crate::Coprocessor::new`] does.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoprocConfig {
    /// Address of the remote compute service.
    #[serde(default)]
    pub executor_url: String,

    /// This node's FHE library contract.
    #[serde(default)]
    pub contract_address: Option<Address>,

    /// Access-control-list contract.
    #[serde(default)]
    pub acl_contract_address: Option<Address>,

    /// Contract whose storage holds the late-commit queue and persisted
    /// ciphertexts.
    #[serde(default = "default_storage_address")]
    pub storage_address: Address,

    /// Blocks between a transaction and the materialization of its results.
    /// 0 executes synchronously at commit time.
    #[serde(default)]
    pub commit_block_offset: u8,

    /// Deadline for one compute service round trip.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Quiet period after a wake-up before the background flush runs.
    #[serde(default = "default_flush_debounce_ms")]
    pub flush_debounce_ms: u64,

    /// Period of the timer that re-checks for pending work.
    #[serde(default = "default_nudge_interval_ms")]
    pub nudge_interval_ms: u64,

    /// Materialized results are kept for this many blocks behind the
    /// highest flushed block.
    #[serde(default = "default_gc_window_blocks")]
    pub gc_window_blocks: u64,

    /// Minimum wall time between two cache sweeps.
    #[serde(default = "default_gc_min_interval_secs")]
    pub gc_min_interval_secs: u64,

    /// Blocks scanned for persisted queue entries on startup.
    #[serde(default = "default_preload_horizon")]
    pub preload_horizon: u64,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_storage_address() -> Address {
    Address::from_low_u64(0x70)
}

fn default_rpc_timeout_ms() -> u64 {
    30_000
}

fn default_flush_debounce_ms() -> u64 {
    500
}

fn default_nudge_interval_ms() -> u64 {
    5_000
}

fn default_gc_window_blocks() -> u64 {
    100
}

fn default_gc_min_interval_secs() -> u64 {
    10
}

fn default_preload_horizon() -> u64 {
    30
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl CoprocConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, CoprocError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| CoprocError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, CoprocError> {
        toml::from_str(s).map_err(|e| CoprocError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, CoprocError> {
        toml::to_string_pretty(self).map_err(|e| CoprocError::Config(e.to_string()))
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, CoprocError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from the process environment.
    pub fn apply_env(&mut self) -> Result<(), CoprocError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Override fields from `lookup`, which maps variable names to values.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), CoprocError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(env::EXECUTOR_URL) {
            self.executor_url = url;
        }
        if let Some(value) = lookup(env::CONTRACT_ADDRESS) {
            self.contract_address = Some(parse_address(env::CONTRACT_ADDRESS, &value)?);
        }
        if let Some(value) = lookup(env::ACL_CONTRACT_ADDRESS) {
            self.acl_contract_address = Some(parse_address(env::ACL_CONTRACT_ADDRESS, &value)?);
        }
        if let Some(value) = lookup(env::STORAGE_ADDRESS) {
            self.storage_address = parse_address(env::STORAGE_ADDRESS, &value)?;
        }
        if let Some(value) = lookup(env::COMMIT_BLOCK_OFFSET) {
            self.commit_block_offset = value.trim().parse().map_err(|e| {
                CoprocError::Config(format!("invalid {}: {value}: {e}", env::COMMIT_BLOCK_OFFSET))
            })?;
        }
        if let Some(value) = lookup(env::RPC_TIMEOUT_MS) {
            self.rpc_timeout_ms = value.trim().parse().map_err(|e| {
                CoprocError::Config(format!("invalid {}: {value}: {e}", env::RPC_TIMEOUT_MS))
            })?;
        }
        Ok(())
    }

    /// Reject configurations the coprocessor cannot run with.
    pub fn validate(&self) -> Result<(), CoprocError> {
        if self.executor_url.trim().is_empty() {
            return Err(CoprocError::Config(format!(
                "{} is not configured",
                env::EXECUTOR_URL
            )));
        }
        if self.contract_address.is_none() {
            return Err(CoprocError::Config(format!(
                "{} is not configured",
                env::CONTRACT_ADDRESS
            )));
        }
        if self.acl_contract_address.is_none() {
            return Err(CoprocError::Config(format!(
                "bad or missing {}",
                env::ACL_CONTRACT_ADDRESS
            )));
        }
        if self.rpc_timeout_ms == 0 {
            return Err(CoprocError::Config("rpc_timeout_ms must be positive".into()));
        }
        if self.nudge_interval_ms == 0 {
            return Err(CoprocError::Config("nudge_interval_ms must be positive".into()));
        }
        self.log_format()?;
        Ok(())
    }

    pub fn is_deferred(&self) -> bool {
        self.commit_block_offset > 0
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn flush_debounce(&self) -> Duration {
        Duration::from_millis(self.flush_debounce_ms)
    }

    pub fn nudge_interval(&self) -> Duration {
        Duration::from_millis(self.nudge_interval_ms)
    }

    pub fn gc_min_interval(&self) -> Duration {
        Duration::from_secs(self.gc_min_interval_secs)
    }

    pub fn log_format(&self) -> Result<LogFormat, CoprocError> {
        self.log_format.parse()
    }
}

fn parse_address(name: &str, value: &str) -> Result<Address, CoprocError> {
    value
        .trim()
        .parse()
        .map_err(|e| CoprocError::Config(format!("invalid {name}: {e}")))
}

impl Default for CoprocConfig {
    fn default() -> Self {
        Self {
            executor_url: String::new(),
            contract_address: None,
            acl_contract_address: None,
            storage_address: default_storage_address(),
            commit_block_offset: 0,
            rpc_timeout_ms: default_rpc_timeout_ms(),
            flush_debounce_ms: default_flush_debounce_ms(),
            nudge_interval_ms: default_nudge_interval_ms(),
            gc_window_blocks: default_gc_window_blocks(),
            gc_min_interval_secs: default_gc_min_interval_secs(),
            preload_horizon: default_preload_horizon(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn valid() -> CoprocConfig {
        CoprocConfig {
            executor_url: "localhost:50051".into(),
            contract_address: Some(Address::from_low_u64(0x5d)),
            acl_contract_address: Some(Address::from_low_u64(0x5e)),
            ..Default::default()
        }
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = valid();
        let toml_str = config.to_toml_string().expect("serializable");
        let parsed = CoprocConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed.contract_address, config.contract_address);
        assert_eq!(parsed.storage_address, Address::from_low_u64(0x70));
        assert_eq!(parsed.rpc_timeout_ms, 30_000);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = CoprocConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.commit_block_offset, 0);
        assert_eq!(config.gc_window_blocks, 100);
        assert_eq!(config.gc_min_interval(), Duration::from_secs(10));
        assert_eq!(config.preload_horizon, 30);
        assert_eq!(config.flush_debounce(), Duration::from_millis(500));
        assert_eq!(config.log_format, "human");
        assert!(!config.is_deferred());
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            executor_url = "http://exec:8080"
            contract_address = "0x000000000000000000000000000000000000005d"
            commit_block_offset = 5
        "#;
        let config = CoprocConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.executor_url, "http://exec:8080");
        assert_eq!(config.contract_address, Some(Address::from_low_u64(0x5d)));
        assert!(config.is_deferred());
        assert_eq!(config.log_level, "info"); // default
    }

    #[test]
    fn toml_file_is_read() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "commit_block_offset = 3").expect("write");
        let path = file.path().to_str().expect("utf-8 path");
        let config = CoprocConfig::from_toml_file(path).expect("should load");
        assert_eq!(config.commit_block_offset, 3);
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = CoprocConfig::from_toml_file("/nonexistent/veil.toml");
        assert!(matches!(result, Err(CoprocError::Config(_))));
    }

    #[test]
    fn environment_overrides() {
        let vars: HashMap<&str, &str> = [
            (env::EXECUTOR_URL, "exec:9000"),
            (env::CONTRACT_ADDRESS, "0x00000000000000000000000000000000000000aa"),
            (env::ACL_CONTRACT_ADDRESS, "00000000000000000000000000000000000000bb"),
            (env::COMMIT_BLOCK_OFFSET, "4"),
        ]
        .into_iter()
        .collect();

        let mut config = CoprocConfig::default();
        config
            .apply_env_from(|name| vars.get(name).map(|v| v.to_string()))
            .expect("valid environment");
        assert_eq!(config.executor_url, "exec:9000");
        assert_eq!(config.acl_contract_address, Some(Address::from_low_u64(0xbb)));
        assert_eq!(config.commit_block_offset, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_environment_values_are_rejected() {
        let mut config = CoprocConfig::default();
        let err = config
            .apply_env_from(|name| (name == env::COMMIT_BLOCK_OFFSET).then(|| "300".to_string()))
            .unwrap_err();
        assert!(matches!(err, CoprocError::Config(_)));

        let err = config
            .apply_env_from(|name| (name == env::ACL_CONTRACT_ADDRESS).then(|| "0x12".to_string()))
            .unwrap_err();
        assert!(matches!(err, CoprocError::Config(_)));
    }

    #[test]
    fn validate_requires_endpoints_and_addresses() {
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.executor_url.clear();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.acl_contract_address = None;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.log_format = "xml".into();
        assert!(config.validate().is_err());
    }
}
