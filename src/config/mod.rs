use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const DEFAULT_PORT: u16 = 4350;
const DEFAULT_SDK_DISCOVERY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_API_HOST: &str = "https://api.growthbook.io";

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── BridgeConfig ─────────────────────────────────────────────────────────────

/// Page-bridge tuning (`[bridge]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bounded wait for the page SDK global, in milliseconds (default: 5000).
    /// After it elapses the bridge reports "SDK not found" instead of
    /// waiting indefinitely.
    pub discovery_timeout_ms: u64,
    /// Features-endpoint host used when the SDK instance does not expose
    /// one of its own.
    pub api_host_fallback: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_ms: DEFAULT_SDK_DISCOVERY_TIMEOUT_MS,
            api_host_fallback: crate::bridge::health::DEFAULT_API_HOST.to_string(),
        }
    }
}

// ─── ApiConfig ────────────────────────────────────────────────────────────────

/// Management-API pass-through (`[api]` in config.toml).
///
/// These are bootstrap defaults only; the authoritative values live in
/// persisted global state (`apiHost`/`apiKey`) once a UI surface sets them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    /// Bearer token. Empty disables management-API calls.
    pub token: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_API_HOST.to_string(),
            token: String::new(),
        }
    }
}

// ─── DaemonConfig ─────────────────────────────────────────────────────────────

/// Daemon configuration: `config.toml` in the data directory, overridden by
/// CLI flags / environment variables.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    pub data_dir: PathBuf,
    /// trace | debug | info | warn | error
    pub log_level: String,
    pub bridge: BridgeConfig,
    pub api: ApiConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: default_bind_address(),
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            bridge: BridgeConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load `{data_dir}/config.toml` (if any) and apply overrides on top.
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log_level: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let mut config = Self::from_file(&data_dir.join("config.toml")).unwrap_or_default();
        config.data_dir = data_dir;
        if let Some(p) = port {
            config.port = p;
        }
        if let Some(l) = log_level {
            config.log_level = l;
        }
        if let Some(b) = bind_address {
            config.bind_address = b;
        }
        config
    }

    fn from_file(path: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        match toml::from_str(&raw) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(path = %path.display(), err = %e, "ignoring unparseable config.toml");
                None
            }
        }
    }

    pub fn sdk_discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge.discovery_timeout_ms)
    }
}

pub fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".flagscope")
}
