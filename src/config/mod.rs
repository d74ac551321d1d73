use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 4800;
const DEFAULT_RESOURCE_API_URL: &str = "https://resourcemanager.nimbus.dev/v1";
const DEFAULT_PLATFORM_API_URL: &str = "https://platform.nimbus.dev/v1beta1";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── ObservabilityConfig ─────────────────────────────────────────────────────

/// Daemon observability configuration (`[observability]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log SQLite queries that exceed this threshold (milliseconds). Default: 100.
    /// Set to 0 to disable slow query logging.
    pub slow_query_threshold_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 100,
        }
    }
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// REST gateway port (default: 4800).
    port: Option<u16>,
    /// Log level filter string, e.g. "debug", "info,nimbusd=trace" (default: "info").
    log: Option<String>,
    /// Log output format: "pretty" (default, human-readable) | "json" (structured for log aggregators).
    log_format: Option<String>,
    /// Bind address for the REST gateway (default: "127.0.0.1"; use "0.0.0.0" for LAN access).
    bind_address: Option<String>,
    /// Override the resource-manager API base URL (default: https://resourcemanager.nimbus.dev/v1).
    resource_api_url: Option<String>,
    /// Override the platform API base URL (default: https://platform.nimbus.dev/v1beta1).
    platform_api_url: Option<String>,
    /// Per-call timeout for control-plane HTTP requests, in seconds (default: 30).
    http_timeout_secs: Option<u64>,
    /// Bearer token for the REST API. None = REST auth disabled.
    api_token: Option<String>,
    /// Observability configuration (`[observability]`).
    observability: Option<ObservabilityConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── HostConfig ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub log: String,
    /// Log output format: "pretty" (default) | "json" (structured for Loki/Elasticsearch).
    pub log_format: String,
    /// Bind address for the REST gateway (NIMBUSD_BIND env var, default: "127.0.0.1").
    pub bind_address: String,
    /// Resource-manager API base URL (NIMBUSD_RESOURCE_API_URL env var).
    /// Project creation and lifecycle polling go here.
    pub resource_api_url: String,
    /// Platform API base URL (NIMBUSD_PLATFORM_API_URL env var).
    /// Enablement, client registration, and config fetch go here.
    pub platform_api_url: String,
    /// Per-call timeout for control-plane HTTP requests, in seconds.
    pub http_timeout_secs: u64,
    /// Bearer token required to call the REST API.
    /// Set via `NIMBUSD_API_TOKEN` env var or `api_token` in config.toml.
    /// None = REST authentication disabled (local-only, trusted loopback use).
    pub api_token: Option<String>,
    /// Observability: slow query threshold, future metrics settings.
    pub observability: ObservabilityConfig,
}

impl HostConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let bind_address = bind_address
            .or(std::env::var("NIMBUSD_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let resource_api_url = std::env::var("NIMBUSD_RESOURCE_API_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.resource_api_url)
            .unwrap_or_else(|| DEFAULT_RESOURCE_API_URL.to_string());

        let platform_api_url = std::env::var("NIMBUSD_PLATFORM_API_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.platform_api_url)
            .unwrap_or_else(|| DEFAULT_PLATFORM_API_URL.to_string());

        let http_timeout_secs = toml.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);

        let log_format = std::env::var("NIMBUSD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let api_token = std::env::var("NIMBUSD_API_TOKEN")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.api_token);

        let observability = toml.observability.unwrap_or_default();

        Self {
            port,
            data_dir,
            log,
            log_format,
            bind_address,
            resource_api_url,
            platform_api_url,
            http_timeout_secs,
            api_token,
            observability,
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/nimbusd
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("nimbusd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/nimbusd or ~/.local/share/nimbusd
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("nimbusd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("nimbusd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\nimbusd
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("nimbusd");
        }
    }
    // Fallback
    PathBuf::from(".nimbusd")
}
