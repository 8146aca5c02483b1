use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::error;

pub const DEFAULT_PORT: u16 = 4410;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── CacheConfig ──────────────────────────────────────────────────────────────

/// Query-result cache configuration (`[cache]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Listing/search entry lifetime in seconds. Default: 300 (5 minutes).
    pub ttl_secs: u64,
    /// How often the purge job evicts expired entries. Default: 60.
    pub purge_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 300, purge_interval_secs: 60 }
    }
}

// ─── SchedulerConfig ──────────────────────────────────────────────────────────

/// Sweep configuration (`[scheduler]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between sweeps. Default: 300.
    pub sweep_interval_secs: u64,
    /// Reminder window: tasks due within this many hours are notified.
    /// Default: 24.
    pub reminder_window_hours: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { sweep_interval_secs: 300, reminder_window_hours: 24 }
    }
}

// ─── ObservabilityConfig ──────────────────────────────────────────────────────

/// Observability configuration (`[observability]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log SQLite queries that exceed this threshold (milliseconds).
    /// Default: 100. Set to 0 to disable slow-query logging.
    pub slow_query_threshold_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { slow_query_threshold_ms: 100 }
    }
}

// ─── SmtpConfig ───────────────────────────────────────────────────────────────

/// SMTP relay for reminder delivery (`[smtp]` in config.toml). Absent
/// section = reminders are logged instead of mailed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// From address, e.g. `"taskd <reminders@example.com>"`.
    pub from: String,
}

fn default_smtp_port() -> u16 {
    587
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// HTTP server port (default: 4410).
    port: Option<u16>,
    /// Bind address (default: "127.0.0.1"; use "0.0.0.0" for LAN access).
    bind_address: Option<String>,
    /// Log level filter string, e.g. "debug", "info,taskd=trace".
    log: Option<String>,
    /// Log output format: "pretty" (default) | "json".
    log_format: Option<String>,
    cache: Option<CacheConfig>,
    scheduler: Option<SchedulerConfig>,
    observability: Option<ObservabilityConfig>,
    smtp: Option<SmtpConfig>,
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

// ─── ServerConfig ─────────────────────────────────────────────────────────────

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_address: String,
    pub data_dir: PathBuf,
    pub log: String,
    pub log_format: String,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub observability: ObservabilityConfig,
    pub smtp: Option<SmtpConfig>,
}

impl ServerConfig {
    pub fn new(port: Option<u16>, data_dir: Option<PathBuf>, log: Option<String>) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let file = load_toml(&data_dir).unwrap_or_default();
        Self {
            port: port.or(file.port).unwrap_or(DEFAULT_PORT),
            bind_address: file.bind_address.unwrap_or_else(default_bind_address),
            log: log.or(file.log).unwrap_or_else(|| "info".to_string()),
            log_format: file.log_format.unwrap_or_else(|| "pretty".to_string()),
            cache: file.cache.unwrap_or_default(),
            scheduler: file.scheduler.unwrap_or_default(),
            observability: file.observability.unwrap_or_default(),
            smtp: file.smtp,
            data_dir,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn reminder_window_secs(&self) -> i64 {
        self.scheduler.reminder_window_hours as i64 * 3600
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".taskd"))
        .unwrap_or_else(|| PathBuf::from(".taskd"))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = ServerConfig::new(None, Some(dir.path().to_path_buf()), None);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.bind_address, "127.0.0.1");
        assert_eq!(cfg.cache.ttl_secs, 300);
        assert_eq!(cfg.scheduler.reminder_window_hours, 24);
        assert_eq!(cfg.reminder_window_secs(), 86_400);
        assert!(cfg.smtp.is_none());
    }

    #[test]
    fn cli_overrides_beat_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "port = 5000\nlog = \"debug\"\n\n[cache]\nttl_secs = 60\n",
        )
        .unwrap();

        let cfg = ServerConfig::new(Some(6000), Some(dir.path().to_path_buf()), None);
        assert_eq!(cfg.port, 6000); // CLI wins
        assert_eq!(cfg.log, "debug"); // TOML fills the gap
        assert_eq!(cfg.cache.ttl_secs, 60);
    }

    #[test]
    fn smtp_section_parses_with_default_port() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[smtp]\nhost = \"smtp.example.com\"\nfrom = \"taskd <noreply@example.com>\"\n",
        )
        .unwrap();

        let cfg = ServerConfig::new(None, Some(dir.path().to_path_buf()), None);
        let smtp = cfg.smtp.expect("smtp section");
        assert_eq!(smtp.host, "smtp.example.com");
        assert_eq!(smtp.port, 587);
        assert!(smtp.username.is_none());
    }

    #[test]
    fn malformed_toml_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "port = \"not a number\"").unwrap();
        let cfg = ServerConfig::new(None, Some(dir.path().to_path_buf()), None);
        assert_eq!(cfg.port, DEFAULT_PORT);
    }
}
