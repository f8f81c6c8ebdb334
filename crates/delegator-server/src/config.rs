//! Server-level configuration, read from the environment with compiled-in
//! defaults (matching the `from_env`/`Default` pattern used throughout
//! `delegator-core::config`).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// HTTP bind address, CORS policy, log/backup directory layout, and the
/// default model assigned to tasks that don't specify one.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Never defaults to a wildcard; empty means same-origin only (see
    /// DESIGN.md's CORS decision).
    pub allowed_origins: Vec<String>,
    pub log_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub circuit_breaker_dir: PathBuf,
    pub heartbeat_interval: Duration,
}

impl ServerConfig {
    pub const DEFAULT_BIND_ADDRESS: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

    pub fn from_env() -> Self {
        let base_dir = env::var("DELEGATOR_BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_base_dir());

        let allowed_origins = env::var("DELEGATOR_ALLOWED_ORIGINS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let port = env::var("DELEGATOR_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Self::DEFAULT_PORT);

        let heartbeat_secs = env::var("DELEGATOR_HEARTBEAT_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Self::DEFAULT_HEARTBEAT_SECS);

        Self {
            bind_address: env::var("DELEGATOR_BIND_ADDRESS")
                .unwrap_or_else(|_| Self::DEFAULT_BIND_ADDRESS.to_owned()),
            port,
            allowed_origins,
            log_dir: base_dir.join("logs"),
            backup_dir: base_dir.join("backups"),
            circuit_breaker_dir: base_dir.join("circuit-breakers"),
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn default_base_dir() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg).join("delegator");
    }
    dirs_home().unwrap_or_else(|| PathBuf::from(".")).join(".local/share/delegator")
}

fn dirs_home() -> Option<PathBuf> {
    env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_same_origin_only() {
        let config = ServerConfig {
            bind_address: ServerConfig::DEFAULT_BIND_ADDRESS.to_owned(),
            port: ServerConfig::DEFAULT_PORT,
            allowed_origins: vec![],
            log_dir: PathBuf::from("/tmp/logs"),
            backup_dir: PathBuf::from("/tmp/backups"),
            circuit_breaker_dir: PathBuf::from("/tmp/breakers"),
            heartbeat_interval: Duration::from_secs(30),
        };
        assert!(config.allowed_origins.is_empty());
    }

    #[test]
    fn parses_comma_separated_origins() {
        unsafe { env::set_var("DELEGATOR_ALLOWED_ORIGINS", "https://a.test, https://b.test") };
        let config = ServerConfig::from_env();
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.test".to_string(), "https://b.test".to_string()]
        );
        unsafe { env::remove_var("DELEGATOR_ALLOWED_ORIGINS") };
    }
}
