//! Configuration for the scheduler.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Candidate master addresses (`host:port`), tried in order.
    pub masters: Vec<String>,

    /// User tasks run as when registering the framework.
    pub framework_user: String,

    /// Framework name shown by the cluster manager.
    pub framework_name: String,

    /// Role offers are requested for.
    pub framework_role: String,

    /// How long the manager keeps our tasks alive while we are disconnected.
    pub failover_timeout_secs: f64,

    /// Skip recovery from the store on startup.
    pub no_recover: bool,

    /// Data directory for local state.
    pub data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error) used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Control loop tick, also the heartbeat watchdog granularity.
    pub heartbeat_interval_secs: u64,

    pub event_channel_capacity: usize,
    pub call_channel_capacity: usize,

    /// Refuse filter attached to ACCEPT and DECLINE.
    pub refuse_seconds: f64,

    /// Window over which slot failovers are counted.
    pub failover_window_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            masters: vec!["127.0.0.1:5050".to_string()],
            framework_user: "root".to_string(),
            framework_name: "berth".to_string(),
            framework_role: "*".to_string(),
            failover_timeout_secs: 604_800.0,
            no_recover: false,
            data_dir: PathBuf::from("/var/lib/berth"),
            log_level: "info".to_string(),
            heartbeat_interval_secs: 10,
            event_channel_capacity: 1024,
            call_channel_capacity: 1024,
            refuse_seconds: 1.0,
            failover_window_secs: 600,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let masters = match lookup("BERTH_MASTERS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.masters,
        };

        let framework_user = lookup("BERTH_FRAMEWORK_USER").unwrap_or(defaults.framework_user);
        let framework_name = lookup("BERTH_FRAMEWORK_NAME").unwrap_or(defaults.framework_name);
        let framework_role = lookup("BERTH_FRAMEWORK_ROLE").unwrap_or(defaults.framework_role);

        let failover_timeout_secs = parse_or(
            &lookup,
            "BERTH_FAILOVER_TIMEOUT_SECS",
            defaults.failover_timeout_secs,
        )?;

        let no_recover = lookup("BERTH_NO_RECOVER")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(defaults.no_recover);

        let data_dir = lookup("BERTH_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let log_level = lookup("BERTH_LOG_LEVEL").unwrap_or(defaults.log_level);

        let config = Self {
            masters,
            framework_user,
            framework_name,
            framework_role,
            failover_timeout_secs,
            no_recover,
            data_dir,
            log_level,
            heartbeat_interval_secs: parse_or(
                &lookup,
                "BERTH_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval_secs,
            )?,
            event_channel_capacity: parse_or(
                &lookup,
                "BERTH_EVENT_CHANNEL_CAPACITY",
                defaults.event_channel_capacity,
            )?,
            call_channel_capacity: parse_or(
                &lookup,
                "BERTH_CALL_CHANNEL_CAPACITY",
                defaults.call_channel_capacity,
            )?,
            refuse_seconds: parse_or(&lookup, "BERTH_REFUSE_SECONDS", defaults.refuse_seconds)?,
            failover_window_secs: parse_or(
                &lookup,
                "BERTH_FAILOVER_WINDOW_SECS",
                defaults.failover_window_secs,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.masters.is_empty() {
            bail!("BERTH_MASTERS must name at least one master");
        }
        if self.event_channel_capacity == 0 || self.call_channel_capacity == 0 {
            bail!("channel capacities must be greater than zero");
        }
        if !(self.refuse_seconds > 0.0) {
            bail!("BERTH_REFUSE_SECONDS must be positive");
        }
        if self.heartbeat_interval_secs == 0 {
            bail!("BERTH_HEARTBEAT_INTERVAL_SECS must be positive");
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn failover_window(&self) -> Duration {
        Duration::from_secs(self.failover_window_secs)
    }

    /// Location of the SQLite state file.
    pub fn state_db_path(&self) -> PathBuf {
        self.data_dir.join("berth.db")
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.masters, vec!["127.0.0.1:5050"]);
        assert_eq!(config.event_channel_capacity, 1024);
        assert_eq!(config.refuse_seconds, 1.0);
        assert!(!config.no_recover);
        assert_eq!(config.state_db_path(), PathBuf::from("/var/lib/berth/berth.db"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("BERTH_MASTERS", "m1:5050, m2:5050,"),
            ("BERTH_NO_RECOVER", "TRUE"),
            ("BERTH_EVENT_CHANNEL_CAPACITY", "8"),
            ("BERTH_REFUSE_SECONDS", "5.5"),
        ]))
        .unwrap();
        assert_eq!(config.masters, vec!["m1:5050", "m2:5050"]);
        assert!(config.no_recover);
        assert_eq!(config.event_channel_capacity, 8);
        assert_eq!(config.refuse_seconds, 5.5);
    }

    #[test]
    fn test_invalid_number_is_error() {
        let err = Config::from_lookup(lookup_from(&[("BERTH_CALL_CHANNEL_CAPACITY", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("BERTH_CALL_CHANNEL_CAPACITY"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(Config::from_lookup(lookup_from(&[("BERTH_MASTERS", " , ")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("BERTH_EVENT_CHANNEL_CAPACITY", "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("BERTH_REFUSE_SECONDS", "0")])).is_err());
    }
}
