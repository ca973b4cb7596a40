//! Process-global configuration (spec §6.1). All knobs are read once at
//! startup from a TOML file, via a `from_file`/`validate` split that
//! keeps parsing and invariant-checking independently testable.

use crate::core::node::NodeId;
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

fn default_cmd_retry_naptime_millis() -> u64 {
    10_000
}

fn default_poll_interval_millis() -> u64 {
    10_000
}

fn default_sync_replicas() -> bool {
    false
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    shardlord: bool,
    #[serde(default)]
    shardlord_dbname: String,
    #[serde(default)]
    shardlord_connstring: String,
    /// Milliseconds (spec §6.1), not a humantime string: the catalog and
    /// the wire protocol both carry these as plain integers.
    #[serde(default = "default_cmd_retry_naptime_millis")]
    cmd_retry_naptime: u64,
    #[serde(default = "default_poll_interval_millis")]
    poll_interval: u64,
    my_id: u32,
    #[serde(default = "default_sync_replicas")]
    sync_replicas: bool,
}

/// The resolved, validated process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether this process plays the coordinator role.
    pub shardlord: bool,
    /// Database the coordinator's in-process client connects to.
    pub shardlord_dbname: String,
    /// Connection string workers use to reach the coordinator.
    pub shardlord_connstring: String,
    /// Delay on SQL-level transient errors.
    pub cmd_retry_naptime: Duration,
    /// Delay between readiness polls for replication progress.
    pub poll_interval: Duration,
    /// This worker's own node id.
    pub my_id: NodeId,
    /// Whether replicas must be added to the synchronous-standby list.
    pub sync_replicas: bool,
}

impl Config {
    /// Reads and parses a TOML config file, then validates it.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at '{path}'"))?;
        Self::from_str(&contents)
    }

    fn from_str(contents: &str) -> Result<Self> {
        let raw: RawConfig =
            toml::from_str(contents).with_context(|| "failed to parse configuration TOML")?;

        let config = Config {
            shardlord: raw.shardlord,
            shardlord_dbname: raw.shardlord_dbname,
            shardlord_connstring: raw.shardlord_connstring,
            cmd_retry_naptime: Duration::from_millis(raw.cmd_retry_naptime),
            poll_interval: Duration::from_millis(raw.poll_interval),
            my_id: NodeId(raw.my_id),
            sync_replicas: raw.sync_replicas,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.my_id.is_valid() {
            return Err(anyhow!("my_id must be nonzero (0 is the INVALID sentinel)"));
        }
        if self.shardlord && self.shardlord_connstring.trim().is_empty() {
            return Err(anyhow!(
                "shardlord_connstring is required when shardlord = true"
            ));
        }
        if self.shardlord && self.shardlord_dbname.trim().is_empty() {
            return Err(anyhow!(
                "shardlord_dbname is required when shardlord = true"
            ));
        }
        if self.cmd_retry_naptime.is_zero() {
            return Err(anyhow!("cmd_retry_naptime cannot be 0"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll_interval cannot be 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::from_str(
            r#"
            shardlord = true
            shardlord_dbname = "shardlord"
            shardlord_connstring = "host=coordinator dbname=shardlord"
            my_id = 1
            "#,
        )
        .unwrap();
        assert_eq!(cfg.cmd_retry_naptime, Duration::from_millis(10_000));
        assert_eq!(cfg.poll_interval, Duration::from_millis(10_000));
        assert!(!cfg.sync_replicas);
    }

    #[test]
    fn rejects_invalid_node_id() {
        let err = Config::from_str("my_id = 0\n").unwrap_err();
        assert!(err.to_string().contains("my_id"));
    }

    #[test]
    fn rejects_shardlord_without_connstring() {
        let err = Config::from_str("shardlord = true\nmy_id = 1\n").unwrap_err();
        assert!(err.to_string().contains("shardlord_connstring"));
    }

    #[test]
    fn worker_only_config_does_not_need_connstring() {
        let cfg = Config::from_str("my_id = 2\n").unwrap();
        assert!(!cfg.shardlord);
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shardlord.toml");
        fs::write(
            &path,
            "shardlord = true\nshardlord_dbname = \"sl\"\nshardlord_connstring = \"host=x\"\nmy_id = 7\nsync_replicas = true\n",
        )
        .unwrap();
        let cfg = Config::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.my_id, NodeId(7));
        assert!(cfg.sync_replicas);
    }

    #[test]
    fn reads_millisecond_integers() {
        let cfg = Config::from_str(
            "my_id = 3\ncmd_retry_naptime = 30000\npoll_interval = 500\n",
        )
        .unwrap();
        assert_eq!(cfg.cmd_retry_naptime, Duration::from_secs(30));
        assert_eq!(cfg.poll_interval, Duration::from_millis(500));
    }
}
