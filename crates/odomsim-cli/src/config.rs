//! Reads and writes `~/.odomsim/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use odomsim_runtime::{ControllerConfig, NodeConfig};
use odomsim_types::OdomError;
use serde::{Deserialize, Serialize};

/// rosbridge-compatible WebSocket settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_enabled")]
    pub enabled: bool,

    #[serde(default = "default_bridge_port")]
    pub port: u16,

    /// Inbound messages accepted per client per second.
    #[serde(default = "default_inbound_rate")]
    pub inbound_rate: u32,

    /// How long a bridged service call may wait for the node.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_bridge_enabled() -> bool {
    true
}
fn default_bridge_port() -> u16 {
    9090
}
fn default_inbound_rate() -> u32 {
    200
}
fn default_call_timeout_ms() -> u64 {
    1000
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: default_bridge_enabled(),
            port: default_bridge_port(),
            inbound_rate: default_inbound_rate(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

/// Persisted configuration in `~/.odomsim/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub controller: ControllerConfig,
}

/// Path to `~/.odomsim/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".odomsim").join("config.toml")
}

/// Load the config file with environment overrides applied.
///
/// A missing file is created with defaults first.
pub fn load_or_init() -> Result<(Config, PathBuf, bool), OdomError> {
    let path = config_path();
    let (mut cfg, created) = match load_from(&path)? {
        Some(cfg) => (cfg, false),
        None => {
            let cfg = Config::default();
            save_to(&cfg, &path)?;
            (cfg, true)
        }
    };
    apply_env_overrides(&mut cfg);
    Ok((cfg, path, created))
}

/// Parse the file at `path` as-is.  `None` when it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, OdomError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| OdomError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| OdomError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `ODOMSIM_*` overrides.  Unparseable values are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `ODOMSIM_TICK_PERIOD_MS` | `node.tick_period_ms` |
/// | `ODOMSIM_PARENT_FRAME` | `node.parent_frame` |
/// | `ODOMSIM_CHILD_FRAME` | `node.child_frame` |
/// | `ODOMSIM_BRIDGE_PORT` | `bridge.port` |
/// | `ODOMSIM_CONTROLLER` | `controller.enabled` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ODOMSIM_TICK_PERIOD_MS")
        && let Ok(ms) = v.trim().parse::<u64>()
        && ms > 0
    {
        cfg.node.tick_period_ms = ms;
    }
    if let Ok(v) = std::env::var("ODOMSIM_PARENT_FRAME")
        && !v.is_empty()
    {
        cfg.node.parent_frame = v;
    }
    if let Ok(v) = std::env::var("ODOMSIM_CHILD_FRAME")
        && !v.is_empty()
    {
        cfg.node.child_frame = v;
    }
    if let Ok(v) = std::env::var("ODOMSIM_BRIDGE_PORT")
        && let Ok(port) = v.trim().parse::<u16>()
    {
        cfg.bridge.port = port;
    }
    if let Ok(v) = std::env::var("ODOMSIM_CONTROLLER")
        && let Some(on) = parse_switch(&v)
    {
        cfg.controller.enabled = on;
    }
}

fn parse_switch(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// Write `cfg` to `path`, creating the parent directory if needed.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), OdomError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| OdomError::Config(format!("failed to create config directory: {e}")))?;
        // Owner-only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                OdomError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| OdomError::Serialization(e.to_string()))?;
    let write_err = |e: std::io::Error| OdomError::Config(format!("failed to write {}: {e}", path.display()));
    // Owner-only read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}
