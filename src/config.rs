use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Flags that take a single value; a later occurrence replaces an earlier one.
const SINGLE_VALUED: &[&str] = &["--idle", "--prefetch-playlist", "--load-scripts", "--video"];

const IPC_FLAG: &str = "--input-ipc-server";

/// Engine settings, loaded from a JSON file and overridable from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Explicit player binary; `mpv` from PATH when unset
    pub binary_path: Option<PathBuf>,
    pub extra_parameters: Vec<String>,
    /// Properties applied once the control channel is live
    /// (audio-exclusive, gapless-audio, replaygain*, audio-samplerate, audio-format, ...)
    pub properties: BTreeMap<String, Value>,
    pub fade_on_status_change: bool,
    pub fade_duration_ms: u64,
    pub fade_interval_ms: u64,
    pub time_update_interval_ms: u64,
    pub start_attempts: u32,
    pub start_poll_interval_ms: u64,
    pub exit_poll_attempts: u32,
    pub exit_poll_interval_ms: u64,
    pub start_retries: u32,
    pub command_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            extra_parameters: Vec::new(),
            properties: BTreeMap::new(),
            fade_on_status_change: true,
            fade_duration_ms: 300,
            fade_interval_ms: 10,
            time_update_interval_ms: 1000,
            start_attempts: 20,
            start_poll_interval_ms: 100,
            exit_poll_attempts: 20,
            exit_poll_interval_ms: 100,
            start_retries: 2,
            command_timeout_ms: 5000,
        }
    }
}

impl EngineConfig {
    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        Ok(config)
    }

    /// Apply `MPV_PATH` and `MPV_EXTRA_PARAMS` if set
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("MPV_PATH") {
            if !path.trim().is_empty() {
                log::info!("Using player binary from MPV_PATH: {}", path);
                self.binary_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(params) = std::env::var("MPV_EXTRA_PARAMS") {
            self.extra_parameters
                .extend(params.split_whitespace().map(str::to_string));
        }
        self
    }

    pub fn binary(&self) -> PathBuf {
        self.binary_path.clone().unwrap_or_else(|| {
            if cfg!(windows) {
                PathBuf::from("mpv.exe")
            } else {
                PathBuf::from("mpv")
            }
        })
    }

    pub fn fade_duration(&self) -> Duration {
        Duration::from_millis(self.fade_duration_ms)
    }

    pub fn fade_interval(&self) -> Duration {
        Duration::from_millis(self.fade_interval_ms.max(1))
    }

    pub fn time_update_interval(&self) -> Duration {
        Duration::from_millis(self.time_update_interval_ms.max(1))
    }

    pub fn start_poll_interval(&self) -> Duration {
        Duration::from_millis(self.start_poll_interval_ms)
    }

    pub fn exit_poll_interval(&self) -> Duration {
        Duration::from_millis(self.exit_poll_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Control channel location, unique per host process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAddress(PathBuf);

impl ChannelAddress {
    pub fn for_process(pid: u32) -> Self {
        Self::named(&format!("mpv-engine-{}", pid))
    }

    /// Address for a short-lived probe instance running next to the main one
    pub fn probe_for_process(pid: u32) -> Self {
        Self::named(&format!("mpv-engine-{}-probe", pid))
    }

    #[cfg(unix)]
    fn named(name: &str) -> Self {
        Self(std::env::temp_dir().join(format!("{}.sock", name)))
    }

    #[cfg(windows)]
    fn named(name: &str) -> Self {
        Self(PathBuf::from(format!(r"\\.\pipe\{}", name)))
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Whether the channel is backed by a file that must be cleaned up
    pub fn is_filesystem_backed(&self) -> bool {
        cfg!(unix)
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Everything needed to spawn one player instance
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub address: ChannelAddress,
    pub properties: BTreeMap<String, Value>,
}

impl LaunchConfig {
    pub fn build(config: &EngineConfig, address: ChannelAddress) -> Self {
        let mut args: Vec<String> = vec![
            "--idle=yes".to_string(),
            "--no-config".to_string(),
            "--load-scripts=no".to_string(),
            "--prefetch-playlist=yes".to_string(),
            "--no-video".to_string(),
        ];

        for param in &config.extra_parameters {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            if flag_name(param) == IPC_FLAG {
                log::warn!("Ignoring user-supplied {}, the engine owns the control channel", param);
                continue;
            }
            merge_param(&mut args, param);
        }

        args.push(format!("{}={}", IPC_FLAG, address));

        Self {
            binary: config.binary(),
            args,
            address,
            properties: config.properties.clone(),
        }
    }
}

fn flag_name(param: &str) -> &str {
    param.split_once('=').map(|(name, _)| name).unwrap_or(param)
}

fn merge_param(args: &mut Vec<String>, param: &str) {
    if args.iter().any(|existing| existing == param) {
        return;
    }
    let name = flag_name(param);
    if SINGLE_VALUED.contains(&name) {
        if let Some(slot) = args.iter_mut().find(|existing| flag_name(existing) == name) {
            *slot = param.to_string();
            return;
        }
    }
    args.push(param.to_string());
}
