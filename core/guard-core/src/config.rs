//! Guard configuration.
//!
//! Loaded once at startup from `~/.sleepguard/config.toml`; an absent file
//! yields the defaults. Nothing here is persisted back and nothing survives
//! a restart.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{GuardError, Result};
use crate::input::buttons;
use crate::policy::DEFAULT_MAX_DENIALS;

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".sleepguard/config.toml";
const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
const DEFAULT_SETTLE_MS: u64 = 1_000;
const DEFAULT_JOIN_TIMEOUT_MS: u64 = 2_000;

/// Which observer keeps the veto flag current. The two modes are mutually
/// exclusive per deployment; both share the same policy-state contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserverMode {
    /// Host delivers switch-edge callbacks; the engine latches the veto on
    /// press and drops it on release.
    PushEdge,
    /// Dedicated worker polls the hold switch and holds the veto through a
    /// settle window after release.
    HoldPoll,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub mode: ObserverMode,
    /// Button combination that signals "let this suspend through" while the
    /// switch-based default would deny it.
    pub combo_mask: u32,
    /// Anti-livelock ceiling on consecutive denials.
    pub max_denials: u32,
    pub poll_interval_ms: u64,
    /// How long the poll observer keeps denying after the hold switch
    /// disengages, to absorb detent overshoot.
    pub settle_ms: u64,
    /// Callback slots to probe, in order. Slots are a scarce shared
    /// resource; registration takes the first free one.
    pub callback_slots: Vec<usize>,
    /// Whether the host guarantees a switch edge is applied before the
    /// suspend query that transition triggers. When false the engine
    /// re-samples raw input at query time instead of trusting the flag.
    pub trust_edge_ordering: bool,
    pub initial_veto: bool,
    pub join_timeout_ms: u64,
    /// Where the daemon's file-backed sampler reads the raw bitmask.
    pub input_state_path: Option<PathBuf>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            mode: ObserverMode::PushEdge,
            combo_mask: buttons::HOME,
            max_denials: DEFAULT_MAX_DENIALS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            settle_ms: DEFAULT_SETTLE_MS,
            callback_slots: vec![0, 1, 2, 3],
            trust_edge_ordering: true,
            initial_veto: false,
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
            input_state_path: None,
        }
    }
}

impl GuardConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_denials == 0 {
            return Err(GuardError::ConfigInvalid(
                "max_denials must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(GuardError::ConfigInvalid(
                "poll_interval_ms must be nonzero".to_string(),
            ));
        }
        if self.callback_slots.is_empty() {
            return Err(GuardError::ConfigInvalid(
                "callback_slots must list at least one candidate".to_string(),
            ));
        }
        if self.mode == ObserverMode::PushEdge && self.combo_mask == 0 {
            return Err(GuardError::ConfigInvalid(
                "combo_mask must be nonzero in push_edge mode".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| {
        GuardError::ConfigInvalid("Home directory not found".to_string())
    })?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

/// Load the configuration, returning defaults when the file does not exist.
pub fn load(path: Option<PathBuf>) -> Result<GuardConfig> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(GuardConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| GuardError::Io {
        context: format!("Failed to read config {}", config_path.display()),
        source: err,
    })?;
    let config: GuardConfig =
        toml::from_str(&content).map_err(|err| GuardError::ConfigMalformed {
            path: config_path.clone(),
            details: err.to_string(),
        })?;
    config.validate()?;
    Ok(config)
}
