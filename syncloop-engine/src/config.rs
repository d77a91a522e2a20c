//! Engine configuration
//!
//! Timing constants for the loop engine, loadable from TOML with defaults
//! matching production behavior. All durations are configured in
//! milliseconds and converted to ticks at the call sites that need them.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use syncloop_common::timing::{ms_to_ticks, Ticks};

/// Loop engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lead time a scheduled player is given to preroll before its sync
    /// time. Scheduling further out than this defers player creation to
    /// avoid holding decoder resources.
    pub preroll_lead_ms: u64,

    /// How far before each loop boundary the loop timer fires, giving the
    /// gapless swap time to execute before the precise instant.
    pub loop_lookahead_ms: u64,

    /// Grace period for deferred detach; a reattach of the same slot within
    /// this window cancels the pending detach.
    pub detach_grace_period_ms: u64,

    /// Maximum number of player rebuilds attempted after stalls before the
    /// affected player is abandoned and a RecoveryFailed event is emitted.
    pub max_recovery_attempts: u32,

    /// Forward buffer duration requested from the media backend per player.
    pub preferred_forward_buffer_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preroll_lead_ms: 4_000,
            loop_lookahead_ms: 10,
            detach_grace_period_ms: 2_000,
            max_recovery_attempts: 5,
            preferred_forward_buffer_ms: 1_500,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.loop_lookahead_ms == 0 {
            return Err(Error::Config(
                "loop_lookahead_ms must be greater than zero".to_string(),
            ));
        }
        if self.loop_lookahead_ms >= self.preroll_lead_ms {
            return Err(Error::Config(format!(
                "loop_lookahead_ms ({}) must be less than preroll_lead_ms ({})",
                self.loop_lookahead_ms, self.preroll_lead_ms
            )));
        }
        Ok(())
    }

    /// Preroll lead in ticks
    pub fn preroll_lead_ticks(&self) -> Ticks {
        ms_to_ticks(self.preroll_lead_ms as i64)
    }

    /// Loop look-ahead in ticks
    pub fn loop_lookahead_ticks(&self) -> Ticks {
        ms_to_ticks(self.loop_lookahead_ms as i64)
    }

    /// Detach grace period in ticks
    pub fn detach_grace_period_ticks(&self) -> Ticks {
        ms_to_ticks(self.detach_grace_period_ms as i64)
    }

    /// Preferred forward buffer in ticks
    pub fn preferred_forward_buffer_ticks(&self) -> Ticks {
        ms_to_ticks(self.preferred_forward_buffer_ms as i64)
    }
}
