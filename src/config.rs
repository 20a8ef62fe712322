//! Configuration for AtlasStage
//!
//! Centralized configuration with sensible defaults.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StageError};
use crate::operator::{OperatorType, Params};

/// Reader engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Step Distribution
    // -------------------------------------------------------------------------
    /// How produced steps are assigned to reader ranks.
    /// Fixed for the lifetime of the engine.
    pub distribution_mode: DistributionMode,

    // -------------------------------------------------------------------------
    // Engine Selection
    // -------------------------------------------------------------------------
    /// Which reader implementation `open_reader` builds
    pub engine_variant: EngineVariant,

    // -------------------------------------------------------------------------
    // Operator Checks
    // -------------------------------------------------------------------------
    /// Variables whose blocks must carry a specific operator
    pub required_operators: BTreeMap<String, OperatorType>,
}

/// Step distribution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistributionMode {
    /// Every reader receives every step, in order (lockstep)
    Default,

    /// Step k goes to reader `k mod reader_count`
    RoundRobin,

    /// Each step goes to whichever reader asks for one first
    OnDemand,
}

impl fmt::Display for DistributionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DistributionMode::Default => "Default",
            DistributionMode::RoundRobin => "RoundRobin",
            DistributionMode::OnDemand => "OnDemand",
        })
    }
}

impl FromStr for DistributionMode {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "default" | "alltoall" | "lockstep" => Ok(DistributionMode::Default),
            "roundrobin" => Ok(DistributionMode::RoundRobin),
            "ondemand" => Ok(DistributionMode::OnDemand),
            _ => Err(StageError::Config(format!(
                "Unknown distribution mode: {}",
                s
            ))),
        }
    }
}

/// Reader engine implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineVariant {
    /// Policy-driven reader with a deferred get queue
    Staging,

    /// Lockstep reader that resolves every get immediately (testing)
    Naive,
}

impl FromStr for EngineVariant {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "staging" => Ok(EngineVariant::Staging),
            "naive" => Ok(EngineVariant::Naive),
            _ => Err(StageError::Config(format!("Unknown engine variant: {}", s))),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            distribution_mode: DistributionMode::Default,
            engine_variant: EngineVariant::Staging,
            required_operators: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Build a config from string engine parameters
    ///
    /// Recognized keys (case-insensitive): `StepDistributionMode`, `EngineVariant`.
    pub fn from_params(params: &Params) -> Result<Self> {
        let mut builder = Config::builder();
        for (key, value) in params {
            match key.to_ascii_lowercase().as_str() {
                "stepdistributionmode" => {
                    builder = builder.distribution_mode(value.parse()?);
                }
                "enginevariant" => {
                    builder = builder.engine_variant(value.parse()?);
                }
                _ => {
                    return Err(StageError::Config(format!(
                        "Unknown engine parameter: {}",
                        key
                    )))
                }
            }
        }
        Ok(builder.build())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the step distribution mode
    pub fn distribution_mode(mut self, mode: DistributionMode) -> Self {
        self.config.distribution_mode = mode;
        self
    }

    /// Set the reader implementation
    pub fn engine_variant(mut self, variant: EngineVariant) -> Self {
        self.config.engine_variant = variant;
        self
    }

    /// Require every block of `variable` to declare `kind`
    pub fn require_operator(mut self, variable: impl Into<String>, kind: OperatorType) -> Self {
        self.config.required_operators.insert(variable.into(), kind);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

// =============================================================================
// In-process transport configuration
// =============================================================================

/// Configuration for a `StagingHub`
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Number of writer ranks; a step is published once all of them contribute
    pub writer_count: usize,

    /// Number of reader ranks
    pub reader_count: usize,

    /// Distribution mode shared by every reader of the hub
    pub distribution_mode: DistributionMode,

    /// Max complete-but-unreleased steps before writers block (None = unbounded)
    pub queue_limit: Option<usize>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            writer_count: 1,
            reader_count: 1,
            distribution_mode: DistributionMode::Default,
            queue_limit: None,
        }
    }
}

impl HubConfig {
    pub fn builder() -> HubConfigBuilder {
        HubConfigBuilder::default()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.writer_count == 0 {
            return Err(StageError::Config("writer_count must be at least 1".to_string()));
        }
        if self.reader_count == 0 {
            return Err(StageError::Config("reader_count must be at least 1".to_string()));
        }
        if self.queue_limit == Some(0) {
            return Err(StageError::Config("queue_limit must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Builder for HubConfig
#[derive(Default)]
pub struct HubConfigBuilder {
    config: HubConfig,
}

impl HubConfigBuilder {
    pub fn writer_count(mut self, count: usize) -> Self {
        self.config.writer_count = count;
        self
    }

    pub fn reader_count(mut self, count: usize) -> Self {
        self.config.reader_count = count;
        self
    }

    pub fn distribution_mode(mut self, mode: DistributionMode) -> Self {
        self.config.distribution_mode = mode;
        self
    }

    /// Bound the backlog of complete, unreleased steps
    pub fn queue_limit(mut self, limit: usize) -> Self {
        self.config.queue_limit = Some(limit);
        self
    }

    pub fn build(self) -> HubConfig {
        self.config
    }
}
