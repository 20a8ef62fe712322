//! Protocol state shared by every reader engine

use std::collections::HashMap;

use crate::config::Config;
use crate::error::{Result, StageError};
use crate::get_queue::{BlockResolver, GetQueue};
use crate::metadata::{BlockInfo, StepIndex};
use crate::operator::OperatorCache;
use crate::transport::Transport;
use crate::variable::VariableDef;

use super::{EngineState, StepMode};

/// The step a reader currently holds
pub(crate) struct ActiveStep {
    /// Local counter: 0, 1, 2, ... per engine
    pub local: u64,

    /// Global step and its block placement
    pub index: StepIndex,
}

/// State machine, transport and per-step index for one reader rank
pub(crate) struct StepSession {
    config: Config,
    transport: Box<dyn Transport>,
    state: EngineState,
    active: Option<ActiveStep>,
    next_local: u64,
    end_of_stream: bool,

    /// Every variable seen so far; definitions may not change between steps
    known: HashMap<String, VariableDef>,

    operators: OperatorCache,
}

impl StepSession {
    pub fn new(config: Config, transport: Box<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            state: EngineState::Uninitialized,
            active: None,
            next_local: 0,
            end_of_stream: false,
            known: HashMap::new(),
            operators: OperatorCache::new(),
        }
    }

    /// Uninitialized -> Ready
    pub fn open(&mut self, engine: &str) -> Result<()> {
        self.require("Open", &[EngineState::Uninitialized])?;

        let producer_mode = self.transport.distribution_mode();
        if producer_mode != self.config.distribution_mode {
            return Err(StageError::Config(format!(
                "Reader configured for {} but the stream distributes {}",
                self.config.distribution_mode, producer_mode
            )));
        }

        self.state = EngineState::Ready;
        tracing::info!(
            "Opened {} reader rank {}/{} ({} writers, mode {})",
            engine,
            self.transport.reader_rank(),
            self.transport.reader_count(),
            self.transport.writer_count(),
            self.config.distribution_mode
        );
        Ok(())
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    pub fn mark_end_of_stream(&mut self) {
        if !self.end_of_stream {
            tracing::info!(
                "Reader rank {} reached end of stream after {} steps",
                self.transport.reader_rank(),
                self.next_local
            );
        }
        self.end_of_stream = true;
    }

    /// Fail with ProtocolState unless the engine is in one of `allowed`
    pub fn require(&self, operation: &'static str, allowed: &[EngineState]) -> Result<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        tracing::warn!("{} called in state {}", operation, self.state);
        Err(StageError::ProtocolState {
            operation,
            state: self.state.to_string(),
        })
    }

    pub fn check_mode(&self, mode: StepMode) -> Result<()> {
        if mode == StepMode::Read {
            return Ok(());
        }
        tracing::warn!("BeginStep with {:?} on a reader", mode);
        Err(StageError::ProtocolState {
            operation: "BeginStep",
            state: format!("{} (readers only accept StepMode::Read)", self.state),
        })
    }

    /// The active step, or ProtocolState
    pub fn active(&self, operation: &'static str) -> Result<&ActiveStep> {
        self.require(operation, &[EngineState::StepActive])?;
        self.active.as_ref().ok_or_else(|| StageError::ProtocolState {
            operation,
            state: self.state.to_string(),
        })
    }

    // -------------------------------------------------------------------------
    // Step transitions
    // -------------------------------------------------------------------------

    /// Load metadata for a granted global step: Ready -> StepActive
    ///
    /// On failure the step is handed back to the transport and the engine
    /// stays Ready.
    pub fn activate(&mut self, global: u64) -> Result<()> {
        let index = match self.load_index(global) {
            Ok(index) => index,
            Err(e) => {
                if let Err(release) = self.transport.release_step(global) {
                    tracing::warn!("Failed to release step {} after error: {}", global, release);
                }
                return Err(e);
            }
        };

        for def in index.variables() {
            self.known.entry(def.name.clone()).or_insert_with(|| def.clone());
        }

        let local = self.next_local;
        self.next_local += 1;
        tracing::debug!(
            "Reader rank {} granted global step {} as local step {}",
            self.transport.reader_rank(),
            global,
            local
        );
        self.active = Some(ActiveStep { local, index });
        self.state = EngineState::StepActive;
        Ok(())
    }

    fn load_index(&self, global: u64) -> Result<StepIndex> {
        let frames = self.transport.step_metadata(global)?;
        let index = StepIndex::from_frames(global, &frames)?;

        for def in index.variables() {
            if let Some(previous) = self.known.get(&def.name) {
                if !previous.is_compatible(def) {
                    return Err(StageError::VariableMismatch(format!(
                        "'{}' was {:?} {} {:?}, step {} declares {:?} {} {:?}",
                        def.name,
                        previous.shape_id,
                        previous.data_type,
                        previous.shape,
                        global,
                        def.shape_id,
                        def.data_type,
                        def.shape
                    )));
                }
            }
        }
        Ok(index)
    }

    /// Drop the step index: StepActive -> Ready. Returns the global step.
    pub fn finish_step(&mut self) -> Result<u64> {
        let active = self.active.take().ok_or_else(|| StageError::ProtocolState {
            operation: "EndStep",
            state: self.state.to_string(),
        })?;
        self.state = EngineState::Ready;
        Ok(active.index.step())
    }

    /// Release the transport: -> Closed
    pub fn shutdown(&mut self) -> Result<()> {
        self.active = None;
        self.state = EngineState::Closed;
        tracing::info!("Closed reader rank {}", self.transport.reader_rank());
        self.transport.close()
    }

    // -------------------------------------------------------------------------
    // Queries against the active step
    // -------------------------------------------------------------------------

    pub fn blocks_info(&self, name: &str, step: u64) -> Result<Vec<BlockInfo>> {
        let active = self.active("BlocksInfo")?;
        if step != active.local {
            return Err(StageError::ProtocolState {
                operation: "BlocksInfo",
                state: format!("StepActive at step {} (step {} requested)", active.local, step),
            });
        }
        if active.index.variable(name).is_none() {
            return Err(StageError::UnknownVariable(name.to_string()));
        }
        Ok(active.index.blocks_info(name).to_vec())
    }

    /// Resolve every read in `queue` against the active step
    pub fn resolve(&mut self, queue: &mut GetQueue) -> Result<usize> {
        let active = self.active.as_ref().ok_or_else(|| StageError::ProtocolState {
            operation: "PerformGets",
            state: self.state.to_string(),
        })?;
        let mut resolver = BlockResolver::new(
            self.transport.as_ref(),
            &active.index,
            &mut self.operators,
            &self.config.required_operators,
        );
        queue.resolve_all(&mut resolver)
    }
}
