//! Naive reader: lockstep only, every Get resolved on the spot
//!
//! Kept as a reference to compare the staging reader against.

use crate::config::{Config, DistributionMode};
use crate::error::{Result, StageError};
use crate::get_queue::{GetMode, GetQueue, ReadHandle};
use crate::metadata::BlockInfo;
use crate::transport::{StepAvailability, Timeout, Transport};
use crate::variable::{Selection, VariableDef};

use super::session::StepSession;
use super::{EngineState, ReaderEngine, StepMode, StepStatus};

pub struct NaiveReader {
    session: StepSession,
    next_global: u64,
}

impl NaiveReader {
    pub fn open(config: Config, transport: Box<dyn Transport>) -> Result<Self> {
        if config.distribution_mode != DistributionMode::Default {
            return Err(StageError::Config(format!(
                "Naive reader only supports Default distribution, got {}",
                config.distribution_mode
            )));
        }

        let mut session = StepSession::new(config, transport);
        session.open("naive")?;
        Ok(Self {
            session,
            next_global: 0,
        })
    }
}

impl ReaderEngine for NaiveReader {
    fn state(&self) -> EngineState {
        self.session.state()
    }

    fn begin_step(&mut self, mode: StepMode, timeout_secs: f32) -> Result<StepStatus> {
        self.session.require("BeginStep", &[EngineState::Ready])?;
        self.session.check_mode(mode)?;
        if self.session.is_end_of_stream() {
            return Ok(StepStatus::EndOfStream);
        }

        let timeout = Timeout::from_secs_f32(timeout_secs);
        match self.session.transport().wait_for_step(self.next_global, timeout)? {
            StepAvailability::Ready(global) => {
                self.session.activate(global)?;
                self.next_global = global + 1;
                Ok(StepStatus::Ok)
            }
            StepAvailability::NotReady => Ok(StepStatus::NotReady),
            StepAvailability::EndOfStream => {
                self.session.mark_end_of_stream();
                Ok(StepStatus::EndOfStream)
            }
        }
    }

    fn current_step(&self) -> Result<u64> {
        Ok(self.session.active("CurrentStep")?.local)
    }

    fn global_step(&self) -> Result<u64> {
        Ok(self.session.active("GlobalStep")?.index.step())
    }

    fn inquire_variable(&self, name: &str) -> Result<Option<VariableDef>> {
        Ok(self.session.active("InquireVariable")?.index.variable(name).cloned())
    }

    fn available_variables(&self) -> Result<Vec<VariableDef>> {
        let active = self.session.active("AvailableVariables")?;
        Ok(active.index.variables().cloned().collect())
    }

    fn blocks_info(&self, name: &str, step: u64) -> Result<Vec<BlockInfo>> {
        self.session.blocks_info(name, step)
    }

    /// Always resolves before returning, whatever `mode` asks for
    fn get(&mut self, name: &str, selection: Selection, _mode: GetMode) -> Result<ReadHandle> {
        let active = self.session.active("Get")?;
        let mut single = GetQueue::new();
        let handle = single.enqueue(&active.index, name, selection)?;
        self.session.resolve(&mut single)?;
        Ok(handle)
    }

    fn perform_gets(&mut self) -> Result<()> {
        self.session.require("PerformGets", &[EngineState::StepActive])
    }

    fn end_step(&mut self) -> Result<()> {
        self.session.require("EndStep", &[EngineState::StepActive])?;
        let global = self.session.finish_step()?;
        self.session.transport().release_step(global)
    }

    fn close(&mut self) -> Result<()> {
        match self.session.state() {
            EngineState::Closed => Ok(()),
            EngineState::StepActive => {
                let ended = self.end_step();
                let closed = self.session.shutdown();
                ended.and(closed)
            }
            EngineState::Ready | EngineState::Uninitialized => self.session.shutdown(),
        }
    }
}
