//! Staging reader: the policy-driven engine with a deferred get queue

use crate::config::{Config, DistributionMode};
use crate::error::Result;
use crate::get_queue::{GetMode, GetQueue, ReadHandle};
use crate::metadata::BlockInfo;
use crate::policy::{self, DistributionPolicy};
use crate::transport::{StepAvailability, Timeout, Transport};
use crate::variable::{Selection, VariableDef};

use super::session::StepSession;
use super::{EngineState, ReaderEngine, StepMode, StepStatus};

/// Production reader engine
///
/// Steps are assigned by the configured distribution policy. Deferred reads
/// are queued and resolved together by PerformGets or EndStep, so blocks
/// shared between reads are fetched once.
pub struct StagingReader {
    session: StepSession,
    policy: Box<dyn DistributionPolicy>,
    queue: GetQueue,
}

impl StagingReader {
    /// Open a reader over `transport`
    ///
    /// Fails with `StageError::Config` when the configured distribution mode
    /// differs from the one the stream was produced with.
    pub fn open(config: Config, transport: Box<dyn Transport>) -> Result<Self> {
        // Step 1: Policy for this rank
        let policy = policy::for_mode(
            config.distribution_mode,
            transport.reader_rank(),
            transport.reader_count(),
        );

        // Step 2: Uninitialized -> Ready
        let mut session = StepSession::new(config, transport);
        session.open("staging")?;
        tracing::debug!(
            "Reader rank {} assigns steps by {}",
            session.transport().reader_rank(),
            policy.mode()
        );

        Ok(Self {
            session,
            policy,
            queue: GetQueue::new(),
        })
    }

    /// How this reader is assigned steps
    pub fn distribution_mode(&self) -> DistributionMode {
        self.policy.mode()
    }

    /// Reads queued and not yet resolved
    pub fn pending_gets(&self) -> usize {
        self.queue.len()
    }
}

impl ReaderEngine for StagingReader {
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
        match self.policy.next_step(self.session.transport(), timeout)? {
            StepAvailability::Ready(global) => {
                self.session.activate(global)?;
                Ok(StepStatus::Ok)
            }
            StepAvailability::NotReady => {
                tracing::trace!("No step ready within {:?}", timeout);
                Ok(StepStatus::NotReady)
            }
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
        Ok(self
            .session
            .active("AvailableVariables")?
            .index
            .variables()
            .cloned()
            .collect())
    }

    fn blocks_info(&self, name: &str, step: u64) -> Result<Vec<BlockInfo>> {
        self.session.blocks_info(name, step)
    }

    fn get(&mut self, name: &str, selection: Selection, mode: GetMode) -> Result<ReadHandle> {
        let active = self.session.active("Get")?;
        match mode {
            GetMode::Deferred => self.queue.enqueue(&active.index, name, selection),
            GetMode::Sync => {
                let mut single = GetQueue::new();
                let handle = single.enqueue(&active.index, name, selection)?;
                self.session.resolve(&mut single)?;
                Ok(handle)
            }
        }
    }

    fn perform_gets(&mut self) -> Result<()> {
        self.session.require("PerformGets", &[EngineState::StepActive])?;
        if self.queue.is_empty() {
            return Ok(());
        }
        let resolved = self.session.resolve(&mut self.queue)?;
        tracing::debug!("Resolved {} deferred gets", resolved);
        Ok(())
    }

    fn end_step(&mut self) -> Result<()> {
        self.session.require("EndStep", &[EngineState::StepActive])?;

        // A failed resolution leaves the step active with an empty queue.
        self.perform_gets()?;

        let global = self.session.finish_step()?;
        self.policy.release(self.session.transport(), global)?;
        tracing::debug!("Released global step {}", global);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        match self.session.state() {
            EngineState::Closed => Ok(()),
            EngineState::StepActive => {
                let ended = self.end_step();
                self.queue.clear();
                let closed = self.session.shutdown();
                ended.and(closed)
            }
            EngineState::Ready | EngineState::Uninitialized => self.session.shutdown(),
        }
    }
}
