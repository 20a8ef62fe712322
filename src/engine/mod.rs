//! Engine Module
//!
//! Reader-side step engines.
//!
//! ## Responsibilities
//! - Enforce the step protocol (BeginStep / Get / PerformGets / EndStep / Close)
//! - Ask the distribution policy which global step this rank reads next
//! - Expose the step's variables and block placement while a step is active
//! - Resolve reads through the get queue
//!
//! ## State Machine
//! ```text
//!   Uninitialized ──open──► Ready ──BeginStep(Ok)──► StepActive
//!                             ▲                         │
//!                             └────────EndStep──────────┘
//!   Ready | StepActive ──Close──► Closed   (Close from StepActive runs EndStep)
//! ```
//!
//! Every engine exclusively owns its transport handle; several engines can
//! coexist in one process.

mod naive;
mod reader;
mod session;

use std::fmt;

use crate::config::{Config, EngineVariant};
use crate::error::Result;
use crate::get_queue::{GetMode, ReadHandle};
use crate::metadata::BlockInfo;
use crate::transport::Transport;
use crate::variable::{Selection, VariableDef};

pub use naive::NaiveReader;
pub use reader::StagingReader;

/// Outcome of BeginStep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// A step was granted; the engine is now StepActive
    Ok,

    /// Nothing available before the timeout; the engine stays Ready
    NotReady,

    /// Writers are done and every step for this reader was delivered
    EndOfStream,
}

/// Access mode requested at BeginStep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StepMode {
    #[default]
    Read,

    /// Producer-side mode, rejected by reader engines
    Append,
}

/// Protocol state of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Ready,
    StepActive,
    Closed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineState::Uninitialized => "Uninitialized",
            EngineState::Ready => "Ready",
            EngineState::StepActive => "StepActive",
            EngineState::Closed => "Closed",
        })
    }
}

// =============================================================================
// Reader Engine Trait
// =============================================================================

/// A reader engine bound to one rank
///
/// Calls are serialized by `&mut self`. BeginStep is the only call that blocks.
pub trait ReaderEngine: Send {
    fn state(&self) -> EngineState;

    /// Wait up to `timeout_secs` for the next step
    ///
    /// Zero (or NaN) polls once; a negative timeout waits forever.
    fn begin_step(&mut self, mode: StepMode, timeout_secs: f32) -> Result<StepStatus>;

    /// Local step counter of the active step: 0, 1, 2, ... for this engine
    fn current_step(&self) -> Result<u64>;

    /// Producer-side step number of the active step
    fn global_step(&self) -> Result<u64>;

    /// Definition of a variable present in the active step
    fn inquire_variable(&self, name: &str) -> Result<Option<VariableDef>>;

    /// Every variable present in the active step, by name
    fn available_variables(&self) -> Result<Vec<VariableDef>>;

    /// Block placement of `name` for local step `step`, which must be active
    ///
    /// Ordered by writer rank, then start offset.
    fn blocks_info(&self, name: &str, step: u64) -> Result<Vec<BlockInfo>>;

    /// Request a read; `Deferred` reads are filled by PerformGets or EndStep
    fn get(&mut self, name: &str, selection: Selection, mode: GetMode) -> Result<ReadHandle>;

    /// Resolve every queued read without ending the step
    fn perform_gets(&mut self) -> Result<()>;

    /// Resolve queued reads, release the step, return to Ready
    fn end_step(&mut self) -> Result<()>;

    /// Release the transport; a no-op once closed
    fn close(&mut self) -> Result<()>;
}

/// Open the reader engine selected by `config.engine_variant`
pub fn open_reader(config: Config, transport: Box<dyn Transport>) -> Result<Box<dyn ReaderEngine>> {
    Ok(match config.engine_variant {
        EngineVariant::Staging => Box::new(StagingReader::open(config, transport)?),
        EngineVariant::Naive => Box::new(NaiveReader::open(config, transport)?),
    })
}
