//! # AtlasStage
//!
//! An in-memory staging engine that streams typed, step-organized array data
//! from a group of writer ranks to a group of reader ranks:
//! - Step protocol with a strict reader state machine
//! - Pluggable step distribution (lockstep, round-robin, on-demand)
//! - Deferred reads assembled from the blocks that overlap each selection
//! - Per-block compression operators (lz4, zstd, quantize)
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐   metadata frame + payload   ┌──────────────────────────┐
//! │  StepWriter  │ ───────────────────────────► │       StagingHub         │
//! │ (per writer) │                              │ (Transport, in-process)  │
//! └──────────────┘                              └────────────┬─────────────┘
//!                                                            │
//!                                   ┌────────────────────────▼─────────────┐
//!                                   │            ReaderEngine              │
//!                                   │  state machine + DistributionPolicy  │
//!                                   └────────────┬────────────┬────────────┘
//!                                                │            │
//!                                                ▼            ▼
//!                                        ┌────────────┐ ┌────────────┐
//!                                        │ StepIndex  │ │  GetQueue  │
//!                                        │(BlockInfo) │ │ + Operator │
//!                                        └────────────┘ └────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod variable;
pub mod operator;
pub mod metadata;
pub mod transport;
pub mod policy;
pub mod get_queue;
pub mod engine;
pub mod writer;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StageError};
pub use config::{Config, DistributionMode, EngineVariant, HubConfig};
pub use engine::{open_reader, EngineState, NaiveReader, ReaderEngine, StagingReader, StepMode, StepStatus};
pub use get_queue::{GetMode, ReadHandle};
pub use metadata::BlockInfo;
pub use operator::{Operator, OperatorSpec, OperatorType, Params};
pub use transport::{StagingHub, Timeout, Transport};
pub use variable::{DataType, Selection, ShapeId, VariableDef};
pub use writer::StepWriter;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of AtlasStage
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
