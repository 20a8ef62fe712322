//! Block Placement Metadata Module
//!
//! Per-step, per-variable mapping of sub-regions to the writer rank that owns
//! them.
//!
//! ## Lifecycle
//! - Each writer publishes one framed `WriterMetadata` per step
//! - A reader granted step N decodes every writer's frame into a `StepIndex`
//! - The index is never mutated and is dropped at EndStep

mod block;
mod frame;
mod index;

pub use block::{BlockInfo, BlockRecord, WriterMetadata};
pub use frame::{decode_metadata, encode_metadata, HEADER_SIZE, MAGIC, VERSION};
pub use index::StepIndex;
