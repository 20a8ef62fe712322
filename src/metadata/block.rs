//! Block metadata records
//!
//! What a writer tells readers about one step: the variables it declares and
//! where each of its blocks lives in its payload buffer.

use serde::{Deserialize, Serialize};

use crate::operator::OperatorSpec;
use crate::variable::{Dims, VariableDef};

/// One contiguous region of a variable written by one writer rank in one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Owning writer rank
    pub writer_rank: usize,

    /// Ordinal of this block among the writer's blocks of the variable
    pub block_id: usize,

    /// Global offset (GlobalArray) or empty
    pub start: Dims,

    /// Extent of the block
    pub count: Dims,

    /// Codec applied at write time, if any
    pub operator: Option<OperatorSpec>,

    /// Byte range of the (possibly compressed) block in the writer's payload
    pub payload_offset: u64,
    pub payload_len: u64,

    /// Block statistics
    pub min: Option<f64>,
    pub max: Option<f64>,

    /// Inline value for single-value variables; no fetch needed
    pub value: Option<Vec<u8>>,
}

/// A block tagged with its variable name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub variable: String,
    pub info: BlockInfo,
}

/// Everything one writer publishes about one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterMetadata {
    pub writer_rank: usize,
    pub step: u64,
    pub variables: Vec<VariableDef>,
    pub blocks: Vec<BlockRecord>,
}
