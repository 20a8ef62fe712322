//! Get Queue Module
//!
//! Deferred reads for the active step.
//!
//! ## Responsibilities
//! - Validate a read request against the step's metadata when it is queued
//! - Hand the caller a [`ReadHandle`] that is filled when the read resolves
//! - Resolve every queued read in one pass, fetching and decompressing each
//!   contributing block at most once
//!
//! ## Lifecycle
//! ```text
//!   Get ──► PendingGet ──► PerformGets / EndStep ──► ReadHandle filled
//!                                 │
//!                                 └─ first error: queue cleared, error returned
//! ```

mod resolve;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StageError};
use crate::metadata::StepIndex;
use crate::variable::{from_bytes, volume, DataType, Dims, Element, Selection, ShapeId, VariableDef};

pub(crate) use resolve::BlockResolver;

/// When a Get is serviced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GetMode {
    /// Queued until PerformGets or EndStep
    #[default]
    Deferred,

    /// Resolved before Get returns
    Sync,
}

// =============================================================================
// Read Handle
// =============================================================================

/// Destination of one Get
///
/// Cloning yields another view of the same slot. The slot stays empty until
/// the read resolves successfully; a failed resolution leaves it empty.
#[derive(Clone)]
pub struct ReadHandle {
    variable: String,
    data_type: DataType,
    count: Dims,
    slot: Arc<Mutex<Option<Vec<u8>>>>,
}

impl ReadHandle {
    pub(crate) fn new(variable: impl Into<String>, data_type: DataType, count: Dims) -> Self {
        Self {
            variable: variable.into(),
            data_type,
            count,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Extent of the result (empty for a single value)
    pub fn count(&self) -> &[u64] {
        &self.count
    }

    /// Number of elements the result holds
    pub fn len(&self) -> usize {
        volume(&self.count) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_ready(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Raw result bytes, row-major
    pub fn bytes(&self) -> Result<Vec<u8>> {
        self.slot.lock().clone().ok_or(StageError::NotResolved)
    }

    /// Result as typed values; `T` must match the variable's type
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DATA_TYPE != self.data_type {
            return Err(StageError::TypeMismatch {
                expected: self.data_type,
                found: T::DATA_TYPE,
            });
        }
        let slot = self.slot.lock();
        let bytes = slot.as_ref().ok_or(StageError::NotResolved)?;
        from_bytes(bytes)
    }

    /// First element of the result, for single values
    pub fn value<T: Element>(&self) -> Result<T> {
        self.to_vec::<T>()?
            .into_iter()
            .next()
            .ok_or_else(|| StageError::SelectionBounds(format!("read of '{}' is empty", self.variable)))
    }

    pub(crate) fn fill(&self, data: Vec<u8>) {
        *self.slot.lock() = Some(data);
    }
}

impl fmt::Debug for ReadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadHandle")
            .field("variable", &self.variable)
            .field("data_type", &self.data_type)
            .field("count", &self.count)
            .field("ready", &self.is_ready())
            .finish()
    }
}

// =============================================================================
// Pending Gets
// =============================================================================

/// What a queued read resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum GetTarget {
    /// Single value
    Value,

    /// One block of a local array, by index in the ordered block list
    Block(usize),

    /// Region of a global array, global coordinates
    Region { start: Dims, count: Dims },
}

/// A validated read waiting for resolution
#[derive(Debug)]
pub(crate) struct PendingGet {
    pub variable: VariableDef,
    pub target: GetTarget,
    pub handle: ReadHandle,
}

impl PendingGet {
    /// Validate `selection` against the step index
    pub fn new(index: &StepIndex, name: &str, selection: Selection) -> Result<Self> {
        let variable = index
            .variable(name)
            .ok_or_else(|| StageError::UnknownVariable(name.to_string()))?
            .clone();

        let (target, count) = match (variable.shape_id, selection) {
            (ShapeId::GlobalValue, Selection::All) => (GetTarget::Value, Vec::new()),
            (ShapeId::GlobalValue, other) => {
                return Err(StageError::SelectionBounds(format!(
                    "'{}' is a single value; selection {:?} does not apply",
                    name, other
                )))
            }

            (ShapeId::LocalArray, Selection::Block(id)) => {
                let count = block_count(index, name, id)?;
                (GetTarget::Block(id), count)
            }
            (ShapeId::LocalArray, other) => {
                return Err(StageError::SelectionBounds(format!(
                    "'{}' is a local array; read it by block, not {:?}",
                    name, other
                )))
            }

            (ShapeId::GlobalArray, Selection::All) => {
                let start = vec![0; variable.shape.len()];
                let count = variable.shape.clone();
                (GetTarget::Region { start, count: count.clone() }, count)
            }
            (ShapeId::GlobalArray, Selection::Box { start, count }) => {
                variable.check_box(&start, &count)?;
                (GetTarget::Region { start, count: count.clone() }, count)
            }
            (ShapeId::GlobalArray, Selection::Block(id)) => {
                let block = index.blocks_info(name).get(id).ok_or_else(|| {
                    StageError::SelectionBounds(format!("'{}' has no block {}", name, id))
                })?;
                let (start, count) = (block.start.clone(), block.count.clone());
                (GetTarget::Region { start, count: count.clone() }, count)
            }
        };

        let handle = ReadHandle::new(name, variable.data_type, count);
        Ok(Self {
            variable,
            target,
            handle,
        })
    }
}

fn block_count(index: &StepIndex, name: &str, id: usize) -> Result<Dims> {
    let blocks = index.blocks_info(name);
    blocks.get(id).map(|b| b.count.clone()).ok_or_else(|| {
        StageError::SelectionBounds(format!(
            "'{}' has {} blocks this step, block {} requested",
            name,
            blocks.len(),
            id
        ))
    })
}

// =============================================================================
// Get Queue
// =============================================================================

/// Reads queued against the active step
#[derive(Debug, Default)]
pub struct GetQueue {
    pending: Vec<PendingGet>,
}

impl GetQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Validate and queue a read, returning its destination
    pub fn enqueue(&mut self, index: &StepIndex, name: &str, selection: Selection) -> Result<ReadHandle> {
        let get = PendingGet::new(index, name, selection)?;
        let handle = get.handle.clone();
        self.pending.push(get);
        Ok(handle)
    }

    /// Resolve every queued read in enqueue order
    ///
    /// The queue is empty afterwards whether or not resolution succeeded.
    pub(crate) fn resolve_all(&mut self, resolver: &mut BlockResolver<'_>) -> Result<usize> {
        let pending = std::mem::take(&mut self.pending);
        let total = pending.len();
        for get in pending {
            let data = resolver.resolve(&get)?;
            get.handle.fill(data);
        }
        Ok(total)
    }

    /// Drop queued reads without resolving them
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
