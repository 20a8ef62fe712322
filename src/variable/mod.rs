//! Variable Module
//!
//! Typed shape and selection descriptors.
//!
//! ## Shape classes
//! - `GlobalValue`: one scalar per step, shape is empty
//! - `LocalArray`: each writer contributes an independent block; read by block id
//! - `GlobalArray`: writers contribute sub-regions of one global shape; read by box

mod selection;
mod types;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StageError};

pub use selection::{copy_region, intersect, mark_region, volume, Dims, Selection};
pub use types::{from_bytes, min_max, to_bytes, DataType, Element};

/// Shape class of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeId {
    GlobalValue,
    LocalArray,
    GlobalArray,
}

/// A declared variable
///
/// Immutable once declared: name, type, shape class and shape never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDef {
    pub name: String,
    pub data_type: DataType,
    pub shape_id: ShapeId,
    /// Global shape (GlobalArray only; empty otherwise)
    pub shape: Dims,
}

impl VariableDef {
    pub fn global_value(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            shape_id: ShapeId::GlobalValue,
            shape: Vec::new(),
        }
    }

    pub fn local_array(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            shape_id: ShapeId::LocalArray,
            shape: Vec::new(),
        }
    }

    pub fn global_array(name: impl Into<String>, data_type: DataType, shape: impl Into<Dims>) -> Self {
        Self {
            name: name.into(),
            data_type,
            shape_id: ShapeId::GlobalArray,
            shape: shape.into(),
        }
    }

    pub fn element_size(&self) -> usize {
        self.data_type.size()
    }

    /// Check that a box lies inside the global shape
    ///
    /// Requires `start[i] + count[i] <= shape[i]` in every dimension.
    pub fn check_box(&self, start: &[u64], count: &[u64]) -> Result<()> {
        if self.shape_id != ShapeId::GlobalArray {
            return Err(StageError::SelectionBounds(format!(
                "'{}' is not a global array; box selections do not apply",
                self.name
            )));
        }
        if start.len() != self.shape.len() || count.len() != self.shape.len() {
            return Err(StageError::SelectionBounds(format!(
                "'{}' has {} dimensions, selection has start {:?} count {:?}",
                self.name,
                self.shape.len(),
                start,
                count
            )));
        }
        for d in 0..self.shape.len() {
            let end = start[d].checked_add(count[d]);
            if end.map_or(true, |end| end > self.shape[d]) {
                return Err(StageError::SelectionBounds(format!(
                    "'{}' dimension {}: start {} + count {} exceeds shape {}",
                    self.name, d, start[d], count[d], self.shape[d]
                )));
            }
        }
        Ok(())
    }

    /// Same name, type, shape class and shape
    pub fn is_compatible(&self, other: &VariableDef) -> bool {
        self == other
    }
}
