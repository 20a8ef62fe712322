//! Step Writer
//!
//! Reference producer for one writer rank.
//!
//! ## Responsibilities
//! - Hold variable definitions and the operator attached to each
//! - Buffer the blocks put during a step
//! - At EndStep: compress blocks, record statistics, frame the metadata and
//!   publish metadata + payload to the transport
//!
//! ## Payload Layout (per writer, per step)
//! ```text
//! ┌──────────────┬──────────────┬─────┬──────────────┐
//! │ Block 0 bytes│ Block 1 bytes│ ... │ Block N bytes│
//! └──────────────┴──────────────┴─────┴──────────────┘
//! ```
//! Each block's offset and length are recorded in its `BlockInfo`. Single
//! values are carried inline in the metadata and take no payload space.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Result, StageError};
use crate::metadata::{encode_metadata, BlockInfo, BlockRecord, WriterMetadata};
use crate::operator::{status, Operator, OperatorSpec, Params};
use crate::transport::WriterEndpoint;
use crate::variable::{min_max, to_bytes, volume, DataType, Dims, Element, ShapeId, VariableDef};

struct VariableEntry {
    def: VariableDef,
    operator: Option<(OperatorSpec, Arc<dyn Operator>)>,
}

struct PendingPut {
    variable: String,
    start: Dims,
    count: Dims,
    data: Vec<u8>,
}

/// Producer for one writer rank
pub struct StepWriter {
    endpoint: WriterEndpoint,
    variables: BTreeMap<String, VariableEntry>,
    active: Option<u64>,
    puts: Vec<PendingPut>,
    next_step: u64,
    closed: bool,
}

impl StepWriter {
    pub fn new(endpoint: WriterEndpoint) -> Self {
        Self {
            endpoint,
            variables: BTreeMap::new(),
            active: None,
            puts: Vec::new(),
            next_step: 0,
            closed: false,
        }
    }

    pub fn rank(&self) -> usize {
        self.endpoint.rank()
    }

    /// Step the next BeginStep will open
    pub fn next_step(&self) -> u64 {
        self.next_step
    }

    // =========================================================================
    // Definitions
    // =========================================================================

    /// Declare a variable; redeclaring an identical definition is a no-op
    pub fn define_variable(&mut self, def: VariableDef) -> Result<()> {
        if let Some(entry) = self.variables.get(&def.name) {
            if entry.def.is_compatible(&def) {
                return Ok(());
            }
            return Err(StageError::VariableMismatch(format!(
                "'{}' already defined as {:?} {} {:?}",
                def.name, entry.def.shape_id, entry.def.data_type, entry.def.shape
            )));
        }
        tracing::debug!("Writer {} defined '{}' ({})", self.rank(), def.name, def.data_type);
        self.variables.insert(
            def.name.clone(),
            VariableEntry {
                def,
                operator: None,
            },
        );
        Ok(())
    }

    /// Compress every later block of `name` with `spec`
    pub fn add_operation(&mut self, name: &str, spec: OperatorSpec) -> Result<()> {
        let entry = self
            .variables
            .get_mut(name)
            .ok_or_else(|| StageError::UnknownVariable(name.to_string()))?;

        if entry.def.shape_id == ShapeId::GlobalValue {
            return Err(StageError::Config(format!(
                "'{}' is a single value; operators apply to arrays only",
                name
            )));
        }

        let op = spec.build()?;
        if !op.is_data_type_valid(entry.def.data_type) {
            return Err(StageError::operator(
                spec.kind.as_str(),
                status::UNSUPPORTED_TYPE,
                format!("'{}' is {}, which {} does not support", name, entry.def.data_type, spec.kind),
            ));
        }
        entry.operator = Some((spec, op));
        Ok(())
    }

    // =========================================================================
    // Steps
    // =========================================================================

    pub fn begin_step(&mut self) -> Result<u64> {
        if self.closed || self.active.is_some() {
            return Err(StageError::ProtocolState {
                operation: "BeginStep",
                state: self.state_name().to_string(),
            });
        }
        self.active = Some(self.next_step);
        Ok(self.next_step)
    }

    /// Put a region of a global array
    pub fn put<T: Element>(&mut self, name: &str, start: &[u64], count: &[u64], data: &[T]) -> Result<()> {
        let def = self.checked_def::<T>("Put", name, ShapeId::GlobalArray)?;
        def.check_box(start, count)?;
        self.buffer(name, start.to_vec(), count.to_vec(), data)
    }

    /// Put one block of a local array
    pub fn put_block<T: Element>(&mut self, name: &str, count: &[u64], data: &[T]) -> Result<()> {
        self.checked_def::<T>("Put", name, ShapeId::LocalArray)?;
        self.buffer(name, Vec::new(), count.to_vec(), data)
    }

    /// Put a single value
    pub fn put_value<T: Element>(&mut self, name: &str, value: T) -> Result<()> {
        self.checked_def::<T>("Put", name, ShapeId::GlobalValue)?;
        self.buffer(name, Vec::new(), Vec::new(), &[value])
    }

    fn checked_def<T: Element>(&self, operation: &'static str, name: &str, shape_id: ShapeId) -> Result<&VariableDef> {
        if self.active.is_none() {
            return Err(StageError::ProtocolState {
                operation,
                state: self.state_name().to_string(),
            });
        }
        let def = &self
            .variables
            .get(name)
            .ok_or_else(|| StageError::UnknownVariable(name.to_string()))?
            .def;
        if def.data_type != T::DATA_TYPE {
            return Err(StageError::TypeMismatch {
                expected: def.data_type,
                found: T::DATA_TYPE,
            });
        }
        if def.shape_id != shape_id {
            return Err(StageError::SelectionBounds(format!(
                "'{}' is {:?}, not {:?}",
                name, def.shape_id, shape_id
            )));
        }
        Ok(def)
    }

    fn buffer<T: Element>(&mut self, name: &str, start: Dims, count: Dims, data: &[T]) -> Result<()> {
        if data.len() as u64 != volume(&count) {
            return Err(StageError::SelectionBounds(format!(
                "'{}': {} values supplied for a block of {} elements",
                name,
                data.len(),
                volume(&count)
            )));
        }
        self.puts.push(PendingPut {
            variable: name.to_string(),
            start,
            count,
            data: to_bytes(data),
        });
        Ok(())
    }

    /// Compress and publish the buffered blocks
    pub fn end_step(&mut self) -> Result<()> {
        let step = self.active.ok_or_else(|| StageError::ProtocolState {
            operation: "EndStep",
            state: self.state_name().to_string(),
        })?;

        let puts = std::mem::take(&mut self.puts);
        let mut payload = Vec::new();
        let mut blocks = Vec::with_capacity(puts.len());
        let mut block_ids: BTreeMap<String, usize> = BTreeMap::new();

        for put in puts {
            let entry = self
                .variables
                .get(&put.variable)
                .ok_or_else(|| StageError::UnknownVariable(put.variable.clone()))?;
            let data_type = entry.def.data_type;

            let next_id = block_ids.entry(put.variable.clone()).or_insert(0);
            let block_id = *next_id;
            *next_id += 1;

            let (min, max) = stats(data_type, &put.data);
            let mut info = BlockInfo {
                writer_rank: self.endpoint.rank(),
                block_id,
                start: put.start,
                count: put.count,
                operator: None,
                payload_offset: payload.len() as u64,
                payload_len: 0,
                min,
                max,
                value: None,
            };

            if entry.def.shape_id == ShapeId::GlobalValue {
                info.value = Some(put.data);
            } else if let Some((spec, op)) = &entry.operator {
                let (stream, metrics) = op.compress(&put.data, &info.start, &info.count, data_type, &Params::new())?;
                tracing::trace!("Compressed '{}' block {}: {:?}", put.variable, block_id, metrics);
                info.payload_len = stream.len() as u64;
                info.operator = Some(spec.clone());
                payload.extend_from_slice(&stream);
            } else {
                info.payload_len = put.data.len() as u64;
                payload.extend_from_slice(&put.data);
            }

            blocks.push(BlockRecord {
                variable: put.variable,
                info,
            });
        }

        let metadata = WriterMetadata {
            writer_rank: self.endpoint.rank(),
            step,
            variables: self.variables.values().map(|e| e.def.clone()).collect(),
            blocks,
        };
        let frame = encode_metadata(&metadata)?;

        tracing::debug!(
            "Writer {} publishing step {}: {} blocks, {} metadata bytes, {} payload bytes",
            self.endpoint.rank(),
            step,
            metadata.blocks.len(),
            frame.len(),
            payload.len()
        );
        self.endpoint.publish(step, frame, payload)?;

        self.active = None;
        self.next_step = step + 1;
        Ok(())
    }

    /// End any open step and tell readers no more steps follow
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let ended = if self.active.is_some() { self.end_step() } else { Ok(()) };
        self.closed = true;
        self.endpoint.close();
        ended
    }

    fn state_name(&self) -> &'static str {
        if self.closed {
            "Closed"
        } else if self.active.is_some() {
            "StepActive"
        } else {
            "Ready"
        }
    }
}

fn stats(data_type: DataType, data: &[u8]) -> (Option<f64>, Option<f64>) {
    match min_max(data_type, data) {
        Some((lo, hi)) => (Some(lo), Some(hi)),
        None => (None, None),
    }
}
