//! Block fetch, decompression and assembly

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;

use crate::error::{Result, StageError};
use crate::metadata::{BlockInfo, StepIndex};
use crate::operator::{OperatorCache, OperatorType};
use crate::transport::Transport;
use crate::variable::{copy_region, intersect, mark_region, volume, Dims, VariableDef};

use super::{GetTarget, PendingGet};

/// Resolves reads against one step
///
/// Decoded blocks are kept for the lifetime of the resolver, so a block that
/// feeds several reads is fetched and decompressed once.
pub(crate) struct BlockResolver<'a> {
    transport: &'a dyn Transport,
    index: &'a StepIndex,
    operators: &'a mut OperatorCache,
    required: &'a BTreeMap<String, OperatorType>,
    decoded: HashMap<(String, usize, usize), Bytes>,
}

impl<'a> BlockResolver<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        index: &'a StepIndex,
        operators: &'a mut OperatorCache,
        required: &'a BTreeMap<String, OperatorType>,
    ) -> Self {
        Self {
            transport,
            index,
            operators,
            required,
            decoded: HashMap::new(),
        }
    }

    pub fn resolve(&mut self, get: &PendingGet) -> Result<Vec<u8>> {
        let name = get.variable.name.as_str();
        let index = self.index;
        match &get.target {
            GetTarget::Value => {
                let block = index.blocks_info(name).first().ok_or_else(|| {
                    StageError::IncompleteCoverage {
                        variable: name.to_string(),
                        covered: 0,
                        requested: 1,
                    }
                })?;
                Ok(self.load_block(&get.variable, block)?.to_vec())
            }
            GetTarget::Block(id) => {
                let block = index.blocks_info(name).get(*id).ok_or_else(|| {
                    StageError::SelectionBounds(format!("'{}' has no block {}", name, id))
                })?;
                Ok(self.load_block(&get.variable, block)?.to_vec())
            }
            GetTarget::Region { start, count } => self.assemble(&get.variable, start, count),
        }
    }

    /// Copy every overlapping block into a buffer shaped like the selection
    fn assemble(&mut self, variable: &VariableDef, start: &Dims, count: &Dims) -> Result<Vec<u8>> {
        let element_size = variable.element_size();
        let requested = volume(count);
        let mut out = vec![0u8; requested as usize * element_size];
        let mut mask = vec![false; requested as usize];
        let mut covered = 0u64;

        let index = self.index;
        for block in index.blocks_info(&variable.name) {
            let Some((region_start, region_count)) = intersect(start, count, &block.start, &block.count) else {
                continue;
            };
            let data = self.load_block(variable, block)?;
            copy_region(
                &data,
                &block.start,
                &block.count,
                &mut out,
                start,
                count,
                &region_start,
                &region_count,
                element_size,
            );
            covered += mark_region(&mut mask, start, count, &region_start, &region_count);
        }

        if covered < requested {
            return Err(StageError::IncompleteCoverage {
                variable: variable.name.clone(),
                covered,
                requested,
            });
        }
        Ok(out)
    }

    /// Raw bytes of one block, decompressed if needed
    fn load_block(&mut self, variable: &VariableDef, block: &BlockInfo) -> Result<Bytes> {
        let key = (variable.name.clone(), block.writer_rank, block.block_id);
        if let Some(data) = self.decoded.get(&key) {
            return Ok(data.clone());
        }

        self.check_operator(variable, block)?;

        let data = match &block.value {
            Some(value) => Bytes::from(value.clone()),
            None => {
                let stream = self.transport.fetch(
                    block.writer_rank,
                    self.index.step(),
                    block.payload_offset,
                    block.payload_len,
                )?;
                match &block.operator {
                    Some(spec) => {
                        let op = self.operators.get_or_build(spec)?;
                        Bytes::from(op.decompress(
                            &stream,
                            variable.data_type,
                            &block.start,
                            &block.count,
                            &spec.params,
                        )?)
                    }
                    None => stream,
                }
            }
        };

        let expected = volume(&block.count) as usize * variable.element_size();
        if data.len() != expected {
            return Err(StageError::MetadataCorruption(format!(
                "block {} of '{}' from writer {} decodes to {} bytes, extent needs {}",
                block.block_id,
                variable.name,
                block.writer_rank,
                data.len(),
                expected
            )));
        }

        tracing::trace!(
            "Loaded block {} of '{}' from writer {} ({} bytes)",
            block.block_id,
            variable.name,
            block.writer_rank,
            data.len()
        );
        self.decoded.insert(key, data.clone());
        Ok(data)
    }

    fn check_operator(&self, variable: &VariableDef, block: &BlockInfo) -> Result<()> {
        let Some(expected) = self.required.get(&variable.name) else {
            return Ok(());
        };
        let found = block.operator.as_ref().map(|spec| spec.kind);
        if found != Some(*expected) {
            return Err(StageError::OperatorMismatch {
                variable: variable.name.clone(),
                expected: expected.to_string(),
                found: found.map_or_else(|| "none".to_string(), |kind| kind.to_string()),
            });
        }
        Ok(())
    }
}
