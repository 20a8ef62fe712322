//! Per-step block index
//!
//! Merges the metadata frames of every writer for one step. Built once when
//! the step is granted, read-only afterwards, dropped at EndStep.

use std::collections::BTreeMap;

use crate::error::{Result, StageError};
use crate::variable::{volume, ShapeId, VariableDef};

use super::{decode_metadata, BlockInfo, WriterMetadata};

/// Block placement for one step
#[derive(Debug, Clone)]
pub struct StepIndex {
    step: u64,
    variables: BTreeMap<String, VariableDef>,
    blocks: BTreeMap<String, Vec<BlockInfo>>,
}

impl StepIndex {
    /// Build from raw metadata frames, one per writer
    pub fn from_frames<B: AsRef<[u8]>>(step: u64, frames: &[B]) -> Result<Self> {
        let writers = frames
            .iter()
            .map(|f| decode_metadata(f.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::from_writers(step, writers)
    }

    /// Build from decoded writer metadata
    pub fn from_writers(step: u64, writers: Vec<WriterMetadata>) -> Result<Self> {
        let mut variables: BTreeMap<String, VariableDef> = BTreeMap::new();
        let mut blocks: BTreeMap<String, Vec<BlockInfo>> = BTreeMap::new();

        for writer in writers {
            if writer.step != step {
                return Err(StageError::MetadataCorruption(format!(
                    "Writer {} sent metadata for step {} while assembling step {}",
                    writer.writer_rank, writer.step, step
                )));
            }

            for def in writer.variables {
                match variables.get(&def.name) {
                    Some(existing) if !existing.is_compatible(&def) => {
                        return Err(StageError::VariableMismatch(format!(
                            "writer {} declares '{}' as {:?} {} {:?}, another writer as {:?} {} {:?}",
                            writer.writer_rank,
                            def.name,
                            def.shape_id,
                            def.data_type,
                            def.shape,
                            existing.shape_id,
                            existing.data_type,
                            existing.shape
                        )));
                    }
                    Some(_) => {}
                    None => {
                        variables.insert(def.name.clone(), def);
                    }
                }
            }

            for record in writer.blocks {
                if record.info.writer_rank != writer.writer_rank {
                    return Err(StageError::MetadataCorruption(format!(
                        "Writer {} published a block owned by rank {}",
                        writer.writer_rank, record.info.writer_rank
                    )));
                }
                blocks.entry(record.variable).or_default().push(record.info);
            }
        }

        for (name, list) in blocks.iter_mut() {
            let def = variables.get(name).ok_or_else(|| {
                StageError::MetadataCorruption(format!("Blocks published for undeclared variable '{}'", name))
            })?;
            for info in list.iter() {
                check_geometry(def, info)?;
            }
            list.sort_by(|a, b| {
                a.writer_rank
                    .cmp(&b.writer_rank)
                    .then_with(|| a.start.cmp(&b.start))
                    .then_with(|| a.block_id.cmp(&b.block_id))
            });
        }

        Ok(Self {
            step,
            variables,
            blocks,
        })
    }

    /// Global (writer-side) step number
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn variable(&self, name: &str) -> Option<&VariableDef> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = &VariableDef> {
        self.variables.values()
    }

    /// Blocks of a variable, ascending by owning rank then start offset
    pub fn blocks_info(&self, name: &str) -> &[BlockInfo] {
        self.blocks.get(name).map(|b| b.as_slice()).unwrap_or(&[])
    }
}

/// A block must fit the shape class and extent of its variable
fn check_geometry(def: &VariableDef, info: &BlockInfo) -> Result<()> {
    let corrupt = |what: String| {
        Err(StageError::MetadataCorruption(format!(
            "Block {} of '{}' from writer {}: {}",
            info.block_id, def.name, info.writer_rank, what
        )))
    };

    if info.count.iter().try_fold(1u64, |acc, &c| acc.checked_mul(c)).is_none() {
        return corrupt(format!("count {:?} overflows", info.count));
    }

    match def.shape_id {
        ShapeId::GlobalArray => {
            if info.start.len() != def.shape.len() || info.count.len() != def.shape.len() {
                return corrupt(format!(
                    "start {:?} / count {:?} do not match rank {}",
                    info.start,
                    info.count,
                    def.shape.len()
                ));
            }
            for ((&start, &count), &extent) in info.start.iter().zip(&info.count).zip(&def.shape) {
                match start.checked_add(count) {
                    Some(end) if end <= extent => {}
                    _ => {
                        return corrupt(format!(
                            "start {:?} + count {:?} exceeds shape {:?}",
                            info.start, info.count, def.shape
                        ))
                    }
                }
            }
        }
        ShapeId::LocalArray => {
            if !info.start.is_empty() {
                return corrupt(format!("local block carries start {:?}", info.start));
            }
        }
        ShapeId::GlobalValue => {
            if !info.start.is_empty() || volume(&info.count) != 1 {
                return corrupt(format!("value block has start {:?} count {:?}", info.start, info.count));
            }
        }
    }
    Ok(())
}
