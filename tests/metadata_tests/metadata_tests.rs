//! Tests for block placement metadata
//!
//! These tests verify:
//! - Frame round-trip and wire layout
//! - CRC, magic, version and length corruption detection
//! - StepIndex merging: ordering, consistency checks, ownership checks

use atlasstage::metadata::{
    decode_metadata, encode_metadata, BlockInfo, BlockRecord, StepIndex, WriterMetadata, HEADER_SIZE, MAGIC,
};
use atlasstage::operator::{OperatorSpec, OperatorType};
use atlasstage::variable::{DataType, VariableDef};
use atlasstage::StageError;

// =============================================================================
// Helper Functions
// =============================================================================

fn field() -> VariableDef {
    VariableDef::global_array("field", DataType::Double, vec![100])
}

fn block(writer_rank: usize, block_id: usize, start: u64, count: u64) -> BlockInfo {
    BlockInfo {
        writer_rank,
        block_id,
        start: vec![start],
        count: vec![count],
        operator: None,
        payload_offset: block_id as u64 * count * 8,
        payload_len: count * 8,
        min: Some(0.0),
        max: Some(1.0),
        value: None,
    }
}

fn writer(rank: usize, step: u64, blocks: Vec<BlockInfo>) -> WriterMetadata {
    WriterMetadata {
        writer_rank: rank,
        step,
        variables: vec![field()],
        blocks: blocks
            .into_iter()
            .map(|info| BlockRecord {
                variable: "field".to_string(),
                info,
            })
            .collect(),
    }
}

fn sample_metadata() -> WriterMetadata {
    let mut meta = writer(1, 7, vec![block(1, 0, 50, 25), block(1, 1, 75, 25)]);
    meta.blocks[1].info.operator = Some(OperatorSpec::new(OperatorType::Zstd).with_param("level", "9"));
    meta.variables.push(VariableDef::global_value("time", DataType::Float));
    meta.blocks.push(BlockRecord {
        variable: "time".to_string(),
        info: BlockInfo {
            writer_rank: 1,
            block_id: 0,
            start: vec![],
            count: vec![],
            operator: None,
            payload_offset: 0,
            payload_len: 0,
            min: Some(0.5),
            max: Some(0.5),
            value: Some(0.5f32.to_ne_bytes().to_vec()),
        },
    });
    meta
}

// =============================================================================
// Frame Tests
// =============================================================================

#[test]
fn test_frame_round_trip() {
    let meta = sample_metadata();
    let frame = encode_metadata(&meta).unwrap();
    let decoded = decode_metadata(&frame).unwrap();
    assert_eq!(decoded, meta);
}

#[test]
fn test_frame_header_layout() {
    let frame = encode_metadata(&sample_metadata()).unwrap();

    assert_eq!(&frame[0..4], MAGIC);
    assert_eq!(u16::from_le_bytes([frame[4], frame[5]]), 1);
    let len = u32::from_le_bytes([frame[6], frame[7], frame[8], frame[9]]) as usize;
    assert_eq!(frame.len(), HEADER_SIZE + len);
    let crc = u32::from_le_bytes([frame[10], frame[11], frame[12], frame[13]]);
    assert_eq!(crc, crc32fast::hash(&frame[HEADER_SIZE..]));
}

#[test]
fn test_frame_detects_payload_corruption() {
    let mut frame = encode_metadata(&sample_metadata()).unwrap();
    let last = frame.len() - 1;
    frame[last] ^= 0xFF;

    let result = decode_metadata(&frame);
    assert!(matches!(result, Err(StageError::MetadataCorruption(_))));
}

#[test]
fn test_frame_detects_bad_magic() {
    let mut frame = encode_metadata(&sample_metadata()).unwrap();
    frame[0] = b'X';
    assert!(matches!(decode_metadata(&frame), Err(StageError::MetadataCorruption(_))));
}

#[test]
fn test_frame_detects_bad_version() {
    let mut frame = encode_metadata(&sample_metadata()).unwrap();
    frame[4] = 2;
    assert!(matches!(decode_metadata(&frame), Err(StageError::MetadataCorruption(_))));
}

#[test]
fn test_frame_detects_truncation() {
    let frame = encode_metadata(&sample_metadata()).unwrap();

    assert!(matches!(decode_metadata(&frame[..HEADER_SIZE - 1]), Err(StageError::MetadataCorruption(_))));
    assert!(matches!(decode_metadata(&frame[..frame.len() - 3]), Err(StageError::MetadataCorruption(_))));
}

#[test]
fn test_frame_detects_trailing_bytes() {
    let mut frame = encode_metadata(&sample_metadata()).unwrap();
    frame.push(0);
    assert!(matches!(decode_metadata(&frame), Err(StageError::MetadataCorruption(_))));
}

// =============================================================================
// Step Index Tests
// =============================================================================

#[test]
fn test_index_orders_by_rank_then_start() {
    // Writers arrive out of rank order and list blocks out of start order
    let w2 = writer(2, 3, vec![block(2, 0, 80, 20)]);
    let w0 = writer(0, 3, vec![block(0, 0, 30, 10), block(0, 1, 0, 30)]);
    let w1 = writer(1, 3, vec![block(1, 0, 40, 40)]);

    let index = StepIndex::from_writers(3, vec![w2, w0, w1]).unwrap();
    let blocks = index.blocks_info("field");

    let order: Vec<(usize, u64)> = blocks.iter().map(|b| (b.writer_rank, b.start[0])).collect();
    assert_eq!(order, vec![(0, 0), (0, 30), (1, 40), (2, 80)]);
    assert_eq!(index.step(), 3);
}

#[test]
fn test_index_from_frames() {
    let frames: Vec<Vec<u8>> = vec![
        encode_metadata(&writer(0, 5, vec![block(0, 0, 0, 50)])).unwrap(),
        encode_metadata(&writer(1, 5, vec![block(1, 0, 50, 50)])).unwrap(),
    ];

    let index = StepIndex::from_frames(5, &frames).unwrap();
    assert_eq!(index.variable("field"), Some(&field()));
    assert_eq!(index.blocks_info("field").len(), 2);
    assert_eq!(index.variables().count(), 1);
}

#[test]
fn test_index_unknown_variable_has_no_blocks() {
    let index = StepIndex::from_writers(0, vec![writer(0, 0, vec![])]).unwrap();
    assert!(index.variable("missing").is_none());
    assert!(index.blocks_info("missing").is_empty());
    assert!(index.blocks_info("field").is_empty());
}

#[test]
fn test_index_rejects_wrong_step() {
    let result = StepIndex::from_writers(4, vec![writer(0, 3, vec![])]);
    assert!(matches!(result, Err(StageError::MetadataCorruption(_))));
}

#[test]
fn test_index_rejects_inconsistent_declarations() {
    let w0 = writer(0, 0, vec![]);
    let mut w1 = writer(1, 0, vec![]);
    w1.variables[0].data_type = DataType::Float;

    let result = StepIndex::from_writers(0, vec![w0, w1]);
    assert!(matches!(result, Err(StageError::VariableMismatch(_))));
}

#[test]
fn test_index_rejects_foreign_block() {
    let result = StepIndex::from_writers(0, vec![writer(0, 0, vec![block(1, 0, 0, 10)])]);
    assert!(matches!(result, Err(StageError::MetadataCorruption(_))));
}

#[test]
fn test_index_rejects_undeclared_variable() {
    let mut w0 = writer(0, 0, vec![block(0, 0, 0, 10)]);
    w0.variables.clear();

    let result = StepIndex::from_writers(0, vec![w0]);
    assert!(matches!(result, Err(StageError::MetadataCorruption(_))));
}

#[test]
fn test_index_rejects_corrupt_frame() {
    let mut frame = encode_metadata(&writer(0, 0, vec![block(0, 0, 0, 10)])).unwrap();
    frame[HEADER_SIZE] ^= 0x01;

    let result = StepIndex::from_frames(0, &[frame]);
    assert!(matches!(result, Err(StageError::MetadataCorruption(_))));
}

#[test]
fn test_index_rejects_bad_block_geometry() {
    let mut rank_mismatch = block(0, 0, 0, 10);
    rank_mismatch.count.clear();

    let mut extra_dim = block(0, 0, 0, 10);
    extra_dim.start.push(0);
    extra_dim.count.push(1);

    let past_shape = block(0, 0, 95, 10);

    let mut overflow = block(0, 0, 0, 10);
    overflow.start = vec![u64::MAX];

    for bad in [rank_mismatch, extra_dim, past_shape, overflow] {
        let result = StepIndex::from_writers(0, vec![writer(0, 0, vec![bad.clone()])]);
        assert!(
            matches!(result, Err(StageError::MetadataCorruption(_))),
            "accepted {:?}",
            bad
        );
    }
}

#[test]
fn test_index_rejects_bad_local_and_value_blocks() {
    let mut meta = writer(0, 0, vec![]);
    meta.variables.push(VariableDef::local_array("ids", DataType::UInt64));
    meta.blocks.push(BlockRecord {
        variable: "ids".to_string(),
        info: block(0, 0, 3, 4),
    });
    let result = StepIndex::from_writers(0, vec![meta]);
    assert!(matches!(result, Err(StageError::MetadataCorruption(_))));

    let mut meta = sample_metadata();
    meta.step = 0;
    meta.writer_rank = 0;
    for record in meta.blocks.iter_mut() {
        record.info.writer_rank = 0;
    }
    meta.blocks[2].info.count = vec![2];
    let result = StepIndex::from_writers(0, vec![meta]);
    assert!(matches!(result, Err(StageError::MetadataCorruption(_))));
}

#[test]
fn test_index_accepts_edge_of_shape_blocks() {
    let w0 = writer(0, 0, vec![block(0, 0, 90, 10), block(0, 1, 0, 0)]);
    let index = StepIndex::from_writers(0, vec![w0]).unwrap();
    assert_eq!(index.blocks_info("field").len(), 2);
}
