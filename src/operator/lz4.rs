//! LZ4 operator
//!
//! Lossless block compression via `lz4_flex`, with optional byte shuffle.
//!
//! Parameters:
//! - `shuffle` (bool, default false)

use lz4_flex::block::DecompressError;

use crate::error::{Result, StageError};
use crate::variable::DataType;

use super::shuffle::{shuffle, unshuffle};
use super::{
    check_params, ensure_input_len, ensure_supported, merge_params, parse_bool, read_header,
    size_info, status, block_len, write_header, Operator, OperatorType, Params,
};

const KNOWN_PARAMS: &[&str] = &["shuffle"];

const FLAG_SHUFFLE: u8 = 0x01;

/// LZ4 block codec
#[derive(Debug, Clone)]
pub struct Lz4Operator {
    params: Params,
}

impl Lz4Operator {
    pub fn new(params: &Params) -> Result<Self> {
        check_params(OperatorType::Lz4, params, KNOWN_PARAMS)?;
        if let Some(v) = params.get("shuffle") {
            parse_bool(OperatorType::Lz4, "shuffle", v)?;
        }
        Ok(Self {
            params: params.clone(),
        })
    }

    fn shuffle_enabled(params: &Params) -> Result<bool> {
        match params.get("shuffle") {
            Some(v) => parse_bool(OperatorType::Lz4, "shuffle", v),
            None => Ok(false),
        }
    }
}

/// Stable numeric code for each lz4_flex failure
fn lz4_status(e: &DecompressError) -> i64 {
    match e {
        DecompressError::OutputTooSmall { .. } => 1,
        DecompressError::LiteralOutOfBounds => 2,
        DecompressError::ExpectedAnotherByte => 3,
        DecompressError::OffsetOutOfBounds => 4,
        #[allow(unreachable_patterns)]
        _ => 5,
    }
}

impl Operator for Lz4Operator {
    fn kind(&self) -> OperatorType {
        OperatorType::Lz4
    }

    fn params(&self) -> &Params {
        &self.params
    }

    fn is_data_type_valid(&self, _data_type: DataType) -> bool {
        true
    }

    fn compress(
        &self,
        input: &[u8],
        _block_start: &[u64],
        block_count: &[u64],
        data_type: DataType,
        params: &Params,
    ) -> Result<(Vec<u8>, Params)> {
        ensure_supported(self, data_type)?;
        ensure_input_len(OperatorType::Lz4, input, block_count, data_type)?;
        let params = merge_params(OperatorType::Lz4, &self.params, params, KNOWN_PARAMS)?;
        let shuffled = Self::shuffle_enabled(&params)?;

        let body = if shuffled {
            lz4_flex::compress_prepend_size(&shuffle(input, data_type.size()))
        } else {
            lz4_flex::compress_prepend_size(input)
        };

        let mut out = Vec::with_capacity(super::HEADER_SIZE + body.len());
        write_header(&mut out, OperatorType::Lz4, data_type, if shuffled { FLAG_SHUFFLE } else { 0 });
        out.extend_from_slice(&body);

        let info = size_info(input.len(), out.len(), block_count.iter().product());
        Ok((out, info))
    }

    fn decompress(
        &self,
        input: &[u8],
        data_type: DataType,
        _block_start: &[u64],
        block_count: &[u64],
        _params: &Params,
    ) -> Result<Vec<u8>> {
        ensure_supported(self, data_type)?;
        let (flags, body) = read_header(OperatorType::Lz4, data_type, input)?;
        let expected = block_len(block_count, data_type);

        // The size prefix is checked before decoding so a corrupt prefix
        // cannot trigger a huge allocation.
        if body.len() < 4 {
            return Err(StageError::operator("lz4", status::TRUNCATED, "missing size prefix"));
        }
        let declared = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
        if declared != expected {
            return Err(StageError::operator(
                "lz4",
                status::SIZE_MISMATCH,
                format!("stream declares {} bytes, block needs {}", declared, expected),
            ));
        }

        let raw = lz4_flex::decompress_size_prepended(body)
            .map_err(|e| StageError::operator("lz4", lz4_status(&e), e.to_string()))?;
        if raw.len() != expected {
            return Err(StageError::operator(
                "lz4",
                status::SIZE_MISMATCH,
                format!("decoded {} bytes, block needs {}", raw.len(), expected),
            ));
        }

        if flags & FLAG_SHUFFLE != 0 {
            Ok(unshuffle(&raw, data_type.size()))
        } else {
            Ok(raw)
        }
    }
}
