//! Zstandard operator
//!
//! Lossless block compression through the raw `zstd_safe` bindings so the
//! native zstd error code reaches the caller.
//!
//! Parameters:
//! - `level` (1..=22, default 3)
//! - `shuffle` (bool, default false)

use ::zstd::zstd_safe;

use crate::error::{Result, StageError};
use crate::variable::DataType;

use super::shuffle::{shuffle, unshuffle};
use super::{
    block_len, check_params, ensure_input_len, ensure_supported, merge_params, parse_bool,
    read_header, size_info, status, write_header, Operator, OperatorType, Params, HEADER_SIZE,
};

const KNOWN_PARAMS: &[&str] = &["level", "shuffle"];

const DEFAULT_LEVEL: i32 = 3;

const FLAG_SHUFFLE: u8 = 0x01;

/// Zstandard block codec
#[derive(Debug, Clone)]
pub struct ZstdOperator {
    params: Params,
}

impl ZstdOperator {
    pub fn new(params: &Params) -> Result<Self> {
        check_params(OperatorType::Zstd, params, KNOWN_PARAMS)?;
        parse_level(params)?;
        if let Some(v) = params.get("shuffle") {
            parse_bool(OperatorType::Zstd, "shuffle", v)?;
        }
        Ok(Self {
            params: params.clone(),
        })
    }
}

fn parse_level(params: &Params) -> Result<i32> {
    let Some(raw) = params.get("level") else {
        return Ok(DEFAULT_LEVEL);
    };
    let level: i32 = raw
        .parse()
        .map_err(|_| StageError::Config(format!("Operator 'zstd': level '{}' is not an integer", raw)))?;
    if !(1..=22).contains(&level) {
        return Err(StageError::Config(format!(
            "Operator 'zstd': level {} outside 1..=22",
            level
        )));
    }
    Ok(level)
}

/// zstd reports errors as `(size_t)-ZSTD_ErrorCode`; surface the enum value
fn zstd_error(code: usize) -> StageError {
    let native = 0usize.wrapping_sub(code) as i64;
    StageError::operator("zstd", native, zstd_safe::get_error_name(code))
}

impl Operator for ZstdOperator {
    fn kind(&self) -> OperatorType {
        OperatorType::Zstd
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
        ensure_input_len(OperatorType::Zstd, input, block_count, data_type)?;
        let params = merge_params(OperatorType::Zstd, &self.params, params, KNOWN_PARAMS)?;
        let level = parse_level(&params)?;
        let shuffled = match params.get("shuffle") {
            Some(v) => parse_bool(OperatorType::Zstd, "shuffle", v)?,
            None => false,
        };

        let source = if shuffled {
            shuffle(input, data_type.size())
        } else {
            input.to_vec()
        };

        let mut body: Vec<u8> = Vec::with_capacity(zstd_safe::compress_bound(source.len()));
        zstd_safe::compress(&mut body, &source, level).map_err(zstd_error)?;

        let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
        write_header(&mut out, OperatorType::Zstd, data_type, if shuffled { FLAG_SHUFFLE } else { 0 });
        out.extend_from_slice(&body);

        let mut info = size_info(input.len(), out.len(), block_count.iter().product());
        info.insert("level".to_string(), level.to_string());
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
        let (flags, body) = read_header(OperatorType::Zstd, data_type, input)?;
        let expected = block_len(block_count, data_type);

        // Capacity is the exact block size; a larger frame fails inside zstd.
        let mut raw: Vec<u8> = Vec::with_capacity(expected);
        zstd_safe::decompress(&mut raw, body).map_err(zstd_error)?;
        if raw.len() != expected {
            return Err(StageError::operator(
                "zstd",
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
