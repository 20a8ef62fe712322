//! Operator Module
//!
//! Pluggable codecs that shrink block payloads before transport.
//!
//! ## Contract
//! - An operator is built once from its `Params` and reused for many calls;
//!   it keeps no reference into caller buffers.
//! - `is_data_type_valid` must be checked before `compress`; calling either
//!   direction with an unsupported type fails with `StageError::Operator`.
//! - `decompress` returns exactly `volume(block_count) * data_type.size()` bytes.
//!
//! ## Stream Header
//! Every compressed stream starts with a 4-byte header:
//! ```text
//! ┌───────────┬────────────┬─────────────┬───────────┐
//! │ OpId (1)  │ Version(1) │ DataType(1) │ Flags (1) │
//! └───────────┴────────────┴─────────────┴───────────┘
//! ```
//!
//! ## Status Codes
//! Codec-native codes are reported as positive values. Failures detected by
//! this layer use the negative codes in [`status`].

mod lz4;
mod quantize;
mod shuffle;
mod zstd;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StageError};
use crate::variable::{volume, DataType};

pub use self::lz4::Lz4Operator;
pub use self::quantize::QuantizeOperator;
pub use self::zstd::ZstdOperator;

/// Ordered option name -> value mapping
pub type Params = BTreeMap<String, String>;

/// Status codes raised by the operator layer itself
pub mod status {
    pub const UNSUPPORTED_TYPE: i64 = -1;
    pub const TRUNCATED: i64 = -2;
    pub const BAD_HEADER: i64 = -3;
    pub const SIZE_MISMATCH: i64 = -4;
    pub const OUT_OF_RANGE: i64 = -5;
}

/// Current stream header version
pub(crate) const FORMAT_VERSION: u8 = 1;

/// Stream header size in bytes
pub const HEADER_SIZE: usize = 4;

// =============================================================================
// Operator Trait
// =============================================================================

/// A block codec
pub trait Operator: Send + Sync {
    fn kind(&self) -> OperatorType;

    /// Parameters the operator was built with
    fn params(&self) -> &Params;

    fn is_data_type_valid(&self, data_type: DataType) -> bool;

    /// Compress one block
    ///
    /// `params` overrides construction parameters for this call only.
    /// Returns the stream and codec-reported metrics.
    fn compress(
        &self,
        input: &[u8],
        block_start: &[u64],
        block_count: &[u64],
        data_type: DataType,
        params: &Params,
    ) -> Result<(Vec<u8>, Params)>;

    /// Reconstruct one block
    fn decompress(
        &self,
        input: &[u8],
        data_type: DataType,
        block_start: &[u64],
        block_count: &[u64],
        params: &Params,
    ) -> Result<Vec<u8>>;
}

// =============================================================================
// Operator Registry
// =============================================================================

/// Registered operator kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperatorType {
    Lz4 = 0x01,
    Zstd = 0x02,
    Quantize = 0x03,
}

impl OperatorType {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperatorType::Lz4 => "lz4",
            OperatorType::Zstd => "zstd",
            OperatorType::Quantize => "quantize",
        }
    }

    /// Whether decompression reproduces the input bit for bit
    pub fn is_lossless(self) -> bool {
        !matches!(self, OperatorType::Quantize)
    }
}

impl fmt::Display for OperatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatorType {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lz4" => Ok(OperatorType::Lz4),
            "zstd" => Ok(OperatorType::Zstd),
            "quantize" => Ok(OperatorType::Quantize),
            other => Err(StageError::Config(format!("Unknown operator type: {}", other))),
        }
    }
}

/// An operator kind plus its parameters, as recorded per block
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperatorSpec {
    pub kind: OperatorType,
    pub params: Params,
}

impl OperatorSpec {
    pub fn new(kind: OperatorType) -> Self {
        Self {
            kind,
            params: Params::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Construct the operator this spec describes
    pub fn build(&self) -> Result<Arc<dyn Operator>> {
        build_operator(self.kind, &self.params)
    }
}

/// Construct an operator, rejecting unrecognized parameters
pub fn build_operator(kind: OperatorType, params: &Params) -> Result<Arc<dyn Operator>> {
    Ok(match kind {
        OperatorType::Lz4 => Arc::new(Lz4Operator::new(params)?),
        OperatorType::Zstd => Arc::new(ZstdOperator::new(params)?),
        OperatorType::Quantize => Arc::new(QuantizeOperator::new(params)?),
    })
}

/// Operators built so far, keyed by spec
///
/// Each distinct spec is constructed once and reused for every block that
/// declares it.
#[derive(Default)]
pub struct OperatorCache {
    built: HashMap<OperatorSpec, Arc<dyn Operator>>,
}

impl OperatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(&mut self, spec: &OperatorSpec) -> Result<Arc<dyn Operator>> {
        if let Some(op) = self.built.get(spec) {
            return Ok(Arc::clone(op));
        }
        let op = spec.build()?;
        tracing::debug!("Built operator {} with {:?}", spec.kind, spec.params);
        self.built.insert(spec.clone(), Arc::clone(&op));
        Ok(op)
    }

    pub fn len(&self) -> usize {
        self.built.len()
    }

    pub fn is_empty(&self) -> bool {
        self.built.is_empty()
    }
}

// =============================================================================
// Shared helpers for operator implementations
// =============================================================================

/// Reject keys not in `known`
pub(crate) fn check_params(operator: OperatorType, params: &Params, known: &[&str]) -> Result<()> {
    for key in params.keys() {
        if !known.contains(&key.as_str()) {
            return Err(StageError::Config(format!(
                "Operator '{}' does not recognize parameter '{}'",
                operator, key
            )));
        }
    }
    Ok(())
}

/// Per-call parameters layered over construction parameters
pub(crate) fn merge_params(
    operator: OperatorType,
    base: &Params,
    call: &Params,
    known: &[&str],
) -> Result<Params> {
    check_params(operator, call, known)?;
    let mut merged = base.clone();
    merged.extend(call.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(merged)
}

pub(crate) fn parse_bool(operator: OperatorType, key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "1" | "yes" => Ok(true),
        "false" | "off" | "0" | "no" => Ok(false),
        _ => Err(StageError::Config(format!(
            "Operator '{}': '{}' must be a boolean, got '{}'",
            operator, key, value
        ))),
    }
}

pub(crate) fn ensure_supported(op: &dyn Operator, data_type: DataType) -> Result<()> {
    if op.is_data_type_valid(data_type) {
        Ok(())
    } else {
        Err(StageError::operator(
            op.kind().as_str(),
            status::UNSUPPORTED_TYPE,
            format!("data type {} is not supported", data_type),
        ))
    }
}

/// Byte length of a block of `block_count` elements
pub(crate) fn block_len(block_count: &[u64], data_type: DataType) -> usize {
    volume(block_count) as usize * data_type.size()
}

pub(crate) fn ensure_input_len(
    operator: OperatorType,
    input: &[u8],
    block_count: &[u64],
    data_type: DataType,
) -> Result<usize> {
    let expected = block_len(block_count, data_type);
    if input.len() != expected {
        return Err(StageError::operator(
            operator.as_str(),
            status::SIZE_MISMATCH,
            format!("input is {} bytes, block needs {}", input.len(), expected),
        ));
    }
    Ok(expected)
}

pub(crate) fn write_header(out: &mut Vec<u8>, operator: OperatorType, data_type: DataType, flags: u8) {
    out.extend_from_slice(&[operator.id(), FORMAT_VERSION, data_type.id(), flags]);
}

/// Validate the stream header and return (flags, body)
pub(crate) fn read_header(operator: OperatorType, data_type: DataType, input: &[u8]) -> Result<(u8, &[u8])> {
    if input.len() < HEADER_SIZE {
        return Err(StageError::operator(
            operator.as_str(),
            status::TRUNCATED,
            format!("stream of {} bytes is shorter than the header", input.len()),
        ));
    }
    if input[0] != operator.id() {
        return Err(StageError::operator(
            operator.as_str(),
            status::BAD_HEADER,
            format!("stream was written by operator id 0x{:02x}", input[0]),
        ));
    }
    if input[1] != FORMAT_VERSION {
        return Err(StageError::operator(
            operator.as_str(),
            status::BAD_HEADER,
            format!("unsupported stream version {}", input[1]),
        ));
    }
    if input[2] != data_type.id() {
        let found = DataType::from_id(input[2])
            .map(|dt| dt.to_string())
            .unwrap_or_else(|| format!("0x{:02x}", input[2]));
        return Err(StageError::operator(
            operator.as_str(),
            status::BAD_HEADER,
            format!("stream holds {}, caller expects {}", found, data_type),
        ));
    }
    Ok((input[3], &input[HEADER_SIZE..]))
}

/// Standard metrics reported by every operator
pub(crate) fn size_info(bytes_in: usize, bytes_out: usize, elements: u64) -> Params {
    let mut info = Params::new();
    info.insert("bytes_in".to_string(), bytes_in.to_string());
    info.insert("bytes_out".to_string(), bytes_out.to_string());
    if bytes_out > 0 {
        info.insert(
            "ratio".to_string(),
            format!("{:.3}", bytes_in as f64 / bytes_out as f64),
        );
    }
    if elements > 0 {
        info.insert(
            "rate".to_string(),
            format!("{:.3}", (bytes_out * 8) as f64 / elements as f64),
        );
    }
    info
}
