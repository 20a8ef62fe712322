//! Quantize operator
//!
//! Lossy, error-bounded compression for floating-point blocks. Exactly one
//! of the following parameters selects the mode:
//!
//! - `accuracy`: absolute tolerance `t > 0`. Values are snapped to a grid of
//!   spacing `t`, delta + zigzag + varint coded, then LZ4 packed.
//!   Reconstruction error is at most `t / 2` plus the output type's rounding.
//! - `precision`: mantissa bits kept (>= 1). Values are rounded to that many
//!   mantissa bits, then LZ4 packed. Relative error is at most `2^-precision`.
//!
//! Stream body (after the common header):
//! ```text
//! accuracy:  [tolerance f64 LE (8)][lz4 size-prepended varint stream]
//! precision: [bits u8 (1)][lz4 size-prepended rounded values]
//! ```

use crate::error::{Result, StageError};
use crate::variable::{to_bytes, volume, DataType, Element};

use super::{
    block_len, check_params, ensure_input_len, ensure_supported, merge_params, read_header,
    size_info, status, write_header, Operator, OperatorType, Params, HEADER_SIZE,
};

const KNOWN_PARAMS: &[&str] = &["accuracy", "precision"];

const MODE_ACCURACY: u8 = 0x01;
const MODE_PRECISION: u8 = 0x02;

/// Largest grid index that still maps exactly onto an f64
const MAX_GRID_INDEX: f64 = 9_007_199_254_740_992.0; // 2^53

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Accuracy(f64),
    Precision(u32),
}

/// Error-bounded floating-point codec
#[derive(Debug, Clone)]
pub struct QuantizeOperator {
    params: Params,
}

impl QuantizeOperator {
    pub fn new(params: &Params) -> Result<Self> {
        check_params(OperatorType::Quantize, params, KNOWN_PARAMS)?;
        parse_mode(params)?;
        Ok(Self {
            params: params.clone(),
        })
    }
}

fn parse_mode(params: &Params) -> Result<Mode> {
    match (params.get("accuracy"), params.get("precision")) {
        (Some(a), None) => {
            let t: f64 = a.parse().map_err(|_| {
                StageError::Config(format!("Operator 'quantize': accuracy '{}' is not a number", a))
            })?;
            if !(t.is_finite() && t > 0.0) {
                return Err(StageError::Config(format!(
                    "Operator 'quantize': accuracy must be positive, got {}",
                    t
                )));
            }
            Ok(Mode::Accuracy(t))
        }
        (None, Some(p)) => {
            let bits: u32 = p.parse().map_err(|_| {
                StageError::Config(format!("Operator 'quantize': precision '{}' is not an integer", p))
            })?;
            if bits == 0 {
                return Err(StageError::Config(
                    "Operator 'quantize': precision must be at least 1".to_string(),
                ));
            }
            Ok(Mode::Precision(bits))
        }
        (Some(_), Some(_)) => Err(StageError::Config(
            "Operator 'quantize': set either accuracy or precision, not both".to_string(),
        )),
        (None, None) => Err(StageError::Config(
            "Operator 'quantize': one of accuracy or precision is required".to_string(),
        )),
    }
}

fn quantize_error(code: i64, message: impl Into<String>) -> StageError {
    StageError::operator("quantize", code, message)
}

// =============================================================================
// Float element support
// =============================================================================

/// Floating-point element types the quantizer understands
trait FloatElement: Element {
    const MANTISSA_BITS: u32;

    fn from_f64(v: f64) -> Self;

    /// Round to `bits` mantissa bits (round half up on magnitude)
    fn round_mantissa(self, bits: u32) -> Self;
}

impl FloatElement for f32 {
    const MANTISSA_BITS: u32 = 23;

    fn from_f64(v: f64) -> Self {
        v as f32
    }

    fn round_mantissa(self, bits: u32) -> Self {
        if bits >= Self::MANTISSA_BITS || !self.is_finite() {
            return self;
        }
        let drop = Self::MANTISSA_BITS - bits;
        let mask = !((1u32 << drop) - 1);
        let raw = self.to_bits();
        let rounded = f32::from_bits(raw.wrapping_add(1u32 << (drop - 1)) & mask);
        if rounded.is_finite() {
            rounded
        } else {
            f32::from_bits(raw & mask)
        }
    }
}

impl FloatElement for f64 {
    const MANTISSA_BITS: u32 = 52;

    fn from_f64(v: f64) -> Self {
        v
    }

    fn round_mantissa(self, bits: u32) -> Self {
        if bits >= Self::MANTISSA_BITS || !self.is_finite() {
            return self;
        }
        let drop = Self::MANTISSA_BITS - bits;
        let mask = !((1u64 << drop) - 1);
        let raw = self.to_bits();
        let rounded = f64::from_bits(raw.wrapping_add(1u64 << (drop - 1)) & mask);
        if rounded.is_finite() {
            rounded
        } else {
            f64::from_bits(raw & mask)
        }
    }
}

/// Run a generic float routine for a runtime type tag
macro_rules! dispatch_float {
    ($dt:expr, $t:ident => $body:expr) => {
        match $dt {
            DataType::Float => {
                type $t = f32;
                $body
            }
            DataType::Double => {
                type $t = f64;
                $body
            }
            other => Err(quantize_error(
                status::UNSUPPORTED_TYPE,
                format!("data type {} is not supported", other),
            )),
        }
    };
}

// =============================================================================
// Varint coding
// =============================================================================

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

fn put_varint(out: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        out.push((v as u8) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

fn get_varint(input: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *input
            .get(*pos)
            .ok_or_else(|| quantize_error(status::TRUNCATED, "varint stream ended early"))?;
        *pos += 1;
        if shift >= 64 {
            return Err(quantize_error(status::BAD_HEADER, "varint longer than 64 bits"));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

// =============================================================================
// Typed encode/decode
// =============================================================================

fn encode_accuracy<T: FloatElement>(input: &[u8], tolerance: f64) -> Result<Vec<u8>> {
    let mut stream = Vec::with_capacity(input.len() / 2);
    let mut prev = 0i64;
    for chunk in input.chunks_exact(T::DATA_TYPE.size()) {
        let v = T::from_bytes(chunk).as_f64();
        if !v.is_finite() {
            return Err(quantize_error(
                status::OUT_OF_RANGE,
                format!("non-finite value {} cannot be quantized", v),
            ));
        }
        let q = (v / tolerance).round();
        if q.abs() > MAX_GRID_INDEX {
            return Err(quantize_error(
                status::OUT_OF_RANGE,
                format!("value {} is too large for tolerance {}", v, tolerance),
            ));
        }
        let q = q as i64;
        put_varint(&mut stream, zigzag(q.wrapping_sub(prev)));
        prev = q;
    }
    Ok(stream)
}

fn decode_accuracy<T: FloatElement>(stream: &[u8], tolerance: f64, elements: usize) -> Result<Vec<u8>> {
    let mut values: Vec<T> = Vec::with_capacity(elements);
    let mut pos = 0;
    let mut prev = 0i64;
    for _ in 0..elements {
        let q = prev.wrapping_add(unzigzag(get_varint(stream, &mut pos)?));
        values.push(T::from_f64(q as f64 * tolerance));
        prev = q;
    }
    if pos != stream.len() {
        return Err(quantize_error(
            status::SIZE_MISMATCH,
            format!("{} trailing bytes after {} values", stream.len() - pos, elements),
        ));
    }
    Ok(to_bytes(&values))
}

fn round_precision<T: FloatElement>(input: &[u8], bits: u32) -> Result<Vec<u8>> {
    let values: Vec<T> = input
        .chunks_exact(T::DATA_TYPE.size())
        .map(|c| T::from_bytes(c).round_mantissa(bits))
        .collect();
    Ok(to_bytes(&values))
}

fn unpack_lz4(body: &[u8], max_len: usize) -> Result<Vec<u8>> {
    if body.len() < 4 {
        return Err(quantize_error(status::TRUNCATED, "missing size prefix"));
    }
    let declared = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
    if declared > max_len {
        return Err(quantize_error(
            status::SIZE_MISMATCH,
            format!("stream declares {} bytes, at most {} expected", declared, max_len),
        ));
    }
    lz4_flex::decompress_size_prepended(body)
        .map_err(|e| quantize_error(status::BAD_HEADER, e.to_string()))
}

impl Operator for QuantizeOperator {
    fn kind(&self) -> OperatorType {
        OperatorType::Quantize
    }

    fn params(&self) -> &Params {
        &self.params
    }

    fn is_data_type_valid(&self, data_type: DataType) -> bool {
        data_type.is_floating_point()
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
        ensure_input_len(OperatorType::Quantize, input, block_count, data_type)?;
        let params = merge_params(OperatorType::Quantize, &self.params, params, KNOWN_PARAMS)?;
        let mode = parse_mode(&params)?;

        let mut out = Vec::with_capacity(HEADER_SIZE + input.len() / 2);
        match mode {
            Mode::Accuracy(tolerance) => {
                let stream = dispatch_float!(data_type, T => encode_accuracy::<T>(input, tolerance))?;
                write_header(&mut out, OperatorType::Quantize, data_type, MODE_ACCURACY);
                out.extend_from_slice(&tolerance.to_le_bytes());
                out.extend_from_slice(&lz4_flex::compress_prepend_size(&stream));
            }
            Mode::Precision(bits) => {
                let rounded = dispatch_float!(data_type, T => round_precision::<T>(input, bits))?;
                write_header(&mut out, OperatorType::Quantize, data_type, MODE_PRECISION);
                out.push(bits.min(u8::MAX as u32) as u8);
                out.extend_from_slice(&lz4_flex::compress_prepend_size(&rounded));
            }
        }

        let mut info = size_info(input.len(), out.len(), volume(block_count));
        match mode {
            Mode::Accuracy(t) => info.insert("accuracy".to_string(), t.to_string()),
            Mode::Precision(p) => info.insert("precision".to_string(), p.to_string()),
        };
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
        let (mode, body) = read_header(OperatorType::Quantize, data_type, input)?;
        let expected = block_len(block_count, data_type);
        let elements = volume(block_count) as usize;

        match mode {
            MODE_ACCURACY => {
                if body.len() < 8 {
                    return Err(quantize_error(status::TRUNCATED, "missing tolerance"));
                }
                let mut t = [0u8; 8];
                t.copy_from_slice(&body[..8]);
                let tolerance = f64::from_le_bytes(t);
                // at most 10 varint bytes per value
                let stream = unpack_lz4(&body[8..], elements.saturating_mul(10))?;
                dispatch_float!(data_type, T => decode_accuracy::<T>(&stream, tolerance, elements))
            }
            MODE_PRECISION => {
                if body.is_empty() {
                    return Err(quantize_error(status::TRUNCATED, "missing precision"));
                }
                let raw = unpack_lz4(&body[1..], expected)?;
                if raw.len() != expected {
                    return Err(quantize_error(
                        status::SIZE_MISMATCH,
                        format!("decoded {} bytes, block needs {}", raw.len(), expected),
                    ));
                }
                Ok(raw)
            }
            other => Err(quantize_error(
                status::BAD_HEADER,
                format!("unknown quantize mode 0x{:02x}", other),
            )),
        }
    }
}
