//! Element type registry
//!
//! One runtime tag (`DataType`) per supported scalar type, plus the `Element`
//! trait that ties a Rust type to its tag. Code that needs per-type behavior
//! writes one generic function and dispatches on the tag with
//! `dispatch_element!`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StageError};

/// Supported element types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    Int8 = 0x01,
    Int16 = 0x02,
    Int32 = 0x03,
    Int64 = 0x04,
    UInt8 = 0x05,
    UInt16 = 0x06,
    UInt32 = 0x07,
    UInt64 = 0x08,
    Float = 0x09,
    Double = 0x0A,
}

impl DataType {
    /// Every registered type, in id order
    pub const ALL: [DataType; 10] = [
        DataType::Int8,
        DataType::Int16,
        DataType::Int32,
        DataType::Int64,
        DataType::UInt8,
        DataType::UInt16,
        DataType::UInt32,
        DataType::UInt64,
        DataType::Float,
        DataType::Double,
    ];

    /// Size of one element in bytes
    pub fn size(self) -> usize {
        match self {
            DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Double => 8,
        }
    }

    /// Wire id
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<DataType> {
        DataType::ALL.iter().copied().find(|dt| dt.id() == id)
    }

    pub fn is_floating_point(self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Int8 => "int8_t",
            DataType::Int16 => "int16_t",
            DataType::Int32 => "int32_t",
            DataType::Int64 => "int64_t",
            DataType::UInt8 => "uint8_t",
            DataType::UInt16 => "uint16_t",
            DataType::UInt32 => "uint32_t",
            DataType::UInt64 => "uint64_t",
            DataType::Float => "float",
            DataType::Double => "double",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self> {
        DataType::ALL
            .iter()
            .copied()
            .find(|dt| dt.name() == s)
            .ok_or_else(|| StageError::Config(format!("Unknown data type: {}", s)))
    }
}

// =============================================================================
// Element trait
// =============================================================================

/// A Rust scalar type with a registered `DataType`
pub trait Element: Copy + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    /// Append the native-endian bytes of `self`
    fn extend_bytes(self, out: &mut Vec<u8>);

    /// Read one element; `bytes.len()` must equal the element size
    fn from_bytes(bytes: &[u8]) -> Self;

    fn as_f64(self) -> f64;
}

macro_rules! impl_element {
    ($($t:ty => $dt:expr),* $(,)?) => {
        $(
            impl Element for $t {
                const DATA_TYPE: DataType = $dt;

                fn extend_bytes(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_ne_bytes());
                }

                fn from_bytes(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_ne_bytes(buf)
                }

                fn as_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_element! {
    i8 => DataType::Int8,
    i16 => DataType::Int16,
    i32 => DataType::Int32,
    i64 => DataType::Int64,
    u8 => DataType::UInt8,
    u16 => DataType::UInt16,
    u32 => DataType::UInt32,
    u64 => DataType::UInt64,
    f32 => DataType::Float,
    f64 => DataType::Double,
}

/// Run `$body` with `$t` bound to the Rust type registered for `$dt`
macro_rules! dispatch_element {
    ($dt:expr, $t:ident => $body:expr) => {
        match $dt {
            $crate::variable::DataType::Int8 => {
                type $t = i8;
                $body
            }
            $crate::variable::DataType::Int16 => {
                type $t = i16;
                $body
            }
            $crate::variable::DataType::Int32 => {
                type $t = i32;
                $body
            }
            $crate::variable::DataType::Int64 => {
                type $t = i64;
                $body
            }
            $crate::variable::DataType::UInt8 => {
                type $t = u8;
                $body
            }
            $crate::variable::DataType::UInt16 => {
                type $t = u16;
                $body
            }
            $crate::variable::DataType::UInt32 => {
                type $t = u32;
                $body
            }
            $crate::variable::DataType::UInt64 => {
                type $t = u64;
                $body
            }
            $crate::variable::DataType::Float => {
                type $t = f32;
                $body
            }
            $crate::variable::DataType::Double => {
                type $t = f64;
                $body
            }
        }
    };
}

// =============================================================================
// Byte conversion helpers
// =============================================================================

/// Flatten typed values into native-endian bytes
pub fn to_bytes<T: Element>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::DATA_TYPE.size());
    for v in values {
        v.extend_bytes(&mut out);
    }
    out
}

/// Reinterpret native-endian bytes as typed values
pub fn from_bytes<T: Element>(bytes: &[u8]) -> Result<Vec<T>> {
    let size = T::DATA_TYPE.size();
    if bytes.len() % size != 0 {
        return Err(StageError::Serialization(format!(
            "{} bytes is not a whole number of {} elements",
            bytes.len(),
            T::DATA_TYPE
        )));
    }
    Ok(bytes.chunks_exact(size).map(T::from_bytes).collect())
}

/// Min/max of a raw buffer, as f64
///
/// Returns None for an empty buffer.
pub fn min_max(data_type: DataType, bytes: &[u8]) -> Option<(f64, f64)> {
    dispatch_element!(data_type, T => min_max_typed::<T>(bytes))
}

fn min_max_typed<T: Element>(bytes: &[u8]) -> Option<(f64, f64)> {
    bytes
        .chunks_exact(T::DATA_TYPE.size())
        .map(|c| T::from_bytes(c).as_f64())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}
