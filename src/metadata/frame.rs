//! Metadata frame codec
//!
//! ## Wire Format
//! ```text
//! ┌───────────┬─────────────┬──────────┬──────────┬──────────────────┐
//! │ Magic (4) │ Version (2) │ Len (4)  │ CRC (4)  │ Payload (bincode)│
//! └───────────┴─────────────┴──────────┴──────────┴──────────────────┘
//! ```
//! All integers little-endian. The CRC covers the payload only.

use crate::error::{Result, StageError};

use super::WriterMetadata;

/// Magic bytes identifying a metadata frame
pub const MAGIC: &[u8; 4] = b"ASMD";

/// Current frame format version
pub const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + Len (4) + CRC (4) = 14 bytes
pub const HEADER_SIZE: usize = 14;

/// Maximum payload size (64 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Encode writer metadata into a framed byte buffer
pub fn encode_metadata(metadata: &WriterMetadata) -> Result<Vec<u8>> {
    let payload = bincode::serialize(metadata)?;
    if payload.len() > MAX_PAYLOAD_SIZE as usize {
        return Err(StageError::Serialization(format!(
            "Metadata payload too large: {} bytes (max {})",
            payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }

    let crc = crc32fast::hash(&payload);

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(MAGIC);
    frame.extend_from_slice(&VERSION.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&payload);

    Ok(frame)
}

/// Decode a framed metadata buffer, validating magic, version, length and CRC
pub fn decode_metadata(bytes: &[u8]) -> Result<WriterMetadata> {
    if bytes.len() < HEADER_SIZE {
        return Err(StageError::MetadataCorruption(format!(
            "Incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    if &bytes[0..4] != MAGIC {
        return Err(StageError::MetadataCorruption(format!(
            "Bad magic: {:02x?}",
            &bytes[0..4]
        )));
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(StageError::MetadataCorruption(format!(
            "Unsupported frame version {} (expected {})",
            version, VERSION
        )));
    }

    let payload_len = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(StageError::MetadataCorruption(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    let total_len = HEADER_SIZE + payload_len as usize;
    if bytes.len() != total_len {
        return Err(StageError::MetadataCorruption(format!(
            "Frame length mismatch: header says {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }

    let stored_crc = u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);
    let payload = &bytes[HEADER_SIZE..total_len];
    let computed_crc = crc32fast::hash(payload);
    if stored_crc != computed_crc {
        return Err(StageError::MetadataCorruption(format!(
            "CRC mismatch: stored 0x{:08x}, computed 0x{:08x}",
            stored_crc, computed_crc
        )));
    }

    Ok(bincode::deserialize(payload)?)
}
