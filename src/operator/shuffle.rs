//! Byte shuffle
//!
//! Groups byte k of every element together so slowly varying numeric data
//! compresses better. Lossless and length preserving.

/// Transpose `data` from element-major to byte-plane-major
pub(crate) fn shuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.len() % element_size != 0 {
        return data.to_vec();
    }
    let n = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for (i, element) in data.chunks_exact(element_size).enumerate() {
        for (b, byte) in element.iter().enumerate() {
            out[b * n + i] = *byte;
        }
    }
    out
}

/// Inverse of [`shuffle`]
pub(crate) fn unshuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.len() % element_size != 0 {
        return data.to_vec();
    }
    let n = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for (i, element) in out.chunks_exact_mut(element_size).enumerate() {
        for (b, byte) in element.iter_mut().enumerate() {
            *byte = data[b * n + i];
        }
    }
    out
}
