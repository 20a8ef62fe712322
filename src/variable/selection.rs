//! Selections and hyperslab arithmetic
//!
//! All arrays are row-major (last dimension contiguous).

use serde::{Deserialize, Serialize};

/// Per-dimension extents or offsets
pub type Dims = Vec<u64>;

/// What part of a variable a read wants
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    /// The whole variable (global arrays, single values)
    #[default]
    All,

    /// A hyper-rectangle of a global array
    Box { start: Dims, count: Dims },

    /// One writer block of a local array, by index in the ordered block list
    Block(usize),
}

impl Selection {
    pub fn boxed(start: impl Into<Dims>, count: impl Into<Dims>) -> Self {
        Selection::Box {
            start: start.into(),
            count: count.into(),
        }
    }
}

/// Number of elements in a region (1 for a scalar)
pub fn volume(count: &[u64]) -> u64 {
    count.iter().product()
}

/// Intersection of two boxes, or None when they do not overlap
pub fn intersect(
    a_start: &[u64],
    a_count: &[u64],
    b_start: &[u64],
    b_count: &[u64],
) -> Option<(Dims, Dims)> {
    let rank = a_start.len();
    if a_count.len() != rank || b_start.len() != rank || b_count.len() != rank {
        return None;
    }

    let mut start = Vec::with_capacity(rank);
    let mut count = Vec::with_capacity(rank);
    for d in 0..rank {
        let lo = a_start[d].max(b_start[d]);
        let hi = a_start[d].checked_add(a_count[d])?.min(b_start[d].checked_add(b_count[d])?);
        if hi <= lo {
            return None;
        }
        start.push(lo);
        count.push(hi - lo);
    }
    Some((start, count))
}

/// Row-major element strides for a box of extent `count`
fn strides(count: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; count.len()];
    for d in (0..count.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * count[d + 1];
    }
    strides
}

/// Linear element offset of `point` inside the box (`box_start`, `box_count`)
fn linear_offset(point: &[u64], box_start: &[u64], strides: &[u64]) -> u64 {
    point
        .iter()
        .zip(box_start)
        .zip(strides)
        .map(|((p, s), st)| (p - s) * st)
        .sum()
}

/// Call `f` with the origin of every contiguous row of `region`
///
/// A row runs along the last dimension and holds `region_count.last()` elements.
fn for_each_row(region_start: &[u64], region_count: &[u64], mut f: impl FnMut(&[u64])) {
    if region_count.iter().any(|&c| c == 0) {
        return;
    }
    if region_start.is_empty() {
        f(region_start);
        return;
    }

    let outer = region_count.len() - 1;
    let mut point = region_start.to_vec();
    loop {
        f(&point);

        // odometer over all but the last dimension
        let mut d = outer;
        loop {
            if d == 0 {
                return;
            }
            d -= 1;
            point[d] += 1;
            if point[d] < region_start[d] + region_count[d] {
                break;
            }
            point[d] = region_start[d];
        }
    }
}

/// Copy `region` out of a source box into a destination box
///
/// `region` must lie inside both boxes; all coordinates are global.
#[allow(clippy::too_many_arguments)]
pub fn copy_region(
    src: &[u8],
    src_start: &[u64],
    src_count: &[u64],
    dst: &mut [u8],
    dst_start: &[u64],
    dst_count: &[u64],
    region_start: &[u64],
    region_count: &[u64],
    element_size: usize,
) {
    let src_strides = strides(src_count);
    let dst_strides = strides(dst_count);
    let row_bytes = region_count.last().copied().unwrap_or(1) as usize * element_size;

    for_each_row(region_start, region_count, |origin| {
        let s = linear_offset(origin, src_start, &src_strides) as usize * element_size;
        let d = linear_offset(origin, dst_start, &dst_strides) as usize * element_size;
        dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
    });
}

/// Mark `region` as covered in a per-element mask of the box (`dst_start`, `dst_count`)
///
/// Returns how many elements were newly marked.
pub fn mark_region(
    mask: &mut [bool],
    dst_start: &[u64],
    dst_count: &[u64],
    region_start: &[u64],
    region_count: &[u64],
) -> u64 {
    let dst_strides = strides(dst_count);
    let row_len = region_count.last().copied().unwrap_or(1) as usize;
    let mut marked = 0;

    for_each_row(region_start, region_count, |origin| {
        let base = linear_offset(origin, dst_start, &dst_strides) as usize;
        for cell in &mut mask[base..base + row_len] {
            if !*cell {
                *cell = true;
                marked += 1;
            }
        }
    });
    marked
}
