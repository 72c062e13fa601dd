//! Elementwise helpers: sign and dropout masks.

use crate::error::{check_len, LayerError, Result};
use crate::utils::SimpleRng;

/// Elementwise sign with `sign(0) = 0`.
pub fn sign(values: &[f32]) -> Vec<f32> {
    values
        .iter()
        .map(|&v| {
            if v > 0.0 {
                1.0
            } else if v < 0.0 {
                -1.0
            } else {
                0.0
            }
        })
        .collect()
}

/// Keep/drop flags over the first `cols` columns of a `rows`-row buffer.
///
/// A mask belongs to the forward call that sampled it and travels to the
/// matching backward call inside that call's cache.
#[derive(Debug, Clone, PartialEq)]
pub struct DropoutMask {
    rows: usize,
    cols: usize,
    keep: Vec<bool>,
}

impl DropoutMask {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Whether element `(row, col)` was kept.
    pub fn is_kept(&self, row: usize, col: usize) -> bool {
        self.keep[row * self.cols + col]
    }

    /// Number of kept elements.
    pub fn kept_count(&self) -> usize {
        self.keep.iter().filter(|&&k| k).count()
    }
}

fn check_columns(rows: usize, row_width: usize, cols: usize, len: usize) -> Result<()> {
    check_len("masked buffer", rows * row_width, len)?;
    if cols > row_width {
        return Err(LayerError::shape("masked columns", row_width, cols));
    }
    Ok(())
}

/// Sample a dropout mask over the first `cols` columns of `buffer` and zero
/// the dropped elements in place.
///
/// Each element is dropped with probability `drop_probability`.
pub fn sample_dropout_mask(
    buffer: &mut [f32],
    rows: usize,
    row_width: usize,
    cols: usize,
    drop_probability: f32,
    rng: &mut SimpleRng,
) -> Result<DropoutMask> {
    check_columns(rows, row_width, cols, buffer.len())?;

    let mut keep = Vec::with_capacity(rows * cols);
    for row in buffer.chunks_exact_mut(row_width.max(1)).take(rows) {
        for value in row.iter_mut().take(cols) {
            let kept = !rng.gen_bool(drop_probability);
            if !kept {
                *value = 0.0;
            }
            keep.push(kept);
        }
    }
    // Rows of width zero never enter the loop above.
    keep.resize(rows * cols, true);

    Ok(DropoutMask { rows, cols, keep })
}

/// Multiply a gradient buffer by a previously sampled mask, in place.
///
/// Fails when the gradient does not have the mask's row count or is narrower
/// than the masked column range.
pub fn apply_dropout_mask(grad: &mut [f32], row_width: usize, mask: &DropoutMask) -> Result<()> {
    check_columns(mask.rows, row_width, mask.cols, grad.len())?;

    for (r, row) in grad.chunks_exact_mut(row_width.max(1)).take(mask.rows).enumerate() {
        for (c, value) in row.iter_mut().take(mask.cols).enumerate() {
            if !mask.is_kept(r, c) {
                *value = 0.0;
            }
        }
    }
    Ok(())
}

/// Scale the first `cols` columns of every row by `factor`.
pub fn scale_columns(buffer: &mut [f32], row_width: usize, cols: usize, factor: f32) {
    for row in buffer.chunks_exact_mut(row_width.max(1)) {
        for value in row.iter_mut().take(cols) {
            *value *= factor;
        }
    }
}
