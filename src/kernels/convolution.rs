//! 1-D convolution over one-hot encoded sequences.
//!
//! Layouts:
//! - input: `(batch, n_in * ALPHABET_SIZE)`, element `[b, pos * 4 + symbol]`
//! - weights: `(n_filters, ALPHABET_SIZE * filter_width)`, element `[f, tap * 4 + symbol]`
//! - filtermap / delta: `(batch, n_filters * n_in)`, element `[b, f * n_in + pos]`
//!
//! Every input position anchors one window centred on it: position `i` reads
//! positions `i - filter_width / 2 ..` for `filter_width` taps. Taps that fall
//! outside the sequence read zeros, so the output has the same length as the
//! input.

use crate::error::{check_len, LayerError, Result};
use crate::ALPHABET_SIZE;

/// Input position read by `tap` for the window anchored at `pos`, if in range.
#[inline]
fn tap_position(pos: usize, tap: usize, filter_width: usize, n_in: usize) -> Option<usize> {
    let p = pos as isize + tap as isize - (filter_width / 2) as isize;
    if p >= 0 && (p as usize) < n_in {
        Some(p as usize)
    } else {
        None
    }
}

/// Convolve a batch of sequences with a filter bank and broadcast the bias.
///
/// Returns the pre-activation filter map `(batch, n_filters * n_in)`.
pub fn convolve_sequence(
    input: &[f32],
    weights: &[f32],
    biases: &[f32],
    batch_size: usize,
    n_in: usize,
    filter_width: usize,
) -> Result<Vec<f32>> {
    let n_filters = biases.len();
    let row_in = n_in * ALPHABET_SIZE;
    let filter_len = filter_width * ALPHABET_SIZE;
    check_len("convolution input", batch_size * row_in, input.len())?;
    check_len("convolution weights", n_filters * filter_len, weights.len())?;

    let mut filtermap = vec![0.0f32; batch_size * n_filters * n_in];

    for b in 0..batch_size {
        let in_base = b * row_in;
        let out_base_b = b * n_filters * n_in;

        for f in 0..n_filters {
            let w_base = f * filter_len;
            let out_base = out_base_b + f * n_in;

            for pos in 0..n_in {
                let mut sum = biases[f];
                for tap in 0..filter_width {
                    if let Some(p) = tap_position(pos, tap, filter_width, n_in) {
                        let x = &input[in_base + p * ALPHABET_SIZE..][..ALPHABET_SIZE];
                        let w = &weights[w_base + tap * ALPHABET_SIZE..][..ALPHABET_SIZE];
                        sum += x.iter().zip(w).map(|(a, b)| a * b).sum::<f32>();
                    }
                }
                filtermap[out_base + pos] = sum;
            }
        }
    }

    Ok(filtermap)
}

/// Weight gradient of the convolution given the pre-activation delta.
///
/// Cross-correlates `delta` with the input, summing over batch and position.
/// Returns `(n_filters, ALPHABET_SIZE * filter_width)`.
pub fn convolve_sequence_gradient(
    input: &[f32],
    delta: &[f32],
    batch_size: usize,
    n_in: usize,
    filter_width: usize,
    n_filters: usize,
) -> Result<Vec<f32>> {
    let row_in = n_in * ALPHABET_SIZE;
    let filter_len = filter_width * ALPHABET_SIZE;
    check_len("convolution gradient input", batch_size * row_in, input.len())?;
    check_len("convolution delta", batch_size * n_filters * n_in, delta.len())?;

    let mut grad_w = vec![0.0f32; n_filters * filter_len];

    for b in 0..batch_size {
        let in_base = b * row_in;
        let d_base_b = b * n_filters * n_in;

        for f in 0..n_filters {
            let w_base = f * filter_len;
            let d_base = d_base_b + f * n_in;

            for pos in 0..n_in {
                let d = delta[d_base + pos];
                if d == 0.0 {
                    continue;
                }
                for tap in 0..filter_width {
                    if let Some(p) = tap_position(pos, tap, filter_width, n_in) {
                        let x = &input[in_base + p * ALPHABET_SIZE..][..ALPHABET_SIZE];
                        let g = &mut grad_w[w_base + tap * ALPHABET_SIZE..][..ALPHABET_SIZE];
                        for (gs, xs) in g.iter_mut().zip(x) {
                            *gs += d * xs;
                        }
                    }
                }
            }
        }
    }

    Ok(grad_w)
}

/// Bias gradient: delta summed over batch and position for every filter.
pub fn sum_delta(delta: &[f32], batch_size: usize, n_filters: usize) -> Result<Vec<f32>> {
    let mut grad_b = vec![0.0f32; n_filters];
    if delta.is_empty() {
        return Ok(grad_b);
    }
    let rows = batch_size * n_filters;
    if rows == 0 || delta.len() % rows != 0 {
        return Err(LayerError::shape(
            "delta (multiple of batch * n_filters)",
            rows,
            delta.len(),
        ));
    }
    let n_in = delta.len() / rows;

    for (i, filter_row) in delta.chunks_exact(n_in).enumerate() {
        grad_b[i % n_filters] += filter_row.iter().sum::<f32>();
    }

    Ok(grad_b)
}
