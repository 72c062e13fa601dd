//! Non-overlapping 1-D max pooling over filter maps.
//!
//! A filter map `(batch, n_filters * n_in)` is pooled per filter in windows of
//! `pool_size` positions; the last window may be shorter. Pooled values land
//! at `[b, offset + f * n_pooled + p]` of a target buffer whose rows are
//! `row_width` wide, which lets several regions share one buffer. The argmax
//! buffer records the winning position within the filter's row.

use crate::error::{check_len, LayerError, Result};

/// Number of pooled outputs per filter: `ceil(n_in / pool_size)`, or 0 when
/// `pool_size` is 0.
pub fn pooled_width(n_in: usize, pool_size: usize) -> usize {
    match pool_size {
        0 => 0,
        _ => n_in.div_ceil(pool_size),
    }
}

fn check_pool_size(pool_size: usize) -> Result<()> {
    if pool_size == 0 {
        return Err(LayerError::InvalidConfig("pool_size must be > 0".into()));
    }
    Ok(())
}

/// Caller-owned destination for pooled activations and their argmax.
///
/// The writer owns columns `offset .. offset + n_filters * n_pooled` of every
/// row for the duration of the call.
pub struct PooledSlice<'a> {
    pub activations: &'a mut [f32],
    pub argmax: &'a mut [u32],
    pub row_width: usize,
    pub offset: usize,
}

fn check_range(row_width: usize, offset: usize, n_units: usize) -> Result<()> {
    if offset + n_units > row_width {
        return Err(LayerError::shape(
            "pooled column range end",
            row_width,
            offset + n_units,
        ));
    }
    Ok(())
}

/// Max-pool `filtermap` into its own freshly allocated buffers.
pub fn max_pool(
    filtermap: &[f32],
    batch_size: usize,
    n_in: usize,
    n_filters: usize,
    pool_size: usize,
) -> Result<(Vec<f32>, Vec<u32>)> {
    check_pool_size(pool_size)?;
    let row_width = n_filters * pooled_width(n_in, pool_size);
    let mut activations = vec![0.0f32; batch_size * row_width];
    let mut argmax = vec![0u32; batch_size * row_width];
    max_pool_into(
        filtermap,
        batch_size,
        n_in,
        n_filters,
        pool_size,
        PooledSlice {
            activations: &mut activations,
            argmax: &mut argmax,
            row_width,
            offset: 0,
        },
    )?;
    Ok((activations, argmax))
}

/// Max-pool `filtermap` directly into a column range of `target`.
pub fn max_pool_into(
    filtermap: &[f32],
    batch_size: usize,
    n_in: usize,
    n_filters: usize,
    pool_size: usize,
    target: PooledSlice<'_>,
) -> Result<()> {
    check_pool_size(pool_size)?;
    let n_pooled = pooled_width(n_in, pool_size);
    check_len("filtermap", batch_size * n_filters * n_in, filtermap.len())?;
    check_len("pooled target", batch_size * target.row_width, target.activations.len())?;
    check_len("argmax target", batch_size * target.row_width, target.argmax.len())?;
    check_range(target.row_width, target.offset, n_filters * n_pooled)?;

    for b in 0..batch_size {
        let fm_base_b = b * n_filters * n_in;
        let out_base_b = b * target.row_width + target.offset;

        for f in 0..n_filters {
            let row = &filtermap[fm_base_b + f * n_in..][..n_in];
            let out_base = out_base_b + f * n_pooled;

            for p in 0..n_pooled {
                let start = p * pool_size;
                let end = (start + pool_size).min(n_in);

                // Track argmax to route gradients during backprop.
                let mut best = f32::NEG_INFINITY;
                let mut best_idx = start;
                for (i, &v) in row[start..end].iter().enumerate() {
                    if v > best {
                        best = v;
                        best_idx = start + i;
                    }
                }

                target.activations[out_base + p] = best;
                target.argmax[out_base + p] = best_idx as u32;
            }
        }
    }

    Ok(())
}

/// Route pooled gradients back to the filter map positions recorded in `argmax`.
///
/// `argmax` and `grad_pooled` share the target layout (`row_width`, `offset`)
/// used in the forward pass. Returns `(batch, n_filters * n_in)`, zero except
/// at argmax positions.
#[allow(clippy::too_many_arguments)]
pub fn max_pool_gradient(
    argmax: &[u32],
    grad_pooled: &[f32],
    batch_size: usize,
    n_in: usize,
    n_filters: usize,
    pool_size: usize,
    row_width: usize,
    offset: usize,
) -> Result<Vec<f32>> {
    check_pool_size(pool_size)?;
    let n_pooled = pooled_width(n_in, pool_size);
    check_len("argmax", batch_size * row_width, argmax.len())?;
    check_len("pooled gradient", batch_size * row_width, grad_pooled.len())?;
    check_range(row_width, offset, n_filters * n_pooled)?;

    let mut grad_filtermap = vec![0.0f32; batch_size * n_filters * n_in];

    for b in 0..batch_size {
        let fm_base_b = b * n_filters * n_in;
        let pooled_base_b = b * row_width + offset;

        for f in 0..n_filters {
            let fm_base = fm_base_b + f * n_in;
            let pooled_base = pooled_base_b + f * n_pooled;

            for p in 0..n_pooled {
                let pos = argmax[pooled_base + p] as usize;
                if pos >= n_in {
                    return Err(LayerError::shape("argmax position", n_in, pos));
                }
                grad_filtermap[fm_base + pos] += grad_pooled[pooled_base + p];
            }
        }
    }

    Ok(grad_filtermap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pooled_width_rounds_up() {
        assert_eq!(pooled_width(10, 3), 4);
        assert_eq!(pooled_width(9, 3), 3);
        assert_eq!(pooled_width(1, 4), 1);
        assert_eq!(pooled_width(5, 0), 0);
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        assert!(matches!(
            max_pool(&[1.0, 2.0], 1, 2, 1, 0),
            Err(LayerError::InvalidConfig(_))
        ));
        assert!(matches!(
            max_pool_gradient(&[0, 1], &[1.0, 1.0], 1, 2, 1, 0, 2, 0),
            Err(LayerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_max_pool_partial_last_window() {
        // 1 sample, 1 filter, 5 positions, windows [0..2], [2..4], [4]
        let fm = vec![0.1, 0.7, 0.3, 0.2, -0.5];
        let (pooled, argmax) = max_pool(&fm, 1, 5, 1, 2).unwrap();
        assert_eq!(pooled, vec![0.7, 0.3, -0.5]);
        assert_eq!(argmax, vec![1, 2, 4]);
    }

    #[test]
    fn test_max_pool_into_offset_leaves_other_columns() {
        let fm = vec![1.0, 2.0, 3.0, 4.0];
        let mut act = vec![-9.0f32; 5];
        let mut arg = vec![99u32; 5];
        max_pool_into(
            &fm,
            1,
            4,
            1,
            2,
            PooledSlice {
                activations: &mut act,
                argmax: &mut arg,
                row_width: 5,
                offset: 2,
            },
        )
        .unwrap();
        assert_eq!(act, vec![-9.0, -9.0, 2.0, 4.0, -9.0]);
        assert_eq!(arg, vec![99, 99, 1, 3, 99]);
    }

    #[test]
    fn test_max_pool_rejects_range_overflow() {
        let fm = vec![1.0, 2.0, 3.0, 4.0];
        let mut act = vec![0.0f32; 3];
        let mut arg = vec![0u32; 3];
        let result = max_pool_into(
            &fm,
            1,
            4,
            1,
            2,
            PooledSlice {
                activations: &mut act,
                argmax: &mut arg,
                row_width: 3,
                offset: 2,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_gradient_routes_to_argmax() {
        let argmax = vec![1, 2, 4];
        let grad = vec![1.0, 2.0, 3.0];
        let g = max_pool_gradient(&argmax, &grad, 1, 5, 1, 2, 3, 0).unwrap();
        assert_eq!(g, vec![0.0, 1.0, 2.0, 0.0, 3.0]);
    }
}
