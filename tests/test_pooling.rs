// Tests for max pooling: output layout, argmax routing and gradient mass.

use approx::assert_relative_eq;
use sequence_convolution::kernels::{max_pool, max_pool_gradient, max_pool_into, PooledSlice};
use sequence_convolution::layers::{Layer, MaxPoolingLayer};
use sequence_convolution::utils::SimpleRng;

// ============================================================================
// Forward
// ============================================================================

#[test]
fn test_partial_last_window() {
    // n_in = 7, pool_size = 3: windows [0, 3), [3, 6), [6, 7)
    let filtermap = vec![0.1, 0.9, 0.3, 0.2, 0.2, 0.8, -4.0];
    let (pooled, argmax) = max_pool(&filtermap, 1, 7, 1, 3).unwrap();
    assert_eq!(pooled, vec![0.9, 0.8, -4.0]);
    assert_eq!(argmax, vec![1, 5, 6]);
}

#[test]
fn test_pool_size_larger_than_input() {
    let filtermap = vec![-1.0, -3.0, -2.0, 5.0, 4.0, 6.0];
    let (pooled, argmax) = max_pool(&filtermap, 1, 3, 2, 10).unwrap();
    assert_eq!(pooled, vec![-1.0, 6.0]);
    assert_eq!(argmax, vec![0, 2]);
}

#[test]
fn test_pool_into_leaves_other_columns() {
    let filtermap = vec![1.0, 2.0, 3.0, 4.0];
    let mut activations = vec![-7.0f32; 5];
    let mut argmax = vec![99u32; 5];
    max_pool_into(
        &filtermap,
        1,
        4,
        1,
        2,
        PooledSlice {
            activations: &mut activations,
            argmax: &mut argmax,
            row_width: 5,
            offset: 2,
        },
    )
    .unwrap();
    assert_eq!(activations, vec![-7.0, -7.0, 2.0, 4.0, -7.0]);
    assert_eq!(argmax, vec![99, 99, 1, 3, 99]);
}

#[test]
fn test_pool_into_rejects_range_past_row() {
    let filtermap = vec![1.0, 2.0, 3.0, 4.0];
    let mut activations = vec![0.0f32; 3];
    let mut argmax = vec![0u32; 3];
    let result = max_pool_into(
        &filtermap,
        1,
        4,
        1,
        2,
        PooledSlice {
            activations: &mut activations,
            argmax: &mut argmax,
            row_width: 3,
            offset: 2,
        },
    );
    assert!(result.is_err());
}

// ============================================================================
// Backward
// ============================================================================

#[test]
fn test_gradient_routed_to_argmax_only() {
    let mut rng = SimpleRng::new(12);
    let (batch, n_in, n_filters, pool_size) = (3, 11, 4, 3);
    let filtermap: Vec<f32> = (0..batch * n_filters * n_in)
        .map(|_| rng.gen_range_f32(-1.0, 1.0))
        .collect();
    let layer = MaxPoolingLayer::new(n_in, pool_size, n_filters, None, &mut rng).unwrap();
    let cache = layer.feed_forward(&filtermap, batch, false).unwrap();
    let grad_output: Vec<f32> = (0..batch * layer.n_units())
        .map(|_| rng.gen_range_f32(-1.0, 1.0))
        .collect();

    let grad = layer
        .backprop(&filtermap, &grad_output, batch, Some(cache.clone()))
        .unwrap();
    assert_eq!(grad.len(), filtermap.len());

    let n_pooled = n_in.div_ceil(pool_size);
    for b in 0..batch {
        for f in 0..n_filters {
            let row = &grad[(b * n_filters + f) * n_in..][..n_in];
            let mut expected = vec![0.0f32; n_in];
            for p in 0..n_pooled {
                let idx = b * layer.n_units() + f * n_pooled + p;
                expected[cache.argmax[idx] as usize] += grad_output[idx];
            }
            assert_eq!(row, expected.as_slice());
        }
    }

    // total gradient mass is conserved
    let total_in: f32 = grad_output.iter().sum();
    let total_out: f32 = grad.iter().sum();
    assert_relative_eq!(total_in, total_out, epsilon = 1e-5);
}

#[test]
fn test_gradient_with_offset_layout() {
    // one sample, two filters of 4 positions pooled by 2, stored at offset 1 of a 6-wide row
    let argmax = vec![0, 1, 3, 0, 2, 0];
    let grad_pooled = vec![9.0, 1.0, 2.0, 3.0, 4.0, 9.0];
    let grad = max_pool_gradient(&argmax, &grad_pooled, 1, 4, 2, 2, 6, 1).unwrap();
    assert_eq!(grad, vec![0.0, 1.0, 0.0, 2.0, 3.0, 0.0, 4.0, 0.0]);
}

#[test]
fn test_gradient_rejects_out_of_range_argmax() {
    let argmax = vec![0, 7];
    let grad_pooled = vec![1.0, 1.0];
    assert!(max_pool_gradient(&argmax, &grad_pooled, 1, 4, 1, 2, 2, 0).is_err());
}
