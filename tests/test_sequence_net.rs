// Tests for the sequence convolution network: assembly, forward/backward
// passes and the parameter contract.

use approx::assert_abs_diff_eq;
use sequence_convolution::architecture::SequenceConvolutionNet;
use sequence_convolution::layers::{DenseLayer, Layer, MaxPoolingLayer, SequenceConvolutionLayer};
use sequence_convolution::utils::{encode_batch, Activation, SimpleRng};
use sequence_convolution::LayerError;

fn small_net(rng: &mut SimpleRng, dropout: Option<f32>) -> SequenceConvolutionNet {
    let conv = SequenceConvolutionLayer::new(8, 3, 2, Activation::Tanh, 2.0, rng)
        .unwrap()
        .with_penalties(0.0, 0.01);
    let pool = MaxPoolingLayer::new(8, 4, 2, dropout, rng).unwrap();
    let hidden = vec![
        DenseLayer::new(4, 3, Activation::Tanh, rng).unwrap(),
        DenseLayer::new(3, 1, Activation::Sigmoid, rng)
            .unwrap()
            .with_lr_multiplier([0.5, 0.25]),
    ];
    SequenceConvolutionNet::new(conv, pool, hidden).unwrap()
}

// ============================================================================
// Assembly
// ============================================================================

#[test]
fn test_mismatched_hidden_layer_rejected() {
    let mut rng = SimpleRng::new(1);
    let conv = SequenceConvolutionLayer::new(8, 3, 2, Activation::Relu, 0.01, &mut rng).unwrap();
    let pool = MaxPoolingLayer::new(8, 4, 2, None, &mut rng).unwrap();
    let hidden = vec![DenseLayer::new(5, 1, Activation::Sigmoid, &mut rng).unwrap()];
    assert!(matches!(
        SequenceConvolutionNet::new(conv, pool, hidden),
        Err(LayerError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_parameter_layout() {
    let mut rng = SimpleRng::new(1);
    let net = small_net(&mut rng, None);
    assert_eq!(net.n_layers(), 4);
    assert_eq!(net.n_in(), 8);
    assert_eq!(net.n_units(), 1);

    let lengths: Vec<usize> = net.parameters().iter().map(|p| p.len()).collect();
    assert_eq!(lengths, vec![24, 2, 12, 3, 3, 1]);
    assert_eq!(net.lr_multiplier(), vec![1.0, 1.0, 1.0, 1.0, 0.5, 0.25]);
}

#[test]
fn test_update_parameters_checks_count() {
    let mut rng = SimpleRng::new(1);
    let mut net = small_net(&mut rng, None);
    let delta = vec![0.0f32; 24];
    assert!(matches!(
        net.update_parameters(&[(&delta, 1.0)]),
        Err(LayerError::ParameterCount { expected: 6, actual: 1 })
    ));
}

#[test]
fn test_rejected_update_leaves_network_untouched() {
    let mut rng = SimpleRng::new(1);
    let mut net = small_net(&mut rng, None);
    let before: Vec<Vec<f32>> = net.parameters().iter().map(|p| p.to_vec()).collect();

    // every tensor fits except the last hidden layer's bias
    let mut deltas: Vec<Vec<f32>> = before.iter().map(|p| vec![1.0; p.len()]).collect();
    deltas[5] = vec![1.0; 2];
    let updates: Vec<(&[f32], f32)> = deltas.iter().map(|d| (d.as_slice(), 1.0)).collect();
    assert!(matches!(
        net.update_parameters(&updates),
        Err(LayerError::ShapeMismatch { expected: 1, actual: 2, .. })
    ));
    let after: Vec<Vec<f32>> = net.parameters().iter().map(|p| p.to_vec()).collect();
    assert_eq!(after, before);

    deltas[5] = vec![1.0; 1];
    deltas[0] = vec![1.0; 23];
    assert!(net.set_parameters(deltas).is_err());
    let after: Vec<Vec<f32>> = net.parameters().iter().map(|p| p.to_vec()).collect();
    assert_eq!(after, before);
}

#[test]
fn test_update_parameters_applies_in_order() {
    let mut rng = SimpleRng::new(1);
    let mut net = small_net(&mut rng, None);
    let before: Vec<Vec<f32>> = net.parameters().iter().map(|p| p.to_vec()).collect();
    let deltas: Vec<Vec<f32>> = before
        .iter()
        .enumerate()
        .map(|(i, p)| vec![i as f32; p.len()])
        .collect();
    let updates: Vec<(&[f32], f32)> = deltas.iter().map(|d| (d.as_slice(), 2.0)).collect();
    net.update_parameters(&updates).unwrap();

    for (i, (after, before)) in net.parameters().iter().zip(&before).enumerate() {
        for (a, b) in after.iter().zip(before) {
            assert_abs_diff_eq!(*a, b + 2.0 * i as f32, epsilon = 1e-5);
        }
    }
}

// ============================================================================
// Forward / backward
// ============================================================================

#[test]
fn test_forward_on_encoded_sequences() {
    let mut rng = SimpleRng::new(3);
    let net = small_net(&mut rng, None);
    let input = encode_batch(&["ACGTACGT", "TTTTGGGG", "NNNNACGT"]).unwrap();
    let cache = net.feed_forward(&input, 3, true).unwrap();

    assert_eq!(cache.conv.activations.len(), 3 * 16);
    assert_eq!(cache.pool.activations.len(), 3 * 4);
    assert_eq!(cache.output().len(), 3);
    assert!(cache.output().iter().all(|&y| y > 0.0 && y < 1.0));
}

#[test]
fn test_network_gradient_numerical() {
    let mut rng = SimpleRng::new(5);
    let mut net = small_net(&mut rng, None);
    let batch = 2;
    let input: Vec<f32> = (0..batch * 8 * 4).map(|_| rng.gen_range_f32(-1.0, 1.0)).collect();
    let loss_weights = vec![1.0f32, -1.0];

    let grads = net.backprop(&input, &loss_weights, batch, None).unwrap();
    assert_eq!(grads.len(), 6);
    let analytical: Vec<Vec<f32>> = grads.into_iter().map(|g| g.gradient).collect();

    let loss = |net: &SequenceConvolutionNet| -> f64 {
        let cache = net.feed_forward(&input, batch, false).unwrap();
        cache
            .output()
            .iter()
            .zip(&loss_weights)
            .map(|(&y, &w)| y as f64 * w as f64)
            .sum()
    };

    // Hidden layers carry no weight decay, so their gradients match the loss
    // directly; the convolution weights also carry the L2 term.
    let eps = 1e-3f32;
    let params: Vec<Vec<f32>> = net.parameters().iter().map(|p| p.to_vec()).collect();
    for t in 1..params.len() {
        for i in 0..params[t].len() {
            let mut plus = params.clone();
            plus[t][i] += eps;
            net.set_parameters(plus).unwrap();
            let loss_plus = loss(&net);

            let mut minus = params.clone();
            minus[t][i] -= eps;
            net.set_parameters(minus).unwrap();
            let loss_minus = loss(&net);

            let numerical = ((loss_plus - loss_minus) / (2.0 * eps as f64)) as f32;
            assert_abs_diff_eq!(analytical[t][i], numerical, epsilon = 2e-3);
        }
    }
    net.set_parameters(params.clone()).unwrap();

    // Convolution weights: analytical = dLoss/dW - l2 * W
    for i in 0..params[0].len() {
        let mut plus = params.clone();
        plus[0][i] += eps;
        net.set_parameters(plus).unwrap();
        let loss_plus = loss(&net);

        let mut minus = params.clone();
        minus[0][i] -= eps;
        net.set_parameters(minus).unwrap();
        let loss_minus = loss(&net);

        let numerical = ((loss_plus - loss_minus) / (2.0 * eps as f64)) as f32;
        assert_abs_diff_eq!(
            analytical[0][i],
            numerical - 0.01 * params[0][i],
            epsilon = 2e-3
        );
    }
}

#[test]
fn test_dropout_mask_flows_through_network() {
    let mut rng = SimpleRng::new(9);
    let net = small_net(&mut rng, Some(0.5));
    let batch = 6;
    let input: Vec<f32> = (0..batch * 8 * 4).map(|_| rng.gen_range_f32(-1.0, 1.0)).collect();
    let cache = net.feed_forward(&input, batch, false).unwrap();
    let mask = cache.pool.dropout_mask.clone().unwrap();
    for b in 0..batch {
        for c in 0..4 {
            if !mask.is_kept(b, c) {
                assert_eq!(cache.pool.activations[b * 4 + c], 0.0);
            }
        }
    }

    let grads = net
        .backprop(&input, &vec![1.0; batch], batch, Some(cache))
        .unwrap();
    assert_eq!(grads.len(), 6);
    assert!(grads.iter().all(|g| g.gradient.iter().all(|v| v.is_finite())));
}
