//! Sequence convolution layer
//!
//! This module provides a SequenceConvolutionLayer that convolves one-hot
//! encoded sequences with a bank of filters, adds a bias per filter and applies
//! an activation function.

use tracing::trace;

use crate::error::{check_len, Result};
use crate::kernels::{convolve_sequence, convolve_sequence_gradient, sum_delta};
use crate::layers::params::{
    self, add_scaled, apply_weight_decay, check_parameter_shapes, replace_parameter,
    require_positive, uniform_weights,
};
use crate::layers::{Layer, ParameterGradient};
use crate::utils::{Activation, SimpleRng};
use crate::ALPHABET_SIZE;

/// 1-D convolution over a one-hot encoded sequence.
///
/// # Fields
///
/// * `n_in` - Sequence length (positions, not channels)
/// * `filter_width` - Number of positions each filter spans
/// * `n_filters` - Number of filters
/// * `weights` - Filter bank (n_filters × ALPHABET_SIZE·filter_width)
/// * `biases` - Bias for each filter (n_filters)
///
/// # Example
///
/// ```ignore
/// use sequence_convolution::layers::SequenceConvolutionLayer;
/// use sequence_convolution::utils::{Activation, SimpleRng};
///
/// let mut rng = SimpleRng::new(42);
/// let layer = SequenceConvolutionLayer::new(100, 5, 16, Activation::Relu, 0.01, &mut rng)?;
/// assert_eq!(layer.n_units(), 1600);
/// ```
#[derive(Debug, Clone)]
pub struct SequenceConvolutionLayer {
    n_in: usize,
    filter_width: usize,
    n_filters: usize,
    activation: Activation,
    weights: Vec<f32>, // [n_filters * ALPHABET_SIZE * filter_width]
    biases: Vec<f32>,  // [n_filters]
    l1_penalty_weight: f32,
    l2_penalty_weight: f32,
    lr_multiplier: [f32; 2],
}

/// Activations kept from the forward pass for the backward pass.
#[derive(Debug, Clone)]
pub struct ConvolutionCache {
    /// Post-activation filter map (batch × n_filters·n_in).
    pub activations: Vec<f32>,
}

impl SequenceConvolutionLayer {
    /// Create a layer with uniformly initialized filters and zero biases.
    ///
    /// Weights are drawn from `[-weight_scale / 2, weight_scale / 2)`.
    pub fn new(
        n_in: usize,
        filter_width: usize,
        n_filters: usize,
        activation: Activation,
        weight_scale: f32,
        rng: &mut SimpleRng,
    ) -> Result<Self> {
        let weights = uniform_weights(n_filters * ALPHABET_SIZE * filter_width, weight_scale, rng);
        let biases = vec![0.0f32; n_filters];
        Self::with_parameters(n_in, filter_width, n_filters, activation, weights, biases)
    }

    /// Create a layer from caller-supplied weights and biases.
    ///
    /// # Errors
    ///
    /// Fails when a size is zero or the parameter shapes do not match
    /// `n_filters` and `filter_width`.
    pub fn with_parameters(
        n_in: usize,
        filter_width: usize,
        n_filters: usize,
        activation: Activation,
        weights: Vec<f32>,
        biases: Vec<f32>,
    ) -> Result<Self> {
        require_positive(n_in, "n_in")?;
        require_positive(filter_width, "filter_width")?;
        require_positive(n_filters, "n_filters")?;
        check_len("filter weights", n_filters * ALPHABET_SIZE * filter_width, weights.len())?;
        check_len("filter biases", n_filters, biases.len())?;

        Ok(Self {
            n_in,
            filter_width,
            n_filters,
            activation,
            weights,
            biases,
            l1_penalty_weight: 0.0,
            l2_penalty_weight: 0.0,
            lr_multiplier: [1.0, 1.0],
        })
    }

    /// Set the L1 and L2 weight decay coefficients.
    pub fn with_penalties(mut self, l1_penalty_weight: f32, l2_penalty_weight: f32) -> Self {
        self.l1_penalty_weight = l1_penalty_weight;
        self.l2_penalty_weight = l2_penalty_weight;
        self
    }

    /// Set the learning-rate multipliers for weights and biases.
    pub fn with_lr_multiplier(mut self, lr_multiplier: [f32; 2]) -> Self {
        self.lr_multiplier = lr_multiplier;
        self
    }

    pub fn filter_width(&self) -> usize {
        self.filter_width
    }

    pub fn n_filters(&self) -> usize {
        self.n_filters
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn biases(&self) -> &[f32] {
        &self.biases
    }

    /// Convolve, add biases and apply the activation.
    ///
    /// `input` is `(batch_size, n_in * ALPHABET_SIZE)`; the returned activations
    /// are `(batch_size, n_filters * n_in)`.
    pub fn feed_forward(
        &self,
        input: &[f32],
        batch_size: usize,
        _prediction: bool,
    ) -> Result<ConvolutionCache> {
        trace!(batch_size, n_in = self.n_in, "sequence convolution forward");
        let mut activations = convolve_sequence(
            input,
            &self.weights,
            &self.biases,
            batch_size,
            self.n_in,
            self.filter_width,
        )?;
        self.activation.apply_inplace(&mut activations);
        Ok(ConvolutionCache { activations })
    }

    /// Weight and bias gradients given the gradient w.r.t. the activations.
    ///
    /// Recomputes the forward pass when no cache is given. Returns
    /// `[grad_weights, grad_biases]`; no input gradient is computed.
    pub fn backprop(
        &self,
        input: &[f32],
        grad_output: &[f32],
        batch_size: usize,
        cache: Option<ConvolutionCache>,
    ) -> Result<Vec<ParameterGradient>> {
        let activations = match cache {
            Some(cache) => cache.activations,
            None => self.feed_forward(input, batch_size, false)?.activations,
        };
        check_len("convolution activations", batch_size * self.n_units(), activations.len())?;
        trace!(batch_size, "sequence convolution backward");
        check_len("convolution output gradient", activations.len(), grad_output.len())?;

        let mut delta = self.activation.derivative(&activations);
        for (d, g) in delta.iter_mut().zip(grad_output) {
            *d *= g;
        }

        let grad_b = sum_delta(&delta, batch_size, self.n_filters)?;
        let mut grad_w = convolve_sequence_gradient(
            input,
            &delta,
            batch_size,
            self.n_in,
            self.filter_width,
            self.n_filters,
        )?;
        apply_weight_decay(
            &mut grad_w,
            &self.weights,
            self.l1_penalty_weight,
            self.l2_penalty_weight,
        );

        Ok(vec![
            ParameterGradient::new(grad_w, self.lr_multiplier[0]),
            ParameterGradient::new(grad_b, self.lr_multiplier[1]),
        ])
    }
}

impl Layer for SequenceConvolutionLayer {
    fn n_in(&self) -> usize {
        self.n_in
    }

    fn n_units(&self) -> usize {
        self.n_filters * self.n_in
    }

    fn n_parameters(&self) -> usize {
        2
    }

    fn parameters(&self) -> Vec<&[f32]> {
        vec![&self.weights, &self.biases]
    }

    fn set_parameters(&mut self, values: Vec<Vec<f32>>) -> Result<()> {
        check_parameter_shapes(&self.parameters(), values.iter().map(Vec::len))?;
        let mut values = values.into_iter();
        if let (Some(w), Some(b)) = (values.next(), values.next()) {
            replace_parameter(&mut self.weights, w, "filter weights")?;
            replace_parameter(&mut self.biases, b, "filter biases")?;
        }
        Ok(())
    }

    fn update_parameters(&mut self, updates: &[(&[f32], f32)]) -> Result<()> {
        check_parameter_shapes(&self.parameters(), updates.iter().map(|(d, _)| d.len()))?;
        add_scaled(&mut self.weights, updates[0].0, updates[0].1)?;
        add_scaled(&mut self.biases, updates[1].0, updates[1].1)
    }

    fn lr_multiplier(&self) -> Vec<f32> {
        self.lr_multiplier.to_vec()
    }

    fn l1_penalty(&self) -> f32 {
        params::l1_penalty(&self.weights, self.l1_penalty_weight)
    }

    fn l2_penalty(&self) -> f32 {
        params::l2_penalty(&self.weights, self.l2_penalty_weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::encode_sequence;
    use approx::assert_relative_eq;

    #[test]
    fn test_sequence_conv_initialization() {
        let mut rng = SimpleRng::new(42);
        let layer =
            SequenceConvolutionLayer::new(20, 5, 8, Activation::Relu, 0.01, &mut rng).unwrap();

        assert_eq!(layer.n_in(), 20);
        assert_eq!(layer.n_units(), 160);
        assert_eq!(layer.weights().len(), 8 * 4 * 5);
        assert!(layer.biases().iter().all(|&b| b == 0.0));
        assert!(layer.weights().iter().all(|w| (-0.005..0.005).contains(w)));
    }

    #[test]
    fn test_sequence_conv_rejects_bad_shapes() {
        let bad_w = SequenceConvolutionLayer::with_parameters(
            10,
            3,
            2,
            Activation::Linear,
            vec![0.0; 23],
            vec![0.0; 2],
        );
        assert!(bad_w.is_err());

        let bad_b = SequenceConvolutionLayer::with_parameters(
            10,
            3,
            2,
            Activation::Linear,
            vec![0.0; 24],
            vec![0.0; 3],
        );
        assert!(bad_b.is_err());
    }

    #[test]
    fn test_deterministic_initialization() {
        let mut rng1 = SimpleRng::new(12345);
        let layer1 =
            SequenceConvolutionLayer::new(30, 7, 4, Activation::Sigmoid, 0.1, &mut rng1).unwrap();

        let mut rng2 = SimpleRng::new(12345);
        let layer2 =
            SequenceConvolutionLayer::new(30, 7, 4, Activation::Sigmoid, 0.1, &mut rng2).unwrap();

        assert_eq!(layer1.weights(), layer2.weights());
    }

    #[test]
    fn test_linear_forward_and_bias_gradient() {
        // width 1 filter that scores G only, bias 0.25
        let layer = SequenceConvolutionLayer::with_parameters(
            3,
            1,
            1,
            Activation::Linear,
            vec![0.0, 0.0, 2.0, 0.0],
            vec![0.25],
        )
        .unwrap();
        let input = encode_sequence("GAG").unwrap();
        let cache = layer.feed_forward(&input, 1, false).unwrap();
        assert_eq!(cache.activations, vec![2.25, 0.25, 2.25]);

        let grads = layer.backprop(&input, &[1.0, 1.0, 1.0], 1, Some(cache)).unwrap();
        assert_eq!(grads[0].gradient, vec![1.0, 0.0, 2.0, 0.0]);
        assert_relative_eq!(grads[1].gradient[0], 3.0);
    }

    #[test]
    fn test_backprop_without_cache_matches_cached() {
        let mut rng = SimpleRng::new(5);
        let layer =
            SequenceConvolutionLayer::new(6, 3, 2, Activation::Tanh, 1.0, &mut rng).unwrap();
        let input = encode_sequence("ACGTTA").unwrap();
        let grad_out: Vec<f32> = (0..12).map(|i| i as f32 * 0.1).collect();

        let cache = layer.feed_forward(&input, 1, false).unwrap();
        let cached = layer.backprop(&input, &grad_out, 1, Some(cache)).unwrap();
        let recomputed = layer.backprop(&input, &grad_out, 1, None).unwrap();
        assert_eq!(cached, recomputed);
    }

    #[test]
    fn test_l2_penalty_subtracts_scaled_weights() {
        let weights: Vec<f32> = (0..8).map(|i| i as f32 - 3.5).collect();
        let plain = SequenceConvolutionLayer::with_parameters(
            2,
            1,
            2,
            Activation::Linear,
            weights.clone(),
            vec![0.0; 2],
        )
        .unwrap();
        let decayed = plain.clone().with_penalties(0.0, 0.1);

        let input = encode_sequence("AC").unwrap();
        let grad_out = vec![0.5; 4];
        let g0 = plain.backprop(&input, &grad_out, 1, None).unwrap();
        let g1 = decayed.backprop(&input, &grad_out, 1, None).unwrap();
        for ((a, b), w) in g0[0].gradient.iter().zip(&g1[0].gradient).zip(&weights) {
            assert_relative_eq!(a - b, 0.1 * w, epsilon = 1e-6);
        }
        assert_relative_eq!(decayed.l2_penalty(), 0.1 * 0.5 * weights.iter().map(|w| w * w).sum::<f32>());
    }

    #[test]
    fn test_update_parameters_affine() {
        let mut layer = SequenceConvolutionLayer::with_parameters(
            2,
            1,
            1,
            Activation::Linear,
            vec![1.0; 4],
            vec![0.0],
        )
        .unwrap();
        let dw = vec![1.0, 2.0, 3.0, 4.0];
        let db = vec![1.0];
        layer.update_parameters(&[(&dw, -0.5), (&db, 2.0)]).unwrap();
        assert_eq!(layer.weights(), &[0.5, 0.0, -0.5, -1.0]);
        assert_eq!(layer.biases(), &[2.0]);

        assert!(matches!(
            layer.update_parameters(&[(&dw, 1.0)]),
            Err(crate::LayerError::ParameterCount { expected: 2, actual: 1 })
        ));
    }
}
