//! Dense (fully connected) layer implementation
//!
//! This module provides a DenseLayer that performs the transformation
//! `output = f(input × weights + biases)`. It serves as the hidden layers of a
//! sequence convolution network and as the optional fully connected branch of
//! the multi-region layer.

use std::cell::RefCell;

use crate::error::{check_len, Result};
use crate::kernels::{apply_dropout_mask, sample_dropout_mask, scale_columns, DropoutMask};
use crate::layers::params::{
    self, add_scaled, apply_weight_decay, check_parameter_shapes, replace_parameter,
    require_positive, validate_dropout,
};
use crate::layers::{Layer, ParameterGradient};
use crate::utils::{Activation, SimpleRng};

/// Dense (fully connected) layer with weights and biases.
///
/// Performs y = f(xW + b)
/// where x is the input (batch_size × n_in),
/// W is the weight matrix (n_in × n_units),
/// and b is the bias vector (n_units).
///
/// # Example
///
/// ```ignore
/// use sequence_convolution::layers::DenseLayer;
/// use sequence_convolution::utils::{Activation, SimpleRng};
///
/// let mut rng = SimpleRng::new(42);
/// let layer = DenseLayer::new(784, 512, Activation::Relu, &mut rng)?;
/// assert_eq!(layer.n_units(), 512);
/// ```
#[derive(Debug)]
pub struct DenseLayer {
    n_in: usize,
    n_units: usize,
    activation: Activation,
    weights: Vec<f32>,
    biases: Vec<f32>,
    dropout: Option<f32>,
    l1_penalty_weight: f32,
    l2_penalty_weight: f32,
    lr_multiplier: [f32; 2],
    rng: RefCell<SimpleRng>,
}

/// Activations (and the dropout mask, if any) from one forward call.
#[derive(Debug, Clone)]
pub struct DenseCache {
    pub activations: Vec<f32>,
    pub dropout_mask: Option<DropoutMask>,
}

impl DenseLayer {
    /// Create a new DenseLayer with Xavier initialization.
    ///
    /// Weights are sampled uniformly from [-limit, limit]
    /// where limit = sqrt(6 / (n_in + n_units)). Biases start at zero.
    pub fn new(
        n_in: usize,
        n_units: usize,
        activation: Activation,
        rng: &mut SimpleRng,
    ) -> Result<Self> {
        let limit = (6.0f32 / (n_in + n_units).max(1) as f32).sqrt();
        let weights = (0..n_in * n_units)
            .map(|_| rng.gen_range_f32(-limit, limit))
            .collect();
        Self::with_parameters(n_in, n_units, activation, weights, vec![0.0; n_units], rng)
    }

    /// Create a layer from caller-supplied weights and biases.
    pub fn with_parameters(
        n_in: usize,
        n_units: usize,
        activation: Activation,
        weights: Vec<f32>,
        biases: Vec<f32>,
        rng: &mut SimpleRng,
    ) -> Result<Self> {
        require_positive(n_in, "n_in")?;
        require_positive(n_units, "n_units")?;
        check_len("dense weights", n_in * n_units, weights.len())?;
        check_len("dense biases", n_units, biases.len())?;

        Ok(Self {
            n_in,
            n_units,
            activation,
            weights,
            biases,
            dropout: None,
            l1_penalty_weight: 0.0,
            l2_penalty_weight: 0.0,
            lr_multiplier: [1.0, 1.0],
            rng: RefCell::new(rng.fork()),
        })
    }

    /// Enable dropout with the given drop probability.
    pub fn with_dropout(mut self, dropout: Option<f32>) -> Result<Self> {
        validate_dropout(dropout)?;
        self.dropout = dropout;
        Ok(self)
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

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn dropout(&self) -> Option<f32> {
        self.dropout
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn biases(&self) -> &[f32] {
        &self.biases
    }

    /// Forward pass for `(batch_size, n_in)` input.
    pub fn feed_forward(
        &self,
        input: &[f32],
        batch_size: usize,
        prediction: bool,
    ) -> Result<DenseCache> {
        check_len("dense input", batch_size * self.n_in, input.len())?;

        let mut activations = vec![0.0f32; batch_size * self.n_units];
        for b in 0..batch_size {
            let in_offset = b * self.n_in;
            let out_offset = b * self.n_units;

            for j in 0..self.n_units {
                let mut sum = self.biases[j];
                for i in 0..self.n_in {
                    sum += input[in_offset + i] * self.weights[i * self.n_units + j];
                }
                activations[out_offset + j] = sum;
            }
        }
        self.activation.apply_inplace(&mut activations);

        let dropout_mask = match self.dropout {
            Some(p) if prediction => {
                scale_columns(&mut activations, self.n_units, self.n_units, 1.0 - p);
                None
            }
            Some(p) => Some(sample_dropout_mask(
                &mut activations,
                batch_size,
                self.n_units,
                self.n_units,
                p,
                &mut self.rng.borrow_mut(),
            )?),
            None => None,
        };

        Ok(DenseCache {
            activations,
            dropout_mask,
        })
    }

    /// Backward pass.
    ///
    /// Returns `[grad_weights, grad_biases]` and the gradient w.r.t. the input.
    pub fn backprop(
        &self,
        input: &[f32],
        grad_output: &[f32],
        batch_size: usize,
        cache: Option<DenseCache>,
    ) -> Result<(Vec<ParameterGradient>, Vec<f32>)> {
        let cache = match cache {
            Some(cache) => cache,
            None => self.feed_forward(input, batch_size, false)?,
        };
        check_len("dense input", batch_size * self.n_in, input.len())?;
        check_len("dense output gradient", batch_size * self.n_units, grad_output.len())?;

        let mut delta = grad_output.to_vec();
        if let Some(mask) = &cache.dropout_mask {
            apply_dropout_mask(&mut delta, self.n_units, mask)?;
        }
        for (d, df) in delta.iter_mut().zip(self.activation.derivative(&cache.activations)) {
            *d *= df;
        }

        let mut grad_w = vec![0.0f32; self.n_in * self.n_units];
        let mut grad_b = vec![0.0f32; self.n_units];
        let mut grad_input = vec![0.0f32; batch_size * self.n_in];

        for b in 0..batch_size {
            let in_offset = b * self.n_in;
            let out_offset = b * self.n_units;

            for j in 0..self.n_units {
                let g = delta[out_offset + j];
                grad_b[j] += g;

                for i in 0..self.n_in {
                    grad_w[i * self.n_units + j] += input[in_offset + i] * g;
                    grad_input[in_offset + i] += g * self.weights[i * self.n_units + j];
                }
            }
        }

        apply_weight_decay(
            &mut grad_w,
            &self.weights,
            self.l1_penalty_weight,
            self.l2_penalty_weight,
        );

        Ok((
            vec![
                ParameterGradient::new(grad_w, self.lr_multiplier[0]),
                ParameterGradient::new(grad_b, self.lr_multiplier[1]),
            ],
            grad_input,
        ))
    }
}

impl Layer for DenseLayer {
    fn n_in(&self) -> usize {
        self.n_in
    }

    fn n_units(&self) -> usize {
        self.n_units
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
            replace_parameter(&mut self.weights, w, "dense weights")?;
            replace_parameter(&mut self.biases, b, "dense biases")?;
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
