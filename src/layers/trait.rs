//! Layer trait definition for the sequence layers
//!
//! Forward and backward passes differ in shape between layer types (one
//! sequence, one filter map, or one input per region), so they live on the
//! layer types themselves. The trait covers what every layer shares: sizes and
//! the ordered parameter list an outer training loop reads, writes and updates.

use crate::error::Result;

/// Gradient of one parameter tensor paired with its learning-rate multiplier.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterGradient {
    pub gradient: Vec<f32>,
    pub lr_multiplier: f32,
}

impl ParameterGradient {
    pub fn new(gradient: Vec<f32>, lr_multiplier: f32) -> Self {
        Self {
            gradient,
            lr_multiplier,
        }
    }
}

/// Core trait for layers with an ordered parameter list.
///
/// # Example
///
/// ```ignore
/// // An SGD step driven by the outer loop
/// let grads = layer.backprop(&input, &grad_output, batch_size, Some(cache))?;
/// let deltas: Vec<Vec<f32>> = grads.iter().map(|g| g.gradient.clone()).collect();
/// let updates: Vec<(&[f32], f32)> = deltas
///     .iter()
///     .zip(&grads)
///     .map(|(d, g)| (d.as_slice(), -learning_rate * g.lr_multiplier))
///     .collect();
/// layer.update_parameters(&updates)?;
/// ```
pub trait Layer {
    /// Number of input features per sample.
    fn n_in(&self) -> usize;

    /// Number of output units per sample.
    fn n_units(&self) -> usize;

    /// Number of parameter tensors (not scalars) in [`Layer::parameters`].
    fn n_parameters(&self) -> usize;

    /// Parameter tensors in their canonical order.
    fn parameters(&self) -> Vec<&[f32]>;

    /// Replace every parameter tensor.
    ///
    /// # Errors
    ///
    /// Fails if the number of tensors differs from [`Layer::n_parameters`] or a
    /// tensor has the wrong length.
    fn set_parameters(&mut self, values: Vec<Vec<f32>>) -> Result<()>;

    /// In-place affine update `param := param + multiplier * delta` for each
    /// `(delta, multiplier)` pair, in parameter order.
    ///
    /// # Errors
    ///
    /// Fails if the number of pairs differs from [`Layer::n_parameters`] or a
    /// delta has the wrong length.
    fn update_parameters(&mut self, updates: &[(&[f32], f32)]) -> Result<()>;

    /// Learning-rate multiplier per parameter tensor.
    fn lr_multiplier(&self) -> Vec<f32>;

    /// Current L1 penalty contribution to the loss.
    fn l1_penalty(&self) -> f32;

    /// Current L2 penalty contribution to the loss.
    fn l2_penalty(&self) -> f32;
}
