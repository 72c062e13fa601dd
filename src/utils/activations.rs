//! Activation functions for the sequence layers
//!
//! Every activation is paired with a derivative expressed in terms of the
//! activated output, because the layers only keep post-activation filter maps
//! around for the backward pass.

use crate::error::{LayerError, Result};

/// Names accepted by [`Activation::from_name`].
pub const ACTIVATION_NAMES: [&str; 7] = [
    "sigmoid",
    "tanh",
    "relu",
    "linear",
    "softplus",
    "leaky_relu",
    "elu",
];

/// Default negative slope for Leaky ReLU.
pub const LEAKY_RELU_ALPHA: f32 = 0.01;

/// Default saturation value for ELU.
pub const ELU_ALPHA: f32 = 1.0;

/// Elementwise activation function `f` and its derivative `df`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Sigmoid,
    Tanh,
    Relu,
    Linear,
    Softplus,
    LeakyRelu { alpha: f32 },
    Elu { alpha: f32 },
}

impl Activation {
    /// Resolve an activation by its configuration name.
    ///
    /// Names are case-insensitive. Leaky ReLU and ELU use their default alphas.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            "relu" => Ok(Activation::Relu),
            "linear" => Ok(Activation::Linear),
            "softplus" => Ok(Activation::Softplus),
            "leaky_relu" => Ok(Activation::LeakyRelu {
                alpha: LEAKY_RELU_ALPHA,
            }),
            "elu" => Ok(Activation::Elu { alpha: ELU_ALPHA }),
            _ => Err(LayerError::InvalidConfig(format!(
                "Invalid activation function '{}'. Must be one of: {}",
                name,
                ACTIVATION_NAMES.join(", ")
            ))),
        }
    }

    /// Configuration name of this activation.
    pub fn name(&self) -> &'static str {
        match self {
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::Relu => "relu",
            Activation::Linear => "linear",
            Activation::Softplus => "softplus",
            Activation::LeakyRelu { .. } => "leaky_relu",
            Activation::Elu { .. } => "elu",
        }
    }

    /// Apply `f` in place.
    pub fn apply_inplace(&self, data: &mut [f32]) {
        match *self {
            Activation::Sigmoid => {
                for value in data.iter_mut() {
                    *value = sigmoid(*value);
                }
            }
            Activation::Tanh => {
                for value in data.iter_mut() {
                    *value = value.tanh();
                }
            }
            Activation::Relu => relu_inplace(data),
            Activation::Linear => {}
            Activation::Softplus => {
                for value in data.iter_mut() {
                    *value = softplus(*value);
                }
            }
            Activation::LeakyRelu { alpha } => {
                for value in data.iter_mut() {
                    if *value < 0.0 {
                        *value *= alpha;
                    }
                }
            }
            Activation::Elu { alpha } => {
                for value in data.iter_mut() {
                    if *value < 0.0 {
                        *value = alpha * (value.exp() - 1.0);
                    }
                }
            }
        }
    }

    /// Derivative `df` evaluated at the activated values `y = f(x)`.
    pub fn derivative(&self, activations: &[f32]) -> Vec<f32> {
        activations.iter().map(|&y| self.derivative_at(y)).collect()
    }

    fn derivative_at(&self, y: f32) -> f32 {
        match *self {
            Activation::Sigmoid => sigmoid_derivative(y),
            Activation::Tanh => 1.0 - y * y,
            Activation::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Linear => 1.0,
            // d/dx ln(1 + e^x) = 1 - e^-y
            Activation::Softplus => 1.0 - (-y).exp(),
            Activation::LeakyRelu { alpha } => {
                if y > 0.0 {
                    1.0
                } else {
                    alpha
                }
            }
            Activation::Elu { alpha } => {
                if y > 0.0 {
                    1.0
                } else {
                    y + alpha
                }
            }
        }
    }
}

/// Sigmoid activation function.
///
/// Returns the sigmoid of the input: 1 / (1 + exp(-x))
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Sigmoid derivative assuming y = sigmoid(x).
///
/// Returns the derivative: y * (1 - y)
pub fn sigmoid_derivative(y: f32) -> f32 {
    y * (1.0 - y)
}

/// ReLU activation function applied in-place.
///
/// Sets all negative values to 0.0, keeps positive values unchanged.
pub fn relu_inplace(data: &mut [f32]) {
    for value in data.iter_mut() {
        if *value < 0.0 {
            *value = 0.0;
        }
    }
}

fn softplus(x: f32) -> f32 {
    // ln(1 + e^x) without overflow for large x
    if x > 20.0 {
        x
    } else {
        x.exp().ln_1p()
    }
}
