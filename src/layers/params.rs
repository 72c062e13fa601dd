//! Parameter helpers shared by the layer implementations.

use crate::error::{check_len, LayerError, Result};
use crate::kernels::sign;
use crate::utils::SimpleRng;

/// Default half-width multiplier for uniform filter initialization.
pub const DEFAULT_WEIGHT_SCALE: f32 = 0.01;

/// Default dropout probability.
pub const DEFAULT_DROPOUT_PROBABILITY: f32 = 0.5;

/// `count` weights uniform in `[-weight_scale / 2, weight_scale / 2)`.
pub(crate) fn uniform_weights(count: usize, weight_scale: f32, rng: &mut SimpleRng) -> Vec<f32> {
    let half = 0.5 * weight_scale;
    (0..count).map(|_| rng.gen_range_f32(-half, half)).collect()
}

/// Subtract the L1 and L2 weight decay terms from a weight gradient.
pub(crate) fn apply_weight_decay(grad: &mut [f32], weights: &[f32], l1: f32, l2: f32) {
    if l1 > 0.0 {
        for (g, s) in grad.iter_mut().zip(sign(weights)) {
            *g -= l1 * s;
        }
    }
    if l2 > 0.0 {
        for (g, w) in grad.iter_mut().zip(weights) {
            *g -= l2 * w;
        }
    }
}

pub(crate) fn l1_penalty(weights: &[f32], l1: f32) -> f32 {
    l1 * weights.iter().map(|w| w.abs()).sum::<f32>()
}

pub(crate) fn l2_penalty(weights: &[f32], l2: f32) -> f32 {
    l2 * 0.5 * weights.iter().map(|w| w * w).sum::<f32>()
}

pub(crate) fn check_parameter_count(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(LayerError::ParameterCount { expected, actual });
    }
    Ok(())
}

/// Check replacement or update tensors against the current parameters, count
/// first and then every length, before any of them is written.
pub(crate) fn check_parameter_shapes<I>(params: &[&[f32]], lengths: I) -> Result<()>
where
    I: ExactSizeIterator<Item = usize>,
{
    check_parameter_count(params.len(), lengths.len())?;
    for (i, (param, len)) in params.iter().zip(lengths).enumerate() {
        check_len(&format!("parameter {}", i), param.len(), len)?;
    }
    Ok(())
}

/// `param := param + multiplier * delta`.
pub(crate) fn add_scaled(param: &mut [f32], delta: &[f32], multiplier: f32) -> Result<()> {
    check_len("parameter update", param.len(), delta.len())?;
    for (p, d) in param.iter_mut().zip(delta) {
        *p += multiplier * d;
    }
    Ok(())
}

/// Replace `dest` with `value`, keeping its length.
pub(crate) fn replace_parameter(dest: &mut Vec<f32>, value: Vec<f32>, what: &str) -> Result<()> {
    check_len(what, dest.len(), value.len())?;
    *dest = value;
    Ok(())
}

pub(crate) fn validate_dropout(dropout: Option<f32>) -> Result<()> {
    match dropout {
        Some(p) if !(0.0..1.0).contains(&p) => Err(LayerError::InvalidConfig(format!(
            "dropout probability must be in range [0.0, 1.0), got {}",
            p
        ))),
        _ => Ok(()),
    }
}

pub(crate) fn require_positive(value: usize, what: &str) -> Result<()> {
    if value == 0 {
        return Err(LayerError::InvalidConfig(format!("{} must be > 0", what)));
    }
    Ok(())
}
