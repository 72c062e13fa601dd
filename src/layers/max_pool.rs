//! Max pooling layer for filter maps
//!
//! Pools each filter's row of a filter map in non-overlapping windows and keeps
//! the argmax for the backward pass. Dropout, when enabled, is applied at the
//! granularity of the pooled outputs.

use std::cell::RefCell;

use tracing::trace;

use crate::error::{check_len, Result};
use crate::kernels::{
    apply_dropout_mask, max_pool, max_pool_gradient, pooled_width, sample_dropout_mask,
    scale_columns, DropoutMask,
};
use crate::layers::params::{check_parameter_count, require_positive, validate_dropout};
use crate::layers::Layer;
use crate::utils::SimpleRng;

/// Non-overlapping max pooling with optional dropout.
///
/// # Fields
///
/// * `n_in` - Positions per filter in the incoming filter map
/// * `pool_size` - Window length; the last window may be shorter
/// * `n_filters` - Number of filter rows per sample
/// * `dropout` - Drop probability for pooled outputs, if dropout is enabled
#[derive(Debug)]
pub struct MaxPoolingLayer {
    n_in: usize,
    pool_size: usize,
    n_filters: usize,
    n_units: usize,
    dropout: Option<f32>,
    rng: RefCell<SimpleRng>,
}

/// Everything the backward pass needs from one forward call.
#[derive(Debug, Clone)]
pub struct PoolingCache {
    pub activations: Vec<f32>,
    pub argmax: Vec<u32>,
    pub dropout_mask: Option<DropoutMask>,
}

impl MaxPoolingLayer {
    /// Create a pooling layer.
    ///
    /// `dropout` is the drop probability, `None` to disable dropout.
    pub fn new(
        n_in: usize,
        pool_size: usize,
        n_filters: usize,
        dropout: Option<f32>,
        rng: &mut SimpleRng,
    ) -> Result<Self> {
        require_positive(n_in, "n_in")?;
        require_positive(pool_size, "pool_size")?;
        require_positive(n_filters, "n_filters")?;
        validate_dropout(dropout)?;

        Ok(Self {
            n_in,
            pool_size,
            n_filters,
            n_units: Self::compute_n_units(n_in, pool_size, n_filters),
            dropout,
            rng: RefCell::new(rng.fork()),
        })
    }

    /// Output units for a filter map: `ceil(n_in / pool_size) * n_filters`.
    ///
    /// Returns 0 for a zero `pool_size`; [`MaxPoolingLayer::new`] rejects it.
    pub fn compute_n_units(n_in: usize, pool_size: usize, n_filters: usize) -> usize {
        pooled_width(n_in, pool_size) * n_filters
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn n_filters(&self) -> usize {
        self.n_filters
    }

    pub fn dropout(&self) -> Option<f32> {
        self.dropout
    }

    /// Pool a filter map `(batch_size, n_filters * n_in)`.
    ///
    /// With dropout in training a mask is sampled and dropped outputs are
    /// zeroed; in prediction the outputs are scaled by the keep probability.
    pub fn feed_forward(
        &self,
        filtermap: &[f32],
        batch_size: usize,
        prediction: bool,
    ) -> Result<PoolingCache> {
        trace!(batch_size, prediction, "max pooling forward");
        let (mut activations, argmax) =
            max_pool(filtermap, batch_size, self.n_in, self.n_filters, self.pool_size)?;

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

        Ok(PoolingCache {
            activations,
            argmax,
            dropout_mask,
        })
    }

    /// Gradient w.r.t. the filter map.
    ///
    /// Applies the cached dropout mask, then routes every pooled gradient to
    /// the position recorded in the cached argmax.
    pub fn backprop(
        &self,
        filtermap: &[f32],
        grad_output: &[f32],
        batch_size: usize,
        cache: Option<PoolingCache>,
    ) -> Result<Vec<f32>> {
        let cache = match cache {
            Some(cache) => cache,
            None => self.feed_forward(filtermap, batch_size, false)?,
        };
        check_len("pooled output gradient", batch_size * self.n_units, grad_output.len())?;
        trace!(batch_size, "max pooling backward");

        let mut grad = grad_output.to_vec();
        if let Some(mask) = &cache.dropout_mask {
            apply_dropout_mask(&mut grad, self.n_units, mask)?;
        }

        max_pool_gradient(
            &cache.argmax,
            &grad,
            batch_size,
            self.n_in,
            self.n_filters,
            self.pool_size,
            self.n_units,
            0,
        )
    }
}

impl Layer for MaxPoolingLayer {
    fn n_in(&self) -> usize {
        self.n_in
    }

    fn n_units(&self) -> usize {
        self.n_units
    }

    fn n_parameters(&self) -> usize {
        0
    }

    fn parameters(&self) -> Vec<&[f32]> {
        Vec::new()
    }

    fn set_parameters(&mut self, values: Vec<Vec<f32>>) -> Result<()> {
        check_parameter_count(0, values.len())
    }

    fn update_parameters(&mut self, updates: &[(&[f32], f32)]) -> Result<()> {
        check_parameter_count(0, updates.len())
    }

    fn lr_multiplier(&self) -> Vec<f32> {
        Vec::new()
    }

    fn l1_penalty(&self) -> f32 {
        0.0
    }

    fn l2_penalty(&self) -> f32 {
        0.0
    }
}
