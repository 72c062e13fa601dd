//! Multi-region sequence convolution layer
//!
//! Convolves several sequence regions, each with its own length and pooling,
//! and concatenates their pooled outputs into one buffer. Regions either own a
//! filter bank (masters) or reuse the filter bank of an earlier region
//! (slaves). Filter banks live in one arena indexed by `param_index`, so a
//! slave never holds a copy, and gradients of every region reading the same
//! filter bank are summed into the same slot.
//!
//! An optional dense branch runs next to the regions; its activations occupy
//! the last columns of the pooled buffer.
//!
//! Column layout of the pooled buffer for regions `r0, r1, ...` and a branch:
//!
//! ```text
//! | r0: n_filters·ceil(n_in/pool) | r1: ... | ... | fc: n_units |
//! 0                               r1.offset              fc_offset   n_units
//! ```

use std::cell::RefCell;
use std::ops::Range;

use tracing::{debug, trace};

use crate::config::{MultiRegionConfig, RegionConfig};
use crate::error::{check_len, LayerError, Result};
use crate::kernels::{
    apply_dropout_mask, convolve_sequence, convolve_sequence_gradient, extract_columns,
    insert_columns, max_pool_gradient, max_pool_into, pooled_width, sample_dropout_mask,
    scale_columns, sum_delta, DropoutMask, PooledSlice,
};
use crate::layers::params::{
    self, add_scaled, apply_weight_decay, check_parameter_shapes, replace_parameter,
    require_positive, uniform_weights, validate_dropout,
};
use crate::layers::{DenseCache, DenseLayer, Layer, MaxPoolingLayer, ParameterGradient};
use crate::utils::{Activation, SimpleRng};
use crate::ALPHABET_SIZE;

/// Whether a region owns its filter bank or aliases another region's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionRole {
    Master,
    /// Reads the filter bank owned by region `master`.
    Slave { master: usize },
}

/// Fully resolved description of one region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionDescriptor {
    pub n_in: usize,
    pub filter_width: usize,
    pub n_filters: usize,
    pub pool_size: usize,
    pub activation: Activation,
    pub l1_weight: f32,
    pub l2_weight: f32,
    pub lr_multiplier: f32,
    pub role: RegionRole,
    /// Index of the filter bank this region reads
    pub param_index: usize,
    /// First column of this region in the pooled buffer
    pub output_offset: usize,
    pub n_units: usize,
}

impl RegionDescriptor {
    /// Pooled outputs per filter.
    pub fn n_pooled(&self) -> usize {
        pooled_width(self.n_in, self.pool_size)
    }

    /// Columns of the pooled buffer owned by this region.
    pub fn output_range(&self) -> Range<usize> {
        self.output_offset..self.output_offset + self.n_units
    }

    pub fn is_master(&self) -> bool {
        self.role == RegionRole::Master
    }
}

/// Everything one forward call hands to the matching backward call.
#[derive(Debug, Clone)]
pub struct MultiRegionCache {
    /// Pooled buffer (batch × n_units), branch columns included
    pub activations: Vec<f32>,
    /// Argmax for every pooled column (branch columns unused)
    pub argmax: Vec<u32>,
    /// Post-activation filter map per region
    pub filtermaps: Vec<Vec<f32>>,
    /// Mask drawn by this forward call. Backprop only checks its shape, so
    /// pairing it with the gradient of a different call of the same shape is
    /// up to the caller.
    pub dropout_mask: Option<DropoutMask>,
    pub fc_cache: Option<DenseCache>,
}

/// Result of [`MultiSequenceConvolutionLayer::backprop`].
#[derive(Debug, Clone)]
pub struct MultiRegionGradients {
    /// Master weights, then master biases, then the branch's parameters
    pub parameters: Vec<ParameterGradient>,
    /// Gradient w.r.t. each region's filter map
    pub filtermap_gradients: Vec<Vec<f32>>,
    /// Gradient w.r.t. the branch input, if there is a branch
    pub fc_input_gradient: Option<Vec<f32>>,
}

/// Multi-region convolution and max pooling with weight sharing.
///
/// # Example
///
/// ```ignore
/// use sequence_convolution::config::{MultiRegionConfig, RegionConfig};
/// use sequence_convolution::layers::MultiSequenceConvolutionLayer;
/// use sequence_convolution::utils::SimpleRng;
///
/// let mut shared = RegionConfig::new(40);
/// shared.weight_share = Some(0);
/// let mut config = MultiRegionConfig::new(vec![RegionConfig::new(40), shared]);
/// config.defaults.n_filters = Some(8);
/// config.defaults.filter_width = Some(5);
/// config.defaults.pool_size = Some(4);
///
/// let mut rng = SimpleRng::new(42);
/// let layer = MultiSequenceConvolutionLayer::from_config(&config, &mut rng)?;
/// assert_eq!(layer.physical_parameter_count(), 1);
/// ```
#[derive(Debug)]
pub struct MultiSequenceConvolutionLayer {
    regions: Vec<RegionDescriptor>,
    weights: Vec<Vec<f32>>,
    biases: Vec<Vec<f32>>,
    /// Owning region for every `param_index`
    master_regions: Vec<usize>,
    fully_connected: Option<DenseLayer>,
    fc_offset: usize,
    n_units: usize,
    dropout: Option<f32>,
    rng: RefCell<SimpleRng>,
}

impl MultiSequenceConvolutionLayer {
    /// Build the layer from a configuration, including the dense branch.
    pub fn from_config(config: &MultiRegionConfig, rng: &mut SimpleRng) -> Result<Self> {
        crate::config::validate_config(config)?;
        let fully_connected = config
            .fully_connected_layer
            .as_ref()
            .map(|fc| fc.build(0.0, 0.0, rng))
            .transpose()?;
        Self::new(config, fully_connected, rng)
    }

    /// Build the layer from region configurations and an already built branch.
    ///
    /// # Errors
    ///
    /// - [`LayerError::ForwardReference`] if a region shares weights with
    ///   itself or a later region
    /// - [`LayerError::ShapeMismatch`] if supplied weights or biases do not fit
    /// - [`LayerError::DropoutConflict`] if the branch has dropout
    /// - [`LayerError::InvalidConfig`] for missing sizes or slave conflicts
    pub fn new(
        config: &MultiRegionConfig,
        fully_connected: Option<DenseLayer>,
        rng: &mut SimpleRng,
    ) -> Result<Self> {
        let dropout = config.dropout_probability();
        validate_dropout(dropout)?;
        if config.regions.is_empty() {
            return Err(LayerError::InvalidConfig(
                "multi-region layer must have at least one region".into(),
            ));
        }

        let mut regions: Vec<RegionDescriptor> = Vec::with_capacity(config.regions.len());
        let mut weights = Vec::new();
        let mut biases = Vec::new();
        let mut master_regions = Vec::new();
        let mut output_offset = 0;

        for (index, region) in config.regions.iter().enumerate() {
            let resolved = region.resolve(&config.defaults);
            let descriptor = match region.weight_share {
                None => {
                    let (descriptor, w, b) = resolve_master(
                        index,
                        &resolved,
                        weights.len(),
                        output_offset,
                        config.weight_scale(),
                        rng,
                    )?;
                    weights.push(w);
                    biases.push(b);
                    master_regions.push(index);
                    descriptor
                }
                Some(target) => resolve_slave(index, region, &resolved, target, &regions, output_offset)?,
            };

            debug!(
                region = index,
                role = ?descriptor.role,
                param_index = descriptor.param_index,
                offset = descriptor.output_offset,
                n_units = descriptor.n_units,
                "resolved region"
            );
            output_offset += descriptor.n_units;
            regions.push(descriptor);
        }

        let fc_offset = output_offset;
        let mut n_units = output_offset;
        if let Some(fc) = &fully_connected {
            if fc.dropout().is_some() {
                return Err(LayerError::DropoutConflict);
            }
            n_units += fc.n_units();
        }

        debug!(
            regions = regions.len(),
            filter_banks = weights.len(),
            n_units,
            has_fully_connected = fully_connected.is_some(),
            "built multi-region layer"
        );

        Ok(Self {
            regions,
            weights,
            biases,
            master_regions,
            fully_connected,
            fc_offset,
            n_units,
            dropout,
            rng: RefCell::new(rng.fork()),
        })
    }

    pub fn regions(&self) -> &[RegionDescriptor] {
        &self.regions
    }

    /// Number of filter banks, which equals the number of master regions.
    pub fn physical_parameter_count(&self) -> usize {
        self.weights.len()
    }

    pub fn fully_connected_layer(&self) -> Option<&DenseLayer> {
        self.fully_connected.as_ref()
    }

    /// First column of the branch in the pooled buffer (the pooled width when
    /// there is no branch).
    pub fn fc_offset(&self) -> usize {
        self.fc_offset
    }

    pub fn dropout(&self) -> Option<f32> {
        self.dropout
    }

    /// Filter bank weights for a physical parameter index.
    pub fn filter_weights(&self, param_index: usize) -> Option<&[f32]> {
        self.weights.get(param_index).map(Vec::as_slice)
    }

    fn expected_inputs(&self) -> usize {
        self.regions.len() + usize::from(self.fully_connected.is_some())
    }

    /// Forward pass over one input per region, plus a trailing branch input
    /// when the layer has a branch.
    ///
    /// Region `i` reads `(batch_size, n_in_i * ALPHABET_SIZE)`; the result
    /// holds the pooled buffer `(batch_size, n_units)`.
    pub fn feed_forward(
        &self,
        inputs: &[&[f32]],
        batch_size: usize,
        prediction: bool,
    ) -> Result<MultiRegionCache> {
        if inputs.len() != self.expected_inputs() {
            return Err(LayerError::InputCount {
                expected: self.expected_inputs(),
                actual: inputs.len(),
            });
        }
        trace!(batch_size, prediction, "multi-region forward");

        let row_width = self.n_units;
        let mut activations = vec![0.0f32; batch_size * row_width];
        let mut argmax = vec![0u32; batch_size * row_width];
        let mut filtermaps = Vec::with_capacity(self.regions.len());

        for (region, input) in self.regions.iter().zip(inputs) {
            let mut filtermap = convolve_sequence(
                input,
                &self.weights[region.param_index],
                &self.biases[region.param_index],
                batch_size,
                region.n_in,
                region.filter_width,
            )?;
            region.activation.apply_inplace(&mut filtermap);

            max_pool_into(
                &filtermap,
                batch_size,
                region.n_in,
                region.n_filters,
                region.pool_size,
                PooledSlice {
                    activations: &mut activations,
                    argmax: &mut argmax,
                    row_width,
                    offset: region.output_offset,
                },
            )?;
            filtermaps.push(filtermap);
        }

        let fc_cache = match &self.fully_connected {
            Some(fc) => {
                let cache = fc.feed_forward(inputs[self.regions.len()], batch_size, prediction)?;
                insert_columns(
                    &cache.activations,
                    fc.n_units(),
                    &mut activations,
                    row_width,
                    self.fc_offset,
                )?;
                Some(cache)
            }
            None => None,
        };

        // Dropout covers the pooled columns only, never the branch.
        let dropout_mask = match self.dropout {
            Some(p) if prediction => {
                scale_columns(&mut activations, row_width, self.fc_offset, 1.0 - p);
                None
            }
            Some(p) => Some(sample_dropout_mask(
                &mut activations,
                batch_size,
                row_width,
                self.fc_offset,
                p,
                &mut self.rng.borrow_mut(),
            )?),
            None => None,
        };

        Ok(MultiRegionCache {
            activations,
            argmax,
            filtermaps,
            dropout_mask,
            fc_cache,
        })
    }

    /// Backward pass given the gradient w.r.t. the pooled buffer.
    ///
    /// Gradients of regions sharing a filter bank are summed in declaration
    /// order; weight decay is then applied once per filter bank with its
    /// master's coefficients.
    pub fn backprop(
        &self,
        inputs: &[&[f32]],
        grad_output: &[f32],
        batch_size: usize,
        cache: Option<MultiRegionCache>,
    ) -> Result<MultiRegionGradients> {
        let cache = match cache {
            Some(cache) => cache,
            None => self.feed_forward(inputs, batch_size, false)?,
        };
        if inputs.len() != self.expected_inputs() {
            return Err(LayerError::InputCount {
                expected: self.expected_inputs(),
                actual: inputs.len(),
            });
        }
        check_len("multi-region output gradient", batch_size * self.n_units, grad_output.len())?;
        check_len("cached filter maps", self.regions.len(), cache.filtermaps.len())?;
        trace!(batch_size, "multi-region backward");

        let row_width = self.n_units;
        let mut grad = grad_output.to_vec();
        if let Some(mask) = &cache.dropout_mask {
            apply_dropout_mask(&mut grad, row_width, mask)?;
        }

        let n_params = self.weights.len();
        let mut grad_w: Vec<Option<Vec<f32>>> = vec![None; n_params];
        let mut grad_b: Vec<Option<Vec<f32>>> = vec![None; n_params];
        let mut filtermap_gradients = Vec::with_capacity(self.regions.len());

        for ((region, input), filtermap) in self.regions.iter().zip(inputs).zip(&cache.filtermaps) {
            let grad_filtermap = max_pool_gradient(
                &cache.argmax,
                &grad,
                batch_size,
                region.n_in,
                region.n_filters,
                region.pool_size,
                row_width,
                region.output_offset,
            )?;

            let mut delta = region.activation.derivative(filtermap);
            for (d, g) in delta.iter_mut().zip(&grad_filtermap) {
                *d *= g;
            }
            filtermap_gradients.push(grad_filtermap);

            let db = sum_delta(&delta, batch_size, region.n_filters)?;
            let dw = convolve_sequence_gradient(
                input,
                &delta,
                batch_size,
                region.n_in,
                region.filter_width,
                region.n_filters,
            )?;

            accumulate(&mut grad_w[region.param_index], dw, region.role);
            accumulate(&mut grad_b[region.param_index], db, region.role);
        }

        let mut parameters = Vec::with_capacity(self.n_parameters());
        let mut bias_parameters = Vec::with_capacity(n_params);
        for (param_index, (dw, db)) in grad_w.into_iter().zip(grad_b).enumerate() {
            let master = &self.regions[self.master_regions[param_index]];
            let mut dw = dw.unwrap_or_else(|| vec![0.0; self.weights[param_index].len()]);
            let db = db.unwrap_or_else(|| vec![0.0; self.biases[param_index].len()]);
            apply_weight_decay(
                &mut dw,
                &self.weights[param_index],
                master.l1_weight,
                master.l2_weight,
            );
            parameters.push(ParameterGradient::new(dw, master.lr_multiplier));
            bias_parameters.push(ParameterGradient::new(db, master.lr_multiplier));
        }
        parameters.extend(bias_parameters);

        let fc_input_gradient = match &self.fully_connected {
            Some(fc) => {
                let grad_fc =
                    extract_columns(&grad, batch_size, row_width, self.fc_offset, row_width)?;
                let (fc_grads, fc_input_grad) = fc.backprop(
                    inputs[self.regions.len()],
                    &grad_fc,
                    batch_size,
                    cache.fc_cache,
                )?;
                parameters.extend(fc_grads);
                Some(fc_input_grad)
            }
            None => None,
        };

        Ok(MultiRegionGradients {
            parameters,
            filtermap_gradients,
            fc_input_gradient,
        })
    }

    /// Number of parameter tensors belonging to the regions.
    fn n_conv_parameters(&self) -> usize {
        self.weights.len() + self.biases.len()
    }
}

/// Seed the accumulator with a master's gradient or add a slave's into it.
fn accumulate(slot: &mut Option<Vec<f32>>, contribution: Vec<f32>, role: RegionRole) {
    match (slot.as_mut(), role) {
        (Some(total), RegionRole::Slave { .. }) => {
            for (t, c) in total.iter_mut().zip(&contribution) {
                *t += c;
            }
        }
        _ => *slot = Some(contribution),
    }
}

fn required(value: Option<usize>, what: &str, index: usize) -> Result<usize> {
    let value = value.ok_or_else(|| {
        LayerError::InvalidConfig(format!("Region {}: missing {}", index, what))
    })?;
    require_positive(value, &format!("Region {}: {}", index, what))?;
    Ok(value)
}

fn resolve_master(
    index: usize,
    resolved: &RegionConfig,
    param_index: usize,
    output_offset: usize,
    layer_weight_scale: f32,
    rng: &mut SimpleRng,
) -> Result<(RegionDescriptor, Vec<f32>, Vec<f32>)> {
    let n_in = required(Some(resolved.n_in), "n_in", index)?;
    let n_filters = required(resolved.n_filters, "n_filters", index)?;
    let filter_width = required(resolved.filter_width, "filter_width", index)?;
    let pool_size = required(resolved.pool_size, "pool_size", index)?;
    let activation =
        Activation::from_name(resolved.activation_function.as_deref().unwrap_or("sigmoid"))?;

    let weights = match &resolved.weights {
        Some(w) => w.clone(),
        None => uniform_weights(
            n_filters * ALPHABET_SIZE * filter_width,
            resolved.weight_scale.unwrap_or(layer_weight_scale),
            rng,
        ),
    };
    check_len(
        &format!("region {} filter weights", index),
        n_filters * ALPHABET_SIZE * filter_width,
        weights.len(),
    )?;
    let biases = resolved.biases.clone().unwrap_or_else(|| vec![0.0; n_filters]);
    check_len(&format!("region {} filter biases", index), n_filters, biases.len())?;

    let descriptor = RegionDescriptor {
        n_in,
        filter_width,
        n_filters,
        pool_size,
        activation,
        l1_weight: resolved.l1_penalty_weight.unwrap_or(0.0),
        l2_weight: resolved.l2_penalty_weight.unwrap_or(0.0),
        lr_multiplier: resolved.lr_multiplier.unwrap_or(1.0),
        role: RegionRole::Master,
        param_index,
        output_offset,
        n_units: MaxPoolingLayer::compute_n_units(n_in, pool_size, n_filters),
    };
    Ok((descriptor, weights, biases))
}

fn resolve_slave(
    index: usize,
    region: &RegionConfig,
    resolved: &RegionConfig,
    target: usize,
    earlier: &[RegionDescriptor],
    output_offset: usize,
) -> Result<RegionDescriptor> {
    let source = earlier
        .get(target)
        .ok_or(LayerError::ForwardReference { region: index, target })?;
    let master = match source.role {
        RegionRole::Master => target,
        RegionRole::Slave { master } => master,
    };

    if region.weights.is_some() || region.biases.is_some() || region.weight_scale.is_some() {
        return Err(LayerError::InvalidConfig(format!(
            "Region {}: shares weights with region {} and cannot supply its own W, b or weight_scale",
            index, target
        )));
    }
    let conflict = |what: &str| {
        LayerError::InvalidConfig(format!(
            "Region {}: {} differs from region {} it shares weights with",
            index, what, target
        ))
    };
    if region.n_filters.is_some_and(|n| n != source.n_filters) {
        return Err(conflict("n_filters"));
    }
    if region.filter_width.is_some_and(|w| w != source.filter_width) {
        return Err(conflict("filter_width"));
    }
    if let Some(name) = &region.activation_function {
        if Activation::from_name(name)? != source.activation {
            return Err(conflict("activation_function"));
        }
    }
    if region.l1_penalty_weight.is_some_and(|l1| l1 != source.l1_weight) {
        return Err(conflict("l1_penalty_weight"));
    }
    if region.l2_penalty_weight.is_some_and(|l2| l2 != source.l2_weight) {
        return Err(conflict("l2_penalty_weight"));
    }
    if region.lr_multiplier.is_some_and(|lr| lr != source.lr_multiplier) {
        return Err(conflict("lr_multiplier"));
    }

    let n_in = required(Some(resolved.n_in), "n_in", index)?;
    let pool_size = required(resolved.pool_size, "pool_size", index)?;

    Ok(RegionDescriptor {
        n_in,
        filter_width: source.filter_width,
        n_filters: source.n_filters,
        pool_size,
        activation: source.activation,
        l1_weight: source.l1_weight,
        l2_weight: source.l2_weight,
        lr_multiplier: source.lr_multiplier,
        role: RegionRole::Slave { master },
        param_index: source.param_index,
        output_offset,
        n_units: MaxPoolingLayer::compute_n_units(n_in, pool_size, source.n_filters),
    })
}

impl Layer for MultiSequenceConvolutionLayer {
    /// Sum of the region lengths; the branch input is not counted.
    fn n_in(&self) -> usize {
        self.regions.iter().map(|r| r.n_in).sum()
    }

    fn n_units(&self) -> usize {
        self.n_units
    }

    fn n_parameters(&self) -> usize {
        self.n_conv_parameters()
            + self
                .fully_connected
                .as_ref()
                .map_or(0, |fc| fc.n_parameters())
    }

    fn parameters(&self) -> Vec<&[f32]> {
        let mut params: Vec<&[f32]> = self
            .weights
            .iter()
            .chain(&self.biases)
            .map(Vec::as_slice)
            .collect();
        if let Some(fc) = &self.fully_connected {
            params.extend(fc.parameters());
        }
        params
    }

    fn set_parameters(&mut self, values: Vec<Vec<f32>>) -> Result<()> {
        check_parameter_shapes(&self.parameters(), values.iter().map(Vec::len))?;

        let n_weights = self.weights.len();
        let mut values = values.into_iter();
        let conv_values: Vec<Vec<f32>> = values.by_ref().take(self.n_conv_parameters()).collect();
        if let Some(fc) = &mut self.fully_connected {
            fc.set_parameters(values.collect())?;
        }

        for (i, value) in conv_values.into_iter().enumerate() {
            if i < n_weights {
                replace_parameter(&mut self.weights[i], value, "filter weights")?;
            } else {
                replace_parameter(&mut self.biases[i - n_weights], value, "filter biases")?;
            }
        }
        Ok(())
    }

    fn update_parameters(&mut self, updates: &[(&[f32], f32)]) -> Result<()> {
        check_parameter_shapes(&self.parameters(), updates.iter().map(|(d, _)| d.len()))?;

        let (conv_updates, fc_updates) = updates.split_at(self.n_conv_parameters());
        if let Some(fc) = &mut self.fully_connected {
            fc.update_parameters(fc_updates)?;
        }

        let n_weights = self.weights.len();
        for (i, &(delta, multiplier)) in conv_updates.iter().enumerate() {
            if i < n_weights {
                add_scaled(&mut self.weights[i], delta, multiplier)?;
            } else {
                add_scaled(&mut self.biases[i - n_weights], delta, multiplier)?;
            }
        }
        Ok(())
    }

    fn lr_multiplier(&self) -> Vec<f32> {
        let masters: Vec<f32> = self
            .master_regions
            .iter()
            .map(|&r| self.regions[r].lr_multiplier)
            .collect();
        let mut multipliers = masters.repeat(2);
        if let Some(fc) = &self.fully_connected {
            multipliers.extend(fc.lr_multiplier());
        }
        multipliers
    }

    fn l1_penalty(&self) -> f32 {
        let conv: f32 = self
            .master_regions
            .iter()
            .zip(&self.weights)
            .map(|(&r, w)| params::l1_penalty(w, self.regions[r].l1_weight))
            .sum();
        conv + self.fully_connected.as_ref().map_or(0.0, |fc| fc.l1_penalty())
    }

    fn l2_penalty(&self) -> f32 {
        let conv: f32 = self
            .master_regions
            .iter()
            .zip(&self.weights)
            .map(|(&r, w)| params::l2_penalty(w, self.regions[r].l2_weight))
            .sum();
        conv + self.fully_connected.as_ref().map_or(0.0, |fc| fc.l2_penalty())
    }
}
