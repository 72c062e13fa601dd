//! Sequence convolution network architecture
//!
//! This module provides the configuration structure for a sequence convolution
//! network (convolution, max pooling, then dense hidden layers) loaded from
//! JSON, and the network assembled from it.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use tracing::{debug, trace};

use crate::config::{dropout_probability, DenseConfig};
use crate::error::{check_len, LayerError, Result};
use crate::layers::params::{check_parameter_shapes, DEFAULT_WEIGHT_SCALE};
use crate::layers::{
    ConvolutionCache, DenseCache, DenseLayer, Layer, MaxPoolingLayer, ParameterGradient,
    PoolingCache, SequenceConvolutionLayer,
};
use crate::utils::{Activation, SimpleRng};

/// Penalty weight for the whole network or for each parameterized layer.
///
/// A list gives the convolution layer's weight first, then one entry per
/// hidden layer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PenaltyWeights {
    Shared(f32),
    PerLayer(Vec<f32>),
}

impl Default for PenaltyWeights {
    fn default() -> Self {
        PenaltyWeights::Shared(0.0)
    }
}

impl PenaltyWeights {
    /// Weights for the convolution layer followed by `n_hidden` hidden layers.
    fn expand(&self, n_hidden: usize, what: &str) -> Result<Vec<f32>> {
        match self {
            PenaltyWeights::Shared(w) => Ok(vec![*w; n_hidden + 1]),
            PenaltyWeights::PerLayer(weights) if weights.len() == n_hidden + 1 => {
                Ok(weights.clone())
            }
            PenaltyWeights::PerLayer(weights) => Err(LayerError::InvalidConfig(format!(
                "{} has {} entries but the network has {} parameterized layers",
                what,
                weights.len(),
                n_hidden + 1
            ))),
        }
    }
}

/// Configuration for a whole sequence convolution network.
///
/// # Example
///
/// ```json
/// {
///   "n_in": 50,
///   "filter_width": 5,
///   "n_filters": 8,
///   "pool_size": 5,
///   "activation_function": "relu",
///   "dropout": true,
///   "l1_penalty_weight": [0.0, 0.001],
///   "hidden_layers": [
///     { "n_in": 80, "n_units": 1, "activation_function": "sigmoid" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SequenceNetConfig {
    /// Sequence length
    pub n_in: usize,
    pub filter_width: usize,
    pub n_filters: usize,
    pub pool_size: usize,
    pub activation_function: Option<String>,
    /// Enables dropout on the pooled outputs
    #[serde(default)]
    pub dropout: bool,
    pub dropout_probability: Option<f32>,
    pub weight_scale: Option<f32>,
    #[serde(default)]
    pub l1_penalty_weight: PenaltyWeights,
    #[serde(default)]
    pub l2_penalty_weight: PenaltyWeights,
    /// Dense layers after the pooling layer, in order
    #[serde(default)]
    pub hidden_layers: Vec<DenseConfig>,
}

/// Loads a network configuration from a JSON file.
///
/// # Examples
///
/// ```no_run
/// use sequence_convolution::architecture::load_architecture;
///
/// let arch = load_architecture("config/sequence_net.json").unwrap();
/// assert!(!arch.hidden_layers.is_empty());
/// ```
pub fn load_architecture(path: impl AsRef<Path>) -> Result<SequenceNetConfig> {
    let contents = fs::read_to_string(path)?;
    let config: SequenceNetConfig = serde_json::from_str(&contents)?;
    validate_architecture(&config)?;
    Ok(config)
}

/// Validates a network configuration.
///
/// Checks that:
/// - Sizes are greater than 0
/// - Activation names are known
/// - Penalty lists have one entry per parameterized layer
/// - Each hidden layer's `n_in` matches the previous layer's output size
pub fn validate_architecture(config: &SequenceNetConfig) -> Result<()> {
    for (value, what) in [
        (config.n_in, "n_in"),
        (config.filter_width, "filter_width"),
        (config.n_filters, "n_filters"),
        (config.pool_size, "pool_size"),
    ] {
        if value == 0 {
            return Err(LayerError::InvalidConfig(format!(
                "{} must be greater than 0",
                what
            )));
        }
    }
    if let Some(name) = &config.activation_function {
        Activation::from_name(name)?;
    }

    let n_hidden = config.hidden_layers.len();
    config.l1_penalty_weight.expand(n_hidden, "l1_penalty_weight")?;
    config.l2_penalty_weight.expand(n_hidden, "l2_penalty_weight")?;

    let mut previous = MaxPoolingLayer::compute_n_units(config.n_in, config.pool_size, config.n_filters);
    for (i, layer) in config.hidden_layers.iter().enumerate() {
        if layer.n_in != previous {
            return Err(LayerError::InvalidConfig(format!(
                "Hidden layer {}: n_in ({}) does not match the previous layer's output size ({})",
                i, layer.n_in, previous
            )));
        }
        previous = layer.n_units;
    }

    Ok(())
}

/// Builds a network from a configuration.
///
/// # Examples
///
/// ```no_run
/// use sequence_convolution::architecture::{build_network, load_architecture};
/// use sequence_convolution::utils::SimpleRng;
///
/// let config = load_architecture("config/sequence_net.json").unwrap();
/// let mut rng = SimpleRng::new(42);
/// let net = build_network(&config, &mut rng).unwrap();
/// assert_eq!(net.n_layers(), config.hidden_layers.len() + 2);
/// ```
pub fn build_network(config: &SequenceNetConfig, rng: &mut SimpleRng) -> Result<SequenceConvolutionNet> {
    validate_architecture(config)?;
    let n_hidden = config.hidden_layers.len();
    let l1 = config.l1_penalty_weight.expand(n_hidden, "l1_penalty_weight")?;
    let l2 = config.l2_penalty_weight.expand(n_hidden, "l2_penalty_weight")?;

    let activation =
        Activation::from_name(config.activation_function.as_deref().unwrap_or("sigmoid"))?;
    let conv = SequenceConvolutionLayer::new(
        config.n_in,
        config.filter_width,
        config.n_filters,
        activation,
        config.weight_scale.unwrap_or(DEFAULT_WEIGHT_SCALE),
        rng,
    )?
    .with_penalties(l1[0], l2[0]);

    let pool = MaxPoolingLayer::new(
        config.n_in,
        config.pool_size,
        config.n_filters,
        dropout_probability(config.dropout, config.dropout_probability),
        rng,
    )?;

    let hidden = config
        .hidden_layers
        .iter()
        .enumerate()
        .map(|(i, layer)| layer.build(l1[i + 1], l2[i + 1], rng))
        .collect::<Result<Vec<_>>>()?;

    SequenceConvolutionNet::new(conv, pool, hidden)
}

/// Convolution, max pooling and a stack of dense hidden layers.
#[derive(Debug)]
pub struct SequenceConvolutionNet {
    conv: SequenceConvolutionLayer,
    pool: MaxPoolingLayer,
    hidden: Vec<DenseLayer>,
}

/// Per-layer caches from one forward pass through the network.
#[derive(Debug, Clone)]
pub struct NetCache {
    pub conv: ConvolutionCache,
    pub pool: PoolingCache,
    pub hidden: Vec<DenseCache>,
}

impl NetCache {
    /// Activations of the network's last layer.
    pub fn output(&self) -> &[f32] {
        match self.hidden.last() {
            Some(cache) => &cache.activations,
            None => &self.pool.activations,
        }
    }
}

impl SequenceConvolutionNet {
    /// Assemble a network, checking that adjacent layer sizes line up.
    pub fn new(
        conv: SequenceConvolutionLayer,
        pool: MaxPoolingLayer,
        hidden: Vec<DenseLayer>,
    ) -> Result<Self> {
        check_len("pooling layer input", conv.n_in(), pool.n_in())?;
        check_len("pooling layer filters", conv.n_filters(), pool.n_filters())?;
        let mut previous = pool.n_units();
        for layer in &hidden {
            check_len("hidden layer input", previous, layer.n_in())?;
            previous = layer.n_units();
        }

        debug!(
            n_in = conv.n_in(),
            n_filters = conv.n_filters(),
            pooled_units = pool.n_units(),
            hidden_layers = hidden.len(),
            n_units = previous,
            "built sequence convolution network"
        );
        Ok(Self { conv, pool, hidden })
    }

    /// Convolution, pooling and hidden layers.
    pub fn n_layers(&self) -> usize {
        self.hidden.len() + 2
    }

    pub fn convolution_layer(&self) -> &SequenceConvolutionLayer {
        &self.conv
    }

    pub fn pooling_layer(&self) -> &MaxPoolingLayer {
        &self.pool
    }

    pub fn hidden_layers(&self) -> &[DenseLayer] {
        &self.hidden
    }

    /// Forward pass for one-hot input `(batch_size, n_in * ALPHABET_SIZE)`.
    pub fn feed_forward(&self, input: &[f32], batch_size: usize, prediction: bool) -> Result<NetCache> {
        trace!(batch_size, prediction, "network forward");
        let conv = self.conv.feed_forward(input, batch_size, prediction)?;
        let pool = self.pool.feed_forward(&conv.activations, batch_size, prediction)?;

        let mut hidden: Vec<DenseCache> = Vec::with_capacity(self.hidden.len());
        for layer in &self.hidden {
            let layer_input = hidden.last().map_or(&pool.activations, |c| &c.activations);
            let cache = layer.feed_forward(layer_input, batch_size, prediction)?;
            hidden.push(cache);
        }

        Ok(NetCache { conv, pool, hidden })
    }

    /// Gradients of every parameter given the gradient w.r.t. the output.
    ///
    /// Gradients come back in [`Layer::parameters`] order. The forward pass is
    /// recomputed when no cache is given.
    pub fn backprop(
        &self,
        input: &[f32],
        grad_output: &[f32],
        batch_size: usize,
        cache: Option<NetCache>,
    ) -> Result<Vec<ParameterGradient>> {
        let cache = match cache {
            Some(cache) => cache,
            None => self.feed_forward(input, batch_size, false)?,
        };
        check_len("cached hidden layers", self.hidden.len(), cache.hidden.len())?;
        trace!(batch_size, "network backward");

        let NetCache { conv, pool, hidden } = cache;
        let layer_inputs: Vec<Vec<f32>> = std::iter::once(pool.activations.clone())
            .chain(hidden.iter().map(|c| c.activations.clone()))
            .collect();

        let mut grad = grad_output.to_vec();
        let mut hidden_grads = Vec::with_capacity(2 * self.hidden.len());
        for ((layer, layer_cache), layer_input) in
            self.hidden.iter().zip(hidden).zip(&layer_inputs[..self.hidden.len()]).rev()
        {
            let (params, grad_input) =
                layer.backprop(layer_input, &grad, batch_size, Some(layer_cache))?;
            hidden_grads.push(params);
            grad = grad_input;
        }

        let grad_filtermap = self
            .pool
            .backprop(&conv.activations, &grad, batch_size, Some(pool))?;
        let mut gradients = self
            .conv
            .backprop(input, &grad_filtermap, batch_size, Some(conv))?;
        gradients.extend(hidden_grads.into_iter().rev().flatten());
        Ok(gradients)
    }

    fn layers(&self) -> impl Iterator<Item = &dyn Layer> {
        std::iter::once(&self.conv as &dyn Layer)
            .chain(std::iter::once(&self.pool as &dyn Layer))
            .chain(self.hidden.iter().map(|l| l as &dyn Layer))
    }
}

impl Layer for SequenceConvolutionNet {
    fn n_in(&self) -> usize {
        self.conv.n_in()
    }

    fn n_units(&self) -> usize {
        self.hidden.last().map_or(self.pool.n_units(), |l| l.n_units())
    }

    fn n_parameters(&self) -> usize {
        self.layers().map(|l| l.n_parameters()).sum()
    }

    fn parameters(&self) -> Vec<&[f32]> {
        self.layers().flat_map(|l| l.parameters()).collect()
    }

    fn set_parameters(&mut self, values: Vec<Vec<f32>>) -> Result<()> {
        check_parameter_shapes(&self.parameters(), values.iter().map(Vec::len))?;
        let mut values = values.into_iter();
        self.conv.set_parameters(values.by_ref().take(2).collect())?;
        for layer in &mut self.hidden {
            let n = layer.n_parameters();
            layer.set_parameters(values.by_ref().take(n).collect())?;
        }
        Ok(())
    }

    fn update_parameters(&mut self, updates: &[(&[f32], f32)]) -> Result<()> {
        check_parameter_shapes(&self.parameters(), updates.iter().map(|(d, _)| d.len()))?;
        let (conv_updates, mut rest) = updates.split_at(self.conv.n_parameters());
        self.conv.update_parameters(conv_updates)?;
        for layer in &mut self.hidden {
            let (layer_updates, tail) = rest.split_at(layer.n_parameters());
            layer.update_parameters(layer_updates)?;
            rest = tail;
        }
        Ok(())
    }

    fn lr_multiplier(&self) -> Vec<f32> {
        self.layers().flat_map(|l| l.lr_multiplier()).collect()
    }

    fn l1_penalty(&self) -> f32 {
        self.layers().map(|l| l.l1_penalty()).sum()
    }

    fn l2_penalty(&self) -> f32 {
        self.layers().map(|l| l.l2_penalty()).sum()
    }
}
