//! Configuration structures for the multi-region layer
//!
//! Regions, layer-wide defaults and the optional fully connected branch can be
//! written as JSON and loaded with [`load_config`]. Every field a region leaves
//! out is filled from the layer-wide defaults by [`RegionConfig::resolve`].

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{LayerError, Result};
use crate::layers::params::{DEFAULT_DROPOUT_PROBABILITY, DEFAULT_WEIGHT_SCALE};
use crate::layers::DenseLayer;
use crate::utils::{Activation, SimpleRng};

/// One region of a multi-region layer.
///
/// A region without `weight_share` owns its own filter bank (a master); with
/// `weight_share = i` it reuses the filter bank of region `i`, which must be
/// declared earlier. The master's filter shape, activation, penalties and
/// learning-rate multiplier govern the shared bank; a slave may repeat them
/// but not change them, and may not supply `W`, `b` or `weight_scale`.
///
/// # Example
///
/// ```json
/// { "n_in": 50, "n_filters": 16, "filter_width": 9, "pool_size": 5 }
/// ```
///
/// ```json
/// { "n_in": 30, "weight_share": 0, "pool_size": 3 }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegionConfig {
    /// Sequence length of this region
    pub n_in: usize,
    pub filter_width: Option<usize>,
    pub n_filters: Option<usize>,
    pub pool_size: Option<usize>,
    /// Activation name: "sigmoid", "tanh", "relu", "linear", "softplus", "leaky_relu" or "elu"
    pub activation_function: Option<String>,
    /// Index of an earlier region whose filter bank this region reuses
    pub weight_share: Option<usize>,
    pub l1_penalty_weight: Option<f32>,
    pub l2_penalty_weight: Option<f32>,
    pub lr_multiplier: Option<f32>,
    pub weight_scale: Option<f32>,
    /// Initial filter weights (n_filters × 4·filter_width, row-major)
    #[serde(rename = "W")]
    pub weights: Option<Vec<f32>>,
    /// Initial filter biases (n_filters)
    #[serde(rename = "b")]
    pub biases: Option<Vec<f32>>,
}

/// Layer-wide values applied to every region that leaves them unset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegionDefaults {
    pub filter_width: Option<usize>,
    pub n_filters: Option<usize>,
    pub pool_size: Option<usize>,
    pub activation_function: Option<String>,
    pub l1_penalty_weight: Option<f32>,
    pub l2_penalty_weight: Option<f32>,
    pub lr_multiplier: Option<f32>,
    pub weight_scale: Option<f32>,
}

impl RegionConfig {
    /// A region of `n_in` positions with every other field unset.
    pub fn new(n_in: usize) -> Self {
        Self {
            n_in,
            ..Self::default()
        }
    }

    /// Merge `defaults` into the fields this region leaves unset.
    ///
    /// Explicit region values win. The result is a new configuration; neither
    /// input is modified.
    pub fn resolve(&self, defaults: &RegionDefaults) -> RegionConfig {
        RegionConfig {
            n_in: self.n_in,
            filter_width: self.filter_width.or(defaults.filter_width),
            n_filters: self.n_filters.or(defaults.n_filters),
            pool_size: self.pool_size.or(defaults.pool_size),
            activation_function: self
                .activation_function
                .clone()
                .or_else(|| defaults.activation_function.clone()),
            weight_share: self.weight_share,
            l1_penalty_weight: self.l1_penalty_weight.or(defaults.l1_penalty_weight),
            l2_penalty_weight: self.l2_penalty_weight.or(defaults.l2_penalty_weight),
            lr_multiplier: self.lr_multiplier.or(defaults.lr_multiplier),
            weight_scale: self.weight_scale.or(defaults.weight_scale),
            weights: self.weights.clone(),
            biases: self.biases.clone(),
        }
    }
}

/// Configuration of a dense layer, used for the fully connected branch and for
/// hidden layers of a sequence convolution network.
///
/// # Example
///
/// ```json
/// { "layer_type": "dense", "n_in": 20, "n_units": 8, "activation_function": "relu" }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DenseConfig {
    /// Layer type; only "dense" is supported
    #[serde(default = "default_layer_type")]
    pub layer_type: String,
    pub n_in: usize,
    pub n_units: usize,
    pub activation_function: Option<String>,
    #[serde(default)]
    pub dropout: bool,
    pub dropout_probability: Option<f32>,
    pub l1_penalty_weight: Option<f32>,
    pub l2_penalty_weight: Option<f32>,
    pub lr_multiplier: Option<f32>,
}

fn default_layer_type() -> String {
    "dense".to_string()
}

impl DenseConfig {
    pub fn new(n_in: usize, n_units: usize) -> Self {
        Self {
            layer_type: default_layer_type(),
            n_in,
            n_units,
            activation_function: None,
            dropout: false,
            dropout_probability: None,
            l1_penalty_weight: None,
            l2_penalty_weight: None,
            lr_multiplier: None,
        }
    }

    /// Build the layer, falling back to the given penalty weights when the
    /// configuration leaves them unset.
    pub fn build(&self, l1_default: f32, l2_default: f32, rng: &mut SimpleRng) -> Result<DenseLayer> {
        if !self.layer_type.eq_ignore_ascii_case("dense") {
            return Err(LayerError::UnsupportedLayer(self.layer_type.clone()));
        }
        let activation =
            Activation::from_name(self.activation_function.as_deref().unwrap_or("sigmoid"))?;
        let dropout = dropout_probability(self.dropout, self.dropout_probability);
        let lr = self.lr_multiplier.unwrap_or(1.0);

        Ok(DenseLayer::new(self.n_in, self.n_units, activation, rng)?
            .with_dropout(dropout)?
            .with_penalties(
                self.l1_penalty_weight.unwrap_or(l1_default),
                self.l2_penalty_weight.unwrap_or(l2_default),
            )
            .with_lr_multiplier([lr, lr]))
    }
}

/// Drop probability from a dropout flag and an optional explicit probability.
pub fn dropout_probability(enabled: bool, probability: Option<f32>) -> Option<f32> {
    enabled.then(|| probability.unwrap_or(DEFAULT_DROPOUT_PROBABILITY))
}

/// Configuration for a multi-region sequence convolution layer.
///
/// # Example
///
/// ```json
/// {
///   "n_filters": 8,
///   "filter_width": 5,
///   "activation_function": "relu",
///   "dropout": true,
///   "regions": [
///     { "n_in": 40, "pool_size": 4 },
///     { "n_in": 40, "pool_size": 4, "weight_share": 0 },
///     { "n_in": 20, "pool_size": 2, "n_filters": 4 }
///   ],
///   "fully_connected_layer": { "n_in": 12, "n_units": 6 }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MultiRegionConfig {
    pub regions: Vec<RegionConfig>,
    #[serde(flatten)]
    pub defaults: RegionDefaults,
    #[serde(default)]
    pub dropout: bool,
    pub dropout_probability: Option<f32>,
    /// Numeric precision; only "float32" is supported
    pub dtype: Option<String>,
    pub fully_connected_layer: Option<DenseConfig>,
}

impl MultiRegionConfig {
    pub fn new(regions: Vec<RegionConfig>) -> Self {
        Self {
            regions,
            ..Self::default()
        }
    }

    /// Layer-wide weight scale, `0.01` unless configured.
    pub fn weight_scale(&self) -> f32 {
        self.defaults.weight_scale.unwrap_or(DEFAULT_WEIGHT_SCALE)
    }

    /// Drop probability of the pooled outputs, if dropout is enabled.
    pub fn dropout_probability(&self) -> Option<f32> {
        dropout_probability(self.dropout, self.dropout_probability)
    }
}

/// Loads a multi-region configuration from a JSON file.
///
/// # Examples
///
/// ```no_run
/// use sequence_convolution::config::load_config;
///
/// let cfg = load_config("config/multi_region.json").unwrap();
/// assert!(!cfg.regions.is_empty());
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<MultiRegionConfig> {
    let contents = fs::read_to_string(path)?;
    let config: MultiRegionConfig = serde_json::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Checks the parts of a configuration that do not depend on region order.
///
/// Region references and shapes are checked when the layer is built.
pub fn validate_config(config: &MultiRegionConfig) -> Result<()> {
    if config.regions.is_empty() {
        return Err(LayerError::InvalidConfig(
            "multi-region layer must have at least one region".into(),
        ));
    }

    if let Some(dtype) = &config.dtype {
        if !matches!(dtype.to_lowercase().as_str(), "float32" | "f32") {
            return Err(LayerError::InvalidConfig(format!(
                "Unsupported dtype '{}'. Only float32 is supported",
                dtype
            )));
        }
    }

    if let Some(p) = config.dropout_probability {
        if !(0.0..1.0).contains(&p) {
            return Err(LayerError::InvalidConfig(
                "dropout_probability must be in range [0.0, 1.0)".into(),
            ));
        }
    }

    if let Some(scale) = config.defaults.weight_scale {
        if scale < 0.0 {
            return Err(LayerError::InvalidConfig(
                "weight_scale must be non-negative".into(),
            ));
        }
    }

    if let Some(name) = &config.defaults.activation_function {
        Activation::from_name(name)?;
    }

    for (i, region) in config.regions.iter().enumerate() {
        if region.n_in == 0 {
            return Err(LayerError::InvalidConfig(format!(
                "Region {}: n_in must be > 0",
                i
            )));
        }
        if let Some(name) = &region.activation_function {
            Activation::from_name(name)?;
        }
    }

    Ok(())
}
