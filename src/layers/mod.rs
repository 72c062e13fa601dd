//! Layer abstractions for sequence convolution networks
//!
//! This module provides the Layer trait and the layers a sequence convolution
//! network is assembled from.

mod r#trait;
pub mod dense;
pub mod max_pool;
pub mod multi_region;
pub(crate) mod params;
pub mod sequence_conv;

// Re-export the Layer trait for convenience
pub use r#trait::{Layer, ParameterGradient};
pub use dense::{DenseCache, DenseLayer};
pub use max_pool::{MaxPoolingLayer, PoolingCache};
pub use multi_region::{
    MultiRegionCache, MultiRegionGradients, MultiSequenceConvolutionLayer, RegionDescriptor,
    RegionRole,
};
pub use params::{DEFAULT_DROPOUT_PROBABILITY, DEFAULT_WEIGHT_SCALE};
pub use sequence_conv::{ConvolutionCache, SequenceConvolutionLayer};
