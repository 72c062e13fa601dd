//! Sequence convolution layers
//!
//! Feed-forward and backpropagation layers for 1-D convolution over one-hot
//! encoded sequences of a fixed four-symbol alphabet, max pooling, and a
//! multi-region layer that convolves several sub-sequences through independent
//! or shared filter banks before concatenating their pooled features.
//!
//! # Modules
//!
//! - `kernels`: CPU loops for convolution, pooling, dropout masks and column slicing
//! - `layers`: Layer trait and implementations (sequence convolution, max pooling,
//!   dense, multi-region)
//! - `utils`: Shared utilities (RNG, activation functions, sequence encoding)
//! - `config`: JSON configuration for the multi-region layer
//! - `architecture`: Sequence convolution network assembly
//! - `error`: Error type shared by every module

pub mod architecture;
pub mod config;
pub mod error;
pub mod kernels;
pub mod layers;
pub mod utils;

pub use error::{LayerError, Result};

/// Number of symbols in the sequence alphabet (`A`, `C`, `G`, `T`).
pub const ALPHABET_SIZE: usize = 4;
