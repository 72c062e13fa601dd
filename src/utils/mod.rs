//! Shared utilities for the sequence layers
//!
//! This module provides random number generation, activation functions and
//! one-hot sequence encoding used across the layers.

pub mod activations;
pub mod encoding;
pub mod rng;

pub use activations::Activation;
pub use encoding::{encode_batch, encode_sequence};
pub use rng::SimpleRng;
