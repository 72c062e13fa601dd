//! Primitive numeric kernels
//!
//! Plain CPU loops over row-major `f32` buffers. The layers compose these; the
//! kernels themselves know nothing about regions, parameters or caches.
//!
//! - `convolution`: sequence convolution, its weight gradient and bias sums
//! - `pooling`: max pooling with argmax, writing into caller-owned slices
//! - `elementwise`: sign and dropout masks
//! - `matrix`: column range extraction and insertion

pub mod convolution;
pub mod elementwise;
pub mod matrix;
pub mod pooling;

pub use convolution::{convolve_sequence, convolve_sequence_gradient, sum_delta};
pub use elementwise::{apply_dropout_mask, sample_dropout_mask, scale_columns, sign, DropoutMask};
pub use matrix::{extract_columns, insert_columns};
pub use pooling::{max_pool, max_pool_gradient, max_pool_into, pooled_width, PooledSlice};
