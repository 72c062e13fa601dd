//! Error types for layer construction and the forward/backward passes

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, LayerError>;

/// Errors raised by layers, kernels and configuration loading.
///
/// All of these are deterministic consequences of shapes or configuration;
/// none of them is worth retrying.
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("region {region} shares weights with region {target}, which is not declared before it")]
    ForwardReference { region: usize, target: usize },

    #[error("unsupported fully connected layer type '{0}'")]
    UnsupportedLayer(String),

    #[error("dropout on the fully connected layer is not allowed, set it on the multi-region layer instead")]
    DropoutConflict,

    #[error("expected {expected} parameters, got {actual}")]
    ParameterCount { expected: usize, actual: usize },

    #[error("expected {expected} inputs, got {actual}")]
    InputCount { expected: usize, actual: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LayerError {
    pub(crate) fn shape(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        LayerError::ShapeMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }
}

/// Fails with [`LayerError::ShapeMismatch`] unless `actual == expected`.
pub(crate) fn check_len(what: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(LayerError::shape(what, expected, actual));
    }
    Ok(())
}
