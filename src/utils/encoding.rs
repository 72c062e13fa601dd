//! One-hot encoding of nucleotide sequences.
//!
//! Positions are laid out position-major: symbol `s` at position `i` lands at
//! index `i * ALPHABET_SIZE + s`, which is the layout the convolution kernels
//! read.

use crate::error::{LayerError, Result};
use crate::ALPHABET_SIZE;

/// Alphabet in channel order.
pub const ALPHABET: [char; ALPHABET_SIZE] = ['A', 'C', 'G', 'T'];

/// One-hot encode a single sequence.
///
/// Symbols are case-insensitive; `N` encodes as an all-zero position. Any
/// other symbol is rejected.
pub fn encode_sequence(sequence: &str) -> Result<Vec<f32>> {
    let mut encoded = Vec::with_capacity(sequence.len() * ALPHABET_SIZE);
    for (pos, symbol) in sequence.chars().enumerate() {
        let upper = symbol.to_ascii_uppercase();
        let mut channels = [0.0f32; ALPHABET_SIZE];
        if upper != 'N' {
            let channel = ALPHABET.iter().position(|&c| c == upper).ok_or_else(|| {
                LayerError::InvalidConfig(format!(
                    "unknown symbol '{}' at position {}",
                    symbol, pos
                ))
            })?;
            channels[channel] = 1.0;
        }
        encoded.extend_from_slice(&channels);
    }
    Ok(encoded)
}

/// One-hot encode a batch of equal-length sequences into one row-major buffer.
pub fn encode_batch(sequences: &[&str]) -> Result<Vec<f32>> {
    let Some(first) = sequences.first() else {
        return Ok(Vec::new());
    };
    let length = first.chars().count();

    let mut encoded = Vec::with_capacity(sequences.len() * length * ALPHABET_SIZE);
    for sequence in sequences {
        let n = sequence.chars().count();
        if n != length {
            return Err(LayerError::shape("sequence length in batch", length, n));
        }
        encoded.extend(encode_sequence(sequence)?);
    }
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_sequence_layout() {
        let encoded = encode_sequence("ACgTn").unwrap();
        assert_eq!(
            encoded,
            vec![
                1.0, 0.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, 0.0, //
                0.0, 0.0, 1.0, 0.0, //
                0.0, 0.0, 0.0, 1.0, //
                0.0, 0.0, 0.0, 0.0,
            ]
        );
    }

    #[test]
    fn test_encode_sequence_rejects_unknown_symbol() {
        assert!(encode_sequence("ACXG").is_err());
    }

    #[test]
    fn test_encode_batch_requires_equal_lengths() {
        assert_eq!(encode_batch(&["AC", "GT"]).unwrap().len(), 16);
        assert!(matches!(
            encode_batch(&["AC", "GTA"]),
            Err(LayerError::ShapeMismatch { .. })
        ));
    }
}
