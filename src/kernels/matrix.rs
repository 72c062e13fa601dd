//! Column range helpers for row-major buffers.

use crate::error::{check_len, LayerError, Result};

/// Copy columns `start..end` of every row into a new `(rows, end - start)` buffer.
pub fn extract_columns(
    buffer: &[f32],
    rows: usize,
    cols: usize,
    start: usize,
    end: usize,
) -> Result<Vec<f32>> {
    check_len("buffer", rows * cols, buffer.len())?;
    if start > end || end > cols {
        return Err(LayerError::shape("column range end", cols, end));
    }

    let width = end - start;
    let mut out = Vec::with_capacity(rows * width);
    for r in 0..rows {
        out.extend_from_slice(&buffer[r * cols + start..r * cols + end]);
    }
    Ok(out)
}

/// Write `src` (`rows` rows of `src_cols`) into columns starting at `start` of `dest`.
pub fn insert_columns(
    src: &[f32],
    src_cols: usize,
    dest: &mut [f32],
    dest_cols: usize,
    start: usize,
) -> Result<()> {
    if src_cols == 0 {
        return Ok(());
    }
    if src.len() % src_cols != 0 {
        return Err(LayerError::shape("source columns", src_cols, src.len()));
    }
    let rows = src.len() / src_cols;
    check_len("destination buffer", rows * dest_cols, dest.len())?;
    if start + src_cols > dest_cols {
        return Err(LayerError::shape("column range end", dest_cols, start + src_cols));
    }

    for (r, row) in src.chunks_exact(src_cols).enumerate() {
        dest[r * dest_cols + start..r * dest_cols + start + src_cols].copy_from_slice(row);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_then_insert_restores_range() {
        let buffer: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let middle = extract_columns(&buffer, 3, 4, 1, 3).unwrap();
        assert_eq!(middle, vec![1.0, 2.0, 5.0, 6.0, 9.0, 10.0]);

        let mut dest = vec![0.0f32; 12];
        insert_columns(&middle, 2, &mut dest, 4, 1).unwrap();
        assert_eq!(dest, vec![0.0, 1.0, 2.0, 0.0, 0.0, 5.0, 6.0, 0.0, 0.0, 9.0, 10.0, 0.0]);
    }

    #[test]
    fn test_insert_rejects_overflowing_range() {
        let mut dest = vec![0.0f32; 4];
        assert!(insert_columns(&[1.0, 2.0], 2, &mut dest, 2, 1).is_err());
    }
}
