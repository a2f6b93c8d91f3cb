use crate::Real;

#[derive(Debug, thiserror::Error)]
pub enum DepthFrameError {
    #[error("depth buffer holds {len} samples, expected {rows}x{cols}")]
    SizeMismatch { rows: usize, cols: usize, len: usize },
}

/// A single registered depth image: one distance sample per pixel,
/// stored row-major. Frames are read-only once constructed; a new
/// frame from the sensor replaces the previous one wholesale.
#[derive(Clone, Debug)]
pub struct DepthFrame {
    rows: usize,
    cols: usize,
    data: Vec<Real>,
}

impl DepthFrame {
    pub fn new(rows: usize, cols: usize, data: Vec<Real>) -> Result<Self, DepthFrameError> {
        if data.len() != rows * cols {
            return Err(DepthFrameError::SizeMismatch {
                rows,
                cols,
                len: data.len(),
            });
        }
        Ok(DepthFrame { rows, cols, data })
    }

    pub fn filled(rows: usize, cols: usize, depth: Real) -> Self {
        DepthFrame {
            rows,
            cols,
            data: vec![depth; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Bounds-checked sample access, `row` before `col` as in the
    /// underlying row-major layout.
    pub fn get(&self, row: usize, col: usize) -> Option<Real> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }
}
