use anyhow::{bail, Result};
use rpick_core::{PointCoordinates, Real};

/// Fixed-count running average over validated target-frame points.
///
/// Ten independent observations, one per depth frame, are treated as
/// adequate noise reduction; there is no outlier rejection beyond the
/// non-finite filter.
#[derive(Debug)]
pub struct SampleAccumulator {
    collected: Vec<PointCoordinates>,
    target_count: usize,
    estimate: Option<PointCoordinates>,
}

impl SampleAccumulator {
    pub fn new(target_count: usize) -> Self {
        SampleAccumulator {
            collected: Vec::with_capacity(target_count),
            target_count,
            estimate: None,
        }
    }

    /// Accepts `point` unless it has a non-finite component or the
    /// accumulator already holds its target count. Returns whether the
    /// point was kept.
    pub fn offer(&mut self, point: PointCoordinates) -> bool {
        if self.estimate.is_some() || self.collected.len() >= self.target_count {
            return false;
        }
        if !point.iter().all(|c| c.is_finite()) {
            return false;
        }
        self.collected.push(point);
        true
    }

    pub fn len(&self) -> usize {
        self.collected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collected.is_empty()
    }

    pub fn is_converged(&self) -> bool {
        self.collected.len() == self.target_count
    }

    /// Componentwise arithmetic mean over the collected points,
    /// computed once and frozen; repeated calls return the cached
    /// estimate. Calling before convergence is an error.
    pub fn finalize(&mut self) -> Result<PointCoordinates> {
        if let Some(estimate) = self.estimate {
            return Ok(estimate);
        }
        if !self.is_converged() {
            bail!(
                "accumulator holds {} of {} samples",
                self.collected.len(),
                self.target_count
            );
        }
        let sum = self
            .collected
            .iter()
            .fold(PointCoordinates::zeros(), |acc, p| acc + p);
        let estimate = sum / self.collected.len() as Real;
        self.estimate = Some(estimate);
        Ok(estimate)
    }
}
