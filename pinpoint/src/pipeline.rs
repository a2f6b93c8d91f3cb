use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::Deserialize;

use rpick_core::{DepthFrame, NormalizedCoordinates, PointCoordinates, Real, TransformSource};
use rpick_sensor::{IntrinsicModel, IntrinsicsError};

use crate::{frame_transformer, sample_accumulator::SampleAccumulator};

#[derive(Debug, Deserialize)]
pub struct ResolutionPipelineCfg {
    /// Frame the resolved point is expressed in.
    pub target_frame: String,
    /// Frame the depth sensor reports in.
    pub source_frame: String,

    // Affine rescale from the normalized coordinate to the sensor's
    // pixel grid: u = round((nx + offset_u) * width). The offsets are
    // camera-specific and do not generalize to other sensors.
    pub coordinate_offset_u: Real,
    pub coordinate_offset_v: Real,

    pub target_sample_count: usize,
    pub transform_timeout_secs: Real,
    pub output_path: PathBuf,
}

impl Default for ResolutionPipelineCfg {
    fn default() -> Self {
        Self {
            target_frame: String::from("base_link"),
            source_frame: String::from("camera_link"),

            coordinate_offset_u: 0.055,
            coordinate_offset_v: 0.12,

            target_sample_count: 10,
            transform_timeout_secs: 1.0,
            output_path: PathBuf::from("output/resolved_position.txt"),
        }
    }
}

impl ResolutionPipelineCfg {
    pub fn finalize(
        self,
        transform_source: Box<dyn TransformSource>,
    ) -> Result<ResolutionPipeline> {
        if self.target_sample_count == 0 {
            anyhow::bail!("target sample count must be at least 1");
        }
        if !self.coordinate_offset_u.is_finite() || !self.coordinate_offset_v.is_finite() {
            anyhow::bail!(
                "coordinate offsets must be finite, got ({}, {})",
                self.coordinate_offset_u,
                self.coordinate_offset_v
            );
        }
        if !self.transform_timeout_secs.is_finite() || self.transform_timeout_secs < 0.0 {
            anyhow::bail!(
                "transform timeout must be non-negative, got {}",
                self.transform_timeout_secs
            );
        }

        log::info!(
            "resolving {} -> {} over {} samples",
            self.source_frame,
            self.target_frame,
            self.target_sample_count
        );
        log::info!("configured");

        Ok(ResolutionPipeline {
            accumulator: SampleAccumulator::new(self.target_sample_count),
            transform_timeout: Duration::from_secs_f64(self.transform_timeout_secs),

            target_frame: self.target_frame,
            source_frame: self.source_frame,
            coordinate_offset_u: self.coordinate_offset_u,
            coordinate_offset_v: self.coordinate_offset_v,
            output_path: self.output_path,

            transform_source,
            intrinsics: IntrinsicModel::default(),
            coordinate: None,
            state: PipelineState::WaitingIntrinsics,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    WaitingIntrinsics,
    WaitingCoordinate,
    Resolving,
    Converged,
}

/// What a single depth-frame cycle did. Every variant except
/// `Converged` leaves the pipeline waiting for the next frame.
#[derive(Clone, Debug, PartialEq)]
pub enum CycleOutcome {
    /// Intrinsics not delivered yet.
    SkippedNotReady,
    /// No normalized coordinate received yet.
    SkippedNoCoordinate,
    /// Rescaled pixel index fell outside the depth grid.
    RejectedOutOfBounds,
    /// Transform lookup failed or the rotation was degenerate.
    TransformUnavailable,
    /// Resolved point had a non-finite component.
    DiscardedNonFinite,
    /// Sample accepted; holds the number collected so far.
    Accumulated(usize),
    /// Target count reached: estimate finalized and persisted.
    Converged(PointCoordinates),
    /// Pipeline already terminal; frame ignored.
    Finished,
}

/// Event-driven resolver: accumulates one target-frame estimate per
/// depth frame for the latest received coordinate, and terminates once
/// the configured sample count has been collected.
///
/// Coordinate and intrinsics events overwrite "latest value" fields
/// read at the start of each cycle; there is no snapshot isolation and
/// none is needed, frames are processed one at a time.
pub struct ResolutionPipeline {
    target_frame: String,
    source_frame: String,
    coordinate_offset_u: Real,
    coordinate_offset_v: Real,
    transform_timeout: Duration,
    output_path: PathBuf,

    transform_source: Box<dyn TransformSource>,
    intrinsics: IntrinsicModel,
    coordinate: Option<NormalizedCoordinates>,
    accumulator: SampleAccumulator,
    state: PipelineState,
}

impl ResolutionPipeline {
    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == PipelineState::Converged
    }

    /// Calibration event. Repeated deliveries overwrite idempotently.
    pub fn on_camera_info(
        &mut self,
        fx: Real,
        fy: Real,
        cx: Real,
        cy: Real,
    ) -> Result<(), IntrinsicsError> {
        self.intrinsics.update(fx, fy, cx, cy)?;
        if self.state == PipelineState::WaitingIntrinsics {
            self.state = if self.coordinate.is_some() {
                PipelineState::Resolving
            } else {
                PipelineState::WaitingCoordinate
            };
        }
        Ok(())
    }

    /// Normalized-coordinate event; latest value wins.
    pub fn on_coordinate(&mut self, nx: Real, ny: Real) {
        self.coordinate = Some(NormalizedCoordinates::new(nx, ny));
        if self.state == PipelineState::WaitingCoordinate {
            self.state = PipelineState::Resolving;
        }
    }

    /// Runs one resolution cycle for `frame`. Only a persistence
    /// failure is a hard error; every other failure skips the cycle
    /// and waits for the next frame.
    pub fn on_depth_frame(&mut self, frame: &DepthFrame) -> Result<CycleOutcome> {
        if self.state == PipelineState::Converged {
            log::debug!("already converged, ignoring depth frame");
            return Ok(CycleOutcome::Finished);
        }
        if !self.intrinsics.is_ready() {
            log::warn!("waiting for camera intrinsic parameters");
            return Ok(CycleOutcome::SkippedNotReady);
        }
        let Some(coordinate) = self.coordinate else {
            log::warn!("waiting for object coordinate, discarding depth frame");
            return Ok(CycleOutcome::SkippedNoCoordinate);
        };
        self.state = PipelineState::Resolving;

        let u = ((coordinate.x + self.coordinate_offset_u) * frame.cols() as Real).round();
        let v = ((coordinate.y + self.coordinate_offset_v) * frame.rows() as Real).round();
        if !(0.0..frame.cols() as Real).contains(&u) || !(0.0..frame.rows() as Real).contains(&v) {
            log::warn!(
                "pixel ({u}, {v}) outside {}x{} depth frame, rejecting cycle",
                frame.cols(),
                frame.rows()
            );
            return Ok(CycleOutcome::RejectedOutOfBounds);
        }
        let (u, v) = (u as usize, v as usize);
        let Some(depth) = frame.get(v, u) else {
            return Ok(CycleOutcome::RejectedOutOfBounds);
        };

        // is_ready() was checked above
        let camera = self
            .intrinsics
            .camera()
            .context("intrinsic model lost its parameters")?;
        let camera_point = camera.backproject(u as Real, v as Real, depth);

        let transform = match self.transform_source.lookup_transform(
            &self.target_frame,
            &self.source_frame,
            self.transform_timeout,
        ) {
            Ok(transform) => transform,
            Err(err) => {
                log::warn!(
                    "failed to get transform from {} to {}: {err}",
                    self.source_frame,
                    self.target_frame
                );
                return Ok(CycleOutcome::TransformUnavailable);
            }
        };

        let target_point = match frame_transformer::to_target_frame(&camera_point, &transform) {
            Ok(point) => point,
            Err(err) => {
                log::warn!("discarding cycle: {err}");
                return Ok(CycleOutcome::TransformUnavailable);
            }
        };

        if !self.accumulator.offer(target_point) {
            log::debug!("discarding non-finite point {target_point:?}");
            return Ok(CycleOutcome::DiscardedNonFinite);
        }
        log::info!(
            "3D coordinates in {}: X={} Y={} Z={}",
            self.target_frame,
            target_point.x,
            target_point.y,
            target_point.z
        );

        if self.accumulator.is_converged() {
            let estimate = self.accumulator.finalize()?;
            persist_estimate(&self.output_path, &estimate)?;
            log::info!(
                "average 3D coordinates in {} written to {}: X={} Y={} Z={}",
                self.target_frame,
                self.output_path.display(),
                estimate.x,
                estimate.y,
                estimate.z
            );
            self.state = PipelineState::Converged;
            return Ok(CycleOutcome::Converged(estimate));
        }

        Ok(CycleOutcome::Accumulated(self.accumulator.len()))
    }
}

/// Writes the estimate as a single `[x y z]` line, overwriting any
/// previous result and creating parent directories as needed.
fn persist_estimate(path: &Path, estimate: &PointCoordinates) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating output directory {}", parent.display()))?;
        }
    }
    fs::write(
        path,
        format!("[{} {} {}]", estimate.x, estimate.y, estimate.z),
    )
    .with_context(|| format!("writing estimate to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rpick_core::{DepthFrame, FixedTransformSource, RigidTransform};

    use super::*;

    const ROWS: usize = 270;
    const COLS: usize = 480;

    fn identity_source() -> Box<FixedTransformSource> {
        let mut source = FixedTransformSource::default();
        source.insert("base_link", "camera_link", RigidTransform::identity());
        Box::new(source)
    }

    fn cfg_with_output(path: PathBuf, samples: usize) -> ResolutionPipelineCfg {
        ResolutionPipelineCfg {
            target_sample_count: samples,
            output_path: path,
            ..Default::default()
        }
    }

    /// Depth frame with a marker depth at one pixel and a filler value
    /// everywhere else, so a wrong index cannot pass unnoticed.
    fn frame_with_depth_at(row: usize, col: usize, depth: Real) -> DepthFrame {
        let mut data = vec![9.9; ROWS * COLS];
        data[row * COLS + col] = depth;
        DepthFrame::new(ROWS, COLS, data).unwrap()
    }

    #[test]
    fn waits_for_intrinsics_then_coordinate() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_with_output(dir.path().join("out.txt"), 10);
        let mut pipeline = cfg.finalize(identity_source()).unwrap();
        assert_eq!(pipeline.state(), PipelineState::WaitingIntrinsics);

        let frame = DepthFrame::filled(ROWS, COLS, 0.5);
        assert_eq!(
            pipeline.on_depth_frame(&frame).unwrap(),
            CycleOutcome::SkippedNotReady
        );

        pipeline.on_camera_info(360.0, 360.0, 243.87, 137.92).unwrap();
        assert_eq!(pipeline.state(), PipelineState::WaitingCoordinate);
        assert_eq!(
            pipeline.on_depth_frame(&frame).unwrap(),
            CycleOutcome::SkippedNoCoordinate
        );

        pipeline.on_coordinate(0.0, 0.0);
        assert_eq!(pipeline.state(), PipelineState::Resolving);
        assert_eq!(
            pipeline.on_depth_frame(&frame).unwrap(),
            CycleOutcome::Accumulated(1)
        );
    }

    #[test]
    fn resolves_the_reference_scenario() {
        // (0,0) with offsets (0.055, 0.12) on a 480x270 grid lands on
        // pixel (26, 32).
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("out.txt");
        let cfg = cfg_with_output(out.clone(), 1);
        let mut pipeline = cfg.finalize(identity_source()).unwrap();

        pipeline.on_camera_info(360.0, 360.0, 243.87, 137.92).unwrap();
        pipeline.on_coordinate(0.0, 0.0);

        let frame = frame_with_depth_at(32, 26, 0.5);
        let outcome = pipeline.on_depth_frame(&frame).unwrap();
        let expected = PointCoordinates::new(
            (26.0 - 243.87) * 0.5 / 360.0,
            (32.0 - 137.92) * 0.5 / 360.0,
            0.5,
        );
        match outcome {
            CycleOutcome::Converged(estimate) => {
                assert_relative_eq!(estimate, expected, epsilon = 1e-12)
            }
            other => panic!("expected convergence, got {other:?}"),
        }
        assert!(pipeline.is_finished());

        let written = fs::read_to_string(&out).unwrap();
        assert_eq!(
            written,
            format!("[{} {} {}]", expected.x, expected.y, expected.z)
        );

        // terminal state: further frames are ignored
        assert_eq!(
            pipeline.on_depth_frame(&frame).unwrap(),
            CycleOutcome::Finished
        );
    }

    #[test]
    fn converges_on_the_mean_over_ten_frames() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_with_output(dir.path().join("out.txt"), 10);
        let mut pipeline = cfg.finalize(identity_source()).unwrap();
        pipeline.on_camera_info(360.0, 360.0, 243.87, 137.92).unwrap();
        pipeline.on_coordinate(0.0, 0.0);

        let mut outcome = CycleOutcome::Finished;
        for i in 1..=10 {
            let frame = frame_with_depth_at(32, 26, 0.1 * i as Real);
            outcome = pipeline.on_depth_frame(&frame).unwrap();
        }
        let mean_depth = (1..=10).map(|i| 0.1 * i as Real).sum::<Real>() / 10.0;
        match outcome {
            CycleOutcome::Converged(estimate) => {
                assert_relative_eq!(estimate.z, mean_depth, epsilon = 1e-12)
            }
            other => panic!("expected convergence, got {other:?}"),
        }
    }

    #[test]
    fn out_of_bounds_coordinates_are_rejected_not_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_with_output(dir.path().join("out.txt"), 10);
        let mut pipeline = cfg.finalize(identity_source()).unwrap();
        pipeline.on_camera_info(360.0, 360.0, 243.87, 137.92).unwrap();

        let frame = DepthFrame::filled(ROWS, COLS, 0.5);

        // u = round(1.055 * 480) = 506
        pipeline.on_coordinate(1.0, 0.0);
        assert_eq!(
            pipeline.on_depth_frame(&frame).unwrap(),
            CycleOutcome::RejectedOutOfBounds
        );

        // u = round(-0.445 * 480) = -214
        pipeline.on_coordinate(-0.5, 0.0);
        assert_eq!(
            pipeline.on_depth_frame(&frame).unwrap(),
            CycleOutcome::RejectedOutOfBounds
        );
    }

    #[test]
    fn missing_transform_skips_the_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FixedTransformSource::default();
        source.insert("base_link", "gripper_link", RigidTransform::identity());

        let cfg = cfg_with_output(dir.path().join("out.txt"), 10);
        let mut pipeline = cfg.finalize(Box::new(source)).unwrap();
        pipeline.on_camera_info(360.0, 360.0, 243.87, 137.92).unwrap();
        pipeline.on_coordinate(0.0, 0.0);

        let frame = DepthFrame::filled(ROWS, COLS, 0.5);
        assert_eq!(
            pipeline.on_depth_frame(&frame).unwrap(),
            CycleOutcome::TransformUnavailable
        );
        // the next frame triggers a fresh attempt, no state is stuck
        assert_eq!(
            pipeline.on_depth_frame(&frame).unwrap(),
            CycleOutcome::TransformUnavailable
        );
    }

    #[test]
    fn non_finite_depth_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_with_output(dir.path().join("out.txt"), 10);
        let mut pipeline = cfg.finalize(identity_source()).unwrap();
        pipeline.on_camera_info(360.0, 360.0, 243.87, 137.92).unwrap();
        pipeline.on_coordinate(0.0, 0.0);

        let frame = frame_with_depth_at(32, 26, Real::NAN);
        assert_eq!(
            pipeline.on_depth_frame(&frame).unwrap(),
            CycleOutcome::DiscardedNonFinite
        );
    }

    #[test]
    fn persistence_failure_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();

        let cfg = cfg_with_output(blocker.join("out.txt"), 1);
        let mut pipeline = cfg.finalize(identity_source()).unwrap();
        pipeline.on_camera_info(360.0, 360.0, 243.87, 137.92).unwrap();
        pipeline.on_coordinate(0.0, 0.0);

        let frame = frame_with_depth_at(32, 26, 0.5);
        assert!(pipeline.on_depth_frame(&frame).is_err());
    }

    #[test]
    fn rejects_invalid_configuration() {
        let cfg = ResolutionPipelineCfg {
            target_sample_count: 0,
            ..Default::default()
        };
        assert!(cfg.finalize(identity_source()).is_err());

        let cfg = ResolutionPipelineCfg {
            transform_timeout_secs: -1.0,
            ..Default::default()
        };
        assert!(cfg.finalize(identity_source()).is_err());
    }
}
