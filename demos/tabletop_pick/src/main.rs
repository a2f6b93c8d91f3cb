use anyhow::{Context, Result};
use pinpoint::pipeline::{CycleOutcome, ResolutionPipeline, ResolutionPipelineCfg};
use rpick_core::{Dataset, DepthFrame, FixedTransformSource, PointCoordinates, Real, RigidTransform};
use rpick_session_reader::SessionReader;

fn main() -> Result<()> {
    env_logger::init();

    // camera rigidly mounted 0.4m in front of and 0.2m above the base
    let mut transforms = FixedTransformSource::default();
    transforms.insert(
        "base_link",
        "camera_link",
        RigidTransform::from_translation(PointCoordinates::new(0.4, 0.0, 0.2)),
    );

    let cfg = ResolutionPipelineCfg::default();
    let mut pipeline = cfg.finalize(Box::new(transforms))?;

    match std::env::args().nth(1) {
        Some(session_dir) => replay_session(&session_dir, &mut pipeline),
        None => run_synthetic(&mut pipeline),
    }
}

/// Replays a recorded session directory through the pipeline.
fn replay_session(session_dir: &str, pipeline: &mut ResolutionPipeline) -> Result<()> {
    let mut reader = SessionReader::new(session_dir);
    reader.load_calibration()?;
    reader.load_coordinate()?;
    reader.load_frame_index()?;

    let camera = reader.camera().context("session has no calibration")?;
    pipeline.on_camera_info(camera.fx(), camera.fy(), camera.cx(), camera.cy())?;
    let coordinate = reader.coordinate().context("session has no coordinate")?;
    pipeline.on_coordinate(coordinate.x, coordinate.y);

    for frame in reader.iter() {
        if let CycleOutcome::Converged(estimate) = pipeline.on_depth_frame(&frame)? {
            log::info!("converged on {estimate:?}");
            return Ok(());
        }
    }
    anyhow::bail!("session ended before the pipeline converged");
}

/// Feeds synthetic depth frames of a tabletop target until convergence.
fn run_synthetic(pipeline: &mut ResolutionPipeline) -> Result<()> {
    pipeline.on_camera_info(360.01333, 360.0133667, 243.87228, 137.9218444)?;
    pipeline.on_coordinate(0.0, 0.0);

    let mut i = 0usize;
    loop {
        // 0.5m target with a small per-frame ripple
        let depth = 0.5 + 1e-4 * (i % 7) as Real;
        let frame = DepthFrame::filled(270, 480, depth);
        if let CycleOutcome::Converged(estimate) = pipeline.on_depth_frame(&frame)? {
            log::info!("converged on {estimate:?} after {} frames", i + 1);
            return Ok(());
        }
        i += 1;
    }
}
