use rpick_core::{PointCoordinates, Real, RigidTransform};
use sophus::nalgebra::{Matrix4, UnitQuaternion, Vector4};

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("rotation quaternion is zero or not normalizable")]
    DegenerateRotation,
}

/// Maps a camera-frame point into the target frame through the 4x4
/// homogeneous matrix of `transform`: translation block taken
/// directly, rotation block from the normalized quaternion.
///
/// The mapping is an exact rigid transform (no scaling); the output is
/// non-finite only if `point` or `transform` already is.
pub fn to_target_frame(
    point: &PointCoordinates,
    transform: &RigidTransform,
) -> Result<PointCoordinates, TransformError> {
    let rotation = UnitQuaternion::try_new(transform.rotation, 1e-9)
        .ok_or(TransformError::DegenerateRotation)?;

    let mut translation_h = Matrix4::<Real>::identity();
    translation_h[(0, 3)] = transform.translation.x;
    translation_h[(1, 3)] = transform.translation.y;
    translation_h[(2, 3)] = transform.translation.z;
    let homogeneous = translation_h * rotation.to_homogeneous();

    let mapped = homogeneous * Vector4::new(point.x, point.y, point.z, 1.0);
    Ok(PointCoordinates::new(mapped.x, mapped.y, mapped.z))
}
