use std::{collections::HashMap, time::Duration};

use sophus::nalgebra::Quaternion;

use crate::{PointCoordinates, Real};

/// Pose of a source frame expressed in a target frame: a translation
/// plus a rotation quaternion in `(x, y, z, w)` sensor convention.
#[derive(Clone, Debug, PartialEq)]
pub struct RigidTransform {
    pub translation: PointCoordinates,
    pub rotation: Quaternion<Real>,
}

impl RigidTransform {
    pub fn identity() -> Self {
        RigidTransform {
            translation: PointCoordinates::zeros(),
            rotation: Quaternion::identity(),
        }
    }

    pub fn from_parts(translation: PointCoordinates, rotation: Quaternion<Real>) -> Self {
        RigidTransform {
            translation,
            rotation,
        }
    }

    pub fn from_translation(translation: PointCoordinates) -> Self {
        RigidTransform {
            translation,
            rotation: Quaternion::identity(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransformLookupError {
    #[error("frame `{0}` does not exist")]
    UnknownFrame(String),
    #[error("frames `{target}` and `{source_frame}` are not connected")]
    NotConnected { target: String, source_frame: String },
    #[error("transform history does not cover the requested time")]
    ExtrapolationOutOfRange,
    #[error("transform lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Resolves the latest-available pose of `source_frame` relative to
/// `target_frame`, waiting at most `timeout`. Every failure kind is a
/// soft failure for one resolution cycle; callers retry on the next
/// independent event, never within the cycle.
pub trait TransformSource {
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        timeout: Duration,
    ) -> Result<RigidTransform, TransformLookupError>;
}

/// Transform table for rigidly mounted sensors, where the
/// camera-to-robot pose is constant during operation.
#[derive(Debug, Default)]
pub struct FixedTransformSource {
    transforms: HashMap<(String, String), RigidTransform>,
}

impl FixedTransformSource {
    pub fn insert(&mut self, target_frame: &str, source_frame: &str, transform: RigidTransform) {
        self.transforms
            .insert((target_frame.to_owned(), source_frame.to_owned()), transform);
    }

    fn knows_frame(&self, frame: &str) -> bool {
        self.transforms
            .keys()
            .any(|(target, source)| target == frame || source == frame)
    }
}

impl TransformSource for FixedTransformSource {
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        _timeout: Duration,
    ) -> Result<RigidTransform, TransformLookupError> {
        if let Some(transform) = self
            .transforms
            .get(&(target_frame.to_owned(), source_frame.to_owned()))
        {
            return Ok(transform.clone());
        }
        if !self.knows_frame(target_frame) {
            return Err(TransformLookupError::UnknownFrame(target_frame.to_owned()));
        }
        if !self.knows_frame(source_frame) {
            return Err(TransformLookupError::UnknownFrame(source_frame.to_owned()));
        }
        Err(TransformLookupError::NotConnected {
            target: target_frame.to_owned(),
            source_frame: source_frame.to_owned(),
        })
    }
}
