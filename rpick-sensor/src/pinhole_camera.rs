use rpick_core::{PointCoordinates, Real};

#[derive(Debug, thiserror::Error)]
pub enum IntrinsicsError {
    #[error("focal lengths must be positive, got fx={fx} fy={fy}")]
    NonPositiveFocal { fx: Real, fy: Real },
    #[error("intrinsic parameters must be finite")]
    NonFinite,
}

/// Pinhole intrinsics in pixel units. Validated on construction so the
/// back-projection divisions are always well defined.
#[derive(Clone, Debug)]
pub struct PinholeCamera {
    fx: Real,
    fy: Real,
    cx: Real,
    cy: Real,
}

impl PinholeCamera {
    pub fn from_params(fx: Real, fy: Real, cx: Real, cy: Real) -> Result<Self, IntrinsicsError> {
        if ![fx, fy, cx, cy].iter().all(|p| p.is_finite()) {
            return Err(IntrinsicsError::NonFinite);
        }
        if fx <= 0.0 || fy <= 0.0 {
            return Err(IntrinsicsError::NonPositiveFocal { fx, fy });
        }
        Ok(PinholeCamera { fx, fy, cx, cy })
    }

    pub fn fx(&self) -> Real {
        self.fx
    }

    pub fn fy(&self) -> Real {
        self.fy
    }

    pub fn cx(&self) -> Real {
        self.cx
    }

    pub fn cy(&self) -> Real {
        self.cy
    }

    /// Inverse pinhole projection: pixel `(u, v)` plus a depth sample
    /// to a 3D point in the camera frame. Pure arithmetic: a zero or
    /// non-finite depth flows through and is filtered downstream.
    pub fn backproject(&self, u: Real, v: Real, depth: Real) -> PointCoordinates {
        PointCoordinates::new(
            (u - self.cx) * depth / self.fx,
            (v - self.cy) * depth / self.fy,
            depth,
        )
    }
}

/// The "latest intrinsics" slot fed by calibration events. Processing
/// is deferred until the first valid update arrives; later updates
/// overwrite idempotently.
#[derive(Clone, Debug, Default)]
pub struct IntrinsicModel {
    camera: Option<PinholeCamera>,
}

impl IntrinsicModel {
    pub fn update(
        &mut self,
        fx: Real,
        fy: Real,
        cx: Real,
        cy: Real,
    ) -> Result<(), IntrinsicsError> {
        self.camera = Some(PinholeCamera::from_params(fx, fy, cx, cy)?);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.camera.is_some()
    }

    pub fn camera(&self) -> Option<&PinholeCamera> {
        self.camera.as_ref()
    }
}
