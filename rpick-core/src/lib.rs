mod dataset;
pub use dataset::*;
mod depth;
pub use depth::*;
mod transform;
pub use transform::*;

use sophus::nalgebra::{Vector2, Vector3};

pub type Real = f64;
pub type PointCoordinates = Vector3<Real>;
pub type NormalizedCoordinates = Vector2<Real>;
