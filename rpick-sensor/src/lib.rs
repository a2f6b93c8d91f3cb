pub mod pinhole_camera;

pub use pinhole_camera::{IntrinsicModel, IntrinsicsError, PinholeCamera};
