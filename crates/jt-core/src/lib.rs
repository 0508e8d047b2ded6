//! Foundational types for jet-tracking feedback.
//!
//! ## Frames and ROIs
//! Frames are grayscale `u16` images. A [`Roi`] is a rectangle in parent-frame
//! pixel coordinates with its origin at the top-left corner. Views use element
//! stride, so an ROI can be borrowed from a frame without copying.
//!
//! ## Geometry
//! Lines are held in normal form `(rho, theta)` with `theta` in `[0, pi)`.
//! [`CamCalib`] maps ROI pixels to world millimetres through a scaled rigid
//! transform and back.
//!
//! ## Devices
//! [`Actuator`], [`ImageSource`] and [`SignalSource`] are the only way the
//! rest of the workspace touches hardware.

mod cancel;
mod device;
mod error;
mod geom;
mod image;
mod sample;

pub use cancel::CancelToken;
pub use device::{Actuator, ImageSource, Shot, ShotRead, SignalSource};
pub use error::{Error, ErrorKind, Result};
pub use geom::{
    BeamPose, CalibrationAxis, CamCalib, HORIZONTAL_EPS, Line, Point2, Rigid2, Vec2,
    canonical_angle, fold_half_pi,
};
pub use image::{Frame, Image, ImageView, Roi};
pub use sample::{BorderMode, sample_bilinear};
