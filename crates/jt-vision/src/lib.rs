//! Vision pipeline for jet tracking.
//!
//! - [`LineDetector`] binarizes a frame against a background estimate and
//!   extracts the dominant straight line with a Hough accumulator, lowering
//!   the threshold on each failed attempt.
//! - [`measure_jet`] turns that line into a millimetre offset from the beam, an
//!   angle and a width.
//! - [`calibrate_camera`] recovers pixel size and camera rotation from frames
//!   taken at known actuator moves.

mod cam_calibrate;
mod jet_metrics;
mod line_detect;
mod pipeline;
mod profile;

pub use cam_calibrate::{
    CalibrationFrame, CamCalibration, DEFAULT_UPSAMPLE, PhaseCorrelator, PixelShift,
    acquire_frames, calibrate_camera,
};
pub use jet_metrics::{JetMetrics, jet_roll, jet_x, measure_jet};
pub use line_detect::{Background, LineDetectConfig, LineDetection, LineDetector};
pub use pipeline::{VisionPipeline, VisionReading};
pub use profile::{GaussianKernel1D, ProfileConfig, cross_section, fwhm, jet_width};
