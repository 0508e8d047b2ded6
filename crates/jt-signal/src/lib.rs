//! Shot-level signal processing.
//!
//! [`ShotStream`] keeps bounded histories of `(t, I0, D, R)` with `R = D / I0`.
//! [`Calibrator`] builds operating bands from two collection passes, and
//! [`Classifier`] labels each shot against them. Calibrations are stored as
//! TOML records, one file per run.

mod calibrator;
mod classifier;
mod persist;
mod stats;
mod stream;

pub use calibrator::{Calibrator, CalibratorConfig};
pub use classifier::{CalibrationResult, Classifier, Label};
pub use persist::{
    CalibrationRecord, latest_calibration_file, load_calibration, load_latest, load_record,
    save_calibration,
};
pub use stats::{Stats, acceptance_sigma, mean_std, median};
pub use stream::{
    DEFAULT_CAPACITY, SharedShotStream, ShotAverages, ShotSnapshot, ShotStream,
};
