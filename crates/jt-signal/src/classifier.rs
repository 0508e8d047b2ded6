use jt_core::Shot;
use serde::{Deserialize, Serialize};

use crate::stats::Stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Ok,
    /// Incident intensity below band: a beam problem.
    Dropped,
    /// Nominal incident intensity but low diffraction: the jet left the beam.
    Missed,
    /// Both intensities in band but their ratio below band.
    Low,
}

impl Label {
    pub const ALL: [Label; 4] = [Label::Ok, Label::Dropped, Label::Missed, Label::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Dropped => "DROPPED",
            Self::Missed => "MISSED",
            Self::Low => "LOW",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating statistics established by calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub i0: Stats,
    pub diff: Stats,
    /// Statistics of `D / I0`.
    pub ratio: Stats,
    pub ratio_median: f64,
    /// Acceptance band half-width in standard deviations.
    pub sigma: f64,
    pub peak_bin: u32,
    pub delta_bin: u32,
}

/// Labels shots against a [`CalibrationResult`]. Holds no other state.
#[derive(Debug, Clone, PartialEq)]
pub struct Classifier {
    calib: CalibrationResult,
}

impl Classifier {
    pub fn new(calib: CalibrationResult) -> Self {
        Self { calib }
    }

    pub fn calibration(&self) -> &CalibrationResult {
        &self.calib
    }

    pub fn set_calibration(&mut self, calib: CalibrationResult) {
        self.calib = calib;
    }

    /// Precedence: DROPPED, then MISSED, then LOW. A non-finite I0 is
    /// DROPPED and a non-finite D is MISSED.
    pub fn classify(&self, shot: &Shot) -> Label {
        if !(shot.i0.is_finite() && shot.i0 >= self.calib.i0.low) {
            Label::Dropped
        } else if !(shot.diff.is_finite() && shot.diff >= self.calib.diff.low) {
            Label::Missed
        } else if !(shot.ratio() >= self.calib.ratio.low) {
            Label::Low
        } else {
            Label::Ok
        }
    }
}
