//! Tracker configuration.
//!
//! Every option has a default, so a TOML file only needs the keys it changes.
//! [`TrackerConfig::validate`] enforces the documented ranges.

use std::path::{Path, PathBuf};
use std::time::Duration;

use jt_core::{BeamPose, CalibrationAxis, CamCalib, Error, Point2};
use jt_search::{Algorithm, SearchConfig};
use jt_signal::{CalibratorConfig, acceptance_sigma};
use jt_vision::LineDetectConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveOrSim {
    Live,
    #[default]
    Sim,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    pub live_or_sim: LiveOrSim,
    pub acceptance_percent: f64,
    /// Bad shots of one kind within the classification window that trigger escalation.
    pub notification_tolerance: usize,
    /// Averaging span of the displayed rolling means, in seconds.
    pub graph_average: f64,
    /// Telemetry publication rate, in Hz.
    pub refresh_rate: f64,
    /// History span of the displayed ratio trace, in seconds.
    pub display_time: f64,
    /// Search bracket, in mm.
    pub low_limit: f64,
    pub high_limit: f64,
    pub step_size: f64,
    /// Non-dropped shots averaged per search sample.
    pub motor_averaging: usize,
    pub algorithm: Algorithm,
    /// Shots collected per calibration pass.
    pub num_cali: usize,
    /// Consecutive searches without improvement tolerated before faulting.
    pub bad_scan_limit: usize,

    pub buffer_capacity: usize,
    pub classify_window: usize,
    pub shot_rate_hz: f64,
    pub vision_rate_hz: f64,
    pub tracking_enabled: bool,
    pub tracking_frame_interval: usize,
    pub tracking_epsilon_mm: f64,
    pub no_jet_limit: usize,
    pub move_timeout_s: f64,
    pub calibration_timeout_s: f64,
    /// Longest wait for the shots of one search sample.
    pub sample_timeout_s: f64,
    pub min_calibration_samples: usize,
    pub line_retries: usize,
    pub hough_threshold: u32,
    pub step_decrement: f64,
    pub step_floor: f64,
    pub search_tolerance: f64,
    pub ternary_margin: f64,
    pub peak_bin: u32,
    pub delta_bin: u32,
    pub calibration_axis: CalibrationAxis,
    pub results_dir: Option<PathBuf>,

    /// Camera scale, in mm per pixel.
    pub pxsize: f64,
    pub cam_roll: f64,
    /// Beam position in full-frame pixels.
    pub beam_pixel: [f64; 2],
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            live_or_sim: LiveOrSim::Sim,
            acceptance_percent: 70.0,
            notification_tolerance: 100,
            graph_average: 5.0,
            refresh_rate: 5.0,
            display_time: 30.0,
            low_limit: -0.1,
            high_limit: 0.1,
            step_size: 0.02,
            motor_averaging: 5,
            algorithm: Algorithm::Ternary,
            num_cali: 1000,
            bad_scan_limit: 1,
            buffer_capacity: 300,
            classify_window: 100,
            shot_rate_hz: 50.0,
            vision_rate_hz: 10.0,
            tracking_enabled: false,
            tracking_frame_interval: 1,
            tracking_epsilon_mm: 0.01,
            no_jet_limit: 3,
            move_timeout_s: 5.0,
            calibration_timeout_s: 30.0,
            sample_timeout_s: 5.0,
            min_calibration_samples: 30,
            line_retries: 30,
            hough_threshold: 30,
            step_decrement: 0.02,
            step_floor: 0.02,
            search_tolerance: 0.005,
            ternary_margin: 0.1,
            peak_bin: 0,
            delta_bin: 0,
            calibration_axis: CalibrationAxis::OnAxis,
            results_dir: None,
            pxsize: 0.002,
            cam_roll: 0.0,
            beam_pixel: [160.0, 120.0],
        }
    }
}

fn check(ok: bool, msg: impl FnOnce() -> String) -> Result<(), Error> {
    if ok { Ok(()) } else { Err(Error::Config(msg())) }
}

fn in_range(name: &str, v: f64, lo: f64, hi: f64) -> Result<(), Error> {
    check(v.is_finite() && v >= lo && v <= hi, || {
        format!("{name} must be in [{lo}, {hi}], got {v}")
    })
}

fn positive(name: &str, v: f64) -> Result<(), Error> {
    check(v.is_finite() && v > 0.0, || format!("{name} must be > 0, got {v}"))
}

fn at_least_one(name: &str, v: usize) -> Result<(), Error> {
    check(v >= 1, || format!("{name} must be at least 1"))
}

impl TrackerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, Error> {
        let cfg: Self = toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn validate(&self) -> Result<(), Error> {
        in_range("acceptance_percent", self.acceptance_percent, 1.0, 99.0)?;
        check(
            (10..=300).contains(&self.notification_tolerance),
            || format!("notification_tolerance must be in [10, 300], got {}", self.notification_tolerance),
        )?;
        in_range("graph_average", self.graph_average, 1.0, 30.0)?;
        in_range("refresh_rate", self.refresh_rate, 1.0, 50.0)?;
        in_range("display_time", self.display_time, 10.0, 120.0)?;
        check(
            self.low_limit.is_finite() && self.high_limit.is_finite() && self.low_limit < self.high_limit,
            || format!("low_limit {} must be below high_limit {}", self.low_limit, self.high_limit),
        )?;
        positive("step_size", self.step_size)?;
        at_least_one("motor_averaging", self.motor_averaging)?;
        at_least_one("num_cali", self.num_cali)?;
        at_least_one("bad_scan_limit", self.bad_scan_limit)?;
        at_least_one("buffer_capacity", self.buffer_capacity)?;
        at_least_one("classify_window", self.classify_window)?;
        at_least_one("tracking_frame_interval", self.tracking_frame_interval)?;
        at_least_one("no_jet_limit", self.no_jet_limit)?;
        at_least_one("min_calibration_samples", self.min_calibration_samples)?;
        at_least_one("line_retries", self.line_retries)?;
        positive("shot_rate_hz", self.shot_rate_hz)?;
        positive("vision_rate_hz", self.vision_rate_hz)?;
        positive("tracking_epsilon_mm", self.tracking_epsilon_mm)?;
        positive("move_timeout_s", self.move_timeout_s)?;
        positive("calibration_timeout_s", self.calibration_timeout_s)?;
        positive("sample_timeout_s", self.sample_timeout_s)?;
        positive("pxsize", self.pxsize)?;
        self.search_config().validate()
    }

    /// Sliding window length: long enough to hold `notification_tolerance` shots.
    pub fn window_len(&self) -> usize {
        self.classify_window.max(self.notification_tolerance)
    }

    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            algorithm: self.algorithm,
            low: self.low_limit,
            high: self.high_limit,
            step_size: self.step_size,
            step_decrement: self.step_decrement,
            step_floor: self.step_floor,
            tolerance: self.search_tolerance,
            ternary_margin: self.ternary_margin,
        }
    }

    pub fn calibrator_config(&self) -> CalibratorConfig {
        CalibratorConfig {
            num_samples: self.num_cali,
            min_admitted: self.min_calibration_samples,
            acceptance_percent: self.acceptance_percent,
            starvation_timeout: Duration::from_secs_f64(self.calibration_timeout_s),
            peak_bin: self.peak_bin,
            delta_bin: self.delta_bin,
            ..CalibratorConfig::default()
        }
    }

    pub fn line_detect_config(&self) -> LineDetectConfig {
        LineDetectConfig {
            retries: self.line_retries,
            threshold: self.hough_threshold,
            ..LineDetectConfig::default()
        }
    }

    pub fn acceptance_sigma(&self) -> Result<f64, Error> {
        acceptance_sigma(self.acceptance_percent)
    }

    pub fn cam_calib(&self) -> Result<CamCalib, Error> {
        Ok(CamCalib::new(self.pxsize, self.cam_roll, Point2::default())?
            .with_axis(self.calibration_axis))
    }

    /// Replaces the camera keys with a measured calibration.
    pub fn set_cam_calib(&mut self, calib: &CamCalib) {
        self.pxsize = calib.pxsize;
        self.cam_roll = calib.cam_roll;
        self.calibration_axis = calib.axis;
    }

    pub fn beam_pose(&self) -> Result<BeamPose, Error> {
        let pixel = Point2::new(self.beam_pixel[0], self.beam_pixel[1]);
        Ok(BeamPose::from_pixel(pixel, &self.cam_calib()?))
    }

    pub fn shot_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.shot_rate_hz)
    }

    pub fn vision_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.vision_rate_hz)
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refresh_rate)
    }
}
