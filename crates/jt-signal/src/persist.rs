//! On-disk calibration records.
//!
//! One TOML file per calibration run, named by creation time. The newest file
//! by modification time is the one loaded.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Local;
use jt_core::Error;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classifier::CalibrationResult;
use crate::stats::Stats;

const FILE_PREFIX: &str = "calibration_";
const FILE_EXT: &str = "toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub i0_low: f64,
    pub i0_high: f64,
    pub peak_bin: u32,
    pub delta_bin: u32,
    pub mean_ratio: f64,
    pub med_ratio: f64,
    pub std_ratio: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i0_mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i0_std: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_std: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_sigma: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

impl From<&CalibrationResult> for CalibrationRecord {
    fn from(r: &CalibrationResult) -> Self {
        let diff_band = r.diff.is_bounded();
        Self {
            i0_low: r.i0.low,
            i0_high: r.i0.high,
            peak_bin: r.peak_bin,
            delta_bin: r.delta_bin,
            mean_ratio: r.ratio.mean,
            med_ratio: r.ratio_median,
            std_ratio: r.ratio.stdev,
            i0_mean: Some(r.i0.mean),
            i0_std: Some(r.i0.stdev),
            diff_mean: Some(r.diff.mean),
            diff_std: Some(r.diff.stdev),
            diff_low: diff_band.then_some(r.diff.low),
            diff_high: diff_band.then_some(r.diff.high),
            acceptance_sigma: Some(r.sigma),
            created: None,
        }
    }
}

impl CalibrationRecord {
    /// Rebuilds classifier statistics. `default_sigma` applies when the record
    /// does not carry its own acceptance width.
    pub fn to_result(&self, default_sigma: f64) -> CalibrationResult {
        let sigma = self.acceptance_sigma.unwrap_or(default_sigma);
        let i0_mean = self
            .i0_mean
            .unwrap_or(0.5 * (self.i0_low + self.i0_high));
        let i0_std = self.i0_std.unwrap_or_else(|| {
            if sigma > 0.0 {
                (self.i0_high - self.i0_low) / (2.0 * sigma)
            } else {
                0.0
            }
        });

        let diff_mean = self.diff_mean.unwrap_or(0.0);
        let diff_std = self.diff_std.unwrap_or(0.0);
        let diff = match (self.diff_low, self.diff_high) {
            (Some(low), Some(high)) => Stats {
                mean: diff_mean,
                stdev: diff_std,
                low,
                high,
            },
            _ => {
                warn!("calibration record has no diffraction band; MISSED detection disabled");
                Stats::unbounded(diff_mean, diff_std)
            }
        };

        CalibrationResult {
            i0: Stats {
                mean: i0_mean,
                stdev: i0_std,
                low: self.i0_low,
                high: self.i0_high,
            },
            diff,
            ratio: Stats::with_band(self.mean_ratio, self.std_ratio, sigma),
            ratio_median: self.med_ratio,
            sigma,
            peak_bin: self.peak_bin,
            delta_bin: self.delta_bin,
        }
    }
}

fn format_err(path: &Path, reason: impl ToString) -> Error {
    Error::Format {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Writes `result` to a new timestamped file under `dir` and returns its path.
pub fn save_calibration(dir: &Path, result: &CalibrationResult) -> Result<PathBuf, Error> {
    fs::create_dir_all(dir)?;
    let now = Local::now();
    let mut record = CalibrationRecord::from(result);
    record.created = Some(now.to_rfc3339());

    let path = dir.join(format!(
        "{FILE_PREFIX}{}.{FILE_EXT}",
        now.format("%Y%m%d_%H%M%S_%3f")
    ));
    let text = toml::to_string_pretty(&record).map_err(|e| format_err(&path, e))?;
    fs::write(&path, text)?;
    info!(path = %path.display(), "calibration saved");
    Ok(path)
}

pub fn load_record(path: &Path) -> Result<CalibrationRecord, Error> {
    let raw = fs::read_to_string(path)?;
    toml::from_str(&raw).map_err(|e| format_err(path, e))
}

pub fn load_calibration(path: &Path, default_sigma: f64) -> Result<CalibrationResult, Error> {
    Ok(load_record(path)?.to_result(default_sigma))
}

/// Newest calibration file under `dir` by modification time, if any.
pub fn latest_calibration_file(dir: &Path) -> Result<Option<PathBuf>, Error> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut best: Option<(SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().is_none_or(|e| e != FILE_EXT) {
            continue;
        }
        let modified = fs::metadata(&path)?.modified()?;
        if best.as_ref().is_none_or(|(t, _)| modified > *t) {
            best = Some((modified, path));
        }
    }
    Ok(best.map(|(_, p)| p))
}

pub fn load_latest(
    dir: &Path,
    default_sigma: f64,
) -> Result<Option<(PathBuf, CalibrationResult)>, Error> {
    let Some(path) = latest_calibration_file(dir)? else {
        return Ok(None);
    };
    let result = load_calibration(&path, default_sigma)?;
    info!(path = %path.display(), "calibration loaded");
    Ok(Some((path, result)))
}

#[cfg(test)]
mod tests {
    use super::CalibrationRecord;

    const MINIMAL: &str = r#"
i0_low = 0.8
i0_high = 1.2
peak_bin = 120
delta_bin = 6
mean_ratio = 0.5
med_ratio = 0.49
std_ratio = 0.05
"#;

    #[test]
    fn minimal_record_disables_diff_band() {
        let rec: CalibrationRecord = toml::from_str(MINIMAL).expect("valid record");
        let res = rec.to_result(2.0);

        assert!(!res.diff.is_bounded());
        assert!((res.i0.mean - 1.0).abs() < 1e-12);
        assert!((res.i0.stdev - 0.1).abs() < 1e-12);
        assert!((res.ratio.low - 0.4).abs() < 1e-12);
        assert_eq!(res.peak_bin, 120);
    }

    #[test]
    fn missing_required_key_is_rejected() {
        let text = MINIMAL.replace("std_ratio = 0.05", "");
        assert!(toml::from_str::<CalibrationRecord>(&text).is_err());
    }
}
