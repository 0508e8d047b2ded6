use jt_core::{BeamPose, CamCalib, Error, Frame, Line, Roi};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::jet_metrics::{JetMetrics, measure_jet};
use crate::line_detect::{Background, LineDetectConfig, LineDetector};
use crate::profile::ProfileConfig;

/// Result of one vision pass over an ROI frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisionReading {
    pub roi: Roi,
    pub line: Line,
    pub metrics: JetMetrics,
}

/// LineDetect followed by JetMetrics on ROI frames.
#[derive(Debug)]
pub struct VisionPipeline {
    detector: LineDetector,
    profile: ProfileConfig,
    calib: CamCalib,
    beam: BeamPose,
}

impl VisionPipeline {
    pub fn new(cfg: LineDetectConfig, calib: CamCalib, beam: BeamPose) -> Self {
        Self {
            detector: LineDetector::new(cfg),
            profile: ProfileConfig::default(),
            calib,
            beam,
        }
    }

    pub fn calib(&self) -> &CamCalib {
        &self.calib
    }

    pub fn beam(&self) -> &BeamPose {
        &self.beam
    }

    /// `frame` holds the pixels of `roi` only.
    pub fn process(&mut self, frame: &Frame, roi: Roi) -> Result<VisionReading, Error> {
        if frame.width() != roi.width || frame.height() != roi.height {
            return Err(Error::SizeMismatch {
                expected: roi.width * roi.height,
                actual: frame.width() * frame.height(),
            });
        }
        let view = frame.as_view();
        let found = self.detector.detect(&view, Background::estimate(&view))?;
        let metrics = measure_jet(
            &view,
            &found.line,
            roi,
            &self.calib,
            &self.beam,
            &self.profile,
        )?;
        trace!(jet_x = metrics.jet_x, jet_roll = metrics.jet_roll, "vision reading");

        Ok(VisionReading {
            roi,
            line: found.line,
            metrics,
        })
    }
}
