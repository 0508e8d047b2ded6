use jt_core::{BeamPose, CamCalib, Error, ImageView, Line, Point2, Roi, fold_half_pi};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::profile::{ProfileConfig, jet_width};

/// Jet position relative to the beam.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JetMetrics {
    /// World-x offset of the jet from the beam at the beam row, in mm.
    pub jet_x: f64,
    /// Jet angle from the world vertical, in `(-pi/2, pi/2]`.
    pub jet_roll: f64,
    /// Full width at half maximum across the jet, in pixels. `None` when the
    /// profile has no clean half-maximum crossing.
    pub jet_width: Option<f64>,
}

/// Offset in mm, positive when the jet lies at larger world x than the beam.
///
/// `line` is expressed in ROI pixel coordinates.
pub fn jet_x(line: &Line, roi: Roi, calib: &CamCalib, beam: &BeamPose) -> Result<f64, Error> {
    if roi.is_collapsed() {
        return Err(Error::DegenerateGeometry("ROI collapsed"));
    }
    let origin = Point2::new(roi.x0 as f64, roi.y0 as f64);
    let beam_row = beam.pixel.y - origin.y;
    let x = line.x_at_y(beam_row)?;

    let jet = calib.pixel_to_world(x, beam_row, origin);
    let beam_world = calib.pixel_to_world(beam.pixel.x - origin.x, beam_row, origin);
    Ok(jet.x - beam_world.x)
}

/// Jet angle relative to the camera's vertical, folded so a vertical jet in an
/// unrotated camera reads zero.
pub fn jet_roll(line: &Line, calib: &CamCalib) -> f64 {
    fold_half_pi(line.theta - calib.cam_roll)
}

pub fn measure_jet<T: Copy + Into<f64>>(
    img: &ImageView<'_, T>,
    line: &Line,
    roi: Roi,
    calib: &CamCalib,
    beam: &BeamPose,
    profile: &ProfileConfig,
) -> Result<JetMetrics, Error> {
    let x = jet_x(line, roi, calib, beam)?;
    let width = match jet_width(img, line, profile) {
        Ok(w) => Some(w),
        Err(err) => {
            debug!(%err, "jet width unavailable");
            None
        }
    };

    Ok(JetMetrics {
        jet_x: x,
        jet_roll: jet_roll(line, calib),
        jet_width: width,
    })
}

#[cfg(test)]
mod tests {
    use core::f64::consts::FRAC_PI_2;

    use jt_core::{BeamPose, CamCalib, Error, Line, Point2, Roi};

    use super::{jet_roll, jet_x};

    fn calib(roll: f64) -> CamCalib {
        CamCalib::new(0.01, roll, Point2::new(0.0, 0.0)).expect("valid calibration")
    }

    #[test]
    fn offset_of_vertical_jet() {
        let c = calib(0.0);
        let beam = BeamPose::from_pixel(Point2::new(50.0, 30.0), &c);
        let roi = Roi::new(20, 10, 60, 40);

        // ROI column 40 is frame column 60, ten pixels right of the beam.
        let x = jet_x(&Line::new(40.0, 0.0), roi, &c, &beam).expect("vertical jet");
        assert!((x - 0.1).abs() < 1e-9);

        let x = jet_x(&Line::new(25.0, 0.0), roi, &c, &beam).expect("vertical jet");
        assert!((x + 0.05).abs() < 1e-9);
    }

    #[test]
    fn tilted_jet_is_read_at_beam_row() {
        let c = calib(0.0);
        let beam = BeamPose::from_pixel(Point2::new(10.0, 20.0), &c);
        let roi = Roi::full(64, 64);
        let theta = 0.1f64;
        // Passes through (10, 0); at y = 20 it is left of the beam.
        let line = Line::new(10.0 * theta.cos(), theta);

        let x = jet_x(&line, roi, &c, &beam).expect("tilted jet");
        let expected = 0.01 * (-20.0 * theta.tan());
        assert!((x - expected).abs() < 1e-9);
    }

    #[test]
    fn horizontal_jet_is_degenerate() {
        let c = calib(0.0);
        let beam = BeamPose::from_pixel(Point2::new(10.0, 10.0), &c);
        let err = jet_x(&Line::new(5.0, FRAC_PI_2), Roi::full(32, 32), &c, &beam)
            .expect_err("horizontal");
        assert!(matches!(err, Error::DegenerateGeometry(_)));
    }

    #[test]
    fn collapsed_roi_is_degenerate() {
        let c = calib(0.0);
        let beam = BeamPose::from_pixel(Point2::new(10.0, 10.0), &c);
        let err = jet_x(&Line::new(5.0, 0.0), Roi::new(0, 0, 1, 32), &c, &beam)
            .expect_err("collapsed");
        assert!(matches!(err, Error::DegenerateGeometry(_)));
    }

    #[test]
    fn roll_compensates_camera_rotation() {
        assert!(jet_roll(&Line::new(3.0, 0.0), &calib(0.0)).abs() < 1e-12);
        let r = jet_roll(&Line::new(3.0, 0.05), &calib(0.02));
        assert!((r - 0.03).abs() < 1e-12);
        // theta near pi is a jet leaning the other way.
        let r = jet_roll(&Line::new(3.0, core::f64::consts::PI - 0.05), &calib(0.0));
        assert!((r + 0.05).abs() < 1e-12);
    }
}
