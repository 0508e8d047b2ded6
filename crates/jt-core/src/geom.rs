//! Planar geometry shared by the vision and control layers.
//!
//! Frames, from innermost to outermost: ROI pixels, full-frame pixels,
//! camera millimetres and world millimetres. The world frame is the one the
//! actuator moves in.

use core::f64::consts::{FRAC_PI_2, PI};
use core::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

use crate::Error;

/// `cos(theta)` below this is treated as a horizontal line.
pub const HORIZONTAL_EPS: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Vec2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn norm(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn rotated(self, angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Self {
            x: c * self.x - s * self.y,
            y: s * self.x + c * self.y,
        }
    }
}

impl Add<Vec2> for Point2 {
    type Output = Point2;

    fn add(self, rhs: Vec2) -> Self::Output {
        Point2 {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl Sub<Point2> for Point2 {
    type Output = Vec2;

    fn sub(self, rhs: Point2) -> Self::Output {
        Vec2 {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Self::Output {
        Vec2 {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl Neg for Vec2 {
    type Output = Vec2;

    fn neg(self) -> Self::Output {
        Vec2 {
            x: -self.x,
            y: -self.y,
        }
    }
}

impl Mul<f64> for Vec2 {
    type Output = Vec2;

    fn mul(self, rhs: f64) -> Self::Output {
        Vec2 {
            x: self.x * rhs,
            y: self.y * rhs,
        }
    }
}

/// Folds any angle into `[0, pi)`.
pub fn canonical_angle(theta: f64) -> f64 {
    let t = theta.rem_euclid(PI);
    // rem_euclid can round up to exactly pi for tiny negative inputs.
    if t >= PI { 0.0 } else { t }
}

/// Folds any angle into `(-pi/2, pi/2]`.
pub fn fold_half_pi(angle: f64) -> f64 {
    let t = canonical_angle(angle);
    if t > FRAC_PI_2 { t - PI } else { t }
}

/// Straight line in normal form: `x*cos(theta) + y*sin(theta) = rho`.
///
/// `theta` is kept in `[0, pi)` and the sign of `rho` follows it, so every
/// geometric line has exactly one representation. A vertical line has
/// `theta = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub rho: f64,
    pub theta: f64,
}

impl Line {
    pub fn new(rho: f64, theta: f64) -> Self {
        let wrapped = theta.rem_euclid(2.0 * PI);
        if wrapped >= PI {
            Self {
                rho: -rho,
                theta: canonical_angle(wrapped - PI),
            }
        } else {
            Self {
                rho,
                theta: canonical_angle(wrapped),
            }
        }
    }

    pub fn normal(&self) -> Vec2 {
        let (s, c) = self.theta.sin_cos();
        Vec2::new(c, s)
    }

    pub fn is_near_horizontal(&self) -> bool {
        self.theta.cos().abs() < HORIZONTAL_EPS
    }

    /// Column where the line crosses row `y`.
    pub fn x_at_y(&self, y: f64) -> Result<f64, Error> {
        let (s, c) = self.theta.sin_cos();
        if c.abs() < HORIZONTAL_EPS {
            return Err(Error::DegenerateGeometry("jet is horizontal in the image"));
        }
        Ok((self.rho - y * s) / c)
    }
}

/// Rotation followed by translation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rigid2 {
    pub angle: f64,
    pub translation: Vec2,
}

impl Rigid2 {
    pub fn new(angle: f64, translation: Vec2) -> Self {
        Self { angle, translation }
    }

    pub fn apply(&self, p: Point2) -> Point2 {
        let v = Vec2::new(p.x, p.y).rotated(self.angle) + self.translation;
        Point2::new(v.x, v.y)
    }

    pub fn inverse(&self) -> Self {
        Self {
            angle: -self.angle,
            translation: -self.translation.rotated(-self.angle),
        }
    }
}

/// Which actuator axis a camera calibration describes.
///
/// The on-axis camera relates `x` and `roll`; the off-axis camera relates `z`
/// and `pitch`. The mathematics is identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationAxis {
    #[default]
    #[serde(alias = "x")]
    OnAxis,
    #[serde(alias = "z")]
    OffAxis,
}

impl CalibrationAxis {
    pub fn position_label(self) -> &'static str {
        match self {
            Self::OnAxis => "x",
            Self::OffAxis => "z",
        }
    }
}

/// Pixel-to-world mapping of one camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CamCalib {
    /// Millimetres per pixel.
    pub pxsize: f64,
    /// Camera rotation in `(-pi/2, pi/2]`.
    pub cam_roll: f64,
    /// World position of full-frame pixel `(0, 0)`.
    pub cam_origin: Point2,
    #[serde(default)]
    pub axis: CalibrationAxis,
}

impl CamCalib {
    pub fn new(pxsize: f64, cam_roll: f64, cam_origin: Point2) -> Result<Self, Error> {
        if !(pxsize.is_finite() && pxsize > 0.0) {
            return Err(Error::Config(format!("pxsize must be > 0, got {pxsize}")));
        }
        Ok(Self {
            pxsize,
            cam_roll: fold_half_pi(cam_roll),
            cam_origin,
            axis: CalibrationAxis::OnAxis,
        })
    }

    pub fn with_axis(mut self, axis: CalibrationAxis) -> Self {
        self.axis = axis;
        self
    }

    fn frame_to_world(&self) -> Rigid2 {
        Rigid2::new(
            self.cam_roll,
            Vec2::new(self.cam_origin.x, self.cam_origin.y),
        )
    }

    /// Maps ROI pixel `(u, v)` with ROI origin `roi_origin` to world millimetres.
    pub fn pixel_to_world(&self, u: f64, v: f64, roi_origin: Point2) -> Point2 {
        let scaled = Point2::new(
            self.pxsize * (u + roi_origin.x),
            self.pxsize * (v + roi_origin.y),
        );
        self.frame_to_world().apply(scaled)
    }

    /// Inverse of [`CamCalib::pixel_to_world`], returning ROI pixel coordinates.
    pub fn world_to_pixel(&self, w: Point2, roi_origin: Point2) -> Point2 {
        let p = self.frame_to_world().inverse().apply(w);
        Point2::new(
            p.x / self.pxsize - roi_origin.x,
            p.y / self.pxsize - roi_origin.y,
        )
    }
}

/// Beam position, in world millimetres and in full-frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamPose {
    pub world: Point2,
    pub pixel: Point2,
}

impl BeamPose {
    pub fn from_world(world: Point2, calib: &CamCalib) -> Self {
        Self {
            world,
            pixel: calib.world_to_pixel(world, Point2::default()),
        }
    }

    pub fn from_pixel(pixel: Point2, calib: &CamCalib) -> Self {
        Self {
            world: calib.pixel_to_world(pixel.x, pixel.y, Point2::default()),
            pixel,
        }
    }
}

#[cfg(test)]
mod tests {
    use core::f64::consts::{FRAC_PI_2, PI};

    use rand::prelude::*;

    use super::{
        BeamPose, CamCalib, Line, Point2, Rigid2, Vec2, canonical_angle, fold_half_pi,
    };

    #[test]
    fn canonical_angle_range_and_idempotence() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2000 {
            let theta = rng.gen_range(-50.0..50.0);
            let c = canonical_angle(theta);
            assert!((0.0..PI).contains(&c), "{theta} -> {c}");
            assert_eq!(canonical_angle(c), c);
        }
        assert_eq!(canonical_angle(-1e-18), 0.0);
        assert!((canonical_angle(-FRAC_PI_2) - FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn fold_half_pi_range() {
        assert!((fold_half_pi(PI) - 0.0).abs() < 1e-12);
        assert!((fold_half_pi(-FRAC_PI_2) - FRAC_PI_2).abs() < 1e-12);
        assert!((fold_half_pi(3.0 * FRAC_PI_2 + 0.1) - (-FRAC_PI_2 + 0.1)).abs() < 1e-12);
    }

    #[test]
    fn line_canonical_form_flips_rho() {
        let l = Line::new(40.0, PI + 0.1);
        assert!((l.theta - 0.1).abs() < 1e-12);
        assert!((l.rho + 40.0).abs() < 1e-12);

        let same = Line::new(-40.0, 0.1);
        assert!((same.rho - l.rho).abs() < 1e-12);
        assert!((same.theta - l.theta).abs() < 1e-12);
    }

    #[test]
    fn vertical_line_crossing() {
        let l = Line::new(40.0, 0.0);
        assert!((l.x_at_y(17.0).expect("not horizontal") - 40.0).abs() < 1e-12);
        assert!(Line::new(10.0, FRAC_PI_2).x_at_y(0.0).is_err());
        assert!(Line::new(10.0, FRAC_PI_2).is_near_horizontal());
    }

    #[test]
    fn rigid_inverse_undoes_apply() {
        let a = Rigid2::new(0.3, Vec2::new(1.0, -2.0));
        let p = Point2::new(3.0, 7.0);

        let back = a.inverse().apply(a.apply(p));
        assert!((back - p).norm() < 1e-12);
    }

    #[test]
    fn pixel_world_round_trip_stays_within_half_pixel() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let calib = CamCalib::new(
                rng.gen_range(0.001..0.05),
                rng.gen_range(-1.5..1.5),
                Point2::new(rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0)),
            )
            .expect("positive pxsize");
            let roi = Point2::new(rng.gen_range(0.0..200.0), rng.gen_range(0.0..200.0));
            let u = rng.gen_range(0.0..640.0);
            let v = rng.gen_range(0.0..480.0);

            let w = calib.pixel_to_world(u, v, roi);
            let p = calib.world_to_pixel(w, roi);
            assert!((p.x - u).abs() < 0.5 && (p.y - v).abs() < 0.5);
            assert!((p.x - u).abs() < 1e-6 && (p.y - v).abs() < 1e-6);
        }
    }

    #[test]
    fn pixel_to_world_matches_closed_form() {
        let calib = CamCalib::new(0.01, 0.2, Point2::new(1.0, 2.0)).expect("valid");
        let (u, v, x0, y0) = (12.0, 30.0, 5.0, 7.0);
        let w = calib.pixel_to_world(u, v, Point2::new(x0, y0));
        let (s, c) = 0.2f64.sin_cos();
        let ex = 0.01 * ((u + x0) * c - (v + y0) * s) + 1.0;
        let ey = 0.01 * ((u + x0) * s + (v + y0) * c) + 2.0;
        assert!((w.x - ex).abs() < 1e-12);
        assert!((w.y - ey).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_positive_pxsize() {
        assert!(CamCalib::new(0.0, 0.0, Point2::default()).is_err());
        assert!(CamCalib::new(-0.1, 0.0, Point2::default()).is_err());
    }

    #[test]
    fn beam_pose_is_consistent() {
        let calib = CamCalib::new(0.02, -0.4, Point2::new(-3.0, 1.0)).expect("valid");
        let pose = BeamPose::from_world(Point2::new(-2.5, 1.7), &calib);
        let again = BeamPose::from_pixel(pose.pixel, &calib);
        assert!((again.world - pose.world).norm() < 1e-9);
    }
}
