//! Camera pixel size and rotation from frames taken at known actuator moves.
//!
//! Shifts between consecutive frames are measured by FFT cross-correlation
//! and refined with a matrix-multiply DFT evaluated on a `1/upsample` grid
//! spanning 1.5 pixels around the integer peak.

use std::f64::consts::PI;
use std::sync::Arc;

use jt_core::{
    Actuator, CalibrationAxis, Error, Frame, ImageSource, ImageView, fold_half_pi,
};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Default refinement: 1/100 pixel.
pub const DEFAULT_UPSAMPLE: usize = 100;

/// Displacement of image content from a reference frame to a moving frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelShift {
    pub dx: f64,
    pub dy: f64,
}

impl PixelShift {
    /// Same shift with `dy >= 0`.
    pub fn canonical(self) -> Self {
        if self.dy < 0.0 {
            Self {
                dx: -self.dx,
                dy: -self.dy,
            }
        } else {
            self
        }
    }
}

/// Phase correlation for frames of one fixed size.
pub struct PhaseCorrelator {
    width: usize,
    height: usize,
    row_fwd: Arc<dyn Fft<f64>>,
    row_inv: Arc<dyn Fft<f64>>,
    col_fwd: Arc<dyn Fft<f64>>,
    col_inv: Arc<dyn Fft<f64>>,
    upsample: usize,
}

impl std::fmt::Debug for PhaseCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseCorrelator")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("upsample", &self.upsample)
            .finish()
    }
}

impl PhaseCorrelator {
    pub fn new(width: usize, height: usize, upsample: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        Self {
            width,
            height,
            row_fwd: planner.plan_fft_forward(width),
            row_inv: planner.plan_fft_inverse(width),
            col_fwd: planner.plan_fft_forward(height),
            col_inv: planner.plan_fft_inverse(height),
            upsample: upsample.max(1),
        }
    }

    fn to_spectrum<T: Copy + Into<f64>>(&self, img: &ImageView<'_, T>) -> Vec<Complex<f64>> {
        let (mean, _) = img.mean_std();
        let mut buf = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            buf.extend(img.row(y).iter().map(|&px| {
                let v: f64 = px.into();
                Complex::new(v - mean, 0.0)
            }));
        }
        self.fft2(&mut buf, false);
        buf
    }

    fn fft2(&self, buf: &mut Vec<Complex<f64>>, inverse: bool) {
        let (rows, cols) = if inverse {
            (&self.row_inv, &self.col_inv)
        } else {
            (&self.row_fwd, &self.col_fwd)
        };
        rows.process(buf);
        let mut t = transpose(buf, self.width, self.height);
        cols.process(&mut t);
        *buf = transpose(&t, self.height, self.width);
    }

    /// Shift of `moving` relative to `reference`.
    pub fn shift<T: Copy + Into<f64>>(
        &self,
        reference: &ImageView<'_, T>,
        moving: &ImageView<'_, T>,
    ) -> Result<PixelShift, Error> {
        for img in [reference, moving] {
            if img.width() != self.width || img.height() != self.height {
                return Err(Error::SizeMismatch {
                    expected: self.width * self.height,
                    actual: img.width() * img.height(),
                });
            }
        }

        let f_ref = self.to_spectrum(reference);
        let f_mov = self.to_spectrum(moving);
        // Unnormalized cross-power spectrum.
        let mut cross: Vec<Complex<f64>> =
            f_mov.iter().zip(&f_ref).map(|(m, r)| m * r.conj()).collect();
        let energy: f64 = cross.iter().map(|c| c.norm()).sum();

        let mut corr = cross.clone();
        self.fft2(&mut corr, true);
        let (mut best, mut best_v) = (0usize, f64::NEG_INFINITY);
        for (i, c) in corr.iter().enumerate() {
            if c.norm() > best_v {
                best_v = c.norm();
                best = i;
            }
        }
        if energy <= 1e-12 || best_v <= 1e-12 * energy {
            return Err(Error::DegenerateGeometry("frames have no common structure"));
        }

        let coarse = PixelShift {
            dx: wrap_index(best % self.width, self.width) as f64,
            dy: wrap_index(best / self.width, self.height) as f64,
        };
        if self.upsample == 1 {
            return Ok(coarse);
        }

        Ok(self.refine(&mut cross, coarse))
    }

    /// Evaluates the inverse DFT of `cross` on a grid of spacing `1/upsample`
    /// spanning 1.5 pixels around `coarse`.
    fn refine(&self, cross: &mut [Complex<f64>], coarse: PixelShift) -> PixelShift {
        let u = self.upsample as f64;
        let size = (1.5 * u).ceil() as usize;
        let center = (size / 2) as f64;
        let offsets: Vec<f64> = (0..size).map(|i| (i as f64 - center) / u).collect();

        let kernel = |n: usize, base: f64| -> Vec<Complex<f64>> {
            let mut k = Vec::with_capacity(n * size);
            for f in 0..n {
                let freq = wrap_index(f, n) as f64 / n as f64;
                for &o in &offsets {
                    k.push(Complex::from_polar(1.0, 2.0 * PI * freq * (base + o)));
                }
            }
            k
        };
        let kx = kernel(self.width, coarse.dx);
        let ky = kernel(self.height, coarse.dy);

        // Row pass: partial[ky][ix] = sum_kx cross[ky][kx] * kx[kx][ix].
        let mut partial = vec![Complex::new(0.0, 0.0); self.height * size];
        for y in 0..self.height {
            let row = &cross[y * self.width..(y + 1) * self.width];
            let dst = &mut partial[y * size..(y + 1) * size];
            for (x, &c) in row.iter().enumerate() {
                if c.norm_sqr() == 0.0 {
                    continue;
                }
                let kr = &kx[x * size..(x + 1) * size];
                for (d, &k) in dst.iter_mut().zip(kr) {
                    *d += c * k;
                }
            }
        }

        let mut fine = vec![Complex::new(0.0, 0.0); size * size];
        for y in 0..self.height {
            let kr = &ky[y * size..(y + 1) * size];
            let src = &partial[y * size..(y + 1) * size];
            for (iy, &k) in kr.iter().enumerate() {
                let dst = &mut fine[iy * size..(iy + 1) * size];
                for (d, &p) in dst.iter_mut().zip(src) {
                    *d += k * p;
                }
            }
        }

        let mut best = 0usize;
        for (i, c) in fine.iter().enumerate() {
            if c.norm_sqr() > fine[best].norm_sqr() {
                best = i;
            }
        }

        PixelShift {
            dx: coarse.dx + offsets[best % size],
            dy: coarse.dy + offsets[best / size],
        }
    }
}

fn transpose(src: &[Complex<f64>], width: usize, height: usize) -> Vec<Complex<f64>> {
    let mut out = vec![Complex::new(0.0, 0.0); src.len()];
    for y in 0..height {
        for x in 0..width {
            out[x * height + y] = src[y * width + x];
        }
    }
    out
}

/// Maps FFT index `i` of an `n`-point transform to a signed offset.
#[inline]
fn wrap_index(i: usize, n: usize) -> isize {
    if i > n / 2 {
        i as isize - n as isize
    } else {
        i as isize
    }
}

/// Frame captured at a known actuator position, in mm.
#[derive(Debug, Clone)]
pub struct CalibrationFrame {
    pub frame: Frame,
    pub position: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CamCalibration {
    pub axis: CalibrationAxis,
    /// Millimetres per pixel.
    pub pxsize: f64,
    /// Camera rotation in `(-pi/2, pi/2]`.
    pub roll: f64,
    /// Canonical shift of each adjacent frame pair.
    pub shifts: Vec<PixelShift>,
}

/// Estimates pixel size and camera rotation from at least two frames.
pub fn calibrate_camera(
    frames: &[CalibrationFrame],
    axis: CalibrationAxis,
    upsample: usize,
) -> Result<CamCalibration, Error> {
    if frames.len() < 2 {
        return Err(Error::InsufficientData {
            axis: axis.position_label(),
            admitted: frames.len(),
            required: 2,
        });
    }
    if frames.len() == 2 {
        debug!("camera calibration from a single frame pair");
    }

    let (w, h) = (frames[0].frame.width(), frames[0].frame.height());
    let pc = PhaseCorrelator::new(w, h, upsample);

    let (mut sx, mut sy, mut travel) = (0.0f64, 0.0f64, 0.0f64);
    let mut shifts = Vec::with_capacity(frames.len() - 1);
    for pair in frames.windows(2) {
        let s = pc
            .shift(&pair[0].frame.as_view(), &pair[1].frame.as_view())?
            .canonical();
        debug!(dx = s.dx, dy = s.dy, "frame pair shift");
        sx += s.dx;
        sy += s.dy;
        travel += (pair[1].position - pair[0].position).abs();
        shifts.push(s);
    }

    let pixels = sx.hypot(sy);
    if pixels <= f64::EPSILON || travel <= 0.0 {
        return Err(Error::DegenerateGeometry("no motion between calibration frames"));
    }

    let out = CamCalibration {
        axis,
        pxsize: travel / pixels,
        roll: fold_half_pi(-sy.atan2(sx)),
        shifts,
    };
    info!(
        axis = axis.position_label(),
        pxsize = out.pxsize,
        angle = out.roll,
        "camera calibrated"
    );
    Ok(out)
}

/// Moves through `positions`, grabbing a full frame at each, then returns the
/// actuator to where it started.
pub fn acquire_frames<A, S>(
    actuator: &mut A,
    camera: &mut S,
    positions: &[f64],
) -> Result<Vec<CalibrationFrame>, Error>
where
    A: Actuator + ?Sized,
    S: ImageSource + ?Sized,
{
    for &p in positions {
        actuator.check_target(p)?;
    }
    let start = actuator.position()?;

    let mut out = Vec::with_capacity(positions.len());
    let mut run = || -> Result<(), Error> {
        for &p in positions {
            actuator.move_to(p, true)?;
            out.push(CalibrationFrame {
                frame: camera.read_frame()?,
                position: p,
            });
        }
        Ok(())
    };
    let result = run();

    let restored = actuator.move_to(start, true);
    if let Err(err) = &restored {
        warn!(%err, start, "could not restore actuator after calibration frames");
    }
    result?;
    restored?;
    Ok(out)
}
