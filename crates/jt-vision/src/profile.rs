//! Cross-section intensity profiles and full width at half maximum.
//!
//! Kernel conventions:
//! - `radius = ceil(3*sigma)`, minimum 1.
//! - weights are normalized so `sum(g) ~= 1`.
//! - borders are clamped.

use jt_core::{BorderMode, Error, ImageView, Line, Point2, sample_bilinear};

#[derive(Debug, Clone)]
pub struct GaussianKernel1D {
    pub sigma: f64,
    pub radius: usize,
    pub g: Vec<f64>,
}

impl GaussianKernel1D {
    pub fn new(sigma: f64) -> Self {
        assert!(
            sigma.is_finite() && sigma > 0.0,
            "sigma must be > 0 and finite"
        );

        let radius = ((3.0 * sigma).ceil() as usize).max(1);
        let sigma2 = sigma * sigma;
        let mut g: Vec<f64> = (0..2 * radius + 1)
            .map(|i| {
                let x = i as f64 - radius as f64;
                (-(x * x) / (2.0 * sigma2)).exp()
            })
            .collect();

        let sum: f64 = g.iter().sum();
        for gi in &mut g {
            *gi /= sum;
        }

        Self { sigma, radius, g }
    }

    pub fn smooth(&self, signal: &[f64], out: &mut Vec<f64>) {
        out.clear();
        let n = signal.len();
        if n == 0 {
            return;
        }

        for i in 0..n {
            let mut acc = 0.0;
            for (k, &kv) in self.g.iter().enumerate() {
                let idx = clamp_index(i as isize + k as isize - self.radius as isize, n);
                acc += signal[idx] * kv;
            }
            out.push(acc);
        }
    }
}

#[inline]
fn clamp_index(i: isize, len: usize) -> usize {
    if i < 0 { 0 } else { (i as usize).min(len - 1) }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileConfig {
    /// Half length of the cross-section, in pixels.
    pub half_length: f64,
    /// Spacing between profile samples, in pixels.
    pub step: f64,
    /// Number of rows along the line that are averaged.
    pub rows: usize,
    /// Smoothing applied before the half-maximum search, in samples. Zero disables it.
    pub smooth_sigma: f64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            half_length: 20.0,
            step: 0.25,
            rows: 5,
            smooth_sigma: 1.0,
        }
    }
}

/// Averaged intensity profile taken perpendicular to `line`.
///
/// Sample `i` sits at signed offset `-half_length + i*step` along the line
/// normal. Rows are spread over the middle 80% of the view height.
pub fn cross_section<T: Copy + Into<f64>>(
    img: &ImageView<'_, T>,
    line: &Line,
    cfg: &ProfileConfig,
) -> Result<Vec<f64>, Error> {
    if img.height() < 2 || cfg.rows == 0 || cfg.step <= 0.0 {
        return Err(Error::DegenerateGeometry("ROI collapsed"));
    }

    let n = (2.0 * cfg.half_length / cfg.step).round() as usize + 1;
    let normal = line.normal();
    let h = img.height() as f64;
    let mut acc = vec![0.0f64; n];

    for r in 0..cfg.rows {
        let frac = if cfg.rows == 1 {
            0.5
        } else {
            0.1 + 0.8 * r as f64 / (cfg.rows - 1) as f64
        };
        let y = frac * (h - 1.0);
        let center = Point2::new(line.x_at_y(y)?, y);

        for (i, dst) in acc.iter_mut().enumerate() {
            let t = -cfg.half_length + i as f64 * cfg.step;
            let p = center + normal * t;
            *dst += sample_bilinear(img, p.x, p.y, BorderMode::Clamp).unwrap_or(0.0);
        }
    }

    let inv = 1.0 / cfg.rows as f64;
    for v in &mut acc {
        *v *= inv;
    }
    Ok(acc)
}

/// Full width at half maximum of `profile`, in samples.
///
/// The baseline is the profile minimum. Crossings are located by linear
/// interpolation walking outward from the maximum.
pub fn fwhm(profile: &[f64]) -> Option<f64> {
    if profile.len() < 3 {
        return None;
    }

    let (ipeak, &peak) = profile
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    let base = profile.iter().copied().fold(f64::INFINITY, f64::min);
    if peak - base <= f64::EPSILON {
        return None;
    }
    let half = base + 0.5 * (peak - base);

    let mut left = None;
    for i in (0..ipeak).rev() {
        if profile[i] < half {
            let (a, b) = (profile[i], profile[i + 1]);
            left = Some(i as f64 + (half - a) / (b - a));
            break;
        }
    }

    let mut right = None;
    for i in ipeak + 1..profile.len() {
        if profile[i] < half {
            let (a, b) = (profile[i - 1], profile[i]);
            right = Some((i - 1) as f64 + (a - half) / (a - b));
            break;
        }
    }

    Some(right? - left?)
}

/// Jet width in pixels measured across `line`.
pub fn jet_width<T: Copy + Into<f64>>(
    img: &ImageView<'_, T>,
    line: &Line,
    cfg: &ProfileConfig,
) -> Result<f64, Error> {
    let raw = cross_section(img, line, cfg)?;
    let profile = if cfg.smooth_sigma > 0.0 {
        let mut out = Vec::with_capacity(raw.len());
        GaussianKernel1D::new(cfg.smooth_sigma).smooth(&raw, &mut out);
        out
    } else {
        raw
    };

    let samples = fwhm(&profile).ok_or(Error::DegenerateGeometry(
        "jet profile never falls to half maximum",
    ))?;
    Ok(samples * cfg.step)
}

#[cfg(test)]
mod tests {
    use jt_core::{Image, Line};

    use super::{GaussianKernel1D, ProfileConfig, fwhm, jet_width};

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let k = GaussianKernel1D::new(1.2);
        let sum: f64 = k.g.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        for i in 1..=k.radius {
            assert!((k.g[k.radius + i] - k.g[k.radius - i]).abs() < 1e-15);
        }
    }

    #[test]
    fn smoothing_preserves_constant_signal() {
        let k = GaussianKernel1D::new(2.0);
        let mut out = Vec::new();
        k.smooth(&[3.0; 16], &mut out);
        assert!(out.iter().all(|v| (v - 3.0).abs() < 1e-12));
    }

    #[test]
    fn fwhm_of_triangle() {
        // Peak 10 at index 10, base 0, slopes of 1 per sample -> FWHM 10.
        let profile: Vec<f64> = (0..21).map(|i| 10.0 - (i as f64 - 10.0).abs()).collect();
        let w = fwhm(&profile).expect("well formed peak");
        assert!((w - 10.0).abs() < 1e-9);
    }

    #[test]
    fn fwhm_rejects_flat_and_truncated() {
        assert!(fwhm(&[1.0; 8]).is_none());
        assert!(fwhm(&[0.0, 1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn width_of_vertical_stripe() {
        let (w, h) = (80usize, 60usize);
        let mut data = vec![10u16; w * h];
        for y in 0..h {
            for x in 38..=43 {
                data[y * w + x] = 210;
            }
        }
        let img = Image::from_vec(w, h, data).expect("valid image");
        let cfg = ProfileConfig {
            smooth_sigma: 0.0,
            ..ProfileConfig::default()
        };

        let width = jet_width(&img.as_view(), &Line::new(40.5, 0.0), &cfg).expect("stripe");
        assert!((width - 6.0).abs() < 0.6, "width {width}");
    }
}
