use std::f64::consts::PI;

use jt_core::{Error, ImageView, Line};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct LineDetectConfig {
    /// Binarization attempts before giving up.
    pub retries: usize,
    /// Factor applied to the noise scale after each failed attempt.
    pub scale_decay: f64,
    /// Noise multiple added to the background mean for the first attempt.
    pub noise_sigmas: f64,
    /// Accumulator distance resolution, in pixels.
    pub rho_res: f64,
    /// Accumulator angle resolution, in degrees.
    pub theta_res_deg: f64,
    /// Minimum votes for a line to be accepted.
    pub threshold: u32,
}

impl Default for LineDetectConfig {
    fn default() -> Self {
        Self {
            retries: 30,
            scale_decay: 0.9,
            noise_sigmas: 2.0,
            rho_res: 1.0,
            theta_res_deg: 0.25,
            threshold: 30,
        }
    }
}

/// Background level estimate used for binarization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Background {
    pub mean: f64,
    pub std: f64,
}

impl Background {
    pub fn new(mean: f64, std: f64) -> Self {
        Self {
            mean: mean.max(0.0),
            std: std.max(0.0),
        }
    }

    /// Mean and standard deviation of the whole view.
    pub fn estimate<T: Copy + Into<f64>>(img: &ImageView<'_, T>) -> Self {
        let (mean, std) = img.mean_std();
        Self::new(mean, std)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineDetection {
    pub line: Line,
    pub votes: u32,
    /// 1-based index of the successful attempt.
    pub attempts: usize,
    /// Noise scale of the successful attempt.
    pub scale: f64,
}

/// Standard Hough transform over a binarized frame.
///
/// Buffers are kept between calls so that repeated detections on frames of
/// the same size do not allocate.
#[derive(Debug, Default)]
pub struct LineDetector {
    cfg: LineDetectConfig,
    cos_t: Vec<f64>,
    sin_t: Vec<f64>,
    points: Vec<(f64, f64)>,
    acc: Vec<u32>,
}

impl LineDetector {
    pub fn new(cfg: LineDetectConfig) -> Self {
        let mut det = Self {
            cfg,
            ..Self::default()
        };
        det.build_tables();
        det
    }

    pub fn config(&self) -> &LineDetectConfig {
        &self.cfg
    }

    fn build_tables(&mut self) {
        let n_theta = ((180.0 / self.cfg.theta_res_deg).round() as usize).max(1);
        let step = PI / n_theta as f64;
        self.cos_t = (0..n_theta).map(|k| (k as f64 * step).cos()).collect();
        self.sin_t = (0..n_theta).map(|k| (k as f64 * step).sin()).collect();
    }

    /// Finds the dominant straight line, or fails with [`Error::NoJet`].
    pub fn detect<T: Copy + Into<f64>>(
        &mut self,
        img: &ImageView<'_, T>,
        bg: Background,
    ) -> Result<LineDetection, Error> {
        if self.cos_t.is_empty() {
            self.build_tables();
        }
        if img.width() < 2 || img.height() < 2 {
            return Err(Error::DegenerateGeometry("ROI collapsed"));
        }

        let (_, frame_std) = img.mean_std();
        if frame_std <= f64::EPSILON {
            return Err(Error::NoJet { attempts: 0 });
        }

        let mut scale = 1.0;
        for attempt in 1..=self.cfg.retries {
            let level = bg.mean + self.cfg.noise_sigmas * bg.std * scale;
            if level <= 0.0 {
                break;
            }

            self.binarize(img, level);
            if !self.points.is_empty()
                && let Some((line, votes)) = self.strongest_line(img.width(), img.height())
            {
                debug!(attempt, scale, votes, rho = line.rho, theta = line.theta, "jet line found");
                return Ok(LineDetection {
                    line,
                    votes,
                    attempts: attempt,
                    scale,
                });
            }
            scale *= self.cfg.scale_decay;
        }

        Err(Error::NoJet {
            attempts: self.cfg.retries,
        })
    }

    /// Keeps pixels whose integer quotient by `level` is at least one.
    fn binarize<T: Copy + Into<f64>>(&mut self, img: &ImageView<'_, T>, level: f64) {
        self.points.clear();
        for y in 0..img.height() {
            for (x, &px) in img.row(y).iter().enumerate() {
                let v: f64 = px.into();
                if (v / level).floor() >= 1.0 {
                    self.points.push((x as f64, y as f64));
                }
            }
        }
    }

    fn strongest_line(&mut self, width: usize, height: usize) -> Option<(Line, u32)> {
        let n_theta = self.cos_t.len();
        let d = ((width as f64).hypot(height as f64) / self.cfg.rho_res).ceil() as isize;
        let n_rho = (2 * d + 1) as usize;

        self.acc.clear();
        self.acc.resize(n_theta * n_rho, 0);

        for &(x, y) in &self.points {
            for k in 0..n_theta {
                let rho = x * self.cos_t[k] + y * self.sin_t[k];
                let r = (rho / self.cfg.rho_res).round() as isize + d;
                self.acc[k * n_rho + r as usize] += 1;
            }
        }

        let votes = self.acc.iter().copied().max().unwrap_or(0);
        if votes < self.cfg.threshold {
            return None;
        }

        // A wide line ties on peak votes over a range of angles. Among the
        // near-ties, the true angle concentrates its votes in the fewest bins.
        let mut k = 0usize;
        let mut best_score = 0u64;
        for (kk, row) in self.acc.chunks_exact(n_rho).enumerate() {
            let row_max = row.iter().copied().max().unwrap_or(0);
            if (row_max as u64) * 10 < (votes as u64) * 9 {
                continue;
            }
            let score: u64 = row.iter().map(|&v| (v as u64) * (v as u64)).sum();
            if score > best_score {
                best_score = score;
                k = kk;
            }
        }

        let row = &self.acc[k * n_rho..(k + 1) * n_rho];
        let mut r_peak = 0usize;
        for (r, &v) in row.iter().enumerate() {
            if v > row[r_peak] {
                r_peak = r;
            }
        }
        let votes = row[r_peak];

        // A line several pixels wide fills a run of adjacent rho bins.
        let half = votes.div_ceil(2);
        let mut lo = r_peak;
        while lo > 0 && row[lo - 1] >= half {
            lo -= 1;
        }
        let mut hi = r_peak;
        while hi + 1 < n_rho && row[hi + 1] >= half {
            hi += 1;
        }

        let (mut wsum, mut rsum) = (0.0f64, 0.0f64);
        for (r, &v) in row.iter().enumerate().take(hi + 1).skip(lo) {
            wsum += v as f64;
            rsum += v as f64 * r as f64;
        }
        let rho = (rsum / wsum - d as f64) * self.cfg.rho_res;
        let theta = k as f64 * PI / n_theta as f64;

        Some((Line::new(rho, theta), votes))
    }
}
