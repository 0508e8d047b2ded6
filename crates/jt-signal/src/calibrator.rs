use std::thread;
use std::time::{Duration, Instant};

use jt_core::{CancelToken, Error, Shot, ShotRead, SignalSource};
use tracing::{debug, info, info_span, warn};

use crate::classifier::CalibrationResult;
use crate::stats::{Stats, acceptance_sigma, mean_std, median};

#[derive(Debug, Clone, PartialEq)]
pub struct CalibratorConfig {
    /// Shots collected in each pass.
    pub num_samples: usize,
    /// Minimum admitted shots per axis in pass two.
    pub min_admitted: usize,
    /// Central fraction of a normal distribution kept by the acceptance band.
    pub acceptance_percent: f64,
    /// Pass-one outlier cut, in standard deviations.
    pub outlier_sigmas: f64,
    /// Longest wait without a shot before giving up.
    pub starvation_timeout: Duration,
    pub poll_interval: Duration,
    pub peak_bin: u32,
    pub delta_bin: u32,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        Self {
            num_samples: 1000,
            min_admitted: 30,
            acceptance_percent: 70.0,
            outlier_sigmas: 2.0,
            starvation_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(2),
            peak_bin: 0,
            delta_bin: 0,
        }
    }
}

/// Two-pass operating-band estimation.
#[derive(Debug, Clone)]
pub struct Calibrator {
    cfg: CalibratorConfig,
}

impl Calibrator {
    pub fn new(cfg: CalibratorConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &CalibratorConfig {
        &self.cfg
    }

    /// Collects both passes from `source` and builds the result.
    pub fn run<S: SignalSource + ?Sized>(
        &self,
        source: &mut S,
        cancel: &CancelToken,
    ) -> Result<CalibrationResult, Error> {
        let _span = info_span!("calibrate", samples = self.cfg.num_samples).entered();
        info!("calibration pass 1");
        let pass1 = self.collect(source, cancel)?;
        info!("calibration pass 2");
        let pass2 = self.collect(source, cancel)?;
        self.from_passes(&pass1, &pass2)
    }

    fn collect<S: SignalSource + ?Sized>(
        &self,
        source: &mut S,
        cancel: &CancelToken,
    ) -> Result<Vec<Shot>, Error> {
        let mut shots = Vec::with_capacity(self.cfg.num_samples);
        let mut last_seen = Instant::now();
        while shots.len() < self.cfg.num_samples {
            cancel.check()?;
            match source.read_shot()? {
                ShotRead::Shot(shot) => {
                    shots.push(shot);
                    last_seen = Instant::now();
                }
                ShotRead::Waiting => {
                    let waited = last_seen.elapsed();
                    if waited >= self.cfg.starvation_timeout {
                        warn!(collected = shots.len(), "shot source starved during calibration");
                        return Err(Error::Starved {
                            waited_s: waited.as_secs_f64(),
                        });
                    }
                    thread::sleep(self.cfg.poll_interval);
                }
            }
        }
        Ok(shots)
    }

    /// Pass one sets per-axis outlier cuts; pass two is filtered by them
    /// independently on each axis and yields the final statistics.
    pub fn from_passes(&self, pass1: &[Shot], pass2: &[Shot]) -> Result<CalibrationResult, Error> {
        let sigma = acceptance_sigma(self.cfg.acceptance_percent)?;
        let k = self.cfg.outlier_sigmas;

        let axes: [(&'static str, fn(&Shot) -> f64); 3] = [
            ("i0", |s| s.i0),
            ("diff", |s| s.diff),
            ("ratio", |s| s.ratio()),
        ];

        let finite = |s: &&Shot| s.i0.is_finite() && s.diff.is_finite();
        let pass1: Vec<Shot> = pass1.iter().filter(finite).copied().collect();
        let pass2: Vec<Shot> = pass2.iter().filter(finite).copied().collect();

        let mut admitted: Vec<Vec<f64>> = Vec::with_capacity(3);
        for (name, get) in axes {
            let first: Vec<f64> = pass1.iter().map(get).collect();
            let (m1, s1) = mean_std(&first).ok_or(Error::InsufficientData {
                axis: name,
                admitted: 0,
                required: self.cfg.min_admitted,
            })?;

            let kept: Vec<f64> = pass2
                .iter()
                .map(get)
                .filter(|v| (v - m1).abs() <= k * s1)
                .collect();
            debug!(axis = name, pass1_mean = m1, pass1_std = s1, admitted = kept.len());
            if kept.len() < self.cfg.min_admitted {
                return Err(Error::InsufficientData {
                    axis: name,
                    admitted: kept.len(),
                    required: self.cfg.min_admitted,
                });
            }
            admitted.push(kept);
        }

        let band = |v: &[f64]| -> Result<Stats, Error> {
            Stats::from_samples(v, sigma).ok_or(Error::InsufficientData {
                axis: "pass 2",
                admitted: 0,
                required: self.cfg.min_admitted,
            })
        };
        let result = CalibrationResult {
            i0: band(&admitted[0])?,
            diff: band(&admitted[1])?,
            ratio: band(&admitted[2])?,
            ratio_median: median(&admitted[2]).unwrap_or_default(),
            sigma,
            peak_bin: self.cfg.peak_bin,
            delta_bin: self.cfg.delta_bin,
        };
        info!(
            i0_mean = result.i0.mean,
            diff_mean = result.diff.mean,
            ratio_mean = result.ratio.mean,
            ratio_low = result.ratio.low,
            "calibration complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jt_core::{CancelToken, Error, Result, Shot, ShotRead, SignalSource};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::{Calibrator, CalibratorConfig};

    struct Noisy {
        rng: StdRng,
        t: f64,
    }

    impl SignalSource for Noisy {
        fn read_shot(&mut self) -> Result<ShotRead> {
            self.t += 0.02;
            let i0 = 1.0 + self.rng.gen_range(-0.1..0.1);
            let diff = i0 * (0.5 + self.rng.gen_range(-0.02..0.02));
            Ok(ShotRead::Shot(Shot::new(self.t, i0, diff)))
        }
    }

    struct Silent;

    impl SignalSource for Silent {
        fn read_shot(&mut self) -> Result<ShotRead> {
            Ok(ShotRead::Waiting)
        }
    }

    #[test]
    fn bands_from_noisy_source() {
        let cal = Calibrator::new(CalibratorConfig {
            num_samples: 400,
            ..CalibratorConfig::default()
        });
        let mut src = Noisy {
            rng: StdRng::seed_from_u64(11),
            t: 0.0,
        };

        let res = cal.run(&mut src, &CancelToken::new()).expect("calibration");
        assert!((res.i0.mean - 1.0).abs() < 0.02);
        assert!((res.ratio.mean - 0.5).abs() < 0.005);
        assert!((res.ratio_median - 0.5).abs() < 0.005);
        assert!(res.ratio.low < res.ratio.mean && res.ratio.high > res.ratio.mean);
        assert!((res.sigma - 1.036).abs() < 1e-2);
    }

    #[test]
    fn outliers_are_rejected_per_axis() {
        let cal = Calibrator::new(CalibratorConfig {
            min_admitted: 5,
            ..CalibratorConfig::default()
        });
        let base: Vec<Shot> = (0..40)
            .map(|k| {
                let e = if k % 2 == 0 { 0.01 } else { -0.01 };
                Shot::new(k as f64, 1.0 + e, 0.5 + e)
            })
            .collect();
        let mut pass2 = base.clone();
        pass2.push(Shot::new(99.0, 10.0, 0.5));

        let res = cal.from_passes(&base, &pass2).expect("calibration");
        assert!((res.i0.mean - 1.0).abs() < 1e-9);
    }

    #[test]
    fn non_finite_shots_are_ignored() {
        let cal = Calibrator::new(CalibratorConfig {
            min_admitted: 5,
            ..CalibratorConfig::default()
        });
        let mut shots: Vec<Shot> = (0..40)
            .map(|k| {
                let e = if k % 2 == 0 { 0.01 } else { -0.01 };
                Shot::new(k as f64, 1.0 + e, 0.5 + e)
            })
            .collect();
        shots.push(Shot::new(40.0, f64::NAN, 0.5));
        shots.push(Shot::new(41.0, 1.0, f64::NAN));
        shots.push(Shot::new(42.0, f64::INFINITY, 0.5));

        let res = cal.from_passes(&shots, &shots).expect("calibration");
        for band in [res.i0, res.diff, res.ratio] {
            assert!(band.mean.is_finite() && band.low.is_finite() && band.high.is_finite());
        }
        assert!((res.i0.mean - 1.0).abs() < 1e-9);
    }

    #[test]
    fn too_few_admitted() {
        let cal = Calibrator::new(CalibratorConfig::default());
        let shots: Vec<Shot> = (0..10).map(|k| Shot::new(k as f64, 1.0, 0.5)).collect();
        let err = cal.from_passes(&shots, &shots).expect_err("only ten shots");
        assert!(matches!(
            err,
            Error::InsufficientData {
                axis: "i0",
                admitted: 10,
                required: 30
            }
        ));
    }

    #[test]
    fn starvation_times_out() {
        let cal = Calibrator::new(CalibratorConfig {
            starvation_timeout: Duration::from_millis(30),
            poll_interval: Duration::from_millis(1),
            ..CalibratorConfig::default()
        });
        let err = cal.run(&mut Silent, &CancelToken::new()).expect_err("no shots");
        assert!(matches!(err, Error::Starved { .. }));
    }

    #[test]
    fn cancel_stops_collection() {
        let cal = Calibrator::new(CalibratorConfig::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut src = Noisy {
            rng: StdRng::seed_from_u64(1),
            t: 0.0,
        };
        let err = cal.run(&mut src, &cancel).expect_err("cancelled");
        assert!(matches!(err, Error::Cancelled));
    }
}
