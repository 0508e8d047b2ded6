use jt_core::Error;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Location, spread and acceptance band of one measured quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub mean: f64,
    pub stdev: f64,
    pub low: f64,
    pub high: f64,
}

impl Stats {
    /// Band `mean +/- sigma * stdev`.
    pub fn with_band(mean: f64, stdev: f64, sigma: f64) -> Self {
        Self {
            mean,
            stdev,
            low: mean - sigma * stdev,
            high: mean + sigma * stdev,
        }
    }

    pub fn from_samples(samples: &[f64], sigma: f64) -> Option<Self> {
        let (mean, stdev) = mean_std(samples)?;
        Some(Self::with_band(mean, stdev, sigma))
    }

    /// A band that accepts every value.
    pub fn unbounded(mean: f64, stdev: f64) -> Self {
        Self {
            mean,
            stdev,
            low: f64::NEG_INFINITY,
            high: f64::INFINITY,
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.low.is_finite()
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.low && v <= self.high
    }
}

/// Mean and population standard deviation.
pub fn mean_std(samples: &[f64]) -> Option<(f64, f64)> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let var = samples.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    Some((mean, var.sqrt()))
}

pub fn median(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some(0.5 * (sorted[mid - 1] + sorted[mid]))
    } else {
        Some(sorted[mid])
    }
}

/// Half-width, in standard deviations, of a central band holding `percent`
/// of a normal distribution. 70% maps to about 1.04.
pub fn acceptance_sigma(percent: f64) -> Result<f64, Error> {
    if !(percent > 0.0 && percent < 100.0) {
        return Err(Error::Config(format!(
            "acceptance percent must be in (0, 100), got {percent}"
        )));
    }
    let normal = Normal::new(0.0, 1.0).map_err(|e| Error::Config(e.to_string()))?;
    Ok(normal.inverse_cdf(0.5 + percent / 200.0))
}

#[cfg(test)]
mod tests {
    use super::{Stats, acceptance_sigma, mean_std, median};

    #[test]
    fn population_moments() {
        let (m, s) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).expect("non-empty");
        assert!((m - 5.0).abs() < 1e-12);
        assert!((s - 2.0).abs() < 1e-12);
        assert!(mean_std(&[]).is_none());
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn band_edges_are_inclusive() {
        let s = Stats::with_band(1.0, 0.1, 2.0);
        assert!(s.contains(0.8 + 1e-12));
        assert!(!s.contains(0.79));
        assert!(Stats::unbounded(1.0, 0.1).contains(-1e9));
    }

    #[test]
    fn gaussian_quantiles() {
        let s70 = acceptance_sigma(70.0).expect("valid percent");
        assert!((s70 - 1.0364).abs() < 1e-3);
        let s95 = acceptance_sigma(95.0).expect("valid percent");
        assert!((s95 - 1.96).abs() < 1e-3);
        assert!(acceptance_sigma(100.0).is_err());
    }
}
