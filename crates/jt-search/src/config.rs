use jt_core::Error;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "linear")]
    Linear,
    #[default]
    #[serde(rename = "ternary")]
    Ternary,
    #[serde(rename = "linear+ternary")]
    LinearThenTernary,
    #[serde(rename = "dynamic_linear")]
    DynamicLinear,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Ternary => "ternary",
            Self::LinearThenTernary => "linear+ternary",
            Self::DynamicLinear => "dynamic_linear",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Self::Linear),
            "ternary" => Ok(Self::Ternary),
            "linear+ternary" => Ok(Self::LinearThenTernary),
            "dynamic_linear" => Ok(Self::DynamicLinear),
            other => Err(Error::Config(format!("unknown search algorithm '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub algorithm: Algorithm,
    /// Bracket, in mm. Must lie inside the actuator limits.
    pub low: f64,
    pub high: f64,
    pub step_size: f64,
    /// Linear scan step reduction after a sweep without improvement.
    pub step_decrement: f64,
    /// Smallest step a linear scan may use.
    pub step_floor: f64,
    /// Ternary search stops once the bracket is this narrow.
    pub tolerance: f64,
    /// Bracket fraction trimmed from each end before the ternary retry.
    pub ternary_margin: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Ternary,
            low: -0.1,
            high: 0.1,
            step_size: 0.02,
            step_decrement: 0.02,
            step_floor: 0.02,
            tolerance: 0.005,
            ternary_margin: 0.1,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.low.is_finite() && self.high.is_finite() && self.low < self.high) {
            return Err(Error::Config(format!(
                "search bracket [{}, {}] is empty",
                self.low, self.high
            )));
        }
        for (name, v) in [
            ("step_size", self.step_size),
            ("step_floor", self.step_floor),
            ("tolerance", self.tolerance),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(Error::Config(format!("{name} must be > 0, got {v}")));
            }
        }
        if !(self.step_decrement.is_finite() && self.step_decrement > 0.0) {
            return Err(Error::Config(format!(
                "step_decrement must be > 0, got {}",
                self.step_decrement
            )));
        }
        if !(0.0..0.5).contains(&self.ternary_margin) {
            return Err(Error::Config(format!(
                "ternary_margin must be in [0, 0.5), got {}",
                self.ternary_margin
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Algorithm, SearchConfig};

    #[test]
    fn algorithm_names_round_trip() {
        for a in [
            Algorithm::Linear,
            Algorithm::Ternary,
            Algorithm::LinearThenTernary,
            Algorithm::DynamicLinear,
        ] {
            assert_eq!(a.as_str().parse::<Algorithm>().expect("known name"), a);
        }
        assert!("golden".parse::<Algorithm>().is_err());
    }

    #[test]
    fn validation() {
        assert!(SearchConfig::default().validate().is_ok());
        let inverted = SearchConfig {
            low: 0.2,
            high: 0.1,
            ..SearchConfig::default()
        };
        assert!(inverted.validate().is_err());
        let zero_step = SearchConfig {
            step_size: 0.0,
            ..SearchConfig::default()
        };
        assert!(zero_step.validate().is_err());
    }
}
