use thiserror::Error;

/// Coarse classification used by the controller's recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Vision,
    Device,
    Search,
    Calibration,
    Config,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no jet found after {attempts} line-detection attempts")]
    NoJet { attempts: usize },

    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(&'static str),

    #[error("insufficient calibration data on {axis}: {admitted} admitted, {required} required")]
    InsufficientData {
        axis: &'static str,
        admitted: usize,
        required: usize,
    },

    #[error("target {target:.4} mm outside limits [{low:.4}, {high:.4}]")]
    OutOfRange { target: f64, low: f64, high: f64 },

    #[error("actuator did not reach {target:.4} mm within {timeout_s:.1} s")]
    Timeout { target: f64, timeout_s: f64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("search found no improvement: best {best:.5} vs initial {initial:.5}")]
    NoImprovement { best: f64, initial: f64 },

    #[error("no frame available")]
    NoFrame,

    #[error("shot source starved for {waited_s:.1} s")]
    Starved { waited_s: f64 },

    #[error("device error: {0}")]
    Device(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("out of bounds")]
    OutOfBounds,

    #[error("calibration file {path}: {reason}")]
    Format { path: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoJet { .. }
            | Self::DegenerateGeometry(_)
            | Self::NoFrame
            | Self::SizeMismatch { .. }
            | Self::OutOfBounds => ErrorKind::Vision,
            Self::OutOfRange { .. } | Self::Timeout { .. } | Self::Device(_) | Self::Io(_) => {
                ErrorKind::Device
            }
            Self::Cancelled | Self::NoImprovement { .. } => ErrorKind::Search,
            Self::InsufficientData { .. } | Self::Starved { .. } | Self::Format { .. } => {
                ErrorKind::Calibration
            }
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
