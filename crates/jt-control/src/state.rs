use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControllerState {
    #[default]
    Idle,
    Calibrating,
    Monitoring,
    Searching,
    Tracking,
    /// Terminal until an explicit reset.
    Faulted,
}

/// Display color of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor {
    Gray,
    Blue,
    Green,
    Orange,
    Red,
}

impl ControllerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Calibrating => "CALIBRATING",
            Self::Monitoring => "MONITORING",
            Self::Searching => "SEARCHING",
            Self::Tracking => "TRACKING",
            Self::Faulted => "FAULTED",
        }
    }

    pub fn color(self) -> StatusColor {
        match self {
            Self::Idle => StatusColor::Gray,
            Self::Calibrating => StatusColor::Blue,
            Self::Monitoring | Self::Tracking => StatusColor::Green,
            Self::Searching => StatusColor::Orange,
            Self::Faulted => StatusColor::Red,
        }
    }

    /// States in which shots are classified.
    pub fn is_watching(self) -> bool {
        matches!(self, Self::Monitoring | Self::Tracking)
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
