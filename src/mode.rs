use crate::error::UvcError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Live streaming modes offered by the THETA UVC interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThetaMode {
    /// 3840x1920 H.264 at 29.97 fps
    #[serde(rename = "uhd_2997", alias = "uhd", alias = "4k")]
    Uhd2997 = 0,
    /// 1920x960 H.264 at 29.97 fps
    #[serde(rename = "fhd_2997", alias = "fhd", alias = "2k")]
    Fhd2997 = 1,
}

/// Resolution and rate requested from the device for a mode.
///
/// `fps` is the integer rate libuvc matches against `10_000_000 / interval`,
/// so 29.97 fps (interval 333667) is requested as 29.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

const MODE_TABLE: [ModeSpec; ThetaMode::COUNT] = [
    ModeSpec {
        width: 3840,
        height: 1920,
        fps: 29,
    },
    ModeSpec {
        width: 1920,
        height: 960,
        fps: 29,
    },
];

impl ThetaMode {
    /// Number of supported modes; raw indices must be below this
    pub const COUNT: usize = 2;

    pub const ALL: [ThetaMode; ThetaMode::COUNT] = [ThetaMode::Uhd2997, ThetaMode::Fhd2997];

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn spec(self) -> ModeSpec {
        MODE_TABLE[self as usize]
    }

    pub fn width(self) -> u32 {
        self.spec().width
    }

    pub fn height(self) -> u32 {
        self.spec().height
    }

    pub fn fps(self) -> u32 {
        self.spec().fps
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ThetaMode::Uhd2997 => "uhd_2997",
            ThetaMode::Fhd2997 => "fhd_2997",
        }
    }
}

impl Default for ThetaMode {
    fn default() -> Self {
        ThetaMode::Uhd2997
    }
}

impl TryFrom<u32> for ThetaMode {
    type Error = UvcError;

    fn try_from(index: u32) -> Result<Self, Self::Error> {
        ThetaMode::ALL
            .get(index as usize)
            .copied()
            .ok_or(UvcError::InvalidMode)
    }
}

impl FromStr for ThetaMode {
    type Err = UvcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uhd" | "4k" | "uhd_2997" | "uhd2997" => Ok(ThetaMode::Uhd2997),
            "fhd" | "2k" | "fhd_2997" | "fhd2997" => Ok(ThetaMode::Fhd2997),
            other => other
                .parse::<u32>()
                .map_err(|_| UvcError::InvalidMode)
                .and_then(ThetaMode::try_from),
        }
    }
}

impl fmt::Display for ThetaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let spec = self.spec();
        write!(
            f,
            "{} ({}x{} @ 29.97fps)",
            self.as_str(),
            spec.width,
            spec.height
        )
    }
}
