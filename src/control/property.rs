use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CameraError;

/// Image controls exposed by the camera's processing unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    Brightness,
    Contrast,
    Saturation,
    Sharpness,
    WhiteBalance,
}

impl PropertyKind {
    pub const ALL: [Self; 5] = [
        Self::Brightness,
        Self::Contrast,
        Self::Saturation,
        Self::Sharpness,
        Self::WhiteBalance,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Brightness => "brightness",
            Self::Contrast => "contrast",
            Self::Saturation => "saturation",
            Self::Sharpness => "sharpness",
            Self::WhiteBalance => "whitebalance",
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for PropertyKind {
    type Err = CameraError;

    /// Case-sensitive; only the five lowercase names are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| CameraError::InvalidProperty(s.to_owned()))
    }
}

/// Current value of a control together with its device-reported range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub value: i32,
    pub min: i32,
    pub max: i32,
}

impl Property {
    pub fn new(value: i32, min: i32, max: i32) -> Self {
        Self { value, min, max }
    }

    pub fn is_valid(&self) -> bool {
        self.min <= self.value && self.value <= self.max
    }
}
