use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CameraError;

/// Pixel formats a camera can deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    #[default]
    Unknown,
    I420,
    Yuyv,
    Uyvy,
    Rgb24,
    Argb,
    Mjpeg,
    Nv12,
    Yv12,
}

impl PixelFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::I420 => "I420",
            Self::Yuyv => "YUYV",
            Self::Uyvy => "UYVY",
            Self::Rgb24 => "RGB24",
            Self::Argb => "ARGB",
            Self::Mjpeg => "MJPG",
            Self::Nv12 => "NV12",
            Self::Yv12 => "YV12",
        }
    }

    /// Map a V4L2/UVC FourCC to a pixel format.
    pub fn from_fourcc(code: &[u8; 4]) -> Self {
        match code {
            b"YUYV" | b"YUY2" => Self::Yuyv,
            b"UYVY" => Self::Uyvy,
            b"MJPG" => Self::Mjpeg,
            b"NV12" => Self::Nv12,
            b"YV12" => Self::Yv12,
            b"YU12" | b"I420" => Self::I420,
            b"RGB3" => Self::Rgb24,
            b"AR24" | b"BA24" => Self::Argb,
            _ => Self::Unknown,
        }
    }

    pub fn fourcc(self) -> Option<[u8; 4]> {
        match self {
            Self::Unknown => None,
            Self::I420 => Some(*b"YU12"),
            Self::Yuyv => Some(*b"YUYV"),
            Self::Uyvy => Some(*b"UYVY"),
            Self::Rgb24 => Some(*b"RGB3"),
            Self::Argb => Some(*b"BA24"),
            Self::Mjpeg => Some(*b"MJPG"),
            Self::Nv12 => Some(*b"NV12"),
            Self::Yv12 => Some(*b"YV12"),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelFormat {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "I420" => Ok(Self::I420),
            "YUYV" | "YUY2" => Ok(Self::Yuyv),
            "UYVY" => Ok(Self::Uyvy),
            "RGB24" => Ok(Self::Rgb24),
            "ARGB" => Ok(Self::Argb),
            "MJPG" | "MJPEG" => Ok(Self::Mjpeg),
            "NV12" => Ok(Self::Nv12),
            "YV12" => Ok(Self::Yv12),
            other => Err(CameraError::InvalidPixelFormat(other.to_owned())),
        }
    }
}

/// One of the two pipeline slots.
///
/// Storage grows on demand and is never shrunk, so once the pipeline has seen
/// its largest frame no further allocation happens.
#[derive(Debug, Default)]
pub struct RawFrame {
    buf: Vec<u8>,
    length: usize,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub sequence: u64,
}

impl RawFrame {
    /// Valid bytes of the most recent write.
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.length]
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn write(
        &mut self,
        bytes: &[u8],
        format: PixelFormat,
        width: u32,
        height: u32,
        sequence: u64,
    ) {
        if bytes.len() > self.buf.len() {
            self.buf.resize(bytes.len(), 0);
        }
        self.buf[..bytes.len()].copy_from_slice(bytes);
        self.length = bytes.len();
        self.format = format;
        self.width = width;
        self.height = height;
        self.sequence = sequence;
    }
}
