use std::fmt;

use serde::{Deserialize, Serialize};

use super::frame::PixelFormat;

pub const MAX_DIMENSION: u32 = 4096;
pub const MAX_CANVAS: u32 = 4096 * 2304;
pub const MAX_FRAMES_PER_SECOND: f32 = 30.0;

/// A native capture mode of a device, or a requested one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f32,
    pub pixel_format: PixelFormat,
    /// Index of the native stream/mode this format was enumerated from.
    #[serde(default)]
    pub stream_index: usize,
}

impl CaptureFormat {
    pub fn new(width: u32, height: u32, frame_rate: f32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            frame_rate,
            pixel_format,
            stream_index: 0,
        }
    }

    pub fn with_stream_index(mut self, stream_index: usize) -> Self {
        self.stream_index = stream_index;
        self
    }

    /// Frame rate from a rational time-per-frame as reported by drivers.
    pub fn frame_rate_from_interval(numerator: u32, denominator: u32) -> f32 {
        if numerator == 0 {
            return 0.0;
        }
        denominator as f32 / numerator as f32
    }

    /// Checks that all values are in the range the capture stack accepts.
    pub fn is_valid(&self) -> bool {
        self.width < MAX_DIMENSION
            && self.height < MAX_DIMENSION
            && u64::from(self.width) * u64::from(self.height) < u64::from(MAX_CANVAS)
            && (0.0..=MAX_FRAMES_PER_SECOND).contains(&self.frame_rate)
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}x{} @ {:.2} fps {}",
            self.stream_index, self.width, self.height, self.frame_rate, self.pixel_format
        )
    }
}

/// Parameters supplied once when starting capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureParams {
    pub requested_format: CaptureFormat,
    /// Accept a device that settles on a different size than was matched.
    #[serde(default)]
    pub allow_resolution_change: bool,
    /// Starting capture waits for the first frame and fails without one.
    #[serde(default)]
    pub synchronous_capture: bool,
}

impl CaptureParams {
    pub fn new(requested_format: CaptureFormat) -> Self {
        Self {
            requested_format,
            allow_resolution_change: false,
            synchronous_capture: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_validity() {
        assert!(CaptureFormat::new(1280, 720, 30.0, PixelFormat::Yuyv).is_valid());
        assert!(!CaptureFormat::new(4096, 720, 30.0, PixelFormat::Yuyv).is_valid());
        assert!(CaptureFormat::new(3840, 2400, 15.0, PixelFormat::Mjpeg).is_valid());
        // Each side fits, the canvas does not.
        assert!(!CaptureFormat::new(4000, 2400, 15.0, PixelFormat::Mjpeg).is_valid());
        assert!(!CaptureFormat::new(640, 480, 60.0, PixelFormat::Mjpeg).is_valid());
    }

    #[test]
    fn test_frame_rate_from_interval() {
        assert_eq!(CaptureFormat::frame_rate_from_interval(1, 30), 30.0);
        assert_eq!(CaptureFormat::frame_rate_from_interval(0, 30), 0.0);
        let ntsc = CaptureFormat::frame_rate_from_interval(1001, 30000);
        assert!((ntsc - 29.97).abs() < 0.01);
    }
}
