//! Closest native capture format for a requested one
//!
//! Width is minimized first, then height among the width winners, then frame
//! rate among those. The first candidate in enumeration order that hits all
//! three minima wins. The score adds pixel and fps deltas as-is, so it only
//! ranks candidates; it is not a distance.

use crate::error::{CameraError, Result};

use super::format::CaptureFormat;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormatMatch<'a> {
    pub format: &'a CaptureFormat,
    pub score: f32,
}

fn deltas(candidate: &CaptureFormat, requested: &CaptureFormat) -> (u32, u32, f32) {
    (
        candidate.width.abs_diff(requested.width),
        candidate.height.abs_diff(requested.height),
        (candidate.frame_rate - requested.frame_rate).abs(),
    )
}

pub fn closest_match<'a>(
    formats: &'a [CaptureFormat],
    requested: &CaptureFormat,
    exact_pixel_format: bool,
) -> Result<FormatMatch<'a>> {
    let candidates = || {
        formats
            .iter()
            .filter(move |f| !exact_pixel_format || f.pixel_format == requested.pixel_format)
    };

    let min_dw = candidates()
        .map(|f| deltas(f, requested).0)
        .min()
        .ok_or(CameraError::NoFormatAvailable)?;

    let min_dh = candidates()
        .map(|f| deltas(f, requested))
        .filter(|&(dw, _, _)| dw == min_dw)
        .map(|(_, dh, _)| dh)
        .min()
        .ok_or(CameraError::NoFormatAvailable)?;

    let min_df = candidates()
        .map(|f| deltas(f, requested))
        .filter(|&(dw, dh, _)| dw == min_dw && dh == min_dh)
        .map(|(_, _, df)| df)
        .min_by(f32::total_cmp)
        .ok_or(CameraError::NoFormatAvailable)?;

    // Total order, so a NaN fps request still lands on a candidate.
    let format = candidates()
        .find(|f| {
            let (dw, dh, df) = deltas(f, requested);
            dw == min_dw && dh == min_dh && df.total_cmp(&min_df).is_eq()
        })
        .ok_or(CameraError::NoFormatAvailable)?;

    Ok(FormatMatch {
        format,
        score: min_dw as f32 + min_dh as f32 + min_df,
    })
}

/// Pick the device whose closest format scores lowest.
///
/// Devices with no usable format are skipped. Ties keep the earlier device.
pub fn best_device<'a, D>(
    devices: &'a [(D, Vec<CaptureFormat>)],
    requested: &CaptureFormat,
    exact_pixel_format: bool,
) -> Result<(&'a D, FormatMatch<'a>)> {
    devices
        .iter()
        .filter_map(|(device, formats)| {
            closest_match(formats, requested, exact_pixel_format)
                .ok()
                .map(|m| (device, m))
        })
        .fold(None, |best: Option<(&D, FormatMatch<'a>)>, candidate| match best {
            Some(b) if b.1.score <= candidate.1.score => Some(b),
            _ => Some(candidate),
        })
        .ok_or(CameraError::NoFormatAvailable)
}
