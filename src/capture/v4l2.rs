//! V4L2 capture backend

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::format::CaptureFormat;
use super::frame::PixelFormat;
use super::pipeline::FrameSink;
use super::session::CaptureBackend;
use crate::error::{CameraError, Result};

/// How long the capture thread waits for a buffer before rechecking the
/// stop flag.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(250);

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct V4l2Backend {
    path: String,
    buffer_count: u32,
    worker: Option<Worker>,
}

impl V4l2Backend {
    pub fn open(path: &str, buffer_count: u32) -> Result<Self> {
        let device = Device::with_path(path)?;
        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CameraError::DeviceNotFound);
        }

        Ok(Self {
            path: path.to_owned(),
            buffer_count,
            worker: None,
        })
    }
}

fn frame_sizes(size: &FrameSizeEnum) -> Vec<(u32, u32)> {
    match size {
        FrameSizeEnum::Discrete(discrete) => vec![(discrete.width, discrete.height)],
        FrameSizeEnum::Stepwise(stepwise) => vec![
            (stepwise.min_width, stepwise.min_height),
            (stepwise.max_width, stepwise.max_height),
        ],
    }
}

fn frame_rate(interval: &FrameIntervalEnum) -> f32 {
    match interval {
        FrameIntervalEnum::Discrete(fraction) => {
            CaptureFormat::frame_rate_from_interval(fraction.numerator, fraction.denominator)
        }
        // Shortest interval, i.e. the fastest rate the mode allows.
        FrameIntervalEnum::Stepwise(stepwise) => {
            CaptureFormat::frame_rate_from_interval(stepwise.min.numerator, stepwise.min.denominator)
        }
    }
}

impl CaptureBackend for V4l2Backend {
    fn name(&self) -> &str {
        &self.path
    }

    fn supported_formats(&mut self) -> Result<Vec<CaptureFormat>> {
        let device = Device::with_path(&self.path)?;
        let mut formats = Vec::new();

        for description in device.enum_formats()? {
            let pixel_format = PixelFormat::from_fourcc(&description.fourcc.repr);
            for size in device.enum_framesizes(description.fourcc)? {
                for (width, height) in frame_sizes(&size.size) {
                    for interval in device.enum_frameintervals(description.fourcc, width, height)? {
                        let format = CaptureFormat::new(
                            width,
                            height,
                            frame_rate(&interval.interval),
                            pixel_format,
                        )
                        .with_stream_index(formats.len());
                        formats.push(format);
                    }
                }
            }
        }

        debug!("{} native formats on {}", formats.len(), self.path);
        Ok(formats)
    }

    #[instrument(skip(self, sink))]
    fn start(&mut self, format: &CaptureFormat, sink: FrameSink) -> Result<CaptureFormat> {
        self.stop();

        let fourcc = format
            .pixel_format
            .fourcc()
            .ok_or(CameraError::NoFormatAvailable)?;

        let device = Device::with_path(&self.path)?;
        let mut fmt = device.format()?;
        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = FourCC::new(&fourcc);
        let actual = device.set_format(&fmt)?;
        device.set_params(&Parameters::with_fps(format.frame_rate.round() as u32))?;

        let mut stream =
            MmapStream::with_buffers(&device, Type::VideoCapture, self.buffer_count)?;
        stream.set_timeout(DEQUEUE_TIMEOUT);
        info!(
            "Capture stream started: {}x{} {} with {} buffers",
            actual.width, actual.height, format.pixel_format, self.buffer_count
        );

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let pixel_format = PixelFormat::from_fourcc(&actual.fourcc.repr);
        let (width, height) = (actual.width, actual.height);
        let negotiated = CaptureFormat {
            width,
            height,
            pixel_format,
            ..*format
        };

        let handle = thread::Builder::new()
            .name("panacam-v4l2".into())
            .spawn(move || {
                // Keeps the device open for as long as the stream runs.
                let _device = device;
                while !thread_stop.load(Ordering::Acquire) {
                    match stream.next() {
                        Ok((buf, meta)) => {
                            let used = (meta.bytesused as usize).min(buf.len());
                            let bytes = if used == 0 { buf } else { &buf[..used] };
                            sink.on_frame_delivered(bytes, pixel_format, width, height);
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::TimedOut => continue,
                        Err(err) => {
                            warn!("Capture error: {}", err);
                            sink.close();
                            break;
                        }
                    }
                }
                debug!("capture thread exiting");
            })?;

        self.worker = Some(Worker { stop, handle });
        Ok(negotiated)
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Release);
            if worker.handle.join().is_err() {
                warn!("capture thread panicked");
            }
            info!("Capture stream stopped on {}", self.path);
        }
    }
}

impl Drop for V4l2Backend {
    fn drop(&mut self) {
        self.stop();
    }
}

/// First `/dev/videoN` node that can capture.
pub fn auto_detect_device() -> Result<String> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        if let Ok(dev) = Device::with_path(&path) {
            if let Ok(caps) = dev.query_caps() {
                if caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
                    info!("Found capture device: {} - {}", path, caps.card);
                    return Ok(path);
                }
            }
        }
    }

    Err(CameraError::DeviceNotFound)
}
