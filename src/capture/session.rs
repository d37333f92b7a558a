//! Capture sessions and the process-wide session manager

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use once_cell::sync::Lazy;
use tracing::{debug, info, instrument, warn};

use super::format::{CaptureFormat, CaptureParams};
use super::matcher::closest_match;
use super::pipeline::{
    FrameGuard, FramePipeline, FrameSink, PipelineState, PipelineStats, StopHandle,
};
use crate::discovery::DeviceIdentity;
use crate::error::{CameraError, Result};

/// Platform video capture for one device.
pub trait CaptureBackend: Send {
    fn name(&self) -> &str;

    /// Native capture modes, in the order the platform reports them.
    fn supported_formats(&mut self) -> Result<Vec<CaptureFormat>>;

    /// Start delivering frames in `format` to `sink` and return the mode the
    /// device actually settled on. Must fail before any frame is delivered
    /// if the device cannot stream.
    fn start(&mut self, format: &CaptureFormat, sink: FrameSink) -> Result<CaptureFormat>;

    /// Stop delivering frames. At most one more frame may arrive afterwards.
    fn stop(&mut self);
}

pub type BackendFactory =
    Arc<dyn Fn(&DeviceIdentity) -> Result<Box<dyn CaptureBackend>> + Send + Sync>;

/// Capture on one device: a backend feeding a frame pipeline.
pub struct CaptureSession {
    backend: Box<dyn CaptureBackend>,
    pipeline: FramePipeline,
    active: Option<CaptureFormat>,
    exact_pixel_format: bool,
    start_timeout: Duration,
}

impl CaptureSession {
    pub fn new(backend: Box<dyn CaptureBackend>, exact_pixel_format: bool) -> Self {
        Self {
            backend,
            pipeline: FramePipeline::new(),
            active: None,
            exact_pixel_format,
            start_timeout: Duration::from_millis(crate::CONFIG.load().pipeline.frame_timeout_ms),
        }
    }

    /// How long a synchronous start waits for the first frame.
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Pick the closest native format and start streaming it. Restarts a
    /// running or stopped session.
    #[instrument(skip(self))]
    pub fn init(&mut self, params: &CaptureParams) -> Result<CaptureFormat> {
        if self.active.is_some() {
            self.stop_capture();
        }

        let formats = self.backend.supported_formats()?;
        for format in &formats {
            debug!(valid = format.is_valid(), "native format {format}");
        }

        let found = closest_match(&formats, &params.requested_format, self.exact_pixel_format)?;
        let format = *found.format;
        info!(backend = self.backend.name(), score = found.score, "capturing {format}");

        self.pipeline.start();
        let negotiated = match self.backend.start(&format, self.pipeline.sink()) {
            Ok(negotiated) => negotiated,
            Err(err) => {
                warn!(%err, "capture failed to start");
                self.pipeline.abort();
                return Err(err);
            }
        };

        let resized = (negotiated.width, negotiated.height) != (format.width, format.height);
        if resized && !params.allow_resolution_change {
            warn!("device switched to {negotiated} instead of {format}");
            return Err(self.fail_start(CameraError::NoFormatAvailable));
        }

        if params.synchronous_capture {
            if let Err(err) = self.pipeline.wait_until_streaming(self.start_timeout) {
                warn!(%err, "no first frame from {}", self.backend.name());
                return Err(self.fail_start(err));
            }
        }

        self.active = Some(negotiated);
        Ok(negotiated)
    }

    fn fail_start(&mut self, err: CameraError) -> CameraError {
        self.backend.stop();
        self.pipeline.abort();
        err
    }

    /// Stops the session's pipeline from another thread, releasing a
    /// consumer blocked in [`get_next_frame`](Self::get_next_frame). The
    /// backend keeps running until [`stop_capture`](Self::stop_capture) or
    /// drop; its frames are ignored meanwhile.
    pub fn stop_handle(&self) -> StopHandle {
        self.pipeline.stop_handle()
    }

    pub fn get_next_frame(&mut self, blocking: bool) -> Result<FrameGuard<'_>> {
        self.pipeline.get_next_frame(blocking)
    }

    pub fn get_next_frame_timeout(&mut self, timeout: Duration) -> Result<FrameGuard<'_>> {
        self.pipeline.get_next_frame_timeout(timeout)
    }

    pub fn stop_capture(&mut self) {
        if self.active.take().is_some() {
            self.backend.stop();
        }
        self.pipeline.stop_capture();
    }

    pub fn state(&self) -> PipelineState {
        self.pipeline.state()
    }

    pub fn active_format(&self) -> Option<&CaptureFormat> {
        self.active.as_ref()
    }

    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.active.is_some() {
            self.stop_capture();
        }
    }
}

#[derive(Default)]
struct ManagerState {
    initialized: bool,
    factory: Option<BackendFactory>,
}

/// Process-wide entry point for capture sessions.
///
/// [`initialize`](Self::initialize) must be called once before sessions are
/// opened and [`shutdown`](Self::shutdown) once when done; both are
/// idempotent.
#[derive(Default)]
pub struct CaptureSessionManager {
    state: Mutex<ManagerState>,
}

static MANAGER: Lazy<Arc<CaptureSessionManager>> =
    Lazy::new(|| Arc::new(CaptureSessionManager::new()));

impl CaptureSessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Arc<Self> {
        Arc::clone(&MANAGER)
    }

    pub fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| CameraError::Unknown)?;
        if !state.initialized {
            state.initialized = true;
            info!("capture session manager initialized");
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.initialized {
            state.initialized = false;
            info!("capture session manager shut down");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .initialized
    }

    /// Replace the platform default backend.
    pub fn register_backend(&self, factory: BackendFactory) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .factory = Some(factory);
    }

    pub fn open_session(
        &self,
        device: &DeviceIdentity,
        exact_pixel_format: bool,
    ) -> Result<CaptureSession> {
        let factory = {
            let state = self.state.lock().map_err(|_| CameraError::Unknown)?;
            if !state.initialized {
                return Err(CameraError::NotInitialized);
            }
            state.factory.clone()
        };

        let backend = match factory {
            Some(factory) => factory(device)?,
            None => default_backend(device)?,
        };
        debug!(device = %device, backend = backend.name(), "opened capture backend");
        Ok(CaptureSession::new(backend, exact_pixel_format))
    }
}

#[cfg(target_os = "linux")]
fn default_backend(_device: &DeviceIdentity) -> Result<Box<dyn CaptureBackend>> {
    let config = crate::CONFIG.load();
    let path = if config.capture.device_path.is_empty() {
        super::v4l2::auto_detect_device()?
    } else {
        config.capture.device_path.clone()
    };
    Ok(Box::new(super::v4l2::V4l2Backend::open(
        &path,
        config.capture.buffer_count,
    )?))
}

#[cfg(not(target_os = "linux"))]
fn default_backend(_device: &DeviceIdentity) -> Result<Box<dyn CaptureBackend>> {
    Err(CameraError::Unsupported)
}
