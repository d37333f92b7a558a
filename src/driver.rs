//! Per-device camera access keyed by serial number
//!
//! This is the surface host-language bindings sit on: every call names a
//! device by its serial string, and control handles and capture sessions are
//! opened on first use and then cached.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, instrument};

use crate::capture::{
    CaptureFormat, CaptureParams, CaptureSession, CaptureSessionManager, PipelineState,
    PixelFormat,
};
use crate::control::{CameraControl, Property, PropertyKind, UvcCamera};
use crate::discovery::{self, DeviceIdentity, UsbHost, VENDOR_ALLOW_LIST};
use crate::error::{CameraError, Result};
use crate::Config;

const DEFAULT_STREAM: (u32, u32, PixelFormat, f32) = (1280, 720, PixelFormat::Yuyv, 30.0);

struct Stream {
    params: CaptureParams,
    session: Option<CaptureSession>,
}

impl Default for Stream {
    fn default() -> Self {
        let (width, height, format, fps) = DEFAULT_STREAM;
        Self {
            params: CaptureParams::new(CaptureFormat::new(width, height, fps, format)),
            session: None,
        }
    }
}

pub struct CameraDriver {
    host: Arc<dyn UsbHost>,
    sessions: Arc<CaptureSessionManager>,
    config: Config,
    devices: Vec<DeviceIdentity>,
    controls: HashMap<String, UvcCamera>,
    streams: HashMap<String, Stream>,
}

impl CameraDriver {
    pub fn new(
        host: Arc<dyn UsbHost>,
        sessions: Arc<CaptureSessionManager>,
        config: Config,
    ) -> Result<Self> {
        let devices = discovery::enumerate(host.as_ref(), VENDOR_ALLOW_LIST)?;
        Ok(Self {
            host,
            sessions,
            config,
            devices,
            controls: HashMap::new(),
            streams: HashMap::new(),
        })
    }

    /// Serial numbers of the cameras currently attached.
    pub fn get_cameras(&mut self) -> Result<Vec<String>> {
        self.devices = discovery::enumerate(self.host.as_ref(), VENDOR_ALLOW_LIST)?;
        Ok(self
            .devices
            .iter()
            .map(|device| device.serial_number.clone())
            .collect())
    }

    pub fn devices(&self) -> &[DeviceIdentity] {
        &self.devices
    }

    fn identity(&self, device: &str) -> Result<&DeviceIdentity> {
        self.devices
            .iter()
            .find(|identity| identity.serial_number == device)
            .ok_or(CameraError::DeviceNotFound)
    }

    fn control(&mut self, device: &str) -> Result<&mut UvcCamera> {
        Ok(match self.controls.entry(device.to_owned()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(UvcCamera::open(
                self.host.as_ref(),
                device,
                &self.config.control,
            )?),
        })
    }

    #[instrument(skip(self))]
    pub fn get_property(&mut self, device: &str, property: &str) -> Result<Property> {
        self.identity(device)?;
        let kind: PropertyKind = property.parse()?;
        self.control(device)?.get_property(kind)
    }

    #[instrument(skip(self))]
    pub fn set_property(&mut self, device: &str, property: &str, value: i32) -> Result<()> {
        self.identity(device)?;
        let kind: PropertyKind = property.parse()?;
        self.control(device)?.set_property(kind, value)
    }

    /// Remember the stream mode for `device`. A running stream is stopped and
    /// restarts in the new mode on the next [`get_frame`](Self::get_frame).
    #[instrument(skip(self))]
    pub fn set_stream_params(
        &mut self,
        device: &str,
        width: u32,
        height: u32,
        format: &str,
        fps: u32,
    ) -> Result<()> {
        self.identity(device)?;
        let pixel_format: PixelFormat = format.parse()?;
        let params = CaptureParams::new(CaptureFormat::new(width, height, fps as f32, pixel_format));

        let stream = self.streams.entry(device.to_owned()).or_default();
        stream.params = params;
        if stream.session.take().is_some() {
            info!(device, "stream parameters changed, restarting on next frame");
        }
        Ok(())
    }

    /// Copy of the next frame from `device`, opening the stream on first use.
    pub fn get_frame(&mut self, device: &str) -> Result<Bytes> {
        let identity = self.identity(device)?.clone();
        let exact = self.config.capture.exact_pixel_format;
        let timeout = Duration::from_millis(self.config.pipeline.frame_timeout_ms);

        let stream = self.streams.entry(device.to_owned()).or_default();
        let ended = stream
            .session
            .as_ref()
            .is_some_and(|session| session.state() != PipelineState::Capturing);
        if ended {
            info!(device, "stream ended, reopening");
            stream.session = None;
        }
        if stream.session.is_none() {
            let mut session = self.sessions.open_session(&identity, exact)?;
            session.init(&stream.params)?;
            stream.session = Some(session);
        }
        let Some(session) = stream.session.as_mut() else {
            return Err(CameraError::NoFrame);
        };

        let frame = session.get_next_frame_timeout(timeout)?;
        debug!(device, sequence = frame.sequence, bytes = frame.len(), "frame");
        Ok(Bytes::copy_from_slice(frame.data()))
    }

    pub fn stop_stream(&mut self, device: &str) {
        if let Some(mut session) = self.streams.get_mut(device).and_then(|s| s.session.take()) {
            session.stop_capture();
        }
    }
}
