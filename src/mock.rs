//! In-memory USB host, control transport and capture backend for tests

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::capture::{CaptureBackend, CaptureFormat, FrameSink};
use crate::control::transport::{ControlTransfer, SetupPacket};
use crate::control::uvc::{self, ControlAddress, GET_CUR, GET_DEF, GET_MAX, GET_MIN, SET_CUR};
use crate::control::PropertyKind;
use crate::discovery::{
    InterfaceInfo, UsbDeviceInfo, UsbHost, GET_DESCRIPTOR, PANACAST_VENDOR_ID,
    STRING_DESCRIPTOR_TYPE, VIDEO_INTERFACE_CLASS, VIDEO_CONTROL_SUBCLASS,
};
use crate::error::{CameraError, Result};

const SERIAL_INDEX: u8 = 3;
const VIDEO_STREAMING_SUBCLASS: u8 = 0x02;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("mock state poisoned")
}

#[derive(Default)]
struct TransportState {
    /// cur, min, max per control selector
    controls: HashMap<u8, (i32, i32, i32)>,
    strings: HashMap<u8, String>,
    failing: HashSet<u8>,
    truncate: Option<usize>,
    log: Vec<SetupPacket>,
}

/// Control transport answering UVC GET/SET requests and string descriptor
/// queries from shared in-memory state. Clones share state.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn selector(kind: PropertyKind) -> u8 {
        ControlAddress::for_property(kind, uvc::PROCESSING_UNIT_ID).selector
    }

    pub fn set_control(&self, kind: PropertyKind, cur: i32, min: i32, max: i32) {
        lock(&self.state)
            .controls
            .insert(Self::selector(kind), (cur, min, max));
    }

    pub fn set_string(&self, index: u8, value: &str) {
        lock(&self.state).strings.insert(index, value.to_owned());
    }

    pub fn fail_request(&self, request: u8) {
        lock(&self.state).failing.insert(request);
    }

    /// Cap every IN transfer at `bytes`.
    pub fn truncate_reads(&self, bytes: usize) {
        lock(&self.state).truncate = Some(bytes);
    }

    pub fn log(&self) -> Vec<SetupPacket> {
        lock(&self.state).log.clone()
    }

    pub fn current(&self, kind: PropertyKind) -> Option<i32> {
        lock(&self.state)
            .controls
            .get(&Self::selector(kind))
            .map(|&(cur, _, _)| cur)
    }
}

fn stall() -> CameraError {
    CameraError::Usb(rusb::Error::Pipe)
}

impl ControlTransfer for MockTransport {
    fn control_transfer(&mut self, setup: &SetupPacket, data: &mut [u8]) -> Result<usize> {
        let mut state = lock(&self.state);
        state.log.push(*setup);
        if state.failing.contains(&setup.request) {
            return Err(stall());
        }

        let mut limit = usize::from(setup.length).min(data.len());
        if setup.is_in() {
            if let Some(truncate) = state.truncate {
                limit = limit.min(truncate);
            }
        }

        let reply: Vec<u8> = match setup.request {
            GET_DESCRIPTOR if setup.selector() == STRING_DESCRIPTOR_TYPE => {
                let index = (setup.value & 0xff) as u8;
                let text = state.strings.get(&index).ok_or_else(stall)?;
                let units: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
                let mut descriptor = vec![(units.len() + 2) as u8, STRING_DESCRIPTOR_TYPE];
                descriptor.extend(units);
                descriptor
            }
            GET_CUR | GET_MIN | GET_MAX | GET_DEF => {
                let (cur, min, max) = state
                    .controls
                    .get(&setup.selector())
                    .copied()
                    .unwrap_or_default();
                let value = match setup.request {
                    GET_MIN => min,
                    GET_MAX => max,
                    _ => cur,
                };
                uvc::encode_value(value).to_vec()
            }
            SET_CUR => {
                let written = limit.min(uvc::CONTROL_LENGTH as usize);
                let value = uvc::decode_value(&data[..written]).ok_or_else(stall)?;
                state.controls.entry(setup.selector()).or_default().0 = value;
                return Ok(written);
            }
            _ => return Err(stall()),
        };

        let moved = reply.len().min(limit);
        data[..moved].copy_from_slice(&reply[..moved]);
        Ok(moved)
    }
}

/// A device on the mock bus.
#[derive(Clone)]
pub struct MockDevice {
    vendor_id: u16,
    product_id: u16,
    has_serial: bool,
    has_control_interface: bool,
    transport: MockTransport,
}

impl MockDevice {
    pub fn camera(serial: &str) -> Self {
        let transport = MockTransport::new();
        transport.set_string(SERIAL_INDEX, serial);
        Self {
            vendor_id: PANACAST_VENDOR_ID,
            product_id: 0x0010,
            has_serial: true,
            has_control_interface: true,
            transport,
        }
    }

    pub fn with_vendor(mut self, vendor_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self
    }

    pub fn without_serial(mut self) -> Self {
        self.has_serial = false;
        self
    }

    pub fn without_control_interface(mut self) -> Self {
        self.has_control_interface = false;
        self
    }

    fn info(&self, index: usize) -> UsbDeviceInfo {
        let mut interfaces = Vec::new();
        if self.has_control_interface {
            interfaces.push(InterfaceInfo {
                number: 0,
                class_code: VIDEO_INTERFACE_CLASS,
                sub_class_code: VIDEO_CONTROL_SUBCLASS,
            });
        }
        interfaces.push(InterfaceInfo {
            number: 1,
            class_code: VIDEO_INTERFACE_CLASS,
            sub_class_code: VIDEO_STREAMING_SUBCLASS,
        });

        UsbDeviceInfo {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            serial_index: if self.has_serial { SERIAL_INDEX } else { 0 },
            interfaces,
            path: format!("mock:{index}"),
        }
    }
}

pub struct MockUsbHost {
    devices: Vec<MockDevice>,
}

impl MockUsbHost {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self { devices }
    }

    fn find(&self, info: &UsbDeviceInfo) -> Result<&MockDevice> {
        self.devices
            .iter()
            .enumerate()
            .find(|(index, _)| format!("mock:{index}") == info.path)
            .map(|(_, device)| device)
            .ok_or(CameraError::DeviceNotFound)
    }
}

impl UsbHost for MockUsbHost {
    fn devices(&self) -> Result<Vec<UsbDeviceInfo>> {
        Ok(self
            .devices
            .iter()
            .enumerate()
            .map(|(index, device)| device.info(index))
            .collect())
    }

    fn open_device(&self, device: &UsbDeviceInfo) -> Result<Box<dyn ControlTransfer>> {
        Ok(Box::new(self.find(device)?.transport.clone()))
    }

    fn open_interface(
        &self,
        device: &UsbDeviceInfo,
        _interface: u8,
    ) -> Result<Box<dyn ControlTransfer>> {
        Ok(Box::new(self.find(device)?.transport.clone()))
    }
}

#[derive(Default)]
struct BackendState {
    formats: Vec<CaptureFormat>,
    fail_start: bool,
    started: Option<CaptureFormat>,
    negotiated: Option<(u32, u32)>,
    sink: Option<FrameSink>,
    on_start: Option<Vec<u8>>,
}

/// Capture backend driven by the test. Clones share state.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    pub fn new(formats: Vec<CaptureFormat>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState {
                formats,
                ..BackendState::default()
            })),
        }
    }

    pub fn failing_start(self) -> Self {
        lock(&self.state).fail_start = true;
        self
    }

    /// Settle on `width`x`height` whatever mode is requested.
    pub fn negotiates(&self, width: u32, height: u32) {
        lock(&self.state).negotiated = Some((width, height));
    }

    /// End the stream from the device side, as a capture thread does on a
    /// fatal error.
    pub fn end_stream(&self) {
        let sink = lock(&self.state).sink.take();
        if let Some(sink) = sink {
            sink.close();
        }
    }

    /// Deliver `bytes` as the first frame of every start.
    pub fn deliver_on_start(&self, bytes: &[u8]) {
        lock(&self.state).on_start = Some(bytes.to_vec());
    }

    /// Format of the most recent successful start.
    pub fn started_with(&self) -> Option<CaptureFormat> {
        lock(&self.state).started
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).sink.is_some()
    }

    /// Push a frame in the started format; ignored when not running.
    pub fn deliver(&self, bytes: &[u8]) {
        let target = {
            let state = lock(&self.state);
            state.sink.clone().zip(state.started)
        };
        if let Some((sink, format)) = target {
            sink.on_frame_delivered(bytes, format.pixel_format, format.width, format.height);
        }
    }
}

impl CaptureBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn supported_formats(&mut self) -> Result<Vec<CaptureFormat>> {
        Ok(lock(&self.state).formats.clone())
    }

    fn start(&mut self, format: &CaptureFormat, sink: FrameSink) -> Result<CaptureFormat> {
        let (actual, first) = {
            let mut state = lock(&self.state);
            if state.fail_start {
                return Err(CameraError::Io(io::Error::other("stream refused")));
            }
            let mut actual = *format;
            if let Some((width, height)) = state.negotiated {
                actual.width = width;
                actual.height = height;
            }
            state.started = Some(actual);
            state.sink = Some(sink.clone());
            (actual, state.on_start.clone())
        };
        if let Some(bytes) = first {
            sink.on_frame_delivered(&bytes, actual.pixel_format, actual.width, actual.height);
        }
        Ok(actual)
    }

    fn stop(&mut self) {
        lock(&self.state).sink = None;
    }
}
