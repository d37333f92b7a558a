//! Finding allow-listed cameras on the USB bus and opening their video
//! control interface

pub mod usb;

use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::control::transport::{
    request_type, ControlTransfer, SetupPacket, DIR_IN, RECIPIENT_DEVICE, TYPE_STANDARD,
};
use crate::error::{CameraError, Result};

pub use usb::RusbHost;

pub const PANACAST_VENDOR_ID: u16 = 0x2b93;
pub const GN_VENDOR_ID: u16 = 0x0b0e;

/// Vendors whose devices are considered cameras of this family.
pub const VENDOR_ALLOW_LIST: &[u16] = &[PANACAST_VENDOR_ID, GN_VENDOR_ID];

pub const VIDEO_INTERFACE_CLASS: u8 = 0x0E;
pub const VIDEO_CONTROL_SUBCLASS: u8 = 0x01;

pub const GET_DESCRIPTOR: u8 = 0x06;
pub const STRING_DESCRIPTOR_TYPE: u8 = 0x03;
pub const LANGUAGE_ENGLISH_US: u16 = 0x0409;
const MAX_STRING_DESCRIPTOR_LENGTH: u16 = 255;

/// Stable identity of a camera. `platform_path` is only good until the
/// device is replugged and is therefore never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: String,
    #[serde(skip)]
    pub platform_path: String,
}

impl DeviceIdentity {
    fn key(&self) -> (u16, u16, String) {
        (self.vendor_id, self.product_id, self.serial_number.clone())
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} {}",
            self.vendor_id, self.product_id, self.serial_number
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub number: u8,
    pub class_code: u8,
    pub sub_class_code: u8,
}

impl InterfaceInfo {
    pub fn is_video_control(&self) -> bool {
        self.class_code == VIDEO_INTERFACE_CLASS && self.sub_class_code == VIDEO_CONTROL_SUBCLASS
    }
}

/// What the bus reports about a device before it is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    /// String descriptor index of the serial number; 0 means none.
    pub serial_index: u8,
    pub interfaces: Vec<InterfaceInfo>,
    pub path: String,
}

/// Platform USB access.
pub trait UsbHost: Send + Sync {
    fn devices(&self) -> Result<Vec<UsbDeviceInfo>>;

    /// Transport addressing the device as a whole (string descriptors).
    fn open_device(&self, device: &UsbDeviceInfo) -> Result<Box<dyn ControlTransfer>>;

    /// Transport bound to one interface of the device.
    fn open_interface(
        &self,
        device: &UsbDeviceInfo,
        interface: u8,
    ) -> Result<Box<dyn ControlTransfer>>;
}

pub fn string_descriptor_request(index: u8) -> SetupPacket {
    SetupPacket {
        request_type: request_type(DIR_IN, TYPE_STANDARD, RECIPIENT_DEVICE),
        request: GET_DESCRIPTOR,
        value: (u16::from(STRING_DESCRIPTOR_TYPE) << 8) | u16::from(index),
        index: LANGUAGE_ENGLISH_US,
        length: MAX_STRING_DESCRIPTOR_LENGTH,
    }
}

/// Decode a raw string descriptor: `bLength`, `bDescriptorType`, then
/// UTF-16LE code units.
pub fn decode_string_descriptor(bytes: &[u8]) -> Option<String> {
    let (&length, rest) = bytes.split_first()?;
    let (&kind, _) = rest.split_first()?;
    if kind != STRING_DESCRIPTOR_TYPE {
        return None;
    }
    let end = usize::from(length).min(bytes.len());
    let units: Vec<u16> = bytes
        .get(2..end)?
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16(&units).ok()
}

fn read_serial(host: &dyn UsbHost, device: &UsbDeviceInfo) -> Option<String> {
    if device.serial_index == 0 {
        debug!(path = %device.path, "device has no serial number descriptor");
        return None;
    }

    let mut transport = match host.open_device(device) {
        Ok(transport) => transport,
        Err(err) => {
            debug!(path = %device.path, %err, "cannot open device");
            return None;
        }
    };

    let setup = string_descriptor_request(device.serial_index);
    let mut buf = [0u8; MAX_STRING_DESCRIPTOR_LENGTH as usize];
    match transport.control_transfer(&setup, &mut buf) {
        Ok(read) => decode_string_descriptor(&buf[..read]),
        Err(err) => {
            debug!(path = %device.path, %err, "serial number query failed");
            None
        }
    }
}

fn scan(host: &dyn UsbHost, allow_list: &[u16]) -> Result<Vec<(UsbDeviceInfo, DeviceIdentity)>> {
    Ok(host
        .devices()?
        .into_iter()
        .filter(|device| allow_list.contains(&device.vendor_id))
        .filter_map(|device| {
            let serial_number = read_serial(host, &device)?;
            let identity = DeviceIdentity {
                vendor_id: device.vendor_id,
                product_id: device.product_id,
                serial_number,
                platform_path: device.path.clone(),
            };
            Some((device, identity))
        })
        .collect())
}

/// Allow-listed devices that answered the serial number query.
#[instrument(skip(host))]
pub fn enumerate(host: &dyn UsbHost, allow_list: &[u16]) -> Result<Vec<DeviceIdentity>> {
    let found: Vec<DeviceIdentity> = scan(host, allow_list)?
        .into_iter()
        .map(|(_, identity)| identity)
        .collect();
    info!("found {} camera(s)", found.len());
    Ok(found)
}

/// Open the video control interface of the device with `serial`, or of the
/// first enumerated device when `serial` is empty.
#[instrument(skip(host))]
pub fn resolve_control_interface(host: &dyn UsbHost, serial: &str) -> Result<ControlInterfaceHandle> {
    let (device, identity) = scan(host, VENDOR_ALLOW_LIST)?
        .into_iter()
        .find(|(_, identity)| serial.is_empty() || identity.serial_number == serial)
        .ok_or(CameraError::DeviceNotFound)?;

    let interface = device
        .interfaces
        .iter()
        .find(|interface| interface.is_video_control())
        .ok_or(CameraError::InterfaceNotFound)?;

    let claim = HandleClaim::acquire(&identity)?;
    let transport = host.open_interface(&device, interface.number)?;
    info!(device = %identity, interface = interface.number, "opened video control interface");

    Ok(ControlInterfaceHandle {
        identity,
        interface_number: interface.number,
        transport,
        _claim: claim,
    })
}

static OPEN_HANDLES: Lazy<Mutex<HashSet<(u16, u16, String)>>> =
    Lazy::new(|| Mutex::new(HashSet::new()));

/// Process-wide marker that a device's control interface is open.
#[derive(Debug)]
struct HandleClaim {
    key: (u16, u16, String),
}

impl HandleClaim {
    fn acquire(identity: &DeviceIdentity) -> Result<Self> {
        let key = identity.key();
        let mut open = OPEN_HANDLES.lock().unwrap_or_else(PoisonError::into_inner);
        if !open.insert(key.clone()) {
            warn!(device = %identity, "control interface already open");
            return Err(CameraError::DeviceBusy {
                serial: identity.serial_number.clone(),
            });
        }
        Ok(Self { key })
    }
}

impl Drop for HandleClaim {
    fn drop(&mut self) {
        OPEN_HANDLES
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Exclusive handle on a device's video control interface, released on drop.
pub struct ControlInterfaceHandle {
    identity: DeviceIdentity,
    interface_number: u8,
    transport: Box<dyn ControlTransfer>,
    _claim: HandleClaim,
}

impl ControlInterfaceHandle {
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn interface_number(&self) -> u8 {
        self.interface_number
    }
}

impl fmt::Debug for ControlInterfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlInterfaceHandle")
            .field("identity", &self.identity)
            .field("interface_number", &self.interface_number)
            .finish_non_exhaustive()
    }
}

impl ControlTransfer for ControlInterfaceHandle {
    fn control_transfer(&mut self, setup: &SetupPacket, data: &mut [u8]) -> Result<usize> {
        self.transport.control_transfer(setup, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDevice, MockUsbHost};

    #[test]
    fn test_string_descriptor_decoding() {
        // "AB12"
        let raw = [10, 3, b'A', 0, b'B', 0, b'1', 0, b'2', 0, 0xAA, 0xAA];
        assert_eq!(decode_string_descriptor(&raw).as_deref(), Some("AB12"));
        assert_eq!(decode_string_descriptor(&[2, 3]).as_deref(), Some(""));
        assert_eq!(decode_string_descriptor(&[4, 2, b'A', 0]), None);
        assert_eq!(decode_string_descriptor(&[4]), None);
    }

    #[test]
    fn test_string_descriptor_request_layout() {
        let setup = string_descriptor_request(3);
        assert_eq!(setup.request_type, 0x80);
        assert_eq!(setup.request, 0x06);
        assert_eq!(setup.value, 0x0303);
        assert_eq!(setup.index, 0x0409);
    }

    #[test]
    fn test_enumerate_filters_vendor_and_silent_devices() {
        let host = MockUsbHost::new(vec![
            MockDevice::camera("enum-1"),
            MockDevice::camera("enum-2").with_vendor(0x046d),
            MockDevice::camera("enum-3").without_serial(),
            MockDevice::camera("enum-4"),
            MockDevice::camera("enum-5").with_vendor(GN_VENDOR_ID),
        ]);

        let found = enumerate(&host, VENDOR_ALLOW_LIST).expect("enumeration succeeds");
        let serials: Vec<&str> = found.iter().map(|d| d.serial_number.as_str()).collect();
        assert_eq!(serials, ["enum-1", "enum-4", "enum-5"]);
        assert!(found.iter().all(|d| VENDOR_ALLOW_LIST.contains(&d.vendor_id)));
        assert_eq!(found[2].vendor_id, GN_VENDOR_ID);
    }

    #[test]
    fn test_resolve_by_serial_and_first_match() {
        let host = MockUsbHost::new(vec![
            MockDevice::camera("resolve-1"),
            MockDevice::camera("resolve-2"),
        ]);

        let handle = resolve_control_interface(&host, "resolve-2").expect("device exists");
        assert_eq!(handle.identity().serial_number, "resolve-2");
        drop(handle);

        let handle = resolve_control_interface(&host, "").expect("device exists");
        assert_eq!(handle.identity().serial_number, "resolve-1");
        assert_eq!(handle.interface_number(), 0);
    }

    #[test]
    fn test_resolve_errors() {
        let host = MockUsbHost::new(vec![MockDevice::camera("no-vc").without_control_interface()]);

        assert!(matches!(
            resolve_control_interface(&host, "missing"),
            Err(CameraError::DeviceNotFound)
        ));
        assert!(matches!(
            resolve_control_interface(&host, "no-vc"),
            Err(CameraError::InterfaceNotFound)
        ));
    }

    #[test]
    fn test_one_handle_per_device() {
        let host = MockUsbHost::new(vec![MockDevice::camera("exclusive-1")]);

        let handle = resolve_control_interface(&host, "exclusive-1").expect("first open");
        assert!(matches!(
            resolve_control_interface(&host, "exclusive-1"),
            Err(CameraError::DeviceBusy { .. })
        ));
        drop(handle);
        resolve_control_interface(&host, "exclusive-1").expect("reopen after release");
    }
}
