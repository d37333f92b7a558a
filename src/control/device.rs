use tracing::{debug, instrument, warn};

use super::property::{Property, PropertyKind};
use super::transport::{ControlTransfer, SetupPacket, DIR_IN};
use super::uvc::{self, ControlAddress, GET_CUR, GET_MAX, GET_MIN};
use crate::discovery::{self, ControlInterfaceHandle, DeviceIdentity, UsbHost};
use crate::error::{CameraError, Result};
use crate::ControlConfig;

/// Raw control transfer issued on the camera's control interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    /// Payload for OUT requests, receive buffer for IN requests.
    pub data: Vec<u8>,
}

/// Property access on one camera.
pub trait CameraControl {
    fn get_property(&mut self, kind: PropertyKind) -> Result<Property>;
    fn set_property(&mut self, kind: PropertyKind, value: i32) -> Result<()>;
    /// Returns the number of bytes transferred.
    fn send_command(&mut self, command: &mut CommandInfo) -> Result<usize>;
}

/// A UVC camera reached through its video control interface.
///
/// Calls take `&mut self`, so one camera never has two transfers in flight.
#[derive(Debug)]
pub struct UvcCamera<T = ControlInterfaceHandle> {
    transport: T,
    processing_unit_id: u8,
}

impl UvcCamera {
    /// Open the camera with `serial` (first camera if empty).
    pub fn open(host: &dyn UsbHost, serial: &str, config: &ControlConfig) -> Result<Self> {
        let handle = discovery::resolve_control_interface(host, serial)?;
        Ok(Self::with_transport(handle, config.processing_unit_id))
    }

    pub fn identity(&self) -> &DeviceIdentity {
        self.transport.identity()
    }
}

impl<T: ControlTransfer> UvcCamera<T> {
    pub fn with_transport(transport: T, processing_unit_id: u8) -> Self {
        Self {
            transport,
            processing_unit_id,
        }
    }

    fn read(&mut self, address: &ControlAddress, request: u8) -> Result<i32> {
        let setup = address.get_request(request);
        let mut buf = [0u8; uvc::CONTROL_LENGTH as usize];
        let failed = || CameraError::TransferFailed {
            request,
            selector: address.selector,
        };

        let read = self.transport.control_transfer(&setup, &mut buf).map_err(|err| {
            debug!(request, selector = address.selector, %err, "control read failed");
            failed()
        })?;
        let bytes = buf.get(..read).ok_or_else(failed)?;
        uvc::decode_value(bytes).ok_or_else(failed)
    }
}

impl<T: ControlTransfer> CameraControl for UvcCamera<T> {
    #[instrument(skip(self))]
    fn get_property(&mut self, kind: PropertyKind) -> Result<Property> {
        let address = ControlAddress::for_property(kind, self.processing_unit_id);
        let value = self.read(&address, GET_CUR)?;
        let min = self.read(&address, GET_MIN)?;
        let max = self.read(&address, GET_MAX)?;

        let property = Property::new(value, min, max);
        if !property.is_valid() {
            warn!(?property, "device reported value outside its own range");
        }
        debug!(?property, "read property");
        Ok(property)
    }

    #[instrument(skip(self))]
    fn set_property(&mut self, kind: PropertyKind, value: i32) -> Result<()> {
        let address = ControlAddress::for_property(kind, self.processing_unit_id);
        let setup = address.set_request();
        let mut payload = uvc::encode_value(value);

        let written = self
            .transport
            .control_transfer(&setup, &mut payload)
            .map_err(|err| {
                debug!(%err, "control write failed");
                CameraError::TransferFailed {
                    request: setup.request,
                    selector: address.selector,
                }
            })?;
        if written < payload.len() {
            return Err(CameraError::TransferFailed {
                request: setup.request,
                selector: address.selector,
            });
        }
        Ok(())
    }

    fn send_command(&mut self, command: &mut CommandInfo) -> Result<usize> {
        let setup = SetupPacket {
            request_type: command.request_type,
            request: command.request,
            value: command.value,
            index: command.index,
            length: u16::try_from(command.data.len()).unwrap_or(u16::MAX),
        };

        let moved = self
            .transport
            .control_transfer(&setup, &mut command.data)
            .map_err(|err| {
                debug!(?setup, %err, "command failed");
                CameraError::TransferFailed {
                    request: setup.request,
                    selector: setup.selector(),
                }
            })?;

        if setup.request_type & DIR_IN != 0 {
            command.data.truncate(moved);
        }
        Ok(moved)
    }
}
