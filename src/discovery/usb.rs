//! libusb-backed [`UsbHost`]

use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, UsbContext};
use tracing::{debug, warn};

use super::{InterfaceInfo, UsbDeviceInfo, UsbHost};
use crate::control::transport::{ControlTransfer, SetupPacket};
use crate::error::{CameraError, Result};
use crate::ControlConfig;

pub struct RusbHost {
    context: Context,
    timeout: Duration,
    claim_interface: bool,
}

impl RusbHost {
    pub fn new(config: &ControlConfig) -> Result<Self> {
        Ok(Self {
            context: Context::new()?,
            timeout: Duration::from_millis(config.transfer_timeout_ms),
            claim_interface: config.claim_interface,
        })
    }

    fn path_of(device: &Device<Context>) -> String {
        format!("{:03}:{:03}", device.bus_number(), device.address())
    }

    fn find(&self, info: &UsbDeviceInfo) -> Result<Device<Context>> {
        self.context
            .devices()?
            .iter()
            .find(|device| Self::path_of(device) == info.path)
            .ok_or(CameraError::DeviceNotFound)
    }
}

impl UsbHost for RusbHost {
    fn devices(&self) -> Result<Vec<UsbDeviceInfo>> {
        let mut found = Vec::new();
        for device in self.context.devices()?.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(err) => {
                    debug!(path = %Self::path_of(&device), %err, "skipping device without descriptor");
                    continue;
                }
            };

            let interfaces = match device.active_config_descriptor() {
                Ok(config) => config
                    .interfaces()
                    .flat_map(|interface| {
                        interface
                            .descriptors()
                            .map(|alt| InterfaceInfo {
                                number: alt.interface_number(),
                                class_code: alt.class_code(),
                                sub_class_code: alt.sub_class_code(),
                            })
                            .collect::<Vec<_>>()
                    })
                    .collect(),
                Err(_) => Vec::new(),
            };

            found.push(UsbDeviceInfo {
                vendor_id: desc.vendor_id(),
                product_id: desc.product_id(),
                serial_index: desc.serial_number_string_index().unwrap_or(0),
                interfaces,
                path: Self::path_of(&device),
            });
        }
        Ok(found)
    }

    fn open_device(&self, device: &UsbDeviceInfo) -> Result<Box<dyn ControlTransfer>> {
        let handle = self.find(device)?.open()?;
        Ok(Box::new(RusbTransport {
            handle,
            timeout: self.timeout,
            claimed: None,
        }))
    }

    fn open_interface(
        &self,
        device: &UsbDeviceInfo,
        interface: u8,
    ) -> Result<Box<dyn ControlTransfer>> {
        let handle = self.find(device)?.open()?;
        let mut claimed = None;
        if self.claim_interface {
            match handle.claim_interface(interface) {
                Ok(()) => claimed = Some(interface),
                // The video driver usually owns the control interface;
                // class requests still go through unclaimed.
                Err(rusb::Error::Busy) => {
                    warn!(path = %device.path, interface, "interface busy, using it unclaimed")
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(Box::new(RusbTransport {
            handle,
            timeout: self.timeout,
            claimed,
        }))
    }
}

struct RusbTransport {
    handle: DeviceHandle<Context>,
    timeout: Duration,
    claimed: Option<u8>,
}

impl ControlTransfer for RusbTransport {
    fn control_transfer(&mut self, setup: &SetupPacket, data: &mut [u8]) -> Result<usize> {
        let length = usize::from(setup.length).min(data.len());
        let moved = if setup.is_in() {
            self.handle.read_control(
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                &mut data[..length],
                self.timeout,
            )?
        } else {
            self.handle.write_control(
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                &data[..length],
                self.timeout,
            )?
        };
        Ok(moved)
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        if let Some(interface) = self.claimed.take() {
            if let Err(err) = self.handle.release_interface(interface) {
                debug!(interface, %err, "failed to release interface");
            }
        }
    }
}
