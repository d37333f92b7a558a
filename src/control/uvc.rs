//! UVC processing-unit control requests
//!
//! Every supported control is a 2-byte little-endian signed field on the
//! processing unit. `wValue` carries the selector in its high byte and
//! `wIndex` the unit id in its high byte.

use super::property::PropertyKind;
use super::transport::{
    request_type, SetupPacket, DIR_IN, DIR_OUT, RECIPIENT_INTERFACE, TYPE_CLASS,
};

pub const SET_CUR: u8 = 0x01;
pub const GET_CUR: u8 = 0x81;
pub const GET_MIN: u8 = 0x82;
pub const GET_MAX: u8 = 0x83;
pub const GET_DEF: u8 = 0x87;

pub const PROCESSING_UNIT_ID: u8 = 0x02;

/// Width of every control in this set.
pub const CONTROL_LENGTH: u16 = 2;

pub const PU_BRIGHTNESS_CONTROL: u8 = 0x02;
pub const PU_CONTRAST_CONTROL: u8 = 0x03;
pub const PU_SATURATION_CONTROL: u8 = 0x07;
pub const PU_SHARPNESS_CONTROL: u8 = 0x08;
pub const PU_WHITE_BALANCE_TEMPERATURE_CONTROL: u8 = 0x0A;

/// Where a control lives on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlAddress {
    pub selector: u8,
    pub unit_id: u8,
    pub length: u16,
}

impl ControlAddress {
    pub fn for_property(kind: PropertyKind, processing_unit_id: u8) -> Self {
        let selector = match kind {
            PropertyKind::Brightness => PU_BRIGHTNESS_CONTROL,
            PropertyKind::Contrast => PU_CONTRAST_CONTROL,
            PropertyKind::Saturation => PU_SATURATION_CONTROL,
            PropertyKind::Sharpness => PU_SHARPNESS_CONTROL,
            PropertyKind::WhiteBalance => PU_WHITE_BALANCE_TEMPERATURE_CONTROL,
        };
        Self {
            selector,
            unit_id: processing_unit_id,
            length: CONTROL_LENGTH,
        }
    }

    fn setup(&self, request_type: u8, request: u8) -> SetupPacket {
        SetupPacket {
            request_type,
            request,
            value: u16::from(self.selector) << 8,
            index: u16::from(self.unit_id) << 8,
            length: self.length,
        }
    }

    /// One of `GET_CUR`, `GET_MIN`, `GET_MAX`, `GET_DEF`.
    pub fn get_request(&self, request: u8) -> SetupPacket {
        self.setup(request_type(DIR_IN, TYPE_CLASS, RECIPIENT_INTERFACE), request)
    }

    pub fn set_request(&self) -> SetupPacket {
        self.setup(request_type(DIR_OUT, TYPE_CLASS, RECIPIENT_INTERFACE), SET_CUR)
    }
}

/// Values outside the 16-bit range keep their low 16 bits; the device is the
/// one that accepts or rejects a value.
pub fn encode_value(value: i32) -> [u8; 2] {
    (value as i16).to_le_bytes()
}

pub fn decode_value(bytes: &[u8]) -> Option<i32> {
    match bytes {
        [lo, hi, ..] => Some(i32::from(i16::from_le_bytes([*lo, *hi]))),
        _ => None,
    }
}
