//! The one USB primitive everything else is built on: a single control transfer

use crate::error::Result;

pub const DIR_OUT: u8 = 0x00;
pub const DIR_IN: u8 = 0x80;
pub const TYPE_STANDARD: u8 = 0x00;
pub const TYPE_CLASS: u8 = 0x20;
pub const RECIPIENT_DEVICE: u8 = 0x00;
pub const RECIPIENT_INTERFACE: u8 = 0x01;

/// `bmRequestType` from its three fields.
pub const fn request_type(direction: u8, kind: u8, recipient: u8) -> u8 {
    direction | kind | recipient
}

/// USB setup packet of a control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub fn is_in(&self) -> bool {
        self.request_type & DIR_IN != 0
    }

    /// Control selector carried in the high byte of `wValue`.
    pub fn selector(&self) -> u8 {
        (self.value >> 8) as u8
    }
}

pub trait ControlTransfer: Send {
    /// Issue one control transfer. For IN transfers at most `setup.length`
    /// bytes are read into `data`; for OUT transfers the first
    /// `setup.length` bytes of `data` are sent. Returns the bytes moved.
    fn control_transfer(&mut self, setup: &SetupPacket, data: &mut [u8]) -> Result<usize>;
}

impl<T: ControlTransfer + ?Sized> ControlTransfer for Box<T> {
    fn control_transfer(&mut self, setup: &SetupPacket, data: &mut [u8]) -> Result<usize> {
        (**self).control_transfer(setup, data)
    }
}
