pub mod device;
pub mod property;
pub mod transport;
pub mod uvc;

pub use device::{CameraControl, CommandInfo, UvcCamera};
pub use property::{Property, PropertyKind};
pub use transport::{ControlTransfer, SetupPacket};
