//! Wire codecs of the PXE boot bridge: BOOTP/DHCP messages and TFTP packets.
//!
//! Both are pure transformations between byte slices and typed values.

pub mod dhcp;
pub mod tftp;

mod error;

pub use self::{
    dhcp::{
        constants, HardwareType, Message, MessageType, OperationCode, OptionTag, Options,
        RawOption, ValidationError,
    },
    error::{DecodeError, EncodeError, PacketError},
};
