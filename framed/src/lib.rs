//! UDP socket plumbing shared by the DHCP listeners, the relay tunnel and TFTP sessions.

#[macro_use]
extern crate log;

mod bind;
mod socket;

pub use self::{
    bind::{bind_udp, BindError, BindRequest},
    socket::{DhcpFramed, Frame, BUFFER_READ_CAPACITY},
};
