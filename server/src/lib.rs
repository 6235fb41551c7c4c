//! The PXE boot bridge engine.
//!
//! Answers PXE DHCP requests on every interface, relays them between interfaces
//! that cannot see each other and serves the boot files over TFTP.

#[macro_use]
extern crate log;

#[macro_use]
mod macros;

mod builder;
mod client_table;
mod config;
mod engine;
mod error;
mod event;
mod interface;
mod listener;
mod offer;
mod tftp;
mod tunnel;

pub use self::{
    builder::MessageBuilder,
    client_table::{ClientRecord, ClientTable},
    config::{AddressPool, ConfigFile, ServerConfig, TFTP_PORT, TUNNEL_PORT},
    engine::{Engine, Handle},
    error::{EncodingError, Error, TransferError},
    event::{Event, EVENT_CHANNEL_CAPACITY},
    interface::{prefix_to_netmask, InterfaceDescriptor, InterfaceRegistry, InterfaceSource, LinkType, StaticInterfaces},
    listener::{Action, Dispatcher, Inbound, Listener, ListenerState},
    offer::{destinations, Reply},
    tftp::{BootRoot, Responder, Session, SessionSettings, SessionState},
    tunnel::{FrameKind, Forwarder, TunnelClient, TunnelFrame, RELAY_QUEUE_CAPACITY},
};
