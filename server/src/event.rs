//! Engine events, published on a broadcast channel.

use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr},
};

use eui48::MacAddress;
use tokio::sync::broadcast;

use pxe_protocol::MessageType;

/// The capacity of the event channel. Slow subscribers lag instead of blocking the engine.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something observable that happened inside the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ListenerBound {
        interface: String,
        address: SocketAddr,
    },
    ListenerDisabled {
        interface: String,
        reason: String,
    },
    RelayBound {
        address: SocketAddr,
    },
    RequestSeen {
        interface: String,
        client: MacAddress,
        transaction_id: u32,
        kind: String,
        relayed: bool,
    },
    ReplySent {
        interface: String,
        client: MacAddress,
        transaction_id: u32,
        message_type: MessageType,
        your_ip_address: Ipv4Addr,
    },
    ReplyFailed {
        interface: String,
        client: MacAddress,
        reason: String,
    },
    RelayFailed {
        source: String,
        target: String,
        reason: String,
    },
    TftpBound {
        address: SocketAddr,
    },
    TransferCompleted {
        peer: SocketAddr,
        filename: String,
        bytes: usize,
    },
    TransferFailed {
        peer: SocketAddr,
        filename: String,
        reason: String,
    },
    Stopped,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Event::ListenerBound { interface, address } => {
                write!(f, "DHCP listener on {} bound to {}", interface, address)
            },
            Event::ListenerDisabled { interface, reason } => {
                write!(f, "DHCP listener on {} disabled: {}", interface, reason)
            },
            Event::RelayBound { address } => write!(f, "Relay tunnel bound to {}", address),
            Event::RequestSeen {
                interface,
                client,
                transaction_id,
                kind,
                relayed,
            } => write!(
                f,
                "{} {:#010x} from {} on {}{}",
                kind,
                transaction_id,
                client.to_hex_string(),
                interface,
                if *relayed { " (relayed)" } else { "" }
            ),
            Event::ReplySent {
                interface,
                client,
                transaction_id,
                message_type,
                your_ip_address,
            } => write!(
                f,
                "{} {:#010x} with {} to {} on {}",
                message_type,
                transaction_id,
                your_ip_address,
                client.to_hex_string(),
                interface
            ),
            Event::ReplyFailed {
                interface,
                client,
                reason,
            } => write!(
                f,
                "Reply to {} on {} failed: {}",
                client.to_hex_string(),
                interface,
                reason
            ),
            Event::RelayFailed {
                source,
                target,
                reason,
            } => write!(f, "Relay from {} to {} failed: {}", source, target, reason),
            Event::TftpBound { address } => write!(f, "TFTP bound to {}", address),
            Event::TransferCompleted {
                peer,
                filename,
                bytes,
            } => write!(f, "Sent {} ({} bytes) to {}", filename, bytes, peer),
            Event::TransferFailed {
                peer,
                filename,
                reason,
            } => write!(f, "Transfer of {} to {} failed: {}", filename, peer, reason),
            Event::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Publishes an event. Nobody listening is not an error.
pub(crate) fn publish(events: &broadcast::Sender<Event>, event: Event) {
    let _ = events.send(event);
}
