//! A built reply ready to be sent.

use std::net::{Ipv4Addr, SocketAddr};

use pxe_protocol::{Message, MessageType};

use crate::interface::LinkType;

/// The encoded reply and everywhere it has to go.
#[derive(Debug, Clone)]
pub struct Reply {
    pub message: Message,
    pub datagram: Vec<u8>,
    pub destinations: Vec<SocketAddr>,
}

impl Reply {
    pub fn message_type(&self) -> MessageType {
        self.message
            .options
            .dhcp_message_type
            .unwrap_or(MessageType::Undefined)
    }
}

/// Where a reply from an interface of `link_type` is sent.
///
/// A client without an address cannot receive unicast reliably, so the reply is broadcast.
/// Wired segments also get a unicast to the offered address, some ROMs listen for that only.
/// Wireless and USB links broadcast to all ones, their subnet broadcast is often filtered.
pub fn destinations(
    link_type       : LinkType,
    broadcast       : Ipv4Addr,
    your_ip_address : Ipv4Addr,
    client_port     : u16,
) -> Vec<SocketAddr> {
    match link_type {
        LinkType::Ethernet => {
            let mut destinations = vec![SocketAddr::from((broadcast, client_port))];
            if !your_ip_address.is_unspecified() && your_ip_address != broadcast {
                destinations.push(SocketAddr::from((your_ip_address, client_port)));
            }
            destinations
        },
        LinkType::Wireless | LinkType::Usb => vec![SocketAddr::from((Ipv4Addr::BROADCAST, client_port))],
        LinkType::Loopback => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ethernet_broadcasts_and_unicasts() {
        let destinations = destinations(
            LinkType::Ethernet,
            Ipv4Addr::new(192, 168, 1, 255),
            Ipv4Addr::new(192, 168, 1, 150),
            68,
        );

        assert_eq!(
            destinations,
            vec![
                "192.168.1.255:68".parse::<SocketAddr>().unwrap(),
                "192.168.1.150:68".parse::<SocketAddr>().unwrap(),
            ]
        );
    }

    #[test]
    fn wireless_broadcasts_to_all_ones() {
        let destinations = destinations(
            LinkType::Wireless,
            Ipv4Addr::new(10, 0, 0, 255),
            Ipv4Addr::new(10, 0, 0, 150),
            68,
        );

        assert_eq!(destinations, vec!["255.255.255.255:68".parse::<SocketAddr>().unwrap()]);
    }
}
