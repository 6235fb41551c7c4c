//! Network interface descriptors and the registry the engine reads them from.
//!
//! Enumerating the OS interfaces is left to an `InterfaceSource`, the engine only
//! ever sees a snapshot.

use std::{fmt, io, net::Ipv4Addr, str::FromStr};

use eui48::MacAddress;
use serde::Deserialize;

/// The kind of link an interface sits on. Decides how offers are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Ethernet,
    Wireless,
    Usb,
    Loopback,
}

impl LinkType {
    /// Guesses the link type from a conventional interface name.
    ///
    /// Anything unrecognized is treated as wired.
    pub fn guess(name: &str) -> Self {
        const WIRELESS: [&str; 2] = ["wl", "wifi"];
        const USB: [&str; 3] = ["usb", "enx", "rndis"];

        let name = name.to_ascii_lowercase();
        if name == "lo" || name.starts_with("lo:") {
            LinkType::Loopback
        } else if WIRELESS.iter().any(|prefix| name.starts_with(prefix)) {
            LinkType::Wireless
        } else if USB.iter().any(|prefix| name.starts_with(prefix)) {
            LinkType::Usb
        } else {
            LinkType::Ethernet
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LinkType::Ethernet => write!(f, "ethernet"),
            LinkType::Wireless => write!(f, "wireless"),
            LinkType::Usb => write!(f, "usb"),
            LinkType::Loopback => write!(f, "loopback"),
        }
    }
}

impl FromStr for LinkType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "ethernet" => Ok(LinkType::Ethernet),
            "wireless" => Ok(LinkType::Wireless),
            "usb" => Ok(LinkType::Usb),
            "loopback" => Ok(LinkType::Loopback),
            other => Err(format!("Unknown link type: {}", other)),
        }
    }
}

/// A network interface as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceDescriptor {
    pub name: String,
    pub link_type: LinkType,
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub broadcast: Ipv4Addr,
    #[serde(default)]
    pub hardware_address: MacAddress,
    /// The default route through this interface, if the OS has one.
    #[serde(default)]
    pub gateway: Option<Ipv4Addr>,
    #[serde(default = "is_active_default")]
    pub is_active: bool,
}

fn is_active_default() -> bool {
    true
}

impl InterfaceDescriptor {
    /// Creates an active descriptor from an address and a prefix length.
    ///
    /// The link type is guessed from the name.
    pub fn new(name: &str, address: Ipv4Addr, prefix_length: u8, hardware_address: MacAddress) -> Self {
        let netmask = prefix_to_netmask(prefix_length);
        InterfaceDescriptor {
            name                : name.to_owned(),
            link_type           : LinkType::guess(name),
            address,
            netmask,
            broadcast           : Ipv4Addr::from(u32::from(address) | !u32::from(netmask)),
            hardware_address,
            gateway             : None,
            is_active           : true,
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) & u32::from(self.netmask))
    }

    /// The number of usable host addresses, without the network and broadcast ones.
    pub fn host_capacity(&self) -> u32 {
        (!u32::from(self.netmask)).saturating_sub(1)
    }

    pub fn contains(&self, address: Ipv4Addr) -> bool {
        u32::from(address) & u32::from(self.netmask) == u32::from(self.network())
    }

    /// Only active non-loopback interfaces get a DHCP listener.
    pub fn is_dhcp_candidate(&self) -> bool {
        self.is_active && self.link_type != LinkType::Loopback
    }
}

pub fn prefix_to_netmask(prefix_length: u8) -> Ipv4Addr {
    match prefix_length {
        0 => Ipv4Addr::UNSPECIFIED,
        length if length >= 32 => Ipv4Addr::BROADCAST,
        length => Ipv4Addr::from(!0u32 << (32 - u32::from(length))),
    }
}

/// The OS-specific side: lists the interfaces with their addresses.
pub trait InterfaceSource {
    /// # Errors
    /// `io::Error` if the OS cannot be queried.
    fn enumerate(&self) -> io::Result<Vec<InterfaceDescriptor>>;
}

/// A fixed list, e.g. from the configuration file.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces {
    interfaces: Vec<InterfaceDescriptor>,
}

impl StaticInterfaces {
    pub fn new(interfaces: Vec<InterfaceDescriptor>) -> Self {
        StaticInterfaces { interfaces }
    }
}

impl InterfaceSource for StaticInterfaces {
    fn enumerate(&self) -> io::Result<Vec<InterfaceDescriptor>> {
        Ok(self.interfaces.clone())
    }
}

/// A snapshot of the interfaces, refreshed on demand.
#[derive(Debug, Clone, Default)]
pub struct InterfaceRegistry {
    interfaces: Vec<InterfaceDescriptor>,
}

impl InterfaceRegistry {
    pub fn new(interfaces: Vec<InterfaceDescriptor>) -> Self {
        let mut registry = InterfaceRegistry::default();
        registry.replace(interfaces);
        registry
    }

    /// # Errors
    /// `io::Error` if the source fails.
    pub fn from_source(source: &dyn InterfaceSource) -> io::Result<Self> {
        Ok(Self::new(source.enumerate()?))
    }

    /// Replaces the snapshot with what the source reports now.
    ///
    /// # Errors
    /// `io::Error` if the source fails, the old snapshot is kept then.
    pub fn refresh(&mut self, source: &dyn InterfaceSource) -> io::Result<()> {
        let interfaces = source.enumerate()?;
        self.replace(interfaces);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&InterfaceDescriptor> {
        self.interfaces.iter().find(|interface| interface.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InterfaceDescriptor> {
        self.interfaces.iter()
    }

    pub fn dhcp_candidates(&self) -> impl Iterator<Item = &InterfaceDescriptor> {
        self.interfaces.iter().filter(|interface| interface.is_dhcp_candidate())
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    /// Keeps the first descriptor of every name, names identify listeners and tunnel routes.
    fn replace(&mut self, interfaces: Vec<InterfaceDescriptor>) {
        self.interfaces.clear();
        for interface in interfaces {
            if self.get(&interface.name).is_some() {
                warn!("Ignoring a duplicate interface {}", interface.name);
                continue;
            }
            self.interfaces.push(interface);
        }
    }
}
