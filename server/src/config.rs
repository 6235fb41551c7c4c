//! Engine configuration.

use std::{fs, net::Ipv4Addr, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;

use pxe_protocol::constants::{
    DHCP_PORT_CLIENT, DHCP_PORT_SERVER, SIZE_BOOT_FILENAME, SIZE_SERVER_NAME,
};

use crate::{error::Error, interface::InterfaceDescriptor};

/// The well-known TFTP port.
pub const TFTP_PORT: u16 = 69;

/// Default loopback port of the relay tunnel.
pub const TUNNEL_PORT: u16 = 9000;

/// The address pool every interface subnet offers from.
///
/// Host numbers are relative to the subnet: with `first_host` 150 a /24 subnet
/// offers `x.y.z.150` and up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AddressPool {
    pub first_host: u32,
    pub size: u32,
}

impl Default for AddressPool {
    fn default() -> Self {
        AddressPool {
            first_host  : 150,
            size        : 50,
        }
    }
}

/// Everything the listeners, the relay and the TFTP responder are parameterized with.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Sent to clients in the `sname` field. Defaults to the hostname when loaded from a file.
    pub server_name: Option<String>,
    /// Sent to clients in options. Defaults to each interface's own netmask.
    pub subnet_mask: Option<Ipv4Addr>,
    /// Sent to clients in options if it belongs to the interface subnet.
    pub gateway: Option<Ipv4Addr>,
    /// Sent to clients in options. Defaults to each interface's own address.
    pub dns_servers: Vec<Ipv4Addr>,
    /// Sent to clients in options, in seconds.
    pub lease_time: u32,
    /// Sent to clients in option 67 and in the legacy `file` field.
    pub boot_filename: String,
    /// The directory TFTP serves files from.
    pub boot_root: PathBuf,

    pub dhcp_port: u16,
    pub dhcp_fallback_ports: Vec<u16>,
    /// The port replies are sent to.
    pub client_port: u16,
    pub tftp_address: Ipv4Addr,
    pub tftp_port: u16,
    pub tftp_fallback_ports: Vec<u16>,
    pub tftp_timeout_ms: u64,
    /// Retransmissions of a block after the first send.
    pub tftp_retries: u32,
    /// Falls back to an ephemeral port if taken.
    pub tunnel_port: u16,

    pub pool: AddressPool,
    /// Relays requests between interfaces when more than one is bound.
    pub relay: bool,
    /// Ties DHCP sockets to their device where the OS allows it.
    pub bind_to_device: bool,
    /// How often blocked loops look at the shutdown flag.
    pub poll_interval_ms: u64,
    /// Requests handled concurrently per listener, the rest are dropped.
    pub max_in_flight: usize,
    /// TFTP transfers running at once, further read requests are dropped.
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            server_name             : None,
            subnet_mask             : None,
            gateway                 : None,
            dns_servers             : Vec::new(),
            lease_time              : 86400,
            boot_filename           : "pxelinux.0".to_owned(),
            boot_root               : PathBuf::from("/srv/tftp"),

            dhcp_port               : DHCP_PORT_SERVER,
            dhcp_fallback_ports     : vec![6767, 6700],
            client_port             : DHCP_PORT_CLIENT,
            tftp_address            : Ipv4Addr::UNSPECIFIED,
            tftp_port               : TFTP_PORT,
            tftp_fallback_ports     : vec![6969, 6900],
            tftp_timeout_ms         : 5000,
            tftp_retries            : 3,
            tunnel_port             : TUNNEL_PORT,

            pool                    : AddressPool::default(),
            relay                   : true,
            bind_to_device          : true,
            poll_interval_ms        : 1000,
            max_in_flight           : 64,
            max_sessions            : 32,
        }
    }
}

impl ServerConfig {
    /// The primary DHCP port followed by the fallbacks.
    pub fn dhcp_ports(&self) -> Vec<u16> {
        with_fallbacks(self.dhcp_port, &self.dhcp_fallback_ports)
    }

    /// The primary TFTP port followed by the fallbacks.
    pub fn tftp_ports(&self) -> Vec<u16> {
        with_fallbacks(self.tftp_port, &self.tftp_fallback_ports)
    }

    /// The tunnel port followed by an ephemeral one.
    pub fn tunnel_ports(&self) -> Vec<u16> {
        with_fallbacks(self.tunnel_port, &[0])
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tftp_timeout(&self) -> Duration {
        Duration::from_millis(self.tftp_timeout_ms)
    }

    /// Checks the values nothing downstream can recover from.
    ///
    /// # Errors
    /// `Error::Config` describing the first offending value.
    pub fn validate(&self) -> Result<(), Error> {
        // the legacy field keeps a terminating NUL
        if self.boot_filename.is_empty() || self.boot_filename.len() >= SIZE_BOOT_FILENAME {
            return Err(Error::Config(format!(
                "boot filename must be 1 to {} bytes long",
                SIZE_BOOT_FILENAME - 1
            )));
        }
        if let Some(ref server_name) = self.server_name {
            if server_name.len() >= SIZE_SERVER_NAME {
                return Err(Error::Config(format!(
                    "server name must be shorter than {} bytes",
                    SIZE_SERVER_NAME
                )));
            }
        }
        if self.pool.size == 0 || self.pool.first_host == 0 {
            return Err(Error::Config("the address pool must be non-empty and start above host 0".to_owned()));
        }
        if self.poll_interval_ms == 0 || self.tftp_timeout_ms == 0 {
            return Err(Error::Config("intervals and timeouts must be positive".to_owned()));
        }
        if self.max_in_flight == 0 {
            return Err(Error::Config("at least one request must be allowed in flight".to_owned()));
        }
        if self.max_sessions == 0 {
            return Err(Error::Config("at least one TFTP session must be allowed".to_owned()));
        }
        Ok(())
    }
}

fn with_fallbacks(primary: u16, fallbacks: &[u16]) -> Vec<u16> {
    let mut ports = vec![primary];
    ports.extend(fallbacks.iter().filter(|port| **port != primary));
    ports
}

/// The on-disk layout: engine settings and the interfaces to serve.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub server: ServerConfig,
    pub interfaces: Vec<InterfaceDescriptor>,
}

impl ConfigFile {
    /// Reads and validates a YAML configuration.
    ///
    /// # Errors
    /// `Error::Io` if the file cannot be read, `Error::ConfigFormat` if it is not valid YAML
    /// of the expected shape, `Error::Config` if a value is out of range.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        let mut file = Self::from_yaml(&contents)?;
        if file.server.server_name.is_none() {
            file.server.server_name = default_server_name();
        }
        file.server.validate()?;
        Ok(file)
    }

    /// # Errors
    /// `Error::ConfigFormat` if the document does not match.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

/// The machine hostname, if it fits into the `sname` field.
fn default_server_name() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty() && name.len() < SIZE_SERVER_NAME)
}
