//! Builds the PXE replies of one interface.

use std::net::Ipv4Addr;

use pxe_protocol::{
    constants::{PXE_CLIENT_CLASS, SIZE_MAC48, SIZE_MESSAGE_MINIMAL},
    EncodeError, HardwareType, Message, MessageType, OperationCode, OptionTag, Options,
};

use crate::{
    client_table::ClientTable,
    config::{AddressPool, ServerConfig},
    error::EncodingError,
    interface::{InterfaceDescriptor, LinkType},
    offer::{self, Reply},
};

/// Builds replies with the parameters of one interface, which do not change while it is served.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    /// The interface the replies leave through.
    interface: InterfaceDescriptor,
    /// Sent to clients in `server_ip_address`, option 54 and option 66.
    server_ip_address: Ipv4Addr,
    /// Sent to clients in the `sname` field.
    server_name: Vec<u8>,
    /// Sent to clients in options.
    subnet_mask: Ipv4Addr,
    /// Sent to clients in options.
    router: Ipv4Addr,
    /// Sent to clients in options.
    domain_name_servers: Vec<Ipv4Addr>,
    /// Sent to clients in options.
    lease_time: u32,
    /// Sent to clients in option 67 and the `file` field.
    boot_filename: String,

    pool: AddressPool,
    client_port: u16,
}

impl MessageBuilder {
    /// Creates a builder for `interface`.
    ///
    /// The configured gateway is only used if it is on the interface subnet, otherwise the
    /// route the OS reports for the interface, otherwise the interface address itself.
    pub fn new(config: &ServerConfig, interface: &InterfaceDescriptor) -> Self {
        let router = config
            .gateway
            .filter(|gateway| interface.contains(*gateway))
            .or(interface.gateway)
            .unwrap_or(interface.address);

        let domain_name_servers = if config.dns_servers.is_empty() {
            vec![interface.address]
        } else {
            config.dns_servers.clone()
        };

        MessageBuilder {
            interface           : interface.clone(),
            server_ip_address   : interface.address,
            server_name         : config.server_name.clone().unwrap_or_default().into_bytes(),
            subnet_mask         : config.subnet_mask.unwrap_or(interface.netmask),
            router,
            domain_name_servers,
            lease_time          : config.lease_time,
            boot_filename       : config.boot_filename.clone(),

            pool                : config.pool,
            client_port         : config.client_port,
        }
    }

    pub fn interface(&self) -> &InterfaceDescriptor {
        &self.interface
    }

    pub fn server_ip_address(&self) -> Ipv4Addr {
        self.server_ip_address
    }

    /// Builds the reply to `request`, received on the interface `origin`.
    ///
    /// `origin` is another interface for relayed requests. Returns `Ok(None)` if the request
    /// gets no answer.
    ///
    /// # Errors
    /// `EncodingError` if the reply cannot be encoded or misses what a PXE ROM requires.
    pub fn build(
        &self,
        request         : &Message,
        origin          : &str,
        clients         : &ClientTable,
    ) -> Result<Option<Reply>, EncodingError> {
        if request.operation_code != OperationCode::BootRequest {
            return Ok(None);
        }

        let reply_type = match request.options.dhcp_message_type {
            Some(MessageType::DhcpRequest) => {
                /*
                RFC 2131 §4.3.2
                If the DHCPREQUEST message contains a 'server identifier'
                option, the message is in response to a DHCPOFFER message.
                Otherwise, the message is a request to verify or extend an
                existing lease.
                */
                if let Some(server_id) = request.options.dhcp_server_id {
                    if server_id != self.server_ip_address {
                        trace!("DHCPREQUEST for server {} ignored on {}", server_id, self.interface.name);
                        return Ok(None);
                    }
                }
                MessageType::DhcpAck
            },
            Some(MessageType::DhcpRelease) | Some(MessageType::DhcpDecline) => return Ok(None),
            _ => MessageType::DhcpOffer,
        };

        let ordinal = clients.observe(request.client_hardware_address, origin);
        let your_ip_address = self.select_address(ordinal);

        let mut message = self.reply(request, reply_type, your_ip_address);
        let datagram = self.encode(&mut message)?;
        message.validate_pxe_reply()?;
        clients.record_offer(request.client_hardware_address, your_ip_address);

        let destinations = offer::destinations(
            self.interface.link_type,
            self.interface.broadcast,
            your_ip_address,
            self.client_port,
        );
        Ok(Some(Reply {
            message,
            datagram,
            destinations,
        }))
    }

    /// The address offered to the client with `ordinal` on this interface subnet.
    ///
    /// Host numbers cycle through the pool and stay within the subnet, skipping the
    /// network, broadcast and server addresses.
    pub fn select_address(&self, ordinal: u32) -> Ipv4Addr {
        let capacity = self.interface.host_capacity();
        if capacity == 0 {
            return self.server_ip_address;
        }

        let network = u32::from(self.interface.network());
        let offset = self.pool.first_host.saturating_sub(1) as u64 + (ordinal % self.pool.size.max(1)) as u64;
        let mut host = (offset % capacity as u64) as u32 + 1;
        if network + host == u32::from(self.server_ip_address) {
            host = host % capacity + 1;
        }
        Ipv4Addr::from(network + host)
    }

    fn reply(&self, request: &Message, reply_type: MessageType, your_ip_address: Ipv4Addr) -> Message {
        let mut options = Options::default();
        options.dhcp_message_type = Some(reply_type);
        options.dhcp_server_id = Some(self.server_ip_address);
        options.address_time = Some(self.lease_time);
        options.subnet_mask = Some(self.subnet_mask);
        options.routers = Some(vec![self.router]);
        options.domain_name_servers = Some(self.domain_name_servers.to_owned());
        options.tftp_server_name = Some(self.server_ip_address.to_string());
        options.bootfile_name = Some(self.boot_filename.to_owned());
        options.class_id = Some(PXE_CLIENT_CLASS.as_bytes().to_vec());
        if self.interface.link_type == LinkType::Ethernet {
            options.vendor_specific = Some(Options::pxe_vendor_specific());
        }

        Message {
            operation_code              : OperationCode::BootReply,
            hardware_type               : HardwareType::Ethernet,
            hardware_address_length     : SIZE_MAC48 as u8,
            hardware_options            : Default::default(),

            transaction_id              : request.transaction_id,
            seconds                     : Default::default(),
            is_broadcast                : request.is_broadcast,

            client_ip_address           : match reply_type {
                MessageType::DhcpAck => request.client_ip_address,
                _ => Ipv4Addr::UNSPECIFIED,
            },
            your_ip_address,
            server_ip_address           : self.server_ip_address,
            gateway_ip_address          : request.gateway_ip_address,

            client_hardware_address     : request.client_hardware_address,
            server_name                 : self.server_name.to_owned(),
            boot_filename               : self.boot_filename.as_bytes().to_vec(),

            options,
        }
    }

    /// Encodes within the minimal message size, dropping optional options if it overflows.
    fn encode(&self, message: &mut Message) -> Result<Vec<u8>, EncodingError> {
        loop {
            match message.to_vec() {
                Ok(datagram) => return Ok(datagram),
                Err(EncodeError::BufferTooSmall) => match drop_optional(&mut message.options) {
                    Some(tag) => warn!(
                        "The reply to {} overflows {} bytes, dropped option {}",
                        message.client_hardware_address.to_hex_string(),
                        SIZE_MESSAGE_MINIMAL,
                        tag
                    ),
                    None => return Err(EncodingError::Overflow { limit: SIZE_MESSAGE_MINIMAL }),
                },
                Err(EncodeError::OptionTooLong { tag, length }) => {
                    if !drop_tag(&mut message.options, tag) {
                        return Err(EncodeError::OptionTooLong { tag, length }.into());
                    }
                    warn!(
                        "Option {} of the reply to {} is {} bytes long, dropped",
                        tag,
                        message.client_hardware_address.to_hex_string(),
                        length
                    );
                },
                Err(error) => return Err(error.into()),
            }
        }
    }
}

/// Removes the least important optional option and returns its tag.
///
/// Options 53, 54, 66 and 67 are what a PXE ROM cannot boot without and are never dropped.
fn drop_optional(options: &mut Options) -> Option<u8> {
    if let Some(option) = options.other.pop() {
        return Some(option.tag);
    }
    if options.vendor_specific.take().is_some() {
        return Some(OptionTag::VendorSpecific as u8);
    }
    if options.class_id.take().is_some() {
        return Some(OptionTag::ClassId as u8);
    }
    if options.domain_name_servers.take().is_some() {
        return Some(OptionTag::DomainNameServers as u8);
    }
    if options.routers.take().is_some() {
        return Some(OptionTag::Routers as u8);
    }
    if options.subnet_mask.take().is_some() {
        return Some(OptionTag::SubnetMask as u8);
    }
    if options.address_time.take().is_some() {
        return Some(OptionTag::AddressTime as u8);
    }
    None
}

/// Removes the option `tag` if it is optional. Returns whether anything was removed.
fn drop_tag(options: &mut Options, tag: u8) -> bool {
    match OptionTag::from(tag) {
        OptionTag::VendorSpecific => options.vendor_specific.take().is_some(),
        OptionTag::ClassId => options.class_id.take().is_some(),
        OptionTag::DomainNameServers => options.domain_name_servers.take().is_some(),
        OptionTag::Routers => options.routers.take().is_some(),
        OptionTag::SubnetMask => options.subnet_mask.take().is_some(),
        OptionTag::AddressTime => options.address_time.take().is_some(),
        _ => {
            let count = options.other.len();
            options.other.retain(|option| option.tag != tag);
            options.other.len() != count
        },
    }
}
