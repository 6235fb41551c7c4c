//! Socket creation with an ordered list of fallback ports.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
};

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;

/// What to bind and how.
#[derive(Debug, Clone)]
pub struct BindRequest<'a> {
    /// The interface address, also the fallback when device binding is not possible.
    pub address: Ipv4Addr,
    /// Tried in order, the first one that binds wins. Port 0 asks the OS for any free port.
    pub ports: &'a [u16],
    /// Binds to the device instead of the address where the OS supports it.
    pub device: Option<&'a str>,
    /// Allows sending to broadcast addresses.
    pub broadcast: bool,
}

/// None of the ports could be bound.
#[derive(Debug, Error)]
#[error("Unable to bind {address} on any of {} ports (last error: {})", .attempts.len(), last_error(.attempts))]
pub struct BindError {
    pub address: Ipv4Addr,
    pub attempts: Vec<(u16, io::Error)>,
}

fn last_error(attempts: &[(u16, io::Error)]) -> String {
    attempts
        .last()
        .map(|(port, error)| format!("port {}: {}", port, error))
        .unwrap_or_else(|| "no ports given".to_owned())
}

/// Binds the first port of `request.ports` that is available.
///
/// Returns the socket and the port it was actually bound to.
///
/// # Errors
/// `BindError` carrying every attempt if none succeeds.
pub fn bind_udp(request: &BindRequest) -> Result<(UdpSocket, u16), BindError> {
    let mut attempts = Vec::with_capacity(request.ports.len());
    for &port in request.ports {
        match open(request, port) {
            Ok(socket) => {
                let bound = socket.local_addr().map(|address| address.port()).unwrap_or(port);
                debug!("Bound {}:{}", request.address, bound);
                return Ok((socket, bound));
            },
            Err(error) => {
                warn!("Unable to bind {}:{}: {}", request.address, port, error);
                attempts.push((port, error));
            },
        }
    }

    Err(BindError {
        address: request.address,
        attempts,
    })
}

fn open(request: &BindRequest, port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if request.broadcast {
        socket.set_broadcast(true)?;
    }
    let address = bind_device(&socket, request);
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(address, port)).into())?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// Returns the address to bind to: unspecified if the socket is now tied to the device.
#[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
fn bind_device(socket: &Socket, request: &BindRequest) -> Ipv4Addr {
    match request.device {
        Some(device) => match socket.bind_device(Some(device.as_bytes())) {
            Ok(()) => Ipv4Addr::UNSPECIFIED,
            Err(error) => {
                debug!(
                    "Unable to bind to device {} ({}), binding to {} instead",
                    device, error, request.address
                );
                request.address
            },
        },
        None => request.address,
    }
}

#[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
fn bind_device(_socket: &Socket, request: &BindRequest) -> Ipv4Addr {
    request.address
}
