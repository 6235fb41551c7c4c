//! The main DHCP socket module.

use std::{io, net::SocketAddr};

use bytes::Bytes;
use tokio::net::UdpSocket;

use pxe_protocol::{DecodeError, Message};

/// Must be enough to decode all the options.
pub const BUFFER_READ_CAPACITY: usize = 8192;

/// A received datagram.
///
/// The raw bytes are kept next to the decoding result, since the relay forwards
/// the request exactly as it arrived.
#[derive(Debug)]
pub struct Frame {
    pub source: SocketAddr,
    pub raw: Bytes,
    pub message: Result<Message, DecodeError>,
}

/// A UDP socket exchanging DHCP messages.
///
/// Shared between the receive loop and the handlers it spawns, so every method takes `&self`.
pub struct DhcpFramed {
    /// `tokio::net::UdpSocket`.
    socket: UdpSocket,
}

impl DhcpFramed {
    pub fn new(socket: UdpSocket) -> Self {
        DhcpFramed { socket }
    }

    /// # Errors
    /// `io::Error` if the socket is gone.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Waits for the next datagram and decodes it.
    ///
    /// A datagram that is not a BOOTP message is still returned, with the error in `Frame::message`.
    ///
    /// # Errors
    /// `io::Error` on a socket error.
    pub async fn recv(&self) -> io::Result<Frame> {
        let mut buf_read = vec![0u8; BUFFER_READ_CAPACITY];
        let (amount, source) = self.socket.recv_from(&mut buf_read).await?;
        buf_read.truncate(amount);

        let raw = Bytes::from(buf_read);
        let message = Message::from_bytes(&raw);
        Ok(Frame {
            source,
            raw,
            message,
        })
    }

    /// Sends an already encoded datagram.
    ///
    /// # Errors
    /// `io::Error` on a socket error or a partial write.
    pub async fn send_to(&self, datagram: &[u8], destination: SocketAddr) -> io::Result<()> {
        let sent = self.socket.send_to(datagram, destination).await?;
        if sent != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "Failed to write entire datagram to socket",
            ));
        }
        trace!("Sent {} bytes to {}", sent, destination);
        Ok(())
    }
}
