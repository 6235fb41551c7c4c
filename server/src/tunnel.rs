//! Loopback tunnel relaying DHCP datagrams between interfaces whose broadcast
//! domains the OS keeps apart.
//!
//! Every listener pushes frames to the forwarder, which hands them to every other
//! listener. A frame is `[kind: u8][name length: u8][source interface name][datagram]`.

use std::{
    collections::BTreeMap,
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::{
    net::UdpSocket,
    sync::{broadcast, mpsc},
    time,
};

use pxe_framed::{bind_udp, BindError, BindRequest, BUFFER_READ_CAPACITY};

use crate::event::{publish, Event};

/// Frames queued per listener before the forwarder starts dropping them.
pub const RELAY_QUEUE_CAPACITY: usize = 64;

const SIZE_FRAME_PREFIX: usize = 2;

/// What the datagram inside a frame is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A client request to be answered by the other listeners.
    Request = 1,
    /// A server reply to be broadcast on the other segments.
    Reply = 2,
}

impl FrameKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(FrameKind::Request),
            2 => Some(FrameKind::Reply),
            _ => None,
        }
    }
}

/// A datagram in transit between listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelFrame {
    pub kind: FrameKind,
    /// The interface the datagram was received on or built for.
    pub source: String,
    pub datagram: Bytes,
}

impl TunnelFrame {
    pub fn new(kind: FrameKind, source: &str, datagram: Bytes) -> Self {
        TunnelFrame {
            kind,
            source: source.to_owned(),
            datagram,
        }
    }

    /// # Errors
    /// `io::ErrorKind::InvalidInput` if the interface name does not fit its length octet.
    pub fn to_bytes(&self) -> io::Result<Bytes> {
        let name = self.source.as_bytes();
        if name.len() > u8::max_value() as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Interface name is too long for a tunnel frame",
            ));
        }

        let mut dst = BytesMut::with_capacity(SIZE_FRAME_PREFIX + name.len() + self.datagram.len());
        dst.put_u8(self.kind as u8);
        dst.put_u8(name.len() as u8);
        dst.put_slice(name);
        dst.put_slice(&self.datagram);
        Ok(dst.freeze())
    }

    /// Returns `None` for anything that is not a well-formed frame.
    pub fn from_bytes(src: Bytes) -> Option<Self> {
        if src.len() < SIZE_FRAME_PREFIX {
            return None;
        }
        let kind = FrameKind::from_u8(src[0])?;
        let end = SIZE_FRAME_PREFIX + src[1] as usize;
        if src.len() < end {
            return None;
        }
        let source = String::from_utf8(src[SIZE_FRAME_PREFIX..end].to_vec()).ok()?;

        Some(TunnelFrame {
            kind,
            source,
            datagram: src.slice(end..),
        })
    }
}

/// A listener's way into the tunnel.
pub struct TunnelClient {
    socket: UdpSocket,
    forwarder: SocketAddr,
}

impl TunnelClient {
    /// # Errors
    /// `io::Error` if no loopback port is available.
    pub async fn bind(forwarder: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        Ok(TunnelClient { socket, forwarder })
    }

    /// # Errors
    /// `io::Error` if the frame cannot be encoded or sent.
    pub async fn send(&self, frame: &TunnelFrame) -> io::Result<()> {
        let bytes = frame.to_bytes()?;
        self.socket.send_to(&bytes, self.forwarder).await?;
        Ok(())
    }
}

/// Receives frames on the loopback and fans them out to the listeners.
pub struct Forwarder {
    socket: UdpSocket,
    routes: BTreeMap<String, mpsc::Sender<TunnelFrame>>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
    events: broadcast::Sender<Event>,
}

impl Forwarder {
    /// Binds the loopback address on the first available of `ports`.
    ///
    /// # Errors
    /// `BindError` if none is available.
    pub fn bind(
        ports           : &[u16],
        shutdown        : Arc<AtomicBool>,
        poll_interval   : Duration,
        events          : broadcast::Sender<Event>,
    ) -> Result<Self, BindError> {
        let request = BindRequest {
            address: Ipv4Addr::LOCALHOST,
            ports,
            device: None,
            broadcast: false,
        };
        let (socket, _) = bind_udp(&request)?;

        Ok(Forwarder {
            socket,
            routes: BTreeMap::new(),
            shutdown,
            poll_interval,
            events,
        })
    }

    /// # Errors
    /// `io::Error` if the socket is gone.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Registers the listener of `interface`.
    pub fn add_route(&mut self, interface: &str, sender: mpsc::Sender<TunnelFrame>) {
        self.routes.insert(interface.to_owned(), sender);
    }

    /// Forwards frames until shutdown.
    pub async fn run(self) {
        let mut buf_read = vec![0u8; SIZE_FRAME_PREFIX + u8::max_value() as usize + BUFFER_READ_CAPACITY];

        while !self.shutdown.load(Ordering::SeqCst) {
            let (amount, source) = match time::timeout(self.poll_interval, self.socket.recv_from(&mut buf_read)).await {
                Err(_elapsed) => continue,
                Ok(Err(error)) => {
                    warn!("Tunnel socket error: {}", error);
                    continue;
                },
                Ok(Ok(received)) => received,
            };
            if !source.ip().is_loopback() {
                warn!("Ignoring a tunnel datagram from {}", source);
                continue;
            }

            match TunnelFrame::from_bytes(Bytes::copy_from_slice(&buf_read[..amount])) {
                Some(frame) => {
                    self.dispatch(frame);
                },
                None => debug!("Ignoring a malformed tunnel frame from {}", source),
            }
        }
        debug!("Relay tunnel stopped");
    }

    /// Hands `frame` to every listener except the one it came from.
    ///
    /// Returns the number of listeners it was queued for.
    pub fn dispatch(&self, frame: TunnelFrame) -> usize {
        let mut delivered = 0;
        for (target, route) in self.routes.iter().filter(|(name, _)| **name != frame.source) {
            match route.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(error) => {
                    warn!("Unable to relay from {} to {}: {}", frame.source, target, error);
                    publish(
                        &self.events,
                        Event::RelayFailed {
                            source: frame.source.to_owned(),
                            target: target.to_owned(),
                            reason: error.to_string(),
                        },
                    );
                },
            }
        }
        trace!("Relayed a {:?} frame from {} to {} listeners", frame.kind, frame.source, delivered);
        delivered
    }
}
