//! One read transfer, RFC 1350 lock-step.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    net::UdpSocket,
    time::{self, Instant},
};

use pxe_protocol::tftp::{ErrorCode, Packet, BLOCK_SIZE, SIZE_PACKET_MAXIMAL};

use crate::error::TransferError;

/// The transfer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Sending,
    AwaitingAck,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// How long to wait for an acknowledgement.
    pub timeout: Duration,
    /// Retransmissions of a block after the first send.
    pub retries: u32,
}

/// A transfer to one peer from its own socket, which is the transfer ID.
pub struct Session {
    socket: UdpSocket,
    peer: SocketAddr,
    settings: SessionSettings,
    state: SessionState,
}

impl Session {
    /// Binds an ephemeral port on `local`.
    ///
    /// # Errors
    /// `io::Error` if no port is available.
    pub async fn open(local: Ipv4Addr, peer: SocketAddr, settings: SessionSettings) -> io::Result<Self> {
        let socket = UdpSocket::bind((local, 0)).await?;
        Ok(Session {
            socket,
            peer,
            settings,
            state: SessionState::Sending,
        })
    }

    /// # Errors
    /// `io::Error` if the socket is gone.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Tells the peer why the transfer does not happen, if the protocol allows it.
    ///
    /// # Errors
    /// `io::Error` if the packet cannot be sent.
    pub async fn reject(&mut self, error: &TransferError) -> io::Result<()> {
        self.state = SessionState::Failed;
        if let Some(packet) = error.to_packet() {
            self.socket.send_to(&packet.to_bytes(), self.peer).await?;
        }
        Ok(())
    }

    /// Sends `data` block by block, each after the previous one is acknowledged.
    ///
    /// The last block is shorter than `BLOCK_SIZE`, empty if the length is a multiple of it.
    /// Returns the number of bytes transferred.
    ///
    /// # Errors
    /// `Timeout` after the retransmissions of a block are exhausted, `Aborted` if the peer
    /// sends an error, `Shutdown` if the flag is raised, `Io` on socket failures.
    pub async fn run(&mut self, data: Bytes, shutdown: &AtomicBool) -> Result<usize, TransferError> {
        let blocks = data.len() / BLOCK_SIZE + 1;
        for index in 0..blocks {
            // numbers wrap after 65535 blocks
            let block = (index + 1) as u16;
            let start = index * BLOCK_SIZE;
            let end = (start + BLOCK_SIZE).min(data.len());
            let packet = Packet::Data {
                block,
                payload: data.slice(start..end),
            }
            .to_bytes();

            if let Err(error) = self.transmit(block, &packet, shutdown).await {
                self.state = SessionState::Failed;
                return Err(error);
            }
        }

        self.state = SessionState::Done;
        Ok(data.len())
    }

    async fn transmit(&mut self, block: u16, packet: &[u8], shutdown: &AtomicBool) -> Result<(), TransferError> {
        let mut retransmissions = 0;
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return Err(TransferError::Shutdown);
            }

            self.state = SessionState::Sending;
            self.socket.send_to(packet, self.peer).await?;
            self.state = SessionState::AwaitingAck;
            if self.await_ack(block).await? {
                return Ok(());
            }

            if retransmissions >= self.settings.retries {
                return Err(TransferError::Timeout { block });
            }
            retransmissions += 1;
            debug!("Retransmitting block {} to {} ({})", block, self.peer, retransmissions);
        }
    }

    /// Returns `false` if the acknowledgement did not arrive in time.
    ///
    /// Stale acknowledgements are skipped without retransmitting.
    async fn await_ack(&self, block: u16) -> Result<bool, TransferError> {
        let deadline = Instant::now() + self.settings.timeout;
        let mut buf_read = [0u8; SIZE_PACKET_MAXIMAL];

        loop {
            let (amount, source) = match time::timeout_at(deadline, self.socket.recv_from(&mut buf_read)).await {
                Err(_elapsed) => return Ok(false),
                Ok(received) => received?,
            };
            if source != self.peer {
                debug!("Datagram from {} on the session with {}", source, self.peer);
                let packet = Packet::error(ErrorCode::UnknownTransferId).to_bytes();
                if let Err(error) = self.socket.send_to(&packet, source).await {
                    debug!("Unable to answer {}: {}", source, error);
                }
                continue;
            }

            match Packet::from_bytes(&buf_read[..amount]) {
                Ok(Packet::Ack { block: acknowledged }) if acknowledged == block => return Ok(true),
                Ok(Packet::Ack { block: acknowledged }) => {
                    trace!("Stale acknowledgement {} from {}", acknowledged, self.peer);
                },
                Ok(Packet::Error { code, message }) => return Err(TransferError::Aborted { code, message }),
                Ok(packet) => debug!("Unexpected {:?} from {}", packet, self.peer),
                Err(error) => debug!("Malformed packet from {}: {}", self.peer, error),
            }
        }
    }
}
