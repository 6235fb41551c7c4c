//! The TFTP responder: read requests only, one task and socket per transfer.

mod path;
mod session;

use std::{
    collections::HashSet,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    fs,
    net::UdpSocket,
    sync::{broadcast, OwnedSemaphorePermit, Semaphore},
    task::JoinSet,
    time,
};

use pxe_framed::{bind_udp, BindError, BindRequest, BUFFER_READ_CAPACITY};
use pxe_protocol::tftp::{ErrorCode, Packet};

use crate::{
    config::ServerConfig,
    error::TransferError,
    event::{publish, Event},
};

pub use self::{
    path::BootRoot,
    session::{Session, SessionSettings, SessionState},
};

/// What every transfer needs, shared by the session tasks.
struct Context {
    root: BootRoot,
    settings: SessionSettings,
    local: Ipv4Addr,
    shutdown: Arc<AtomicBool>,
    events: broadcast::Sender<Event>,
}

impl Context {
    async fn transfer(&self, peer: SocketAddr, filename: String, admission: Admission) {
        let result = self.serve(peer, &filename).await;
        drop(admission);
        match result {
            Ok(bytes) => {
                info!("Sent {} ({} bytes) to {}", filename, bytes, peer);
                publish(&self.events, Event::TransferCompleted { peer, filename, bytes });
            },
            Err(error) => {
                warn!("Transfer of {} to {} failed: {}", filename, peer, error);
                publish(
                    &self.events,
                    Event::TransferFailed {
                        peer,
                        filename,
                        reason: error.to_string(),
                    },
                );
            },
        }
    }

    async fn serve(&self, peer: SocketAddr, filename: &str) -> Result<usize, TransferError> {
        let mut session = Session::open(self.local, peer, self.settings).await?;
        let data = match self.load(filename).await {
            Ok(data) => data,
            Err(error) => {
                if let Err(send_error) = session.reject(&error).await {
                    debug!("Unable to send the error to {}: {}", peer, send_error);
                }
                return Err(error);
            },
        };
        session.run(data, &self.shutdown).await
    }

    async fn load(&self, filename: &str) -> Result<Bytes, TransferError> {
        let path = self.root.resolve(filename)?;
        let data = fs::read(&path).await?;
        Ok(Bytes::from(data))
    }
}

/// Peers with a transfer in progress.
#[derive(Debug, Default)]
struct ActivePeers {
    peers: Mutex<HashSet<SocketAddr>>,
}

impl ActivePeers {
    /// Returns `None` if `peer` already has a session.
    fn admit(self: &Arc<Self>, peer: SocketAddr, permit: OwnedSemaphorePermit) -> Option<Admission> {
        if !self.lock().insert(peer) {
            return None;
        }
        Some(Admission {
            peers: Arc::clone(self),
            peer,
            _permit: permit,
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<SocketAddr>> {
        self.peers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Held by a session task, frees the peer and the slot when the task ends.
struct Admission {
    peers: Arc<ActivePeers>,
    peer: SocketAddr,
    _permit: OwnedSemaphorePermit,
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.peers.lock().remove(&self.peer);
    }
}

/// Listens for read requests and spawns a session for each.
///
/// A peer gets one session at a time, retransmitted requests are ignored while it runs.
/// At most `max_sessions` run at once, requests beyond that are dropped.
pub struct Responder {
    socket: UdpSocket,
    context: Arc<Context>,
    poll_interval: Duration,
    max_sessions: usize,
}

impl Responder {
    /// Binds the configured TFTP address on the first available port.
    ///
    /// # Errors
    /// `BindError` if no port is available.
    pub fn bind(
        config          : &ServerConfig,
        root            : BootRoot,
        shutdown        : Arc<AtomicBool>,
        events          : broadcast::Sender<Event>,
    ) -> Result<Self, BindError> {
        let ports = config.tftp_ports();
        let request = BindRequest {
            address: config.tftp_address,
            ports: &ports,
            device: None,
            broadcast: false,
        };
        let (socket, _) = bind_udp(&request)?;

        let context = Context {
            root,
            settings: SessionSettings {
                timeout: config.tftp_timeout(),
                retries: config.tftp_retries,
            },
            local: config.tftp_address,
            shutdown,
            events,
        };
        Ok(Responder {
            socket,
            context: Arc::new(context),
            poll_interval: config.poll_interval(),
            max_sessions: config.max_sessions,
        })
    }

    /// # Errors
    /// `io::Error` if the socket is gone.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serves until shutdown, then waits for the transfers in progress.
    pub async fn run(self) {
        let mut sessions = JoinSet::new();
        let active = Arc::new(ActivePeers::default());
        let limit = Arc::new(Semaphore::new(self.max_sessions));
        let mut buf_read = vec![0u8; BUFFER_READ_CAPACITY];

        info!("TFTP responder serving {}", self.context.root.path().display());
        while !self.context.shutdown.load(Ordering::SeqCst) {
            let received = tokio::select! {
                received = time::timeout(self.poll_interval, self.socket.recv_from(&mut buf_read)) => received,
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(error) = finished {
                        error!("A TFTP session failed: {}", error);
                    }
                    continue;
                },
            };
            let (amount, peer) = match received {
                Err(_elapsed) => continue,
                Ok(Err(error)) => {
                    warn!("TFTP socket error: {}", error);
                    continue;
                },
                Ok(Ok(received)) => received,
            };

            let packet = match Packet::from_bytes(&buf_read[..amount]) {
                Ok(packet) => packet,
                Err(error) => {
                    debug!("Malformed TFTP packet from {}: {}", peer, error);
                    continue;
                },
            };
            let answer = match packet {
                Packet::ReadRequest { filename, mode } => {
                    let permit = match Arc::clone(&limit).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!("Too many TFTP sessions, dropping the request for {} from {}", filename, peer);
                            continue;
                        },
                    };
                    let admission = match active.admit(peer, permit) {
                        Some(admission) => admission,
                        None => {
                            debug!("Ignoring a repeated request for {} from {}", filename, peer);
                            continue;
                        },
                    };
                    info!("Read request for {} ({}) from {}", filename, mode, peer);
                    let context = Arc::clone(&self.context);
                    sessions.spawn(async move { context.transfer(peer, filename, admission).await });
                    continue;
                },
                Packet::WriteRequest { filename, .. } => {
                    info!("Refusing a write request for {} from {}", filename, peer);
                    Packet::error(ErrorCode::AccessViolation)
                },
                Packet::Error { code, message } => {
                    debug!("Error from {} on the listening port: {}: {}", peer, code, message);
                    continue;
                },
                packet => {
                    debug!("Unexpected {:?} from {} on the listening port", packet, peer);
                    Packet::error(ErrorCode::IllegalOperation)
                },
            };
            if let Err(error) = self.socket.send_to(&answer.to_bytes(), peer).await {
                debug!("Unable to answer {}: {}", peer, error);
            }
        }

        while let Some(finished) = sessions.join_next().await {
            if let Err(error) = finished {
                error!("A TFTP session failed: {}", error);
            }
        }
        debug!("TFTP responder stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::fs as std_fs;

    use pxe_protocol::tftp::{BLOCK_SIZE, SIZE_PACKET_MAXIMAL};

    use super::*;

    struct Fixture {
        _directory: tempfile::TempDir,
        address: SocketAddr,
        shutdown: Arc<AtomicBool>,
        events: broadcast::Receiver<Event>,
        task: tokio::task::JoinHandle<()>,
    }

    async fn responder(contents: &[u8]) -> Fixture {
        limited(contents, ServerConfig::default().max_sessions).await
    }

    async fn limited(contents: &[u8], max_sessions: usize) -> Fixture {
        let directory = tempfile::tempdir().unwrap();
        std_fs::write(directory.path().join("pxelinux.0"), contents).unwrap();
        let mut config = ServerConfig::default();
        config.tftp_address = Ipv4Addr::LOCALHOST;
        config.tftp_port = 0;
        config.tftp_timeout_ms = 100;
        config.poll_interval_ms = 50;
        config.max_sessions = max_sessions;

        let shutdown = Arc::new(AtomicBool::new(false));
        let (sender, events) = broadcast::channel(16);
        let root = BootRoot::open(directory.path()).unwrap();
        let responder = Responder::bind(&config, root, Arc::clone(&shutdown), sender).unwrap();
        let address = responder.local_addr().unwrap();

        Fixture {
            _directory: directory,
            address,
            shutdown,
            events,
            task: tokio::spawn(responder.run()),
        }
    }

    async fn request(client: &UdpSocket, address: SocketAddr, packet: Packet) -> (Packet, SocketAddr) {
        client.send_to(&packet.to_bytes(), address).await.unwrap();
        let mut buf = [0u8; SIZE_PACKET_MAXIMAL];
        let (amount, source) = client.recv_from(&mut buf).await.unwrap();
        (Packet::from_bytes(&buf[..amount]).unwrap(), source)
    }

    fn read_request(filename: &str) -> Packet {
        Packet::ReadRequest {
            filename: filename.to_owned(),
            mode: "octet".to_owned(),
        }
    }

    #[tokio::test]
    async fn serves_a_file_from_a_new_port() {
        let contents = vec![0x42u8; BLOCK_SIZE + 10];
        let mut fixture = responder(&contents).await;
        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();

        let (first, session) = request(&client, fixture.address, read_request("pxelinux.0")).await;
        assert_ne!(session, fixture.address);
        assert!(matches!(first, Packet::Data { block: 1, ref payload } if payload.len() == BLOCK_SIZE));
        let (second, _) = request(&client, session, Packet::Ack { block: 1 }).await;
        assert!(matches!(second, Packet::Data { block: 2, ref payload } if payload.len() == 10));
        client.send_to(&Packet::Ack { block: 2 }.to_bytes(), session).await.unwrap();

        match fixture.events.recv().await.unwrap() {
            Event::TransferCompleted { filename, bytes, .. } => {
                assert_eq!(filename, "pxelinux.0");
                assert_eq!(bytes, BLOCK_SIZE + 10);
            },
            other => panic!("unexpected {:?}", other),
        }
        fixture.shutdown.store(true, Ordering::SeqCst);
        fixture.task.await.unwrap();
    }

    #[tokio::test]
    async fn traversal_gets_file_not_found() {
        let mut fixture = responder(b"loader").await;
        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();

        let (answer, _) = request(&client, fixture.address, read_request("../../etc/passwd")).await;

        assert_eq!(answer, Packet::error(ErrorCode::FileNotFound));
        assert!(matches!(
            fixture.events.recv().await.unwrap(),
            Event::TransferFailed { ref filename, .. } if filename == "../../etc/passwd"
        ));
        fixture.shutdown.store(true, Ordering::SeqCst);
        fixture.task.await.unwrap();
    }

    #[tokio::test]
    async fn writes_and_stray_packets_are_refused() {
        let fixture = responder(b"loader").await;
        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();

        let write = Packet::WriteRequest {
            filename: "upload".to_owned(),
            mode: "octet".to_owned(),
        };
        let (answer, source) = request(&client, fixture.address, write).await;
        assert_eq!(answer, Packet::error(ErrorCode::AccessViolation));
        assert_eq!(source, fixture.address);

        let (answer, _) = request(&client, fixture.address, Packet::Ack { block: 1 }).await;
        assert_eq!(answer, Packet::error(ErrorCode::IllegalOperation));

        fixture.shutdown.store(true, Ordering::SeqCst);
        fixture.task.await.unwrap();
    }

    /// Sources of every DATA block 1 that arrives before the line goes quiet.
    async fn first_blocks(client: &UdpSocket) -> Vec<SocketAddr> {
        let mut sources = Vec::new();
        let mut buf = [0u8; SIZE_PACKET_MAXIMAL];
        while let Ok(Ok((amount, source))) = time::timeout(Duration::from_millis(250), client.recv_from(&mut buf)).await {
            if let Ok(Packet::Data { block: 1, .. }) = Packet::from_bytes(&buf[..amount]) {
                if !sources.contains(&source) {
                    sources.push(source);
                }
            }
        }
        sources
    }

    #[tokio::test]
    async fn repeated_request_gets_one_session() {
        let fixture = responder(b"loader").await;
        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();

        let packet = read_request("pxelinux.0").to_bytes();
        client.send_to(&packet, fixture.address).await.unwrap();
        client.send_to(&packet, fixture.address).await.unwrap();

        assert_eq!(first_blocks(&client).await.len(), 1);
        fixture.shutdown.store(true, Ordering::SeqCst);
        fixture.task.await.unwrap();
    }

    #[tokio::test]
    async fn sessions_beyond_the_limit_are_dropped() {
        let fixture = limited(b"loader", 1).await;
        let first = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let second = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();

        let (answer, _) = request(&first, fixture.address, read_request("pxelinux.0")).await;
        assert!(matches!(answer, Packet::Data { block: 1, .. }));
        second.send_to(&read_request("pxelinux.0").to_bytes(), fixture.address).await.unwrap();

        assert!(first_blocks(&second).await.is_empty());
        fixture.shutdown.store(true, Ordering::SeqCst);
        fixture.task.await.unwrap();
    }

    #[tokio::test]
    async fn peer_may_ask_again_after_its_transfer() {
        let mut fixture = responder(b"loader").await;
        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();

        for _ in 0..2 {
            let (answer, session) = request(&client, fixture.address, read_request("pxelinux.0")).await;
            assert!(matches!(answer, Packet::Data { block: 1, ref payload } if payload.len() == 6));
            client.send_to(&Packet::Ack { block: 1 }.to_bytes(), session).await.unwrap();
            assert!(matches!(fixture.events.recv().await.unwrap(), Event::TransferCompleted { .. }));
        }

        fixture.shutdown.store(true, Ordering::SeqCst);
        fixture.task.await.unwrap();
    }
}
