//! Per-interface DHCP listener.
//!
//! The receive loop only reads datagrams and spawns handlers. A handler asks the
//! `Dispatcher` what to do with a datagram and then does it.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use futures::future;
use tokio::{
    sync::{broadcast, mpsc, Semaphore},
    task::JoinSet,
    time,
};

use pxe_framed::{bind_udp, BindError, BindRequest, DhcpFramed, Frame};
use pxe_protocol::{Message, OperationCode};

use crate::{
    builder::MessageBuilder,
    client_table::ClientTable,
    config::ServerConfig,
    event::{publish, Event},
    interface::{InterfaceDescriptor, LinkType},
    offer::Reply,
    tunnel::{FrameKind, TunnelClient, TunnelFrame},
};

/// The listener lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Unbound,
    Bound,
    Listening,
    Stopped,
}

/// A datagram to handle.
#[derive(Debug)]
pub enum Inbound {
    /// Received on the listener's own interface.
    Local(Frame),
    /// Received from another listener through the tunnel.
    Relayed(TunnelFrame),
}

/// Something a handler has to send.
#[derive(Debug, Clone)]
pub enum Action {
    /// A reply built by this listener.
    Reply(Reply),
    /// A reply built by another listener, broadcast as is.
    Broadcast { datagram: Bytes, destination: SocketAddr },
    /// A frame for the other listeners.
    Relay(TunnelFrame),
}

/// Decides what to do with a datagram. Does no I/O.
pub struct Dispatcher {
    builder: MessageBuilder,
    clients: Arc<ClientTable>,
    /// Whether a tunnel is attached.
    relay: bool,
    client_port: u16,
    events: broadcast::Sender<Event>,
}

impl Dispatcher {
    pub fn new(
        builder         : MessageBuilder,
        clients         : Arc<ClientTable>,
        relay           : bool,
        client_port     : u16,
        events          : broadcast::Sender<Event>,
    ) -> Self {
        Dispatcher {
            builder,
            clients,
            relay,
            client_port,
            events,
        }
    }

    pub fn interface(&self) -> &InterfaceDescriptor {
        self.builder.interface()
    }

    /// Returns the actions in the order they have to be performed.
    ///
    /// A local request is answered and, with a tunnel attached, relayed to the other
    /// listeners together with the reply if this is a wired interface. A relayed request
    /// is answered only, so nothing crosses the tunnel twice.
    pub fn plan(&self, inbound: Inbound) -> Vec<Action> {
        let name = self.interface().name.as_str();

        match inbound {
            Inbound::Local(frame) => {
                let message = match frame.message {
                    Ok(message) => message,
                    Err(error) => {
                        debug!("Dropping a datagram from {} on {}: {}", frame.source, name, error);
                        return Vec::new();
                    },
                };
                if !self.accept(&message, &frame.source.to_string(), false) {
                    return Vec::new();
                }

                let mut actions = Vec::with_capacity(3);
                if self.relay {
                    actions.push(Action::Relay(TunnelFrame::new(FrameKind::Request, name, frame.raw)));
                }
                if let Some(reply) = self.reply(&message, name) {
                    if self.relay && self.interface().link_type == LinkType::Ethernet {
                        let datagram = Bytes::from(reply.datagram.clone());
                        actions.push(Action::Relay(TunnelFrame::new(FrameKind::Reply, name, datagram)));
                    }
                    actions.push(Action::Reply(reply));
                }
                actions
            },
            Inbound::Relayed(frame) => match frame.kind {
                FrameKind::Request => {
                    let message = match Message::from_bytes(&frame.datagram) {
                        Ok(message) => message,
                        Err(error) => {
                            debug!("Dropping a relayed datagram from {} on {}: {}", frame.source, name, error);
                            return Vec::new();
                        },
                    };
                    if !self.accept(&message, &frame.source, true) {
                        return Vec::new();
                    }
                    self.reply(&message, &frame.source).map(Action::Reply).into_iter().collect()
                },
                FrameKind::Reply => vec![Action::Broadcast {
                    datagram: frame.datagram,
                    destination: SocketAddr::from((Ipv4Addr::BROADCAST, self.client_port)),
                }],
            },
        }
    }

    /// Only client requests are handled, the listener hears its own replies too.
    fn accept(&self, message: &Message, source: &str, relayed: bool) -> bool {
        let name = self.interface().name.as_str();
        if message.operation_code != OperationCode::BootRequest {
            trace!("Ignoring {} from {} on {}", message.operation_code, source, name);
            return false;
        }

        log_receive!(message, source, name);
        publish(
            &self.events,
            Event::RequestSeen {
                interface: name.to_owned(),
                client: message.client_hardware_address,
                transaction_id: message.transaction_id,
                kind: message.kind(),
                relayed,
            },
        );
        true
    }

    /// `origin` is the interface the request was first received on.
    fn reply(&self, request: &Message, origin: &str) -> Option<Reply> {
        let name = self.interface().name.as_str();
        match self.builder.build(request, origin, &self.clients) {
            Ok(Some(reply)) => Some(reply),
            Ok(None) => {
                debug!("No reply to {} on {}", request.kind(), name);
                None
            },
            Err(error) => {
                warn!("Unable to build a reply on {}: {}", name, error);
                publish(
                    &self.events,
                    Event::ReplyFailed {
                        interface: name.to_owned(),
                        client: request.client_hardware_address,
                        reason: error.to_string(),
                    },
                );
                None
            },
        }
    }
}

/// Performs the dispatcher's actions. Shared by the handler tasks of one listener.
struct Handler {
    dispatcher: Dispatcher,
    framed: Arc<DhcpFramed>,
    tunnel: Option<TunnelClient>,
    events: broadcast::Sender<Event>,
}

impl Handler {
    async fn handle(&self, inbound: Inbound) {
        let actions = self.dispatcher.plan(inbound);
        for action in actions {
            self.perform(action).await;
        }
    }

    async fn perform(&self, action: Action) {
        let name = self.dispatcher.interface().name.as_str();
        match action {
            Action::Reply(reply) => {
                let mut is_sent = false;
                for destination in reply.destinations.iter() {
                    log_send!(reply.message, destination, name);
                    match self.framed.send_to(&reply.datagram, *destination).await {
                        Ok(()) => is_sent = true,
                        Err(error) => {
                            warn!("Unable to send to {} on {}: {}", destination, name, error);
                            publish(
                                &self.events,
                                Event::ReplyFailed {
                                    interface: name.to_owned(),
                                    client: reply.message.client_hardware_address,
                                    reason: error.to_string(),
                                },
                            );
                        },
                    }
                }
                if is_sent {
                    publish(
                        &self.events,
                        Event::ReplySent {
                            interface: name.to_owned(),
                            client: reply.message.client_hardware_address,
                            transaction_id: reply.message.transaction_id,
                            message_type: reply.message_type(),
                            your_ip_address: reply.message.your_ip_address,
                        },
                    );
                }
            },
            Action::Broadcast { datagram, destination } => {
                debug!("Broadcasting a relayed reply to {} on {}", destination, name);
                if let Err(error) = self.framed.send_to(&datagram, destination).await {
                    warn!("Unable to broadcast a relayed reply on {}: {}", name, error);
                }
            },
            Action::Relay(frame) => {
                if let Some(ref tunnel) = self.tunnel {
                    if let Err(error) = tunnel.send(&frame).await {
                        warn!("Unable to relay from {}: {}", name, error);
                        publish(
                            &self.events,
                            Event::RelayFailed {
                                source: name.to_owned(),
                                target: "tunnel".to_owned(),
                                reason: error.to_string(),
                            },
                        );
                    }
                }
            },
        }
    }
}

/// Serves DHCP on one interface.
pub struct Listener {
    interface: InterfaceDescriptor,
    state: ListenerState,
    builder: MessageBuilder,
    clients: Arc<ClientTable>,
    events: broadcast::Sender<Event>,
    shutdown: Arc<AtomicBool>,

    ports: Vec<u16>,
    bind_to_device: bool,
    client_port: u16,
    poll_interval: Duration,
    max_in_flight: usize,

    framed: Option<Arc<DhcpFramed>>,
    tunnel: Option<(TunnelClient, mpsc::Receiver<TunnelFrame>)>,
}

impl Listener {
    pub fn new(
        config          : &ServerConfig,
        interface       : &InterfaceDescriptor,
        clients         : Arc<ClientTable>,
        events          : broadcast::Sender<Event>,
        shutdown        : Arc<AtomicBool>,
    ) -> Self {
        Listener {
            interface       : interface.clone(),
            state           : ListenerState::Unbound,
            builder         : MessageBuilder::new(config, interface),
            clients,
            events,
            shutdown,

            ports           : config.dhcp_ports(),
            bind_to_device  : config.bind_to_device,
            client_port     : config.client_port,
            poll_interval   : config.poll_interval(),
            max_in_flight   : config.max_in_flight,

            framed          : None,
            tunnel          : None,
        }
    }

    pub fn name(&self) -> &str {
        &self.interface.name
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Binds the first available DHCP port on the interface.
    ///
    /// # Errors
    /// `BindError` if no port is available. The listener stays unbound.
    pub fn bind(&mut self) -> Result<SocketAddr, BindError> {
        let request = BindRequest {
            address: self.interface.address,
            ports: &self.ports,
            device: if self.bind_to_device { Some(self.interface.name.as_str()) } else { None },
            broadcast: true,
        };
        let (socket, port) = bind_udp(&request)?;
        let framed = DhcpFramed::new(socket);
        let address = framed
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from((self.interface.address, port)));

        self.framed = Some(Arc::new(framed));
        self.state = ListenerState::Bound;
        info!("DHCP listener on {} bound to {}", self.interface.name, address);
        Ok(address)
    }

    /// Connects the listener to the relay tunnel.
    pub fn attach_tunnel(&mut self, client: TunnelClient, relayed: mpsc::Receiver<TunnelFrame>) {
        self.tunnel = Some((client, relayed));
    }

    /// Receives until shutdown, then waits for the handlers in flight.
    ///
    /// Returns the final state.
    pub async fn run(mut self) -> ListenerState {
        let framed = match self.framed.clone() {
            Some(framed) => framed,
            None => {
                warn!("The listener on {} is not bound", self.interface.name);
                self.state = ListenerState::Stopped;
                return self.state;
            },
        };
        let (tunnel, mut relayed) = match self.tunnel.take() {
            Some((client, relayed)) => (Some(client), Some(relayed)),
            None => (None, None),
        };

        let dispatcher = Dispatcher::new(
            self.builder.clone(),
            Arc::clone(&self.clients),
            tunnel.is_some(),
            self.client_port,
            self.events.clone(),
        );
        let handler = Arc::new(Handler {
            dispatcher,
            framed: Arc::clone(&framed),
            tunnel,
            events: self.events.clone(),
        });
        let limit = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();

        self.state = ListenerState::Listening;
        while !self.shutdown.load(Ordering::SeqCst) {
            let inbound = tokio::select! {
                received = time::timeout(self.poll_interval, framed.recv()) => match received {
                    Err(_elapsed) => None,
                    Ok(Ok(frame)) => Some(Inbound::Local(frame)),
                    Ok(Err(error)) => {
                        warn!("Socket error on {}: {}", self.interface.name, error);
                        None
                    },
                },
                Some(frame) = next_relayed(&mut relayed) => Some(Inbound::Relayed(frame)),
                Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(error) = finished {
                        error!("A handler on {} failed: {}", self.interface.name, error);
                    }
                    None
                },
            };

            if let Some(inbound) = inbound {
                let permit = match Arc::clone(&limit).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("Too many requests in flight on {}, dropping one", self.interface.name);
                        continue;
                    },
                };
                let handler = Arc::clone(&handler);
                tasks.spawn(async move {
                    handler.handle(inbound).await;
                    drop(permit);
                });
            }
        }

        while let Some(finished) = tasks.join_next().await {
            if let Err(error) = finished {
                error!("A handler on {} failed: {}", self.interface.name, error);
            }
        }
        self.state = ListenerState::Stopped;
        info!("DHCP listener on {} stopped", self.interface.name);
        self.state
    }
}

async fn next_relayed(relayed: &mut Option<mpsc::Receiver<TunnelFrame>>) -> Option<TunnelFrame> {
    match relayed {
        Some(relayed) => relayed.recv().await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use eui48::MacAddress;
    use tokio::net::UdpSocket;

    use pxe_protocol::{HardwareType, MessageType, Options};

    use super::*;

    fn discover() -> Message {
        let mut options = Options::default();
        options.dhcp_message_type = Some(MessageType::DhcpDiscover);
        options.class_id = Some(b"PXEClient".to_vec());

        Message {
            operation_code              : OperationCode::BootRequest,
            hardware_type               : HardwareType::Ethernet,
            hardware_address_length     : 6,
            hardware_options            : 0,
            transaction_id              : 0xcafe,
            seconds                     : 0,
            is_broadcast                : true,
            client_ip_address           : Ipv4Addr::UNSPECIFIED,
            your_ip_address             : Ipv4Addr::UNSPECIFIED,
            server_ip_address           : Ipv4Addr::UNSPECIFIED,
            gateway_ip_address          : Ipv4Addr::UNSPECIFIED,
            client_hardware_address     : MacAddress::new([0x52, 0x54, 0, 0, 0, 1]),
            server_name                 : Vec::new(),
            boot_filename               : Vec::new(),
            options,
        }
    }

    fn dispatcher(name: &str, address: Ipv4Addr, relay: bool) -> Dispatcher {
        sharing(name, address, relay, Arc::new(ClientTable::new()))
    }

    fn sharing(name: &str, address: Ipv4Addr, relay: bool, clients: Arc<ClientTable>) -> Dispatcher {
        let interface = InterfaceDescriptor::new(name, address, 24, MacAddress::nil());
        let (events, _) = broadcast::channel(16);
        Dispatcher::new(
            MessageBuilder::new(&ServerConfig::default(), &interface),
            clients,
            relay,
            68,
            events,
        )
    }

    fn local(message: &Message) -> Inbound {
        let raw = Bytes::from(message.to_vec().unwrap());
        Inbound::Local(Frame {
            source: "0.0.0.0:68".parse().unwrap(),
            message: Message::from_bytes(&raw),
            raw,
        })
    }

    #[test]
    fn local_request_without_tunnel() {
        let dispatcher = dispatcher("eth0", Ipv4Addr::new(192, 168, 1, 10), false);

        let actions = dispatcher.plan(local(&discover()));

        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], Action::Reply(_)));
    }

    #[test]
    fn wired_request_relays_request_and_reply() {
        let dispatcher = dispatcher("eth0", Ipv4Addr::new(192, 168, 1, 10), true);
        let request = discover();

        let actions = dispatcher.plan(local(&request));

        assert_eq!(actions.len(), 3);
        match &actions[0] {
            Action::Relay(frame) => {
                assert_eq!(frame.kind, FrameKind::Request);
                assert_eq!(frame.source, "eth0");
                assert_eq!(Message::from_bytes(&frame.datagram).unwrap(), request);
            },
            other => panic!("unexpected action {:?}", other),
        }
        assert!(matches!(&actions[1], Action::Relay(frame) if frame.kind == FrameKind::Reply));
        assert!(matches!(actions[2], Action::Reply(_)));
    }

    #[test]
    fn wireless_request_relays_request_only() {
        let dispatcher = dispatcher("wlan0", Ipv4Addr::new(10, 0, 0, 5), true);

        let actions = dispatcher.plan(local(&discover()));

        assert_eq!(actions.len(), 2);
        assert!(matches!(&actions[0], Action::Relay(frame) if frame.kind == FrameKind::Request));
        assert!(matches!(actions[1], Action::Reply(_)));
    }

    #[test]
    fn relayed_request_is_answered_but_not_relayed_again() {
        let dispatcher = dispatcher("eth0", Ipv4Addr::new(192, 168, 1, 10), true);
        let raw = Bytes::from(discover().to_vec().unwrap());

        let actions = dispatcher.plan(Inbound::Relayed(TunnelFrame::new(FrameKind::Request, "wlan0", raw)));

        assert_eq!(actions.len(), 1);
        match &actions[0] {
            Action::Reply(reply) => {
                assert_eq!(reply.message.server_ip_address, Ipv4Addr::new(192, 168, 1, 10));
                assert_eq!(reply.message.your_ip_address, Ipv4Addr::new(192, 168, 1, 150));
            },
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn relayed_request_leaves_the_client_on_its_interface() {
        let clients = Arc::new(ClientTable::new());
        let wireless = sharing("wlan0", Ipv4Addr::new(10, 0, 0, 5), true, Arc::clone(&clients));
        let wired = sharing("eth0", Ipv4Addr::new(192, 168, 1, 10), true, Arc::clone(&clients));
        let request = discover();

        let relayed = match wireless.plan(local(&request)).remove(0) {
            Action::Relay(frame) => frame,
            other => panic!("unexpected action {:?}", other),
        };
        assert_eq!(wired.plan(Inbound::Relayed(relayed)).len(), 1);

        let record = clients.get(&request.client_hardware_address).unwrap();
        assert_eq!(record.interface, "wlan0");
        assert_eq!(clients.len(), 1);
    }

    #[test]
    fn relayed_reply_is_broadcast() {
        let dispatcher = dispatcher("wlan0", Ipv4Addr::new(10, 0, 0, 5), true);
        let datagram = Bytes::from_static(b"offer from eth0");

        let actions = dispatcher.plan(Inbound::Relayed(TunnelFrame::new(FrameKind::Reply, "eth0", datagram.clone())));

        match &actions[..] {
            [Action::Broadcast { datagram: sent, destination }] => {
                assert_eq!(sent, &datagram);
                assert_eq!(*destination, "255.255.255.255:68".parse::<SocketAddr>().unwrap());
            },
            other => panic!("unexpected actions {:?}", other),
        }
    }

    #[test]
    fn replies_and_garbage_are_ignored() {
        let dispatcher = dispatcher("eth0", Ipv4Addr::new(192, 168, 1, 10), true);
        let mut reply = discover();
        reply.operation_code = OperationCode::BootReply;

        assert!(dispatcher.plan(local(&reply)).is_empty());
        assert!(dispatcher
            .plan(Inbound::Local(Frame {
                source: "10.0.0.1:68".parse().unwrap(),
                raw: Bytes::from_static(b"junk"),
                message: Message::from_bytes(b"junk"),
            }))
            .is_empty());
    }

    #[tokio::test]
    async fn lifecycle_on_loopback() {
        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let mut config = ServerConfig::default();
        config.dhcp_port = 0;
        config.client_port = client.local_addr().unwrap().port();
        config.bind_to_device = false;
        config.poll_interval_ms = 50;

        let mut interface = InterfaceDescriptor::new("test0", Ipv4Addr::LOCALHOST, 8, MacAddress::nil());
        interface.link_type = LinkType::Wireless;
        interface.broadcast = Ipv4Addr::LOCALHOST;
        let shutdown = Arc::new(AtomicBool::new(false));
        let (events, _) = broadcast::channel(16);
        let mut listener = Listener::new(&config, &interface, Arc::new(ClientTable::new()), events, Arc::clone(&shutdown));
        assert_eq!(listener.state(), ListenerState::Unbound);

        let address = listener.bind().unwrap();
        assert_eq!(listener.state(), ListenerState::Bound);
        assert_eq!(listener.name(), "test0");
        assert_ne!(address.port(), 0);

        let task = tokio::spawn(listener.run());
        shutdown.store(true, Ordering::SeqCst);

        assert_eq!(task.await.unwrap(), ListenerState::Stopped);
    }
}
