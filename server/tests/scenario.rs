//! Two isolated segments: a client on wlan0, a second responder on eth0.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use bytes::Bytes;
use eui48::MacAddress;
use tokio::sync::{broadcast, mpsc};

use pxe_bridge::{
    Action, ClientTable, Dispatcher, Event, FrameKind, Forwarder, Inbound, InterfaceDescriptor, LinkType,
    MessageBuilder, Reply, ServerConfig,
};
use pxe_framed::Frame;
use pxe_protocol::{HardwareType, Message, MessageType, OperationCode, Options};

const CLIENT: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];

fn discover() -> Message {
    let mut options = Options::default();
    options.dhcp_message_type = Some(MessageType::DhcpDiscover);
    options.class_id = Some(b"PXEClient:Arch:00000:UNDI:002001".to_vec());

    Message {
        operation_code              : OperationCode::BootRequest,
        hardware_type               : HardwareType::Ethernet,
        hardware_address_length     : 6,
        hardware_options            : 0,
        transaction_id              : 0x1234_5678,
        seconds                     : 4,
        is_broadcast                : true,
        client_ip_address           : Ipv4Addr::UNSPECIFIED,
        your_ip_address             : Ipv4Addr::UNSPECIFIED,
        server_ip_address           : Ipv4Addr::UNSPECIFIED,
        gateway_ip_address          : Ipv4Addr::UNSPECIFIED,
        client_hardware_address     : MacAddress::new(CLIENT),
        server_name                 : Vec::new(),
        boot_filename               : Vec::new(),
        options,
    }
}

fn dispatcher(interface: &InterfaceDescriptor, clients: &Arc<ClientTable>) -> (Dispatcher, broadcast::Receiver<Event>) {
    let (events, receiver) = broadcast::channel(16);
    let dispatcher = Dispatcher::new(
        MessageBuilder::new(&ServerConfig::default(), interface),
        Arc::clone(clients),
        true,
        68,
        events,
    );
    (dispatcher, receiver)
}

fn only_reply(actions: Vec<Action>) -> Reply {
    let mut replies = actions.into_iter().filter_map(|action| match action {
        Action::Reply(reply) => Some(reply),
        _ => None,
    });
    let reply = replies.next().expect("a reply");
    assert!(replies.next().is_none());
    reply
}

fn assert_pxe_offer(reply: &Reply, server: Ipv4Addr) {
    let offer = Message::from_bytes(&reply.datagram).unwrap();
    assert_eq!(offer.options.dhcp_message_type, Some(MessageType::DhcpOffer));
    assert_eq!(offer.options.dhcp_server_id, Some(server));
    assert_eq!(offer.options.tftp_server_name, Some(server.to_string()));
    assert_eq!(offer.options.bootfile_name.as_deref(), Some("pxelinux.0"));
    assert_eq!(offer.transaction_id, 0x1234_5678);
    assert_eq!(offer.client_hardware_address, MacAddress::new(CLIENT));
    assert_eq!(offer.server_ip_address, server);
}

#[tokio::test]
async fn wlan_request_is_answered_on_both_segments() {
    let eth0 = InterfaceDescriptor::new("eth0", Ipv4Addr::new(192, 168, 1, 10), 24, MacAddress::nil());
    let wlan0 = InterfaceDescriptor::new("wlan0", Ipv4Addr::new(10, 0, 0, 5), 24, MacAddress::nil());
    assert_eq!(eth0.link_type, LinkType::Ethernet);
    assert_eq!(wlan0.link_type, LinkType::Wireless);

    let clients = Arc::new(ClientTable::new());
    let (on_eth0, _eth0_events) = dispatcher(&eth0, &clients);
    let (on_wlan0, mut wlan0_events) = dispatcher(&wlan0, &clients);

    let shutdown = Arc::new(AtomicBool::new(false));
    let (events, _) = broadcast::channel(16);
    let mut forwarder = Forwarder::bind(&[0], shutdown, Duration::from_millis(50), events).unwrap();
    let (eth0_sender, mut eth0_relayed) = mpsc::channel(4);
    let (wlan0_sender, mut wlan0_relayed) = mpsc::channel(4);
    forwarder.add_route("eth0", eth0_sender);
    forwarder.add_route("wlan0", wlan0_sender);

    // the request arrives on wlan0
    let raw = Bytes::from(discover().to_vec().unwrap());
    let actions = on_wlan0.plan(Inbound::Local(Frame {
        source: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 68)),
        message: Message::from_bytes(&raw),
        raw,
    }));
    let relayed: Vec<_> = actions
        .iter()
        .filter_map(|action| match action {
            Action::Relay(frame) => Some(frame.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].kind, FrameKind::Request);

    let wlan0_offer = only_reply(actions);
    assert_pxe_offer(&wlan0_offer, Ipv4Addr::new(10, 0, 0, 5));
    assert_eq!(wlan0_offer.destinations, vec![SocketAddr::from((Ipv4Addr::BROADCAST, 68))]);
    assert!(matches!(
        wlan0_events.recv().await.unwrap(),
        Event::RequestSeen { ref interface, relayed: false, .. } if interface == "wlan0"
    ));

    // the forwarder hands it to eth0 only
    assert_eq!(forwarder.dispatch(relayed[0].clone()), 1);
    assert!(wlan0_relayed.try_recv().is_err());
    let frame = eth0_relayed.try_recv().unwrap();

    let eth0_offer = only_reply(on_eth0.plan(Inbound::Relayed(frame)));
    assert_pxe_offer(&eth0_offer, Ipv4Addr::new(192, 168, 1, 10));
    assert_eq!(eth0_offer.destinations[0], SocketAddr::from((Ipv4Addr::new(192, 168, 1, 255), 68)));
    assert_eq!(eth0_offer.message.your_ip_address, Ipv4Addr::new(192, 168, 1, 150));

    // one client, seen on both segments
    assert_eq!(clients.len(), 1);
}
