//! The whole engine on the loopback: a PXE client gets offers and fetches its boot file.

use std::{fs, net::Ipv4Addr, time::Duration};

use eui48::MacAddress;
use tokio::{net::UdpSocket, time};

use pxe_bridge::{Engine, Event, InterfaceDescriptor, InterfaceRegistry, ServerConfig};
use pxe_protocol::{
    tftp::{Packet, BLOCK_SIZE, SIZE_PACKET_MAXIMAL},
    HardwareType, Message, MessageType, OperationCode, Options,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn discover(transaction_id: u32) -> Message {
    let mut options = Options::default();
    options.dhcp_message_type = Some(MessageType::DhcpDiscover);
    options.class_id = Some(b"PXEClient".to_vec());

    Message {
        operation_code              : OperationCode::BootRequest,
        hardware_type               : HardwareType::Ethernet,
        hardware_address_length     : 6,
        hardware_options            : 0,
        transaction_id,
        seconds                     : 0,
        is_broadcast                : true,
        client_ip_address           : Ipv4Addr::UNSPECIFIED,
        your_ip_address             : Ipv4Addr::UNSPECIFIED,
        server_ip_address           : Ipv4Addr::UNSPECIFIED,
        gateway_ip_address          : Ipv4Addr::UNSPECIFIED,
        client_hardware_address     : MacAddress::new([0x52, 0x54, 0x00, 0xab, 0xcd, 0xef]),
        server_name                 : Vec::new(),
        boot_filename               : Vec::new(),
        options,
    }
}

/// A loopback "segment" whose broadcasts reach the test client.
fn segment(name: &str, address: Ipv4Addr) -> InterfaceDescriptor {
    let mut interface = InterfaceDescriptor::new(name, address, 8, MacAddress::nil());
    interface.broadcast = Ipv4Addr::LOCALHOST;
    interface
}

fn config(client_port: u16, boot_root: &std::path::Path) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.server_name = Some("bridge-test".to_owned());
    config.dhcp_port = 0;
    config.dhcp_fallback_ports = Vec::new();
    config.client_port = client_port;
    config.tftp_address = Ipv4Addr::LOCALHOST;
    config.tftp_port = 0;
    config.tftp_timeout_ms = 500;
    config.tunnel_port = 0;
    config.bind_to_device = false;
    config.poll_interval_ms = 50;
    config.boot_root = boot_root.to_owned();
    config
}

async fn receive_offer(client: &UdpSocket) -> Message {
    let mut buf = vec![0u8; 1500];
    let amount = time::timeout(TIMEOUT, client.recv(&mut buf)).await.unwrap().unwrap();
    Message::from_bytes(&buf[..amount]).unwrap()
}

#[tokio::test]
async fn offer_then_boot_file() {
    let _ = env_logger::builder().is_test(true).try_init();
    let boot_root = tempfile::tempdir().unwrap();
    let loader: Vec<u8> = (0..3 * BLOCK_SIZE + 100).map(|index| (index % 251) as u8).collect();
    fs::write(boot_root.path().join("pxelinux.0"), &loader).unwrap();

    let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let client_port = client.local_addr().unwrap().port();
    let registry = InterfaceRegistry::new(vec![segment("test0", Ipv4Addr::LOCALHOST)]);
    let engine = Engine::new(config(client_port, boot_root.path()), registry);
    let mut events = engine.subscribe();
    let handle = engine.start().await.unwrap();
    let (_, dhcp) = handle.dhcp_endpoints()[0].clone();

    client.send_to(&discover(0xfeed).to_vec().unwrap(), dhcp).await.unwrap();
    let offer = receive_offer(&client).await;

    assert_eq!(offer.operation_code, OperationCode::BootReply);
    assert_eq!(offer.transaction_id, 0xfeed);
    assert_eq!(offer.options.dhcp_message_type, Some(MessageType::DhcpOffer));
    assert_eq!(offer.options.tftp_server_name.as_deref(), Some("127.0.0.1"));
    assert_eq!(offer.options.bootfile_name.as_deref(), Some("pxelinux.0"));
    assert_eq!(offer.server_name, b"bridge-test".to_vec());
    assert!(handle.clients().get(&offer.client_hardware_address).is_some());

    // TFTP, as the boot ROM would after the offer
    let tftp = handle.tftp_endpoint().unwrap();
    let request = Packet::ReadRequest {
        filename: offer.options.bootfile_name.clone().unwrap(),
        mode: "octet".to_owned(),
    };
    client.send_to(&request.to_bytes(), tftp).await.unwrap();
    let mut received = Vec::new();
    let mut blocks = 0;
    let mut buf = [0u8; SIZE_PACKET_MAXIMAL];
    loop {
        let (amount, session) = time::timeout(TIMEOUT, client.recv_from(&mut buf)).await.unwrap().unwrap();
        match Packet::from_bytes(&buf[..amount]).unwrap() {
            Packet::Data { block, payload } => {
                blocks += 1;
                assert_eq!(block, blocks);
                received.extend_from_slice(&payload);
                client.send_to(&Packet::Ack { block }.to_bytes(), session).await.unwrap();
                if payload.len() < BLOCK_SIZE {
                    break;
                }
            },
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(blocks, 4);
    assert_eq!(received, loader);

    let completed = time::timeout(TIMEOUT, async {
        loop {
            if let Event::TransferCompleted { bytes, .. } = events.recv().await.unwrap() {
                return bytes;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(completed, loader.len());

    handle.stop().await;
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn relayed_request_is_answered_by_every_interface() {
    let _ = env_logger::builder().is_test(true).try_init();
    let boot_root = tempfile::tempdir().unwrap();

    let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let client_port = client.local_addr().unwrap().port();
    let registry = InterfaceRegistry::new(vec![
        segment("test0", Ipv4Addr::new(127, 0, 0, 1)),
        segment("test1", Ipv4Addr::new(127, 0, 0, 2)),
    ]);
    let engine = Engine::new(config(client_port, boot_root.path()), registry);
    let mut events = engine.subscribe();
    let handle = engine.start().await.unwrap();
    assert!(handle.relay_endpoint().is_some());
    let (_, test0) = handle
        .dhcp_endpoints()
        .iter()
        .find(|(name, _)| name == "test0")
        .cloned()
        .unwrap();

    client.send_to(&discover(0xbeef).to_vec().unwrap(), test0).await.unwrap();

    let mut servers = Vec::new();
    while servers.len() < 2 {
        let offer = receive_offer(&client).await;
        assert_eq!(offer.transaction_id, 0xbeef);
        let server = offer.options.dhcp_server_id.unwrap();
        assert_eq!(offer.options.tftp_server_name, Some(server.to_string()));
        if !servers.contains(&server) {
            servers.push(server);
        }
    }
    servers.sort();
    assert_eq!(servers, vec![Ipv4Addr::new(127, 0, 0, 1), Ipv4Addr::new(127, 0, 0, 2)]);

    let relayed = time::timeout(TIMEOUT, async {
        loop {
            if let Event::RequestSeen { interface, relayed: true, .. } = events.recv().await.unwrap() {
                return interface;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(relayed, "test1");

    handle.stop().await;
}
