//! The engine: binds the listeners, the relay tunnel and the TFTP responder, and runs them.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures::future;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

use crate::{
    client_table::ClientTable,
    config::ServerConfig,
    error::Error,
    event::{publish, Event, EVENT_CHANNEL_CAPACITY},
    interface::InterfaceRegistry,
    listener::Listener,
    tftp::{BootRoot, Responder},
    tunnel::{Forwarder, TunnelClient, RELAY_QUEUE_CAPACITY},
};

/// A configured engine that has not been started yet.
pub struct Engine {
    config: ServerConfig,
    registry: InterfaceRegistry,
    events: broadcast::Sender<Event>,
}

impl Engine {
    pub fn new(config: ServerConfig, registry: InterfaceRegistry) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Engine {
            config,
            registry,
            events,
        }
    }

    /// Subscribing before `start` catches the bind events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Binds everything and spawns the tasks.
    ///
    /// Interfaces that cannot be bound are skipped, so are the relay and TFTP if they fail.
    ///
    /// # Errors
    /// `Error::Config` if the configuration is invalid,
    /// `Error::NoInterfaces` if no DHCP listener could be bound.
    pub async fn start(self) -> Result<Handle, Error> {
        self.config.validate()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let clients = Arc::new(ClientTable::new());

        let mut listeners = Vec::with_capacity(self.registry.len());
        let mut dhcp_endpoints = Vec::with_capacity(self.registry.len());
        for interface in self.registry.dhcp_candidates() {
            let mut listener = Listener::new(
                &self.config,
                interface,
                Arc::clone(&clients),
                self.events.clone(),
                Arc::clone(&shutdown),
            );
            match listener.bind() {
                Ok(address) => {
                    publish(
                        &self.events,
                        Event::ListenerBound {
                            interface: interface.name.to_owned(),
                            address,
                        },
                    );
                    dhcp_endpoints.push((interface.name.to_owned(), address));
                    listeners.push(listener);
                },
                Err(error) => {
                    warn!("DHCP disabled on {}: {}", interface.name, error);
                    publish(
                        &self.events,
                        Event::ListenerDisabled {
                            interface: interface.name.to_owned(),
                            reason: error.to_string(),
                        },
                    );
                },
            }
        }
        if listeners.is_empty() {
            return Err(Error::NoInterfaces);
        }

        let mut tasks = Vec::with_capacity(listeners.len() + 2);

        let mut relay_endpoint = None;
        if self.config.relay && listeners.len() > 1 {
            match self.relay(&mut listeners, &shutdown).await {
                Ok(forwarder) => {
                    relay_endpoint = forwarder.local_addr().ok();
                    tasks.push(tokio::spawn(forwarder.run()));
                },
                Err(error) => warn!("Relay disabled: {}", error),
            }
        }

        let mut tftp_endpoint = None;
        match self.responder(&shutdown) {
            Ok(responder) => {
                tftp_endpoint = responder.local_addr().ok();
                if let Some(address) = tftp_endpoint {
                    info!("TFTP responder bound to {}", address);
                    publish(&self.events, Event::TftpBound { address });
                }
                tasks.push(tokio::spawn(responder.run()));
            },
            Err(error) => warn!("TFTP disabled: {}", error),
        }

        for listener in listeners.into_iter() {
            tasks.push(tokio::spawn(async move {
                listener.run().await;
            }));
        }

        info!("PXE engine started on {} interfaces", dhcp_endpoints.len());
        Ok(Handle {
            shutdown,
            tasks,
            events: self.events,
            clients,
            dhcp_endpoints,
            relay_endpoint,
            tftp_endpoint,
        })
    }

    /// Connects every listener to a forwarder on the loopback.
    async fn relay(&self, listeners: &mut [Listener], shutdown: &Arc<AtomicBool>) -> Result<Forwarder, Error> {
        let mut forwarder = Forwarder::bind(
            &self.config.tunnel_ports(),
            Arc::clone(shutdown),
            self.config.poll_interval(),
            self.events.clone(),
        )?;
        let address = forwarder.local_addr()?;

        for listener in listeners.iter_mut() {
            let (sender, receiver) = mpsc::channel(RELAY_QUEUE_CAPACITY);
            let client = TunnelClient::bind(address).await?;
            forwarder.add_route(listener.name(), sender);
            listener.attach_tunnel(client, receiver);
        }

        info!("Relay tunnel bound to {}", address);
        publish(&self.events, Event::RelayBound { address });
        Ok(forwarder)
    }

    fn responder(&self, shutdown: &Arc<AtomicBool>) -> Result<Responder, Error> {
        let root = BootRoot::open(&self.config.boot_root)?;
        let responder = Responder::bind(&self.config, root, Arc::clone(shutdown), self.events.clone())?;
        Ok(responder)
    }
}

/// A running engine.
pub struct Handle {
    shutdown: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
    events: broadcast::Sender<Event>,
    clients: Arc<ClientTable>,
    dhcp_endpoints: Vec<(String, SocketAddr)>,
    relay_endpoint: Option<SocketAddr>,
    tftp_endpoint: Option<SocketAddr>,
}

impl Handle {
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// The interface names and the addresses their listeners are bound to.
    pub fn dhcp_endpoints(&self) -> &[(String, SocketAddr)] {
        &self.dhcp_endpoints
    }

    pub fn relay_endpoint(&self) -> Option<SocketAddr> {
        self.relay_endpoint
    }

    pub fn tftp_endpoint(&self) -> Option<SocketAddr> {
        self.tftp_endpoint
    }

    pub fn clients(&self) -> &ClientTable {
        &self.clients
    }

    /// Raises the shutdown flag and waits for every task to notice it.
    ///
    /// Takes up to one poll interval, or one TFTP timeout while transfers are running.
    pub async fn stop(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for finished in future::join_all(self.tasks).await {
            if let Err(error) = finished {
                error!("An engine task failed: {}", error);
            }
        }
        info!("PXE engine stopped");
        publish(&self.events, Event::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use eui48::MacAddress;

    use super::*;
    use crate::interface::{InterfaceDescriptor, LinkType};

    fn loopback_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.dhcp_port = 0;
        config.tftp_port = 0;
        config.tftp_address = Ipv4Addr::LOCALHOST;
        config.tunnel_port = 0;
        config.bind_to_device = false;
        config.poll_interval_ms = 50;
        config.boot_root = std::env::temp_dir();
        config
    }

    #[tokio::test]
    async fn no_interfaces() {
        let mut lo = InterfaceDescriptor::new("lo", Ipv4Addr::LOCALHOST, 8, MacAddress::nil());
        lo.link_type = LinkType::Loopback;
        let engine = Engine::new(loopback_config(), InterfaceRegistry::new(vec![lo]));

        assert!(matches!(engine.start().await, Err(Error::NoInterfaces)));
    }

    #[tokio::test]
    async fn invalid_config() {
        let mut config = loopback_config();
        config.boot_filename = String::new();
        let engine = Engine::new(config, InterfaceRegistry::default());

        assert!(matches!(engine.start().await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn start_and_stop() {
        let interface = InterfaceDescriptor::new("test0", Ipv4Addr::LOCALHOST, 8, MacAddress::nil());
        let engine = Engine::new(loopback_config(), InterfaceRegistry::new(vec![interface]));
        let mut events = engine.subscribe();

        let handle = engine.start().await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), Event::ListenerBound { ref interface, .. } if interface == "test0"));
        assert!(matches!(events.recv().await.unwrap(), Event::TftpBound { .. }));
        assert_eq!(handle.dhcp_endpoints().len(), 1);
        assert!(handle.tftp_endpoint().is_some());
        assert!(handle.relay_endpoint().is_none());
        assert!(handle.clients().is_empty());

        let mut after = handle.subscribe();
        handle.stop().await;
        assert_eq!(after.recv().await.unwrap(), Event::Stopped);
    }
}
