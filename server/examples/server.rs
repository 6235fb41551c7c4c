#[macro_use]
extern crate log;

use std::{env, process};

use pxe_bridge::{ConfigFile, Engine, InterfaceRegistry, StaticInterfaces};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() {
    env_logger::init();

    let path = env::args().nth(1).unwrap_or_else(|| "server/examples/bridge.yaml".to_owned());
    let file = match ConfigFile::load(&path) {
        Ok(file) => file,
        Err(error) => {
            error!("Unable to load {}: {}", path, error);
            process::exit(1);
        },
    };
    let registry = match InterfaceRegistry::from_source(&StaticInterfaces::new(file.interfaces)) {
        Ok(registry) => registry,
        Err(error) => {
            error!("Unable to read the interfaces: {}", error);
            process::exit(1);
        },
    };

    let engine = Engine::new(file.server, registry);
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{}", event),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let handle = match engine.start().await {
        Ok(handle) => handle,
        Err(error) => {
            error!("Unable to start: {}", error);
            process::exit(1);
        },
    };
    for (interface, address) in handle.dhcp_endpoints() {
        println!("{:32} | {}", interface, address);
    }

    if let Err(error) = tokio::signal::ctrl_c().await {
        error!("Unable to wait for Ctrl-C: {}", error);
    }
    handle.stop().await;
}
