/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::str;

use mnet_rs::{ConnectionId, ServerConfig, ServerEngine, ServerHandle, ServerHandler};

use log::{error, info, warn};

const PORT_NUMBER: u16 = 8080;
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

struct EchoHandler;

impl ServerHandler for EchoHandler {
    fn on_connected(&self, server: &ServerHandle, id: ConnectionId, remote_address: &str) {
        info!("Client {} connected from {} ({} connections)", id, remote_address, server.connected_count());
    }

    fn on_data(&self, server: &ServerHandle, id: ConnectionId, data: &[u8]) {
        info!("Client {} sent: {:?}", id, str::from_utf8(data).unwrap_or("<binary data>"));
        if !server.send(id, data) {
            warn!("Failed to echo data back to client {}!", id);
        }
    }

    fn on_disconnected(&self, _server: &ServerHandle, id: ConnectionId) {
        info!("Client {} disconnected", id);
    }
}

fn main() {
    /* Initialize the log output */
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    /* Print logo */
    info!("mnet - Example Echo Server [Version {}]", PKG_VERSION);

    /* Pin the engine thread to the last processor, if there is more than one */
    let mut config = ServerConfig::new(PORT_NUMBER);
    config.name = "echo-server".to_owned();
    let cpu_count = num_cpus::get();
    if cpu_count > 1 {
        config.cpu_affinity = Some(cpu_count - 1);
    }

    /* Start the server */
    let server = ServerEngine::new(config, EchoHandler);
    if let Err(error) = server.start() {
        return error!("Failed to start the server: {}", error);
    }

    /* Wait for Ctrl+C */
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        warn!("Shutdown has been requested!");
        let _ = shutdown_tx.try_send(());
    })
    .expect("Failed to register CTRL+C handler!");

    info!("Waiting for incoming connections on {:?}...", server.local_addr());
    let _ = shutdown_rx.recv();

    /* Stop the server */
    server.stop();
    let stats = server.statistics();
    info!("Served {} connections, received {} bytes, sent {} bytes", stats.connections(), stats.received().bytes(), stats.sent().bytes());

    /* Bye! */
    info!("That's it, goodbye!");
}
