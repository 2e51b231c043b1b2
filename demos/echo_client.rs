/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::str;
use std::time::Duration;

use mnet_rs::{ClientConfig, ClientEngine, ClientHandle, ClientHandler, EngineError};

use crossbeam_channel::{RecvTimeoutError, Sender};
use log::{error, info, warn};

const REMOTE_HOST: &str = "localhost";
const PORT_NUMBER: u16 = 8080;
const MESSAGE_COUNT: usize = 10;
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

struct EchoClient {
    replies: Sender<Option<Vec<u8>>>,
}

impl ClientHandler for EchoClient {
    fn on_connected(&self, client: &ClientHandle) {
        info!("Connected: {:?}", client.local_addr());
    }

    fn on_data(&self, _client: &ClientHandle, data: &[u8]) {
        let _ = self.replies.send(Some(data.to_vec()));
    }

    fn on_disconnected(&self, _client: &ClientHandle) {
        let _ = self.replies.send(None);
    }
}

fn main() {
    /* Initialize the log output */
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    /* Print logo */
    info!("mnet - Example Echo Client [Version {}]", PKG_VERSION);

    /* Connect to the server */
    let (replies_tx, replies_rx) = crossbeam_channel::unbounded();
    let mut config = ClientConfig::new(REMOTE_HOST, PORT_NUMBER);
    config.connection_timeout = Duration::from_secs(10);
    let client = ClientEngine::new(config, EchoClient { replies: replies_tx.clone() });

    if let Err(error) = client.connect() {
        match error {
            EngineError::TimedOut => error!("Connect operation timed out!"),
            EngineError::Unresolved(host) => error!("Failed to resolve host {:?}!", host),
            EngineError::Failed(inner) => error!("Connect operation failed: {:?}", inner),
        }
        return;
    }

    /* Abort on Ctrl+C */
    ctrlc::set_handler(move || {
        warn!("Shutdown has been requested!");
        let _ = replies_tx.send(None);
    })
    .expect("Failed to register CTRL+C handler!");

    /* Send messages and wait for the echo */
    'outer: for n in 0..MESSAGE_COUNT {
        let message = format!("Hello #{}!", n);
        if !client.send(message.as_bytes()) {
            error!("Failed to send message!");
            break;
        }
        let mut echoed = Vec::new();
        while echoed.len() < message.len() {
            match replies_rx.recv_timeout(Duration::from_secs(5)) {
                Ok(Some(data)) => echoed.extend_from_slice(&data),
                Ok(None) => break 'outer,
                Err(RecvTimeoutError::Timeout) => {
                    warn!("No reply within 5 seconds!");
                    break 'outer;
                }
                Err(RecvTimeoutError::Disconnected) => break 'outer,
            }
        }
        info!("Reply: {:?}", str::from_utf8(&echoed).unwrap_or("<binary data>"));
    }

    /* Disconnect */
    client.disconnect();
    let stats = client.statistics();
    info!("Sent {} messages ({} bytes), received {} bytes", stats.sent().messages(), stats.sent().bytes(), stats.received().bytes());

    /* Bye! */
    info!("That's it, goodbye!");
}
