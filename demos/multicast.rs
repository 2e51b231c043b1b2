/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::net::Ipv4Addr;
use std::str;
use std::time::Duration;

use mnet_rs::{MulticastReceiver, MulticastReceiverConfig, MulticastSender, MulticastSenderConfig};

use crossbeam_channel::RecvTimeoutError;
use log::{error, info, warn};

const GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 1);
const PORT_NUMBER: u16 = 30001;
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    /* Initialize the log output */
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    /* Print logo */
    info!("mnet - Example Multicast Publisher/Subscriber [Version {}]", PKG_VERSION);

    /* Start the receiver */
    let receiver = MulticastReceiver::new(MulticastReceiverConfig::new(GROUP, PORT_NUMBER), |data: &[u8], sender: &str| {
        info!("Received from {}: {:?}", sender, str::from_utf8(data).unwrap_or("<binary data>"));
    });
    if let Err(error) = receiver.start() {
        return error!("Failed to start the receiver: {}", error);
    }

    /* Start the sender, with loopback so that we see our own datagrams */
    let mut config = MulticastSenderConfig::new(GROUP, PORT_NUMBER);
    config.enable_loopback = true;
    let sender = MulticastSender::new(config);
    if let Err(error) = sender.start() {
        return error!("Failed to start the sender: {}", error);
    }

    /* Register Ctrl+C handler */
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        warn!("Shutdown has been requested!");
        let _ = shutdown_tx.try_send(());
    })
    .expect("Failed to register CTRL+C handler!");

    /* Publish a tick every second */
    let mut sequence = 0u64;
    loop {
        sequence += 1;
        if !sender.send(format!("tick {}", sequence).as_bytes()) {
            warn!("Failed to publish tick {}!", sequence);
        }
        match shutdown_rx.recv_timeout(Duration::from_secs(1)) {
            Err(RecvTimeoutError::Timeout) => continue,
            _ => break,
        }
    }

    /* Shut down */
    sender.stop();
    receiver.stop();
    info!("Sent {} datagrams, received {} datagrams", sender.statistics().messages(), receiver.statistics().messages());

    /* Bye! */
    info!("That's it, goodbye!");
}
