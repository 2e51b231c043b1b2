/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
mod common;

use std::net::Ipv4Addr;

use crossbeam_channel::unbounded;

use mnet_rs::{MulticastReceiver, MulticastReceiverConfig, MulticastSender, MulticastSenderConfig};

use common::*;

const GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 42, 99);

#[test]
fn stopped_sender_drops_datagrams() {
    init_logger();
    let sender = MulticastSender::new(MulticastSenderConfig::new(GROUP, 30002));
    assert!(!sender.send(b"lost"));
    sender.start().unwrap();
    sender.stop();
    assert!(!sender.send(b"lost"));
    assert_eq!(sender.statistics().messages(), 0);
    assert_eq!(sender.statistics().errors(), 0);
}

#[test]
#[ignore = "requires a multicast capable network interface"]
fn datagrams_travel_from_sender_to_receiver() {
    init_logger();
    let (tx, rx) = unbounded();
    let receiver = MulticastReceiver::new(MulticastReceiverConfig::new(GROUP, 0), move |data: &[u8], sender: &str| {
        let _ = tx.send((data.to_vec(), sender.to_owned()));
    });
    receiver.start().unwrap();
    let port = receiver.local_addr().unwrap().port();

    let mut config = MulticastSenderConfig::new(GROUP, port);
    config.enable_loopback = true;
    let sender = MulticastSender::new(config);
    sender.start().unwrap();

    for n in 0..3u8 {
        assert!(sender.send(&[b't', b'i', b'c', b'k', b'0' + n]));
    }
    for n in 0..3u8 {
        let (data, from) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(data, [b't', b'i', b'c', b'k', b'0' + n]);
        assert!(!from.is_empty());
    }
    assert_eq!(sender.statistics().messages(), 3);
    assert_eq!(sender.statistics().bytes(), 15);
    assert_eq!(receiver.statistics().messages(), 3);

    sender.stop();
    receiver.stop();
    assert!(!receiver.is_running());
    assert_eq!(receiver.local_addr(), None);
}
