/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
mod common;

use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mnet_rs::{ClientConfig, ClientEngine, EngineError, LifecycleState};

use common::*;

fn peer() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
    let address = listener.local_addr().unwrap();
    (listener, address)
}

fn accept(listener: &TcpListener) -> TcpStream {
    let (stream, _) = listener.accept().unwrap();
    stream.set_read_timeout(Some(WAIT)).unwrap();
    stream
}

fn config_for(address: SocketAddr) -> ClientConfig {
    let mut config = ClientConfig::new(address.ip().to_string(), address.port());
    config.connection_timeout = Duration::from_secs(5);
    config
}

#[test]
fn connect_exchange_and_disconnect() {
    init_logger();
    let (listener, address) = peer();
    let (handler, events) = client_recorder(false);
    let client = ClientEngine::new(config_for(address), handler);

    assert_eq!(client.state(), LifecycleState::Closed);
    client.connect().unwrap();
    assert!(client.is_connected());
    assert_eq!(client.state(), LifecycleState::Established);
    assert_eq!(events.recv_timeout(WAIT).unwrap(), ClientEvent::Connected);
    let mut server_side = accept(&listener);
    assert_eq!(client.local_addr(), Some(server_side.peer_addr().unwrap()));

    server_side.write_all(b"ping").unwrap();
    assert_eq!(expect_client_data(&events, 4), b"ping");

    assert!(client.send(b"pong"));
    assert_eq!(read_exactly(&mut server_side, 4), b"pong");

    client.disconnect();
    assert!(!client.is_connected());
    assert_eq!(client.state(), LifecycleState::Closed);
    assert_eq!(events.try_recv().unwrap(), ClientEvent::Disconnected);
    assert!(sees_eof(&mut server_side));

    client.disconnect();
    assert!(events.recv_timeout(QUIET).is_err());
    assert!(!client.send(b"after"));

    let stats = client.statistics();
    assert_eq!(stats.connections(), 1);
    assert_eq!(stats.received().bytes(), 4);
    assert_eq!(stats.sent().bytes(), 4);
}

#[test]
fn connecting_twice_is_a_no_op() {
    init_logger();
    let (listener, address) = peer();
    let (handler, events) = client_recorder(false);
    let client = ClientEngine::new(config_for(address), handler);

    client.connect().unwrap();
    let _server_side = accept(&listener);
    client.connect().unwrap();
    assert_eq!(events.recv_timeout(WAIT).unwrap(), ClientEvent::Connected);
    assert!(events.recv_timeout(QUIET).is_err());
}

#[test]
fn refused_connection_fails_cleanly() {
    init_logger();
    let (listener, address) = peer();
    drop(listener);

    let (handler, events) = client_recorder(false);
    let client = ClientEngine::new(config_for(address), handler);
    match client.connect() {
        Err(EngineError::Failed(error)) => assert_eq!(error.kind(), ErrorKind::ConnectionRefused),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!client.is_connected());
    assert_eq!(client.state(), LifecycleState::Closed);
    assert!(!client.send(b"nobody"));
    assert!(events.recv_timeout(QUIET).is_err());
}

#[test]
fn unreachable_server_fails_within_the_timeout() {
    init_logger();
    let (handler, events) = client_recorder(false);
    let mut config = ClientConfig::new("10.255.255.1", 9);
    config.connection_timeout = Duration::from_millis(300);
    let client = Arc::new(ClientEngine::new(config, handler));

    let done = Arc::new(AtomicBool::new(false));
    let watcher = {
        let client = client.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut seen_connecting = false;
            while !done.load(Ordering::Acquire) {
                seen_connecting |= client.state() == LifecycleState::Connecting;
                thread::sleep(Duration::from_millis(1));
            }
            seen_connecting
        })
    };

    let started = Instant::now();
    let result = client.connect();
    done.store(true, Ordering::Release);
    let seen_connecting = watcher.join().unwrap();

    assert!(matches!(result, Err(EngineError::TimedOut) | Err(EngineError::Failed(_))), "unexpected result: {:?}", result);
    if matches!(result, Err(EngineError::TimedOut)) {
        assert!(seen_connecting);
    }
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!client.is_connected());
    assert_eq!(client.state(), LifecycleState::Closed);
    assert!(events.recv_timeout(QUIET).is_err());
}

#[test]
fn unknown_host_is_unresolved() {
    init_logger();
    let (handler, _events) = client_recorder(false);
    let client = ClientEngine::new(ClientConfig::new("no-such-host.invalid", 80), handler);
    assert!(matches!(client.connect(), Err(EngineError::Unresolved(_))));
}

#[test]
fn server_close_is_reported_once() {
    init_logger();
    let (listener, address) = peer();
    let (handler, events) = client_recorder(false);
    let client = ClientEngine::new(config_for(address), handler);

    client.connect().unwrap();
    assert_eq!(events.recv_timeout(WAIT).unwrap(), ClientEvent::Connected);
    drop(accept(&listener));

    assert_eq!(events.recv_timeout(WAIT).unwrap(), ClientEvent::Disconnected);
    assert!(eventually(|| !client.is_connected()));
    assert!(!client.send(b"gone"));

    client.disconnect();
    assert!(events.recv_timeout(QUIET).is_err());
}

#[test]
fn reconnect_after_disconnect() {
    init_logger();
    let (listener, address) = peer();
    let (handler, events) = client_recorder(false);
    let client = ClientEngine::new(config_for(address), handler);

    for round in 0..3u8 {
        client.connect().unwrap();
        assert_eq!(events.recv_timeout(WAIT).unwrap(), ClientEvent::Connected);
        let mut server_side = accept(&listener);

        assert!(client.send(&[round]));
        assert_eq!(read_exactly(&mut server_side, 1), [round]);

        client.disconnect();
        assert_eq!(events.try_recv().unwrap(), ClientEvent::Disconnected);
    }
    assert_eq!(client.statistics().connections(), 3);
}

#[test]
fn disconnect_from_callback() {
    init_logger();
    let (listener, address) = peer();
    let (handler, events) = client_recorder(true);
    let client = ClientEngine::new(config_for(address), handler);

    client.connect().unwrap();
    assert_eq!(events.recv_timeout(WAIT).unwrap(), ClientEvent::Connected);
    let mut server_side = accept(&listener);

    server_side.write_all(b"bye").unwrap();
    expect_client_data(&events, 3);
    assert_eq!(events.recv_timeout(WAIT).unwrap(), ClientEvent::Disconnected);
    assert!(!client.is_connected());
    assert!(sees_eof(&mut server_side));

    /* reaps the engine thread */
    client.disconnect();
    assert!(events.recv_timeout(QUIET).is_err());
}

#[test]
fn clients_follow_a_stopping_server() {
    init_logger();
    let (server, server_events) = recording_server(Reaction::Echo);
    let address = server.local_addr().unwrap();

    let clients: Vec<_> = (0..3)
        .map(|_| {
            let (handler, events) = client_recorder(false);
            let client = ClientEngine::new(config_for(address), handler);
            client.connect().unwrap();
            assert_eq!(events.recv_timeout(WAIT).unwrap(), ClientEvent::Connected);
            expect_connected(&server_events);
            (client, events)
        })
        .collect();

    let (first, first_events) = &clients[0];
    assert!(first.send(b"echo"));
    assert_eq!(expect_client_data(first_events, 4), b"echo");

    server.stop();
    for (client, events) in clients.iter() {
        let mut seen = Vec::new();
        while let Ok(event) = events.recv_timeout(WAIT) {
            let last = event == ClientEvent::Disconnected;
            seen.push(event);
            if last {
                break;
            }
        }
        assert_eq!(seen.last(), Some(&ClientEvent::Disconnected));
        assert!(eventually(|| !client.is_connected()));
    }
}

#[test]
fn client_disconnect_reaches_the_server_once() {
    init_logger();
    let (server, server_events) = recording_server(Reaction::Echo);
    let (handler, events) = client_recorder(false);
    let client = ClientEngine::new(config_for(server.local_addr().unwrap()), handler);

    client.connect().unwrap();
    assert_eq!(events.recv_timeout(WAIT).unwrap(), ClientEvent::Connected);
    let id = expect_connected(&server_events);
    assert_eq!(server.connected_count(), 1);

    assert!(client.send(b"hello"));
    assert_eq!(expect_data(&server_events, id, 5), b"hello");
    assert_eq!(expect_client_data(&events, 5), b"hello");

    client.disconnect();
    assert_eq!(client.state(), LifecycleState::Closed);
    assert_eq!(events.try_recv().unwrap(), ClientEvent::Disconnected);

    assert_eq!(expect_disconnected(&server_events), id);
    assert!(eventually(|| server.connected_count() == 0));
    assert!(server_events.recv_timeout(QUIET).is_err());
    assert!(events.recv_timeout(QUIET).is_err());
    assert!(server.is_running());
}
