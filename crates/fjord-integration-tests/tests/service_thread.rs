use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use fjord_host::{Host, HostConfig, Packet, Peer};
use fjord_integration_tests::{loopback_server, pump, wait_for};
use fjord_tasks::TaskScheduler;

#[test]
fn background_server_echoes() {
    let (server, endpoint) = loopback_server(HostConfig::default());
    server.on_receive(|e| {
        let _ = e.peer.send(e.channel, Packet::reliable(e.packet.data()));
    });
    server.start_service_thread().unwrap();
    assert!(server.is_service_thread_running());

    let client = Host::create_client(HostConfig::default()).unwrap();
    let echoes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&echoes);
    client.on_receive(move |e| sink.lock().unwrap().push(e.packet.to_vec()));

    let peer = client.connect(&endpoint, 1, 0).unwrap();
    assert!(pump(&[&client], || peer.is_connected()));

    peer.send(0, Packet::reliable(b"echo me")).unwrap();
    client.flush();
    assert!(pump(&[&client], || !echoes.lock().unwrap().is_empty()));
    assert_eq!(echoes.lock().unwrap()[0], b"echo me");

    server.stop_service_thread();
    assert!(!server.is_service_thread_running());
}

#[test]
fn both_sides_threaded() {
    let (server, endpoint) = loopback_server(HostConfig::default());
    let client = Host::create_client(HostConfig::default()).unwrap();

    let connected = Arc::new(AtomicUsize::new(0));
    for host in [&server, &client] {
        let counter = Arc::clone(&connected);
        host.on_connect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }

    server.start_service_thread().unwrap();
    client.start_service_thread().unwrap();

    let peer = client.connect(&endpoint, 1, 0).unwrap();
    assert!(wait_for(|| connected.load(Ordering::SeqCst) == 2));
    assert!(peer.is_connected());

    client.stop_service_thread();
    server.stop_service_thread();
}

#[test]
fn sends_from_worker_threads() {
    let (server, endpoint) = loopback_server(HostConfig::default());
    let client = Host::create_client(HostConfig::default()).unwrap();

    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    server.on_receive(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let peer: Arc<Peer> = client.connect(&endpoint, 1, 0).unwrap();
    assert!(pump(&[&server, &client], || peer.is_connected()));

    let scheduler = TaskScheduler::with_workers(2);
    scheduler.start();
    let sent = Arc::new(AtomicUsize::new(0));
    for i in 0..4u32 {
        let peer = Arc::clone(&peer);
        let sent = Arc::clone(&sent);
        scheduler.schedule(move || {
            if peer.send(0, Packet::from_value(&i, Default::default())).is_ok() {
                sent.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    assert!(wait_for(|| sent.load(Ordering::SeqCst) == 4));
    scheduler.stop();

    assert!(pump(&[&server, &client], || received.load(Ordering::SeqCst) == 4));
}
