//! Channel lifecycle over real sockets: SERINIT, SERREAD, SERWRITE,
//! SERTERM, listener mode and reload behaviour.

mod support;

use std::time::Duration;

use support::{TEST_TIME_REPLY, config_with_drive, recv, send, start_server, zeroed_image};

use daemon::{DwConfig, SerialMode, SerialTarget};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

fn client_map_entry(config: &mut DwConfig, channel: u8, port: u16) {
    config.serial_map.insert(
        channel.to_string(),
        SerialTarget {
            host: "127.0.0.1".to_string(),
            port,
            mode: SerialMode::Client,
        },
    );
}

/// Reserves a local port: bind, note the port, release. The tiny reuse
/// race is acceptable in tests.
fn allocate_test_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("reserve port");
    listener.local_addr().expect("local addr").port()
}

async fn connect_with_retries(port: u16) -> TcpStream {
    for _ in 0..100 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("listener on port {port} never became reachable");
}

/// Polls SERREAD until a channel byte appears or the budget runs out.
async fn poll_serread(host: &mut tokio::io::DuplexStream) -> [u8; 2] {
    for _ in 0..200 {
        send(host, &[0x43]).await;
        let reply = recv::<2>(host).await;
        if reply != [0x00, 0x00] {
            return reply;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no channel byte arrived");
}

#[tokio::test]
async fn serinit_client_binding_feeds_serread() {
    let remote = TcpListener::bind("127.0.0.1:0").await.expect("bind remote");
    let port = remote.local_addr().expect("local addr").port();

    let mut config = DwConfig::default();
    client_map_entry(&mut config, 0, port);
    let (mut host, server) = start_server(config);

    send(&mut host, &[0x4E, 0x00]).await;
    let (mut peer, _addr) = timeout(Duration::from_secs(5), remote.accept())
        .await
        .expect("accept deadline")
        .expect("accept");

    peer.write_all(b"H").await.expect("peer write");

    // Channel 0 reports as 1 on the wire.
    assert_eq!(poll_serread(&mut host).await, [0x01, b'H']);

    let status = server.status().await;
    let rx = status
        .telemetry
        .serial
        .iter()
        .find(|&&(chan, _)| chan == 0)
        .map(|&(_, counters)| counters.rx);
    assert_eq!(rx, Some(1));

    server.stop().await;
}

#[tokio::test]
async fn serread_scans_channels_in_ascending_order() {
    let low_remote = TcpListener::bind("127.0.0.1:0").await.expect("bind low");
    let high_remote = TcpListener::bind("127.0.0.1:0").await.expect("bind high");

    let mut config = DwConfig::default();
    client_map_entry(&mut config, 1, low_remote.local_addr().expect("addr").port());
    client_map_entry(&mut config, 5, high_remote.local_addr().expect("addr").port());
    let (mut host, server) = start_server(config);

    send(&mut host, &[0x4E, 0x05]).await;
    let (mut high_peer, _) = high_remote.accept().await.expect("accept high");
    send(&mut host, &[0x4E, 0x01]).await;
    let (mut low_peer, _) = low_remote.accept().await.expect("accept low");

    high_peer.write_all(b"h").await.expect("high write");
    low_peer.write_all(b"l").await.expect("low write");

    // Give both reader tasks time to buffer their byte, then poll:
    // with both buffers non-empty the lower channel index must win.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(poll_serread(&mut host).await, [0x02, b'l']);
    assert_eq!(poll_serread(&mut host).await, [0x06, b'h']);

    server.stop().await;
}

#[tokio::test]
async fn serwrite_forwards_one_byte_to_the_remote() {
    let remote = TcpListener::bind("127.0.0.1:0").await.expect("bind remote");
    let port = remote.local_addr().expect("local addr").port();

    let mut config = DwConfig::default();
    client_map_entry(&mut config, 2, port);
    let (mut host, server) = start_server(config);

    send(&mut host, &[0x4E, 0x02]).await;
    let (mut peer, _) = remote.accept().await.expect("accept");

    send(&mut host, &[0xC3, 0x02, b'P']).await;
    let mut byte = [0u8; 1];
    timeout(Duration::from_secs(5), peer.read_exact(&mut byte))
        .await
        .expect("byte deadline")
        .expect("byte");
    assert_eq!(byte, [b'P']);

    server.stop().await;
}

#[tokio::test]
async fn serwrite_without_a_binding_discards_silently() {
    let (mut host, server) = start_server(DwConfig::default());

    send(&mut host, &[0xC3, 0x09, b'X', 0x23]).await;
    assert_eq!(recv::<6>(&mut host).await, TEST_TIME_REPLY);

    server.stop().await;
}

#[tokio::test]
async fn serterm_clears_the_buffer_and_closes_the_binding() {
    let remote = TcpListener::bind("127.0.0.1:0").await.expect("bind remote");
    let port = remote.local_addr().expect("local addr").port();

    let mut config = DwConfig::default();
    client_map_entry(&mut config, 0, port);
    let (mut host, server) = start_server(config);

    send(&mut host, &[0x4E, 0x00]).await;
    let (mut peer, _) = remote.accept().await.expect("accept");
    peer.write_all(b"QQ").await.expect("peer write");

    // One byte drained, one left buffered.
    assert_eq!(poll_serread(&mut host).await, [0x01, b'Q']);

    send(&mut host, &[0x45, 0x00]).await;
    // The remote sees the connection close.
    let mut scratch = [0u8; 1];
    let closed = timeout(Duration::from_secs(5), peer.read(&mut scratch))
        .await
        .expect("close deadline")
        .expect("close read");
    assert_eq!(closed, 0);

    // And the leftover buffered byte is gone.
    send(&mut host, &[0x43]).await;
    assert_eq!(recv::<2>(&mut host).await, [0x00, 0x00]);

    server.stop().await;
}

#[tokio::test]
async fn serinit_server_mode_accepts_a_peer_and_replaces_it_on_reconnect() {
    let port = allocate_test_port();

    let mut config = DwConfig::default();
    config.serial_map.insert(
        "3".to_string(),
        SerialTarget {
            host: "127.0.0.1".to_string(),
            port,
            mode: SerialMode::Server,
        },
    );
    let (mut host, server) = start_server(config);

    send(&mut host, &[0x4E, 0x03]).await;
    let mut first = connect_with_retries(port).await;
    first.write_all(b"S").await.expect("first write");
    assert_eq!(poll_serread(&mut host).await, [0x04, b'S']);

    // A second peer takes over; the first connection is closed.
    let mut second = connect_with_retries(port).await;
    second.write_all(b"T").await.expect("second write");
    assert_eq!(poll_serread(&mut host).await, [0x04, b'T']);

    let mut scratch = [0u8; 1];
    let closed = timeout(Duration::from_secs(5), first.read(&mut scratch))
        .await
        .expect("close deadline")
        .expect("close read");
    assert_eq!(closed, 0);

    server.stop().await;
}

#[tokio::test]
async fn serinit_without_a_mapping_is_a_silent_no_op() {
    let (mut host, server) = start_server(DwConfig::default());

    send(&mut host, &[0x4E, 0x1F, 0x23]).await;
    assert_eq!(recv::<6>(&mut host).await, TEST_TIME_REPLY);

    server.stop().await;
}

#[tokio::test]
async fn remote_eof_logs_but_leaves_the_binding_for_serterm() {
    let remote = TcpListener::bind("127.0.0.1:0").await.expect("bind remote");
    let port = remote.local_addr().expect("local addr").port();

    let mut config = DwConfig::default();
    client_map_entry(&mut config, 4, port);
    let (mut host, server) = start_server(config);

    send(&mut host, &[0x4E, 0x04]).await;
    let (peer, _) = remote.accept().await.expect("accept");
    drop(peer);

    // The reader task notices EOF and records it.
    let mut logged = false;
    for _ in 0..200 {
        let status = server.status().await;
        if status
            .telemetry
            .logs
            .iter()
            .any(|entry| entry.contains("channel 4: remote closed"))
        {
            logged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(logged, "reader EOF was never logged");

    // The server stays healthy; teardown is still the host's call.
    send(&mut host, &[0x45, 0x04, 0x23]).await;
    assert_eq!(recv::<6>(&mut host).await, TEST_TIME_REPLY);

    server.stop().await;
}

#[tokio::test]
async fn reload_closes_bindings_and_rebinds_drives() {
    let remote = TcpListener::bind("127.0.0.1:0").await.expect("bind remote");
    let port = remote.local_addr().expect("local addr").port();

    let mut config = DwConfig::default();
    client_map_entry(&mut config, 0, port);
    let (mut host, server) = start_server(config);

    send(&mut host, &[0x4E, 0x00]).await;
    let (mut peer, _) = remote.accept().await.expect("accept");

    let image = zeroed_image(4);
    server.reload(config_with_drive(1, &image)).await;

    // The old binding died with the reload.
    let mut scratch = [0u8; 1];
    let closed = timeout(Duration::from_secs(5), peer.read(&mut scratch))
        .await
        .expect("close deadline")
        .expect("close read");
    assert_eq!(closed, 0);

    // And the new drive answers.
    send(&mut host, &[0x52, 0x01, 0x00, 0x00, 0x00]).await;
    let header = recv::<3>(&mut host).await;
    assert_eq!(header[0], 0x00);
    let _ = support::recv_vec(&mut host, 256).await;

    let status = server.status().await;
    assert!(status.drives[0].is_none());
    assert!(status.drives[1].is_some());

    server.stop().await;
}

#[tokio::test]
async fn monitor_channel_snoops_serread_traffic() {
    let remote = TcpListener::bind("127.0.0.1:0").await.expect("bind remote");
    let port = remote.local_addr().expect("local addr").port();

    let mut config = DwConfig::default();
    client_map_entry(&mut config, 0, port);
    let (mut host, server) = start_server(config);
    server.set_monitor_channel(0);

    send(&mut host, &[0x4E, 0x00]).await;
    let (mut peer, _) = remote.accept().await.expect("accept");
    peer.write_all(b"ok").await.expect("peer write");

    assert_eq!(poll_serread(&mut host).await, [0x01, b'o']);
    assert_eq!(poll_serread(&mut host).await, [0x01, b'k']);

    let status = server.status().await;
    assert_eq!(status.telemetry.terminal_buffer, b"ok");
    assert_eq!(status.telemetry.monitor_channel, 0);

    server.stop().await;
}
