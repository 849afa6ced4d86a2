//! Shared plumbing for dispatcher integration tests.
//!
//! Tests talk to the server the way the vintage host does: raw bytes
//! over an in-memory duplex standing in for the serial link.
#![allow(dead_code)]

use std::io::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use daemon::{Clock, DwConfig, NullIndicator, Server, WallTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::timeout;

/// The fixed instant every scenario clock reports.
pub const TEST_TIME: WallTime = WallTime {
    year: 2026,
    month: 2,
    day: 12,
    hour: 9,
    minute: 0,
    second: 0,
};

/// TIME reply bytes for [`TEST_TIME`].
pub const TEST_TIME_REPLY: [u8; 6] = [0x7E, 0x02, 0x0C, 0x09, 0x00, 0x00];

pub struct FixedClock(pub WallTime);

impl Clock for FixedClock {
    fn now(&self) -> WallTime {
        self.0
    }
}

/// Starts a server on an in-memory link; returns the host side.
pub fn start_server(config: DwConfig) -> (DuplexStream, Server) {
    let (host, device) = tokio::io::duplex(8192);
    let server = Server::start_with(
        Arc::new(Mutex::new(config)),
        device,
        Arc::new(FixedClock(TEST_TIME)),
        Arc::new(NullIndicator),
    );
    (host, server)
}

/// Writes raw request bytes the way the host would.
pub async fn send(host: &mut DuplexStream, bytes: &[u8]) {
    host.write_all(bytes).await.expect("send request bytes");
}

/// Reads an exact-length reply, failing the test if it never arrives.
pub async fn recv<const N: usize>(host: &mut DuplexStream) -> [u8; N] {
    let mut bytes = [0u8; N];
    timeout(Duration::from_secs(5), host.read_exact(&mut bytes))
        .await
        .expect("reply within deadline")
        .expect("reply bytes");
    bytes
}

/// Reads a dynamically sized reply.
pub async fn recv_vec(host: &mut DuplexStream, len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    timeout(Duration::from_secs(5), host.read_exact(&mut bytes))
        .await
        .expect("reply within deadline")
        .expect("reply bytes");
    bytes
}

/// Asserts the server sent nothing further.
pub async fn assert_no_reply(host: &mut DuplexStream) {
    let mut byte = [0u8; 1];
    let outcome = timeout(Duration::from_millis(100), host.read(&mut byte)).await;
    assert!(outcome.is_err(), "unexpected reply byte {:#04x}", byte[0]);
}

/// Creates a zero-filled sector image of `sectors` sectors.
pub fn zeroed_image(sectors: usize) -> tempfile::NamedTempFile {
    let mut image = tempfile::NamedTempFile::new().expect("create image");
    image
        .write_all(&vec![0u8; 256 * sectors])
        .expect("seed image");
    image
}

/// Config with `image` bound to drive slot `slot`.
pub fn config_with_drive(slot: usize, image: &tempfile::NamedTempFile) -> DwConfig {
    let mut config = DwConfig::default();
    config.drives[slot] = Some(image.path().to_path_buf());
    config
}

/// The 16-bit modular checksum the wire protocol uses.
pub fn checksum(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |sum, &byte| sum.wrapping_add(u16::from(byte)))
}
