//! TCP bindings for the virtual-serial channels.
//!
//! A channel is bound either as a client (the server dials out) or as a
//! listener (one accepted peer at a time, a new accept replacing the
//! old binding). Each bound connection runs a background reader task
//! that appends incoming bytes to the channel's buffer until EOF,
//! error, or cancellation.
//!
//! A reader observing EOF logs the transition but leaves the binding in
//! place: the host tears channels down explicitly with SERTERM, and a
//! SERWRITE against the stale binding fails on the next write, which
//! closes it.

use std::sync::Arc;

use protocol::CHANNEL_COUNT;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::ChannelSet;
use crate::config::{SerialMode, SerialTarget};
use crate::sync::hold;
use crate::telemetry::Telemetry;

/// Largest chunk a reader task pulls from its socket per wakeup.
const READ_CHUNK: usize = 128;

/// Result of pushing one byte out through a channel binding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SendOutcome {
    /// The byte reached the socket.
    Sent,
    /// The channel has no binding; the byte is discarded.
    NoBinding,
    /// The write failed; the binding has been closed and logged.
    Failed,
}

struct ActiveConn {
    writer: OwnedWriteHalf,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

struct ListenerBinding {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct ChannelSlot {
    conn: Mutex<Option<ActiveConn>>,
    listener: Mutex<Option<ListenerBinding>>,
}

/// Lifecycle owner for every channel's TCP state.
pub struct SessionManager {
    slots: Vec<ChannelSlot>,
    channels: ChannelSet,
    telemetry: Telemetry,
}

impl SessionManager {
    /// Creates a manager with no bindings.
    #[must_use]
    pub fn new(channels: ChannelSet, telemetry: Telemetry) -> Self {
        let slots = (0..CHANNEL_COUNT)
            .map(|_| ChannelSlot {
                conn: Mutex::new(None),
                listener: Mutex::new(None),
            })
            .collect();
        Self {
            slots,
            channels,
            telemetry,
        }
    }

    /// Opens the binding `target` describes, replacing whatever the
    /// channel held before.
    pub async fn open(self: &Arc<Self>, channel: u8, target: &SerialTarget) {
        self.close_channel(channel).await;
        match target.mode {
            SerialMode::Client => self.open_client(channel, target).await,
            SerialMode::Server => self.open_listener(channel, target).await,
        }
    }

    async fn open_client(self: &Arc<Self>, channel: u8, target: &SerialTarget) {
        info!(channel, host = %target.host, port = target.port, "connecting channel");
        match TcpStream::connect((target.host.as_str(), target.port)).await {
            Ok(stream) => self.install(channel, stream).await,
            Err(error) => {
                warn!(channel, %error, "channel connect failed");
                self.telemetry.log(format!(
                    "channel {channel}: connect to {}:{} failed: {error}",
                    target.host, target.port
                ));
            }
        }
    }

    async fn open_listener(self: &Arc<Self>, channel: u8, target: &SerialTarget) {
        let listener = match TcpListener::bind((target.host.as_str(), target.port)).await {
            Ok(listener) => listener,
            Err(error) => {
                warn!(channel, %error, "channel listen failed");
                self.telemetry.log(format!(
                    "channel {channel}: listen on {}:{} failed: {error}",
                    target.host, target.port
                ));
                return;
            }
        };
        info!(channel, host = %target.host, port = target.port, "listening for channel peer");

        let cancel = CancellationToken::new();
        let accept_cancel = cancel.clone();
        let manager = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = accept_cancel.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let Some(manager) = manager.upgrade() else { break };
                            info!(channel, %peer, "accepted channel peer");
                            manager.install(channel, stream).await;
                        }
                        Err(error) => {
                            warn!(channel, %error, "accept failed");
                            break;
                        }
                    }
                }
            }
        });

        let Some(slot) = self.slots.get(usize::from(channel)) else {
            cancel.cancel();
            task.abort();
            return;
        };
        let prior = slot.listener.lock().await.replace(ListenerBinding { cancel, task });
        if let Some(prior) = prior {
            close_listener(prior).await;
        }
    }

    /// Registers `stream` as the channel's live connection, closing any
    /// previous one first.
    async fn install(&self, channel: u8, stream: TcpStream) {
        let Some(slot) = self.slots.get(usize::from(channel)) else {
            return;
        };
        let (read_half, write_half) = stream.into_split();
        let cancel = CancellationToken::new();
        let reader = self.spawn_reader(channel, read_half, cancel.clone());

        let prior = slot.conn.lock().await.replace(ActiveConn {
            writer: write_half,
            cancel,
            reader,
        });
        if let Some(prior) = prior {
            close_conn(prior).await;
        }
    }

    fn spawn_reader(
        &self,
        channel: u8,
        mut read_half: OwnedReadHalf,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let buffer = self.channels.subscribe(channel);
        let telemetry = self.telemetry.clone();
        tokio::spawn(async move {
            let Some(buffer) = buffer else { return };
            let mut chunk = [0u8; READ_CHUNK];
            loop {
                tokio::select! {
                    // Cancellation is the normal SERTERM/shutdown exit.
                    () = cancel.cancelled() => break,
                    result = read_half.read(&mut chunk) => match result {
                        Ok(0) => {
                            telemetry.log(format!("channel {channel}: remote closed"));
                            debug!(channel, "channel reader finished at EOF");
                            break;
                        }
                        Ok(count) => {
                            let Some(buffer) = buffer.upgrade() else { break };
                            let accepted = hold(&buffer).extend_from(&chunk[..count]);
                            if accepted < count {
                                debug!(channel, dropped = count - accepted, "channel buffer overflow");
                            }
                        }
                        Err(error) => {
                            telemetry.log(format!("channel {channel}: read error: {error}"));
                            warn!(channel, %error, "channel reader failed");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Writes one byte to the channel's outbound half.
    ///
    /// A failed write closes the binding and appends a log entry; this
    /// is how a binding left stale by a remote EOF finally goes away.
    pub async fn send(&self, channel: u8, byte: u8) -> SendOutcome {
        let Some(slot) = self.slots.get(usize::from(channel)) else {
            return SendOutcome::NoBinding;
        };
        let mut conn = slot.conn.lock().await;
        let Some(active) = conn.as_mut() else {
            return SendOutcome::NoBinding;
        };
        match active.writer.write_all(&[byte]).await {
            Ok(()) => SendOutcome::Sent,
            Err(error) => {
                warn!(channel, %error, "channel write failed, closing binding");
                self.telemetry
                    .log(format!("channel {channel}: write failed, closing"));
                if let Some(active) = conn.take() {
                    close_conn(active).await;
                }
                SendOutcome::Failed
            }
        }
    }

    /// Tears down the channel: listener first (so nothing re-installs a
    /// connection mid-teardown), then the live connection, then the
    /// buffered bytes.
    pub async fn close_channel(&self, channel: u8) {
        let Some(slot) = self.slots.get(usize::from(channel)) else {
            return;
        };
        let listener = slot.listener.lock().await.take();
        if let Some(listener) = listener {
            close_listener(listener).await;
            info!(channel, "stopped channel listener");
        }
        let conn = slot.conn.lock().await.take();
        if let Some(conn) = conn {
            close_conn(conn).await;
            debug!(channel, "closed channel binding");
        }
        self.channels.clear(channel);
    }

    /// Tears down every channel.
    pub async fn close_all(&self) {
        for channel in 0..CHANNEL_COUNT as u8 {
            self.close_channel(channel).await;
        }
    }
}

async fn close_conn(mut conn: ActiveConn) {
    conn.cancel.cancel();
    let _ = conn.writer.shutdown().await;
    let _ = (&mut conn.reader).await;
}

async fn close_listener(binding: ListenerBinding) {
    binding.cancel.cancel();
    let _ = binding.task.await;
}
