//! Server lifecycle.
//!
//! [`Server::start`] wires the dispatcher and the periodic flush loop
//! onto the runtime and hands back the handle the host process and the
//! management plane talk to: status snapshots, monitor-channel control,
//! config reload and orderly shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use engine::{ActivityIndicator, NullIndicator};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::channel::ChannelSet;
use crate::clock::{Clock, SystemClock};
use crate::config::{DwConfig, SharedConfig};
use crate::dispatch::Dispatcher;
use crate::drives::{DriveBank, SharedDrives};
use crate::link::SerialLink;
use crate::session::SessionManager;
use crate::status::StatusSnapshot;
use crate::sync::hold;
use crate::telemetry::Telemetry;

/// Cadence of the periodic dirty-sector flush.
const FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// A running DriveWire server.
///
/// Dropping the handle without [`Server::stop`] aborts nothing by
/// itself; hosts are expected to stop the server so drives get their
/// final flush.
pub struct Server {
    shutdown: CancellationToken,
    dispatcher: Option<JoinHandle<()>>,
    flusher: Option<JoinHandle<()>>,
    drives: SharedDrives,
    sessions: Arc<SessionManager>,
    telemetry: Telemetry,
    config: SharedConfig,
    clock: Arc<dyn Clock>,
}

impl Server {
    /// Starts the server on `stream` with the system clock and no
    /// activity hardware.
    pub fn start<T>(config: DwConfig, stream: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let shared_config: SharedConfig = Arc::new(Mutex::new(config));
        let clock = Arc::new(SystemClock::new(Arc::clone(&shared_config)));
        Self::start_with(shared_config, stream, clock, Arc::new(NullIndicator))
    }

    /// Starts the server with an explicit clock and activity indicator.
    ///
    /// Embedded hosts pass their LED here; tests pass a fixed clock.
    pub fn start_with<T>(
        config: SharedConfig,
        stream: T,
        clock: Arc<dyn Clock>,
        indicator: Arc<dyn ActivityIndicator>,
    ) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut bank = DriveBank::new(indicator);
        {
            let snapshot = hold(&config);
            bank.mount_from_config(&snapshot);
            info!(baud = snapshot.effective_baud(), "serial link configured");
        }
        let drives: SharedDrives = Arc::new(tokio::sync::Mutex::new(bank));

        let telemetry = Telemetry::new();
        let channels = ChannelSet::new();
        let sessions = Arc::new(SessionManager::new(channels.clone(), telemetry.clone()));
        let shutdown = CancellationToken::new();

        let dispatcher = Dispatcher::new(
            SerialLink::new(stream),
            Arc::clone(&drives),
            channels,
            Arc::clone(&sessions),
            telemetry.clone(),
            Arc::clone(&config),
            Arc::clone(&clock),
            shutdown.clone(),
        );
        let dispatcher = tokio::spawn(dispatcher.run());
        let flusher = tokio::spawn(flush_loop(Arc::clone(&drives), shutdown.clone()));

        Self {
            shutdown,
            dispatcher: Some(dispatcher),
            flusher: Some(flusher),
            drives,
            sessions,
            telemetry,
            config,
            clock,
        }
    }

    /// Point-in-time snapshot for the management plane.
    pub async fn status(&self) -> StatusSnapshot {
        let drives = self.drives.lock().await.status();
        StatusSnapshot {
            time: self.clock.now(),
            telemetry: self.telemetry.snapshot(),
            drives,
        }
    }

    /// Selects the snooped channel (-1 disables) and clears the
    /// terminal buffer.
    pub fn set_monitor_channel(&self, channel: i32) {
        self.telemetry.set_monitor_channel(channel);
    }

    /// Re-applies configuration without restarting the tasks.
    ///
    /// Every TCP binding is destroyed (channel buffers included) and
    /// the drive slots are rebound from `config`; the dispatcher keeps
    /// running throughout.
    pub async fn reload(&self, config: DwConfig) {
        self.sessions.close_all().await;
        self.drives.lock().await.mount_from_config(&config);
        info!(baud = config.effective_baud(), "serial link reconfigured");
        *hold(&self.config) = config;
    }

    /// Waits for the dispatcher to finish, which happens when the host
    /// disconnects or [`Server::stop`] runs from another task.
    pub async fn serve(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(join_error) = dispatcher.await {
                warn!(%join_error, "dispatcher task failed");
            }
        }
    }

    /// Stops everything: cancels the dispatcher and the flush loop,
    /// closes all TCP bindings, then gives every drive its final flush.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(join_error) = dispatcher.await {
                warn!(%join_error, "dispatcher task failed");
            }
        }
        if let Some(flusher) = self.flusher.take() {
            if let Err(join_error) = flusher.await {
                warn!(%join_error, "flush task failed");
            }
        }
        self.sessions.close_all().await;
        self.drives.lock().await.close_all();
        info!("server stopped");
    }
}

/// Periodic write-back: every minute, push dirty sectors to disk.
/// Failures are logged and retried on the next cycle.
async fn flush_loop(drives: SharedDrives, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(FLUSH_INTERVAL) => {
                drives.lock().await.flush_all();
            }
        }
    }
}
