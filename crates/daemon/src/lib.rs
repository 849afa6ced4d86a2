#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `daemon` is the DriveWire 4 server core: a single-threaded
//! cooperative dispatcher that speaks the DriveWire wire protocol over
//! an async serial link, backed by up to four virtual drives and up to
//! thirty-two TCP-tunnelled virtual-serial channels.
//!
//! # Design
//!
//! The [`Server`] owns the moving parts. The dispatcher task reads one
//! opcode at a time from the [`SerialLink`] and acts on the
//! drive bank, the channel buffers and the TCP session manager; reader
//! tasks feed channel buffers in the background; a flush loop pushes
//! dirty sectors to disk once a minute. The management plane consumes
//! [`StatusSnapshot`]s and funnels every mutation through
//! [`Server::reload`] or [`Server::set_monitor_channel`].
//!
//! All tasks share one current-thread tokio runtime; suspension points
//! are the link reads, the TCP operations and the flush-loop sleep, so
//! sector I/O and buffer manipulation never race.

mod channel;
mod clock;
mod config;
mod dispatch;
mod drives;
mod link;
mod server;
mod session;
mod status;
mod sync;
mod telemetry;

pub use channel::{CHANNEL_BUFFER_CAPACITY, ChannelBuffer, ChannelSet};
pub use engine::{ActivityIndicator, NullIndicator};
pub use clock::{Clock, SystemClock, WallTime};
pub use config::{
    ConfigError, DEFAULT_BAUD_RATE, DwConfig, SUPPORTED_BAUD_RATES, SerialMode, SerialTarget,
    SharedConfig,
};
pub use link::{LinkError, SerialLink};
pub use server::Server;
pub use session::{SendOutcome, SessionManager};
pub use status::{DriveStatus, StatusSnapshot};
pub use telemetry::{
    ChannelCounters, LOG_RING_CAPACITY, MONITOR_DISABLED, SNOOP_CAPACITY, Telemetry,
    TelemetrySnapshot,
};
