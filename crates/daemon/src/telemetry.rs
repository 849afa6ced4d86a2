//! Observability state shared with the status surface.
//!
//! Everything here is written from the dispatcher and the TCP reader
//! tasks and read by the management plane: the last-seen protocol
//! fields, per-channel byte counters, the bounded log ring, and the
//! terminal snoop buffer that mirrors traffic on one monitored channel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::sync::hold;

/// Log-ring depth; appends beyond this drop the oldest entry.
pub const LOG_RING_CAPACITY: usize = 20;

/// Terminal snoop buffer depth in bytes.
pub const SNOOP_CAPACITY: usize = 512;

/// Monitor-channel value that disables snooping.
pub const MONITOR_DISABLED: i32 = -1;

/// Per-channel traffic counters, from the host's point of view.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ChannelCounters {
    /// Bytes the host sent out through the channel.
    pub tx: u64,
    /// Bytes the host read from the channel.
    pub rx: u64,
}

#[derive(Debug)]
struct TelemetryState {
    last_opcode: u8,
    last_drive: u8,
    last_stat: u8,
    serial: FxHashMap<u8, ChannelCounters>,
    log: VecDeque<String>,
    snoop: VecDeque<u8>,
    monitor_channel: i32,
}

impl Default for TelemetryState {
    fn default() -> Self {
        Self {
            last_opcode: 0,
            last_drive: 0,
            last_stat: 0,
            serial: FxHashMap::default(),
            log: VecDeque::new(),
            snoop: VecDeque::new(),
            monitor_channel: MONITOR_DISABLED,
        }
    }
}

/// Shared handle to the observability state.
#[derive(Clone, Default)]
pub struct Telemetry {
    state: Arc<Mutex<TelemetryState>>,
}

impl Telemetry {
    /// Creates empty telemetry with snooping disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the opcode byte of the request being dispatched.
    pub fn record_opcode(&self, opcode: u8) {
        hold(&self.state).last_opcode = opcode;
    }

    /// Records the drive and status code of a GETSTAT/SETSTAT request.
    pub fn record_stat(&self, drive: u8, code: u8) {
        let mut state = hold(&self.state);
        state.last_drive = drive;
        state.last_stat = code;
    }

    /// Appends `entry` to the log ring, dropping the oldest past
    /// [`LOG_RING_CAPACITY`].
    pub fn log(&self, entry: impl Into<String>) {
        let mut state = hold(&self.state);
        state.log.push_back(entry.into());
        while state.log.len() > LOG_RING_CAPACITY {
            state.log.pop_front();
        }
    }

    /// Counts one byte read by the host from `channel`.
    pub fn count_rx(&self, channel: u8) {
        hold(&self.state).serial.entry(channel).or_default().rx += 1;
    }

    /// Counts one byte written by the host to `channel`.
    pub fn count_tx(&self, channel: u8) {
        hold(&self.state).serial.entry(channel).or_default().tx += 1;
    }

    /// Captures `byte` when `channel` is the monitored one.
    pub fn snoop(&self, channel: u8, byte: u8) {
        let mut state = hold(&self.state);
        if i32::from(channel) != state.monitor_channel {
            return;
        }
        state.snoop.push_back(byte);
        while state.snoop.len() > SNOOP_CAPACITY {
            state.snoop.pop_front();
        }
    }

    /// The currently monitored channel, [`MONITOR_DISABLED`] when off.
    #[must_use]
    pub fn monitor_channel(&self) -> i32 {
        hold(&self.state).monitor_channel
    }

    /// Selects the monitored channel and clears the snoop buffer.
    pub fn set_monitor_channel(&self, channel: i32) {
        let mut state = hold(&self.state);
        state.monitor_channel = channel;
        state.snoop.clear();
    }

    /// Copies the current state for the status surface.
    #[must_use]
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let state = hold(&self.state);
        let mut serial: Vec<(u8, ChannelCounters)> =
            state.serial.iter().map(|(&chan, &counters)| (chan, counters)).collect();
        serial.sort_unstable_by_key(|&(chan, _)| chan);
        TelemetrySnapshot {
            last_opcode: state.last_opcode,
            last_drive: state.last_drive,
            last_stat: state.last_stat,
            serial,
            logs: state.log.iter().cloned().collect(),
            terminal_buffer: state.snoop.iter().copied().collect(),
            monitor_channel: state.monitor_channel,
        }
    }
}

/// Point-in-time copy of the telemetry state.
#[derive(Clone, Debug, Serialize)]
pub struct TelemetrySnapshot {
    /// Opcode byte of the most recent request.
    pub last_opcode: u8,
    /// Drive of the most recent GETSTAT/SETSTAT.
    pub last_drive: u8,
    /// Code of the most recent GETSTAT/SETSTAT.
    pub last_stat: u8,
    /// Per-channel counters, ascending by channel.
    pub serial: Vec<(u8, ChannelCounters)>,
    /// Log-ring contents, oldest first.
    pub logs: Vec<String>,
    /// Snoop buffer contents, oldest first.
    pub terminal_buffer: Vec<u8>,
    /// Monitored channel, -1 when disabled.
    pub monitor_channel: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_ring_keeps_only_the_newest_entries() {
        let telemetry = Telemetry::new();
        for n in 0..LOG_RING_CAPACITY + 5 {
            telemetry.log(format!("entry {n}"));
        }
        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.logs.len(), LOG_RING_CAPACITY);
        assert_eq!(snapshot.logs.first().map(String::as_str), Some("entry 5"));
        assert_eq!(snapshot.logs.last().map(String::as_str), Some("entry 24"));
    }

    #[test]
    fn snoop_only_captures_the_monitored_channel() {
        let telemetry = Telemetry::new();
        telemetry.snoop(4, b'x');
        assert!(telemetry.snapshot().terminal_buffer.is_empty());

        telemetry.set_monitor_channel(4);
        telemetry.snoop(4, b'a');
        telemetry.snoop(5, b'b');
        telemetry.snoop(4, b'c');
        assert_eq!(telemetry.snapshot().terminal_buffer, b"ac");
    }

    #[test]
    fn snoop_buffer_keeps_the_last_512_bytes() {
        let telemetry = Telemetry::new();
        telemetry.set_monitor_channel(0);
        for n in 0..SNOOP_CAPACITY + 16 {
            telemetry.snoop(0, n as u8);
        }
        let buffer = telemetry.snapshot().terminal_buffer;
        assert_eq!(buffer.len(), SNOOP_CAPACITY);
        assert_eq!(buffer[0], 16);
    }

    #[test]
    fn changing_the_monitor_channel_clears_the_buffer() {
        let telemetry = Telemetry::new();
        telemetry.set_monitor_channel(1);
        telemetry.snoop(1, b'z');
        telemetry.set_monitor_channel(2);
        assert!(telemetry.snapshot().terminal_buffer.is_empty());
        assert_eq!(telemetry.monitor_channel(), 2);
    }

    #[test]
    fn counters_accumulate_per_channel() {
        let telemetry = Telemetry::new();
        telemetry.count_rx(0);
        telemetry.count_rx(0);
        telemetry.count_tx(0);
        telemetry.count_tx(7);

        let snapshot = telemetry.snapshot();
        assert_eq!(
            snapshot.serial,
            vec![
                (0, ChannelCounters { tx: 1, rx: 2 }),
                (7, ChannelCounters { tx: 1, rx: 0 }),
            ]
        );
    }
}
