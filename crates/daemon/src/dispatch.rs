//! The opcode dispatcher.
//!
//! One cooperative loop owns the serial link: read an opcode byte,
//! read that opcode's fixed parameters, act, write the reply in a
//! single burst, return to idle. A parameter-read timeout abandons the
//! handler without writing anything, leaving the host to resynchronise
//! with RESET. No error escapes the loop; transport faults are logged
//! and retried after a one-second backoff.

use std::sync::Arc;
use std::time::Duration;

use protocol::{
    CHANNEL_COUNT, ERR_CRC, ERR_OK, ERR_UNIT, Opcode, SECTOR_SIZE, decode_lsn, decode_u16,
    encode_u16, sector_checksum,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::channel::ChannelSet;
use crate::clock::Clock;
use crate::config::SharedConfig;
use crate::drives::SharedDrives;
use crate::link::{LinkError, SerialLink};
use crate::session::{SendOutcome, SessionManager};
use crate::sync::hold;
use crate::telemetry::Telemetry;

/// Pause after an unexpected transport error before resuming the loop.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// SERSETSTAT status code that carries a 26-byte payload (SS.ComSt).
const SERSETSTAT_COMST: u8 = 0x28;

/// Parameter length of the WIREBUG handshake.
const WIREBUG_PARAMS: usize = 23;

pub(crate) struct Dispatcher<T> {
    link: SerialLink<T>,
    drives: SharedDrives,
    channels: ChannelSet,
    sessions: Arc<SessionManager>,
    telemetry: Telemetry,
    config: SharedConfig,
    clock: Arc<dyn Clock>,
    print_buffer: Vec<u8>,
    shutdown: CancellationToken,
}

impl<T: AsyncRead + AsyncWrite + Unpin> Dispatcher<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        link: SerialLink<T>,
        drives: SharedDrives,
        channels: ChannelSet,
        sessions: Arc<SessionManager>,
        telemetry: Telemetry,
        config: SharedConfig,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            link,
            drives,
            channels,
            sessions,
            telemetry,
            config,
            clock,
            print_buffer: Vec::new(),
            shutdown,
        }
    }

    /// Runs until the link closes or shutdown is requested, then tears
    /// down every channel binding.
    pub(crate) async fn run(mut self) {
        info!("dispatcher started");
        let shutdown = self.shutdown.clone();
        loop {
            let opcode = tokio::select! {
                () = shutdown.cancelled() => break,
                result = self.link.next_opcode() => match result {
                    Ok(Some(opcode)) => opcode,
                    Ok(None) => {
                        info!("host disconnected");
                        break;
                    }
                    Err(link_error) => {
                        error!(%link_error, "serial link failed while idle");
                        tokio::time::sleep(ERROR_BACKOFF).await;
                        continue;
                    }
                },
            };

            self.telemetry.record_opcode(opcode);
            match self.dispatch(opcode).await {
                Ok(()) => {}
                // The host stalled mid-frame: drop the partial request
                // and wait for the next opcode. It will RESET.
                Err(LinkError::Timeout { expected, received }) => {
                    trace!(opcode, expected, received, "frame timed out, returning to idle");
                }
                Err(LinkError::Disconnected) => {
                    info!("host disconnected mid-frame");
                    break;
                }
                Err(LinkError::Io(io_error)) => {
                    error!(%io_error, "serial link I/O error");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
        self.sessions.close_all().await;
        info!("dispatcher stopped");
    }

    async fn dispatch(&mut self, byte: u8) -> Result<(), LinkError> {
        let Some(opcode) = Opcode::classify(byte) else {
            // Unknown opcodes are consumed without parameters or reply;
            // the host recovers with RESET.
            trace!(opcode = byte, "unknown opcode ignored");
            return Ok(());
        };

        match opcode {
            Opcode::Reset => {
                self.link.drain_input().await;
                debug!("reset received");
            }
            Opcode::DwInit => self.handle_dwinit().await?,
            Opcode::Time => {
                let now = self.clock.now();
                self.link.write_reply(&now.reply_bytes()).await?;
            }
            Opcode::Read | Opcode::ReRead => self.handle_read(false).await?,
            Opcode::ReadEx | Opcode::ReReadEx => self.handle_read(true).await?,
            Opcode::Write | Opcode::ReWrite => self.handle_write().await?,
            Opcode::Print => {
                let [byte] = self.link.read_array::<1>().await?;
                self.print_buffer.push(byte);
            }
            Opcode::PrintFlush => self.handle_print_flush(),
            Opcode::GetStat | Opcode::SetStat => {
                let [drive, code] = self.link.read_array::<2>().await?;
                self.telemetry.record_stat(drive, code);
            }
            Opcode::SerRead => self.handle_serread().await?,
            Opcode::SerWrite => self.handle_serwrite().await?,
            Opcode::FastWrite { channel } => {
                let _ = self.link.read_array::<1>().await?;
                self.telemetry
                    .log(format!("fastwrite channel {channel}: payload discarded"));
            }
            Opcode::SerInit => self.handle_serinit().await?,
            Opcode::SerTerm => {
                let [channel] = self.link.read_array::<1>().await?;
                self.sessions.close_channel(channel).await;
            }
            Opcode::SerSetStat => {
                let [_channel, code] = self.link.read_array::<2>().await?;
                if code == SERSETSTAT_COMST {
                    let _ = self.link.read_vec(26).await?;
                }
            }
            Opcode::NameObjMount | Opcode::NameObjCreate => self.handle_nameobj().await?,
            Opcode::WireBug => {
                let _ = self.link.read_vec(WIREBUG_PARAMS).await?;
                debug!("wirebug handshake consumed");
            }
            Opcode::Bkpt | Opcode::Init | Opcode::Term => {}
        }
        Ok(())
    }

    async fn handle_dwinit(&mut self) -> Result<(), LinkError> {
        let [capability] = self.link.read_array::<1>().await?;
        debug!(capability, "dwinit handshake");
        // Our capability byte is zero: no optional extensions.
        self.link.write_reply(&[0x00]).await
    }

    async fn handle_read(&mut self, extended: bool) -> Result<(), LinkError> {
        let header = self.link.read_array::<4>().await?;
        let drive = header[0];
        let lsn = decode_lsn([header[1], header[2], header[3]]);

        let sector = {
            let mut bank = self.drives.lock().await;
            bank.get_mut(drive).and_then(|unit| unit.read_sector(lsn))
        };

        if extended {
            return self.reply_read_extended(sector.as_ref()).await;
        }
        match sector {
            Some(data) => {
                let mut reply = Vec::with_capacity(3 + SECTOR_SIZE);
                reply.push(ERR_OK);
                reply.extend_from_slice(&encode_u16(sector_checksum(&data)));
                reply.extend_from_slice(&data);
                self.link.write_reply(&reply).await
            }
            None => self.link.write_reply(&[ERR_UNIT]).await,
        }
    }

    /// Extended reads flip the checksum direction: the server sends the
    /// raw sector, the host computes and returns its checksum, and the
    /// server acknowledges with ok or a CRC error. The failure path
    /// still ships a zero sector and consumes the host checksum so both
    /// sides stay in frame.
    async fn reply_read_extended(
        &mut self,
        sector: Option<&[u8; SECTOR_SIZE]>,
    ) -> Result<(), LinkError> {
        match sector {
            Some(data) => {
                self.link.write_reply(data).await?;
                let host_checksum = decode_u16(self.link.read_array::<2>().await?);
                let code = if host_checksum == sector_checksum(data) {
                    ERR_OK
                } else {
                    ERR_CRC
                };
                self.link.write_reply(&[code]).await
            }
            None => {
                self.link.write_reply(&[0u8; SECTOR_SIZE]).await?;
                let _ = self.link.read_array::<2>().await?;
                self.link.write_reply(&[ERR_UNIT]).await
            }
        }
    }

    async fn handle_write(&mut self) -> Result<(), LinkError> {
        let header = self.link.read_array::<4>().await?;
        let drive = header[0];
        let lsn = decode_lsn([header[1], header[2], header[3]]);

        let mut data = [0u8; SECTOR_SIZE];
        self.link.read_exact(&mut data).await?;
        let host_checksum = decode_u16(self.link.read_array::<2>().await?);

        let code = if host_checksum == sector_checksum(&data) {
            let mut bank = self.drives.lock().await;
            match bank.get_mut(drive) {
                Some(target) => match target.write_sector(lsn, &data) {
                    Ok(()) => ERR_OK,
                    Err(drive_error) => {
                        debug!(drive, lsn, %drive_error, "write rejected");
                        ERR_UNIT
                    }
                },
                None => ERR_UNIT,
            }
        } else {
            ERR_CRC
        };
        self.link.write_reply(&[code]).await
    }

    fn handle_print_flush(&mut self) {
        let text = String::from_utf8_lossy(&self.print_buffer).into_owned();
        info!(bytes = self.print_buffer.len(), text = %text, "printer output");
        self.telemetry.log(format!("printer: {text}"));
        self.print_buffer.clear();
    }

    async fn handle_serread(&mut self) -> Result<(), LinkError> {
        match self.channels.first_pending() {
            Some((channel, byte)) => {
                // Channel k reports as k+1; 0 means "nothing pending".
                self.link.write_reply(&[channel + 1, byte]).await?;
                self.telemetry.count_rx(channel);
                self.telemetry.snoop(channel, byte);
            }
            None => self.link.write_reply(&[0, 0]).await?,
        }
        Ok(())
    }

    async fn handle_serwrite(&mut self) -> Result<(), LinkError> {
        let [channel, byte] = self.link.read_array::<2>().await?;
        match self.sessions.send(channel, byte).await {
            SendOutcome::Sent => {
                self.telemetry.count_tx(channel);
                self.telemetry.snoop(channel, byte);
            }
            // Unbound or failed channels swallow the byte; there is no
            // reply shape to carry an error back.
            SendOutcome::NoBinding | SendOutcome::Failed => {}
        }
        Ok(())
    }

    async fn handle_serinit(&mut self) -> Result<(), LinkError> {
        let [channel] = self.link.read_array::<1>().await?;
        if usize::from(channel) >= CHANNEL_COUNT {
            warn!(channel, "serinit for out-of-range channel ignored");
            return Ok(());
        }
        let target = hold(&self.config).serial_target(channel).cloned();
        match target {
            Some(target) => self.sessions.open(channel, &target).await,
            // Channels without a mapping are silently left unbound.
            None => debug!(channel, "serinit without mapping"),
        }
        Ok(())
    }

    async fn handle_nameobj(&mut self) -> Result<(), LinkError> {
        let [len] = self.link.read_array::<1>().await?;
        let raw = self.link.read_vec(usize::from(len)).await?;
        let name = String::from_utf8_lossy(&raw).into_owned();

        let mounted = self.drives.lock().await.mount_named(&name);
        match mounted {
            Some(slot) => self.link.write_reply(&[slot]).await,
            None => {
                debug!(name = %name, "named mount failed");
                self.link.write_reply(&[0x00]).await
            }
        }
    }
}
