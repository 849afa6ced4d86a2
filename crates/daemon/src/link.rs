//! The serial link.
//!
//! The link wraps any async byte stream (a hardware UART bridge, a
//! serial-over-TCP socket, or an in-memory duplex in tests) and gives
//! the dispatcher the two primitives the protocol needs: an opcode wait
//! and an exact-count parameter read with a soft deadline.
//!
//! The deadline is deliberately not wall-clock based: it counts empty
//! 1 ms polls, and any partial read resets the budget. A host that
//! trickles a frame byte-by-byte therefore never times out, while a
//! host that stops mid-frame releases the dispatcher after roughly one
//! second so it can return to opcode-idle.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Spacing between input polls while a read is outstanding.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Consecutive empty polls tolerated before a frame read is abandoned.
const MAX_IDLE_POLLS: u32 = 1000;

/// Errors surfaced by link operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The soft deadline elapsed before the frame completed.
    #[error("frame read timed out after {received} of {expected} bytes")]
    Timeout {
        /// Bytes the frame still required.
        expected: usize,
        /// Bytes that had arrived before the line went quiet.
        received: usize,
    },

    /// The peer closed the link.
    #[error("serial link closed by peer")]
    Disconnected,

    /// The underlying transport failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Byte-wise framing over an async transport.
pub struct SerialLink<T> {
    stream: T,
}

impl<T: AsyncRead + AsyncWrite + Unpin> SerialLink<T> {
    /// Wraps `stream`.
    pub const fn new(stream: T) -> Self {
        Self { stream }
    }

    /// Waits for the next opcode byte.
    ///
    /// Suspends cooperatively until a byte arrives; `None` reports an
    /// orderly close of the link.
    pub async fn next_opcode(&mut self) -> Result<Option<u8>, LinkError> {
        let mut byte = [0u8; 1];
        match self.stream.read(&mut byte).await {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(error) => Err(error.into()),
        }
    }

    /// Reads exactly `buf.len()` bytes or gives up after the soft
    /// deadline.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), LinkError> {
        let mut filled = 0;
        let mut idle_polls = 0u32;
        while filled < buf.len() {
            match timeout(POLL_INTERVAL, self.stream.read(&mut buf[filled..])).await {
                Ok(Ok(0)) => return Err(LinkError::Disconnected),
                Ok(Ok(count)) => {
                    filled += count;
                    idle_polls = 0;
                }
                Ok(Err(error)) => return Err(error.into()),
                Err(_elapsed) => {
                    idle_polls += 1;
                    if idle_polls >= MAX_IDLE_POLLS {
                        return Err(LinkError::Timeout {
                            expected: buf.len(),
                            received: filled,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Reads a fixed-size parameter block.
    pub async fn read_array<const N: usize>(&mut self) -> Result<[u8; N], LinkError> {
        let mut bytes = [0u8; N];
        self.read_exact(&mut bytes).await?;
        Ok(bytes)
    }

    /// Reads a dynamically sized parameter block.
    pub async fn read_vec(&mut self, len: usize) -> Result<Vec<u8>, LinkError> {
        let mut bytes = vec![0u8; len];
        self.read_exact(&mut bytes).await?;
        Ok(bytes)
    }

    /// Writes one reply in a single burst.
    pub async fn write_reply(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Discards pending input until the line goes quiet.
    ///
    /// Used by RESET to resynchronise; the drained bytes are never
    /// interpreted.
    pub async fn drain_input(&mut self) {
        let mut scratch = [0u8; 64];
        loop {
            match timeout(POLL_INTERVAL, self.stream.read(&mut scratch)).await {
                Ok(Ok(count)) if count > 0 => {}
                _ => break,
            }
        }
    }
}
