//! The single-byte opcode catalogue.
//!
//! Every request frame begins with one opcode byte; the opcode alone
//! determines how many parameter bytes follow and what reply shape the
//! server owes. [`Opcode::classify`] maps a raw byte to its request
//! type: explicit codes are matched first, then the `0x80..=0x8F`
//! FASTWRITE family is recognised by its high nibble, with the channel
//! number carried in the low nibble. Bytes that match neither are
//! unknown and are silently discarded by the dispatcher so the host can
//! recover with a RESET.

/// A classified DriveWire request type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Opcode {
    /// `0x01` - mount a named object into the next free drive slot.
    NameObjMount,
    /// `0x02` - create a named object; served identically to a mount.
    NameObjCreate,
    /// `0x21` - breakpoint; acknowledged silently.
    Bkpt,
    /// `0x23` - request the server's local time.
    Time,
    /// `0x42` - WireBug handshake; 23 parameter bytes are consumed.
    WireBug,
    /// `0x43` - poll the virtual-serial channels for one byte.
    SerRead,
    /// `0x46` - drain the print buffer to the server log.
    PrintFlush,
    /// `0x47` - drive status query; informational only.
    GetStat,
    /// `0x49` - initialise; no reply.
    Init,
    /// `0x4E` - open the TCP binding configured for a channel.
    SerInit,
    /// `0x45` - close a channel's TCP binding and listener.
    SerTerm,
    /// `0x50` - append one byte to the print buffer.
    Print,
    /// `0x52` - read a sector.
    Read,
    /// `0x53` - drive status update; informational only.
    SetStat,
    /// `0x54` - terminate; no reply.
    Term,
    /// `0x57` - write a sector.
    Write,
    /// `0x58` - extended read with host-side checksum verification.
    ReadEx,
    /// `0x5A` - capability handshake.
    DwInit,
    /// `0x80..=0x8F` - fast serial write; the payload byte is discarded.
    FastWrite {
        /// Channel index carried in the low nibble of the opcode.
        channel: u8,
    },
    /// `0xC3` - write one byte to a channel's TCP binding.
    SerWrite,
    /// `0xD2` - retry read; identical semantics to [`Opcode::Read`].
    ReRead,
    /// `0xD3` - serial status update; informational only.
    SerSetStat,
    /// `0xD7` - retry write; identical semantics to [`Opcode::Write`].
    ReWrite,
    /// `0xD8` - retry extended read; identical to [`Opcode::ReadEx`].
    ReReadEx,
    /// `0xF8`, `0xFE`, `0xFF` - resynchronise; pending input is drained.
    Reset,
}

impl Opcode {
    /// Classifies a raw opcode byte.
    ///
    /// Returns `None` for bytes outside the catalogue; the dispatcher
    /// treats those as unknown opcodes (no parameters read, no reply).
    #[must_use]
    pub const fn classify(byte: u8) -> Option<Self> {
        let opcode = match byte {
            0x01 => Self::NameObjMount,
            0x02 => Self::NameObjCreate,
            0x21 => Self::Bkpt,
            0x23 => Self::Time,
            0x42 => Self::WireBug,
            0x43 => Self::SerRead,
            0x45 => Self::SerTerm,
            0x46 => Self::PrintFlush,
            0x47 => Self::GetStat,
            0x49 => Self::Init,
            0x4E => Self::SerInit,
            0x50 => Self::Print,
            0x52 => Self::Read,
            0x53 => Self::SetStat,
            0x54 => Self::Term,
            0x57 => Self::Write,
            0x58 => Self::ReadEx,
            0x5A => Self::DwInit,
            0xC3 => Self::SerWrite,
            0xD2 => Self::ReRead,
            0xD3 => Self::SerSetStat,
            0xD7 => Self::ReWrite,
            0xD8 => Self::ReReadEx,
            0xF8 | 0xFE | 0xFF => Self::Reset,
            // No explicit code collides with the 0x8x family, so the
            // nibble check can safely run after the table.
            _ => {
                if byte & 0xF0 == 0x80 {
                    Self::FastWrite {
                        channel: byte & 0x0F,
                    }
                } else {
                    return None;
                }
            }
        };
        Some(opcode)
    }
}
