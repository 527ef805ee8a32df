// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte-stuffing codec shared by the application and bootloader engines
//!
//! ## Frame Format
//!
//! ```text
//! +------+-------+-----+-----+---------+-----+
//! | FEND | ADDR? | CMD | NBT | payload | CRC |
//! +------+-------+-----+-----+---------+-----+
//!  0xC0    1B      1B    1B    0..NBT    1B
//! ```
//!
//! - FEND (0xC0): frame start marker; the address byte carries bit 7 set
//!   and is omitted for broadcast
//! - Inside the frame every FEND is sent as `FESC TFEND` and every FESC as
//!   `FESC TFESC`
//! - CRC-8 runs over the unescaped bytes starting with the leading FEND,
//!   seeded with [`CRC_INIT`]
//!
//! The [`Destuffer`] undoes the transposition one raw byte at a time (fed
//! from the RX interrupt); the [`Stuffer`] stages at most one owed
//! transposed byte so the TX interrupt can emit wire bytes one per
//! TX-empty event.

use crate::crc::Crc8;
use crate::error::{Error, Result};

/// Frame start marker
pub const FEND: u8 = 0xC0;

/// Escape marker
pub const FESC: u8 = 0xDB;

/// Transposed frame start (follows FESC)
pub const TFEND: u8 = 0xDC;

/// Transposed escape (follows FESC)
pub const TFESC: u8 = 0xDD;

/// CRC-8 seed for every frame
pub const CRC_INIT: u8 = 0xDE;

/// Outcome of feeding one raw wire byte to the [`Destuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeEvent {
    /// A raw FEND: the current frame (if any) is abandoned and a new one
    /// starts
    FrameStart,

    /// One unstuffed logical byte
    Byte(u8),

    /// A bare FESC was buffered; the next byte resolves it
    Held,

    /// FESC followed by a byte that is neither TFEND nor TFESC
    BadEscape,
}

/// Incremental de-stuffer
///
/// Stateless across frames beyond the previous-byte register: a raw FEND
/// unconditionally restarts the decode no matter what came before it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Destuffer {
    prev: u8,
}

impl Destuffer {
    /// Create a fresh de-stuffer
    pub const fn new() -> Self {
        Self { prev: 0 }
    }

    /// Forget any buffered escape
    pub fn reset(&mut self) {
        self.prev = 0;
    }

    /// Feed one raw wire byte
    pub fn feed(&mut self, raw: u8) -> DecodeEvent {
        if raw == FEND {
            self.prev = raw;
            return DecodeEvent::FrameStart;
        }
        let prev = self.prev;
        self.prev = raw;
        if prev == FESC {
            match raw {
                TFESC => DecodeEvent::Byte(FESC),
                TFEND => DecodeEvent::Byte(FEND),
                _ => DecodeEvent::BadEscape,
            }
        } else if raw == FESC {
            DecodeEvent::Held
        } else {
            DecodeEvent::Byte(raw)
        }
    }
}

/// Incremental stuffer for the interrupt-paced transmit path
///
/// [`Stuffer::stage`] maps a logical byte to its first wire byte; when the
/// byte needs transposing the second wire byte is owed and must be drained
/// with [`Stuffer::take_owed`] before the next logical byte is staged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stuffer {
    owed: Option<u8>,
}

impl Stuffer {
    /// Create a fresh stuffer
    pub const fn new() -> Self {
        Self { owed: None }
    }

    /// Forget any owed transposed byte
    pub fn reset(&mut self) {
        self.owed = None;
    }

    /// Stage a logical byte, returning the first wire byte
    pub fn stage(&mut self, byte: u8) -> u8 {
        match byte {
            FEND => {
                self.owed = Some(TFEND);
                FESC
            }
            FESC => {
                self.owed = Some(TFESC);
                FESC
            }
            b => b,
        }
    }

    /// Take the owed transposed byte, if any
    pub fn take_owed(&mut self) -> Option<u8> {
        self.owed.take()
    }
}

/// Encode a whole frame into `out`, returning the wire length
///
/// `addr` is the 7-bit destination; 0 encodes a broadcast frame without an
/// address byte. Used by host-side masters and the test suites; the node
/// itself transmits byte-by-byte from its TX interrupt.
pub fn encode_frame(addr: u8, cmd: u8, payload: &[u8], out: &mut [u8]) -> Result<usize> {
    if payload.len() > 0x7F {
        return Err(Error::PayloadTooLarge);
    }
    let mut crc = Crc8::new(CRC_INIT);
    let mut pos = 0usize;

    let mut push_raw = |byte: u8, pos: &mut usize| -> Result<()> {
        if *pos >= out.len() {
            return Err(Error::BufferTooSmall);
        }
        out[*pos] = byte;
        *pos += 1;
        Ok(())
    };

    push_raw(FEND, &mut pos)?;
    crc.update(FEND);

    let mut stuffer = Stuffer::new();
    let mut push_logical = |byte: u8, pos: &mut usize| -> Result<()> {
        let first = stuffer.stage(byte);
        push_raw(first, pos)?;
        if let Some(owed) = stuffer.take_owed() {
            push_raw(owed, pos)?;
        }
        Ok(())
    };

    if addr != 0 {
        crc.update(addr & 0x7F);
        push_logical((addr & 0x7F) | 0x80, &mut pos)?;
    }
    crc.update(cmd & 0x7F);
    push_logical(cmd & 0x7F, &mut pos)?;
    crc.update(payload.len() as u8);
    push_logical(payload.len() as u8, &mut pos)?;
    for &b in payload {
        crc.update(b);
        push_logical(b, &mut pos)?;
    }
    push_logical(crc.value(), &mut pos)?;

    Ok(pos)
}

/// A frame decoded by [`decode_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame {
    /// 7-bit destination address; 0 for broadcast
    pub addr: u8,
    /// Command code
    pub cmd: u8,
    /// Payload length (bytes written to `out`)
    pub len: usize,
}

/// Decode a whole frame from raw wire bytes, writing the payload to `out`
///
/// Leading noise before the final FEND is skipped; a FEND inside the
/// buffer restarts the decode, so the last frame in `bytes` wins. Host-side
/// counterpart of the node's RX state machine.
pub fn decode_frame(bytes: &[u8], out: &mut [u8]) -> Result<DecodedFrame> {
    #[derive(PartialEq)]
    enum Stage {
        Hunt,
        Addr,
        Cmd,
        Nbt,
        Data,
    }

    let mut destuffer = Destuffer::new();
    let mut crc = Crc8::new(CRC_INIT);
    let mut stage = Stage::Hunt;
    let mut frame = DecodedFrame {
        addr: 0,
        cmd: 0,
        len: 0,
    };
    let mut got = 0usize;
    let mut done = false;

    for &raw in bytes {
        let byte = match destuffer.feed(raw) {
            DecodeEvent::FrameStart => {
                crc.reset(CRC_INIT);
                crc.update(FEND);
                stage = Stage::Addr;
                got = 0;
                done = false;
                continue;
            }
            DecodeEvent::Held => continue,
            DecodeEvent::BadEscape => return Err(Error::InvalidEscape),
            DecodeEvent::Byte(b) => b,
        };
        match stage {
            Stage::Hunt => {}
            Stage::Addr => {
                stage = Stage::Cmd;
                if byte & 0x80 != 0 {
                    frame.addr = byte & 0x7F;
                    crc.update(frame.addr);
                    continue;
                }
                frame.addr = 0;
                // No address byte: this is already the command
                frame.cmd = byte;
                crc.update(byte);
                stage = Stage::Nbt;
            }
            Stage::Cmd => {
                frame.cmd = byte;
                crc.update(byte);
                stage = Stage::Nbt;
            }
            Stage::Nbt => {
                frame.len = byte as usize;
                if frame.len > out.len() {
                    return Err(Error::BufferTooSmall);
                }
                crc.update(byte);
                stage = Stage::Data;
            }
            Stage::Data => {
                if got < frame.len {
                    out[got] = byte;
                    got += 1;
                    crc.update(byte);
                } else {
                    if byte != crc.value() {
                        return Err(Error::CrcMismatch);
                    }
                    stage = Stage::Hunt;
                    done = true;
                }
            }
        }
    }
    if done {
        Ok(frame)
    } else {
        Err(Error::Truncated)
    }
}
