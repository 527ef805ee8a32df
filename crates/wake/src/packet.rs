// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet buffer, reserved command codes, status codes and the address
//! space
//!
//! ## Address space
//!
//! | Range      | Meaning                       |
//! |------------|-------------------------------|
//! | 0          | broadcast (no reply)          |
//! | 1..=79     | individual node addresses     |
//! | 80..=95    | group (multicast) addresses   |
//! | 96..=111   | reserved                      |
//! | 112        | bootloader                    |
//! | 113..=127  | individual node addresses     |

/// Payload capacity of the application engine
pub const MAX_PAYLOAD: usize = 64;

/// Payload capacity of the bootloader engine (one flash block plus command
/// overhead)
pub const BOOT_MAX_PAYLOAD: usize = 140;

/// Broadcast address
pub const BROADCAST: u8 = 0;

/// Fixed bootloader address
pub const BOOT_ADDR: u8 = 112;

/// Factory-default node address
pub const DEFAULT_NODE_ADDR: u8 = 127;

/// Factory-default group address
pub const DEFAULT_GROUP_ADDR: u8 = 95;

/// Command-set version reported by `GetInfo`: `(major << 4) | minor`
pub const PROTOCOL_VERSION: u8 = 0x21;

/// Reboot key, big-endian on the wire
pub const REBOOT_KEY: [u8; 4] = [0xCB, 0x47, 0xED, 0x91];

/// True for a valid individual node address
pub const fn is_node_addr(a: u8) -> bool {
    (a >= 1 && a <= 79) || (a >= 113 && a <= 127)
}

/// True for a valid group address
pub const fn is_group_addr(a: u8) -> bool {
    a >= 80 && a <= 95
}

/// Reserved command codes (0..=11); codes 12..=127 belong to device
/// modules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// No operation
    Nop = 0,
    /// Frame reception error (raised internally, never replied to)
    Err = 1,
    /// Reply with the request payload
    Echo = 2,
    /// Device mask + command-set version, or per-device feature byte
    GetInfo = 3,
    /// Persist a new individual address (or read the group address)
    SetNodeAddress = 4,
    /// Persist a new group address (or read it)
    SetGroupAddress = 5,
    /// Read the 24-bit operation time counter
    GetOpTime = 6,
    /// Switch every module off
    Off = 7,
    /// Switch every module on
    On = 8,
    /// Toggle every module
    ToggleOnOff = 9,
    /// Flush every module's state to EEPROM
    SaveSettings = 10,
    /// Reset the node (guarded by [`REBOOT_KEY`])
    Reboot = 11,
}

impl Command {
    /// Decode a reserved command code
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Command::Nop,
            1 => Command::Err,
            2 => Command::Echo,
            3 => Command::GetInfo,
            4 => Command::SetNodeAddress,
            5 => Command::SetGroupAddress,
            6 => Command::GetOpTime,
            7 => Command::Off,
            8 => Command::On,
            9 => Command::ToggleOnOff,
            10 => Command::SaveSettings,
            11 => Command::Reboot,
            _ => return None,
        })
    }
}

/// Status byte leading every reply payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// No error
    Ok = 0,
    /// Rx/Tx error
    TxError = 1,
    /// Device busy
    Busy = 2,
    /// Device not ready
    NotReady = 3,
    /// Bad parameter value
    BadParam = 4,
    /// Command not implemented
    NotImplemented = 5,
    /// No reply
    NoReply = 6,
    /// No carrier
    NoCarrier = 7,
    /// New address is out of range or the complement check failed
    BadAddress = 8,
    /// EEPROM would not unlock; stored value preserved
    EepromLocked = 9,
}

/// One Wake packet: address, command, payload
///
/// A single instance lives inside each engine and is reused for the
/// request and its reply, exactly one packet in flight at a time.
#[derive(Debug, Clone, Copy)]
pub struct Packet<const CAP: usize> {
    /// 7-bit destination address as received; 0 for broadcast
    pub addr: u8,
    /// Command code (bit 7 clear)
    pub cmd: u8,
    /// Payload length
    pub n: u8,
    /// Payload buffer
    pub buf: [u8; CAP],
}

impl<const CAP: usize> Packet<CAP> {
    /// Create an empty packet
    pub const fn new() -> Self {
        Self {
            addr: 0,
            cmd: 0,
            n: 0,
            buf: [0; CAP],
        }
    }

    /// The live payload
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.n as usize]
    }

    /// Turn the packet into a one-byte status reply
    pub fn set_status(&mut self, status: Status) {
        self.buf[0] = status as u8;
        self.n = 1;
    }

    /// Turn the packet into a two-byte `{status, value}` reply
    pub fn set_status2(&mut self, status: Status, value: u8) {
        self.buf[0] = status as u8;
        self.buf[1] = value;
        self.n = 2;
    }

    /// Load a payload, truncating at capacity
    pub fn load(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(CAP);
        self.buf[..n].copy_from_slice(&bytes[..n]);
        self.n = n as u8;
    }
}

impl<const CAP: usize> Default for Packet<CAP> {
    fn default() -> Self {
        Self::new()
    }
}
