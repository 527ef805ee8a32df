// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the Wake engine
//!
//! The interrupt-driven engine itself never returns errors: framing and CRC
//! failures are protocol events handled by resetting the receive state
//! machine. This type covers the fallible host-facing helpers (whole-frame
//! encode/decode).

use core::fmt;

/// Result type for Wake operations
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for Wake frame helpers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Output buffer too small for operation
    BufferTooSmall,

    /// Payload longer than the packet buffer
    PayloadTooLarge,

    /// FESC followed by a byte that is neither TFEND nor TFESC
    InvalidEscape,

    /// Frame checksum did not match
    CrcMismatch,

    /// Frame ended before all announced bytes arrived
    Truncated,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BufferTooSmall => write!(f, "Buffer too small"),
            Error::PayloadTooLarge => write!(f, "Payload too large"),
            Error::InvalidEscape => write!(f, "Invalid escape sequence"),
            Error::CrcMismatch => write!(f, "CRC mismatch"),
            Error::Truncated => write!(f, "Truncated frame"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
