// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Wake - serial control protocol for MCU nodes
//!
//! A `no_std` implementation of the Wake master/slave protocol used by a
//! family of smart-home nodes (relay switches, LED dimmers, bench power
//! supplies, sensors). Each node hangs off a half-duplex UART line, often
//! single-wire with a driver-enable pin, and hosts up to six logical device
//! modules behind one address.
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------+
//! |  Device modules (switch, LED, PSU, ...) |
//! +-----------------------------------------+
//!           v                    ^
//! +-----------------------------------------+
//! |  Dispatcher + built-in commands         |
//! +-----------------------------------------+
//!           v                    ^
//! +-----------------------------------------+
//! |  RX / TX state machines (IRQ driven)    |
//! +-----------------------------------------+
//!           v                    ^
//! +-----------------------------------------+
//! |  Byte stuffing + CRC-8 framing          |
//! +-----------------------------------------+
//!           v                    ^
//! +-----------------------------------------+
//! |  UART / EEPROM / watchdog (HAL traits)  |
//! +-----------------------------------------+
//! ```
//!
//! ## Design Constraints
//!
//! - **No heap allocations** - one statically sized packet buffer, reused
//! - **Interrupt driven** - two UART interrupts plus a periodic timer feed
//!   the engine; a cooperative foreground loop dispatches
//! - **No floating point**
//! - **`no_std` compatible**
//!
//! ## Feature Flags
//!
//! - `std` -- Enable std (for host testing)

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

#[cfg(any(test, feature = "std"))]
extern crate std;

/// Streaming CRC-8 (Dallas/Maxim), table-driven and bitwise variants
pub mod crc;

/// Error types for the Wake engine
pub mod error;

/// Byte-stuffing codec (FEND/FESC framing)
pub mod frame;

/// Collaborator traits: UART, driver-enable pin, EEPROM, watchdog
pub mod hal;

/// Device module contract and composition
pub mod module;

/// Device modules: switch, LED driver, power supply, sensor
pub mod modules;

/// Protocol engine: RX/TX state machines, dispatch, built-in commands
pub mod node;

/// Wear-levelled operation time counter
pub mod optime;

/// Packet, command codes, status codes, address space
pub mod packet;

/// In-memory collaborators for host-side testing
pub mod sim;

// Re-exports for convenience
pub use crate::error::{Error, Result};
pub use crate::module::Module;
pub use crate::node::{NvLayout, WakeNode};
pub use crate::packet::{Command, Packet, Status, MAX_PAYLOAD};

/// Version of the Wake crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
