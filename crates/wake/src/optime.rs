// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wear-levelled operation time counter
//!
//! A ~61 Hz timer interrupt (2 MHz core / 256 / 128) feeds
//! [`OpTime::on_tick`]; every ten minutes a latch is raised for the
//! foreground loop, which then advances a 24-bit persistent counter.
//!
//! The counter's low byte rotates through a ring of 16 EEPROM slots so
//! each cell sees 1/16th of the writes. The current position is found by
//! walking the ring until the `slot[i+1] == slot[i] + 1` chain breaks;
//! that break is where the last write landed. The middle/high bytes live
//! in a little-endian `u16` next to the ring and only change when the low
//! byte wraps, i.e. every 256 increments.
//!
//! A failed EEPROM unlock silently drops the tick.

use crate::hal::Eeprom;

/// Timer tick rate in Hz
pub const TICK_HZ: u32 = 61;

/// Ring slots carrying the counter's low byte
pub const RING_SLOTS: u16 = 16;

const TEN_MINUTES: u32 = 600 * TICK_HZ;

/// Tick accounting plus the persistent 24-bit counter
#[derive(Debug)]
pub struct OpTime {
    ring_base: u16,
    high_base: u16,
    ticks: u32,
    ten_min: bool,
}

impl OpTime {
    /// Create a counter over the ring at `ring_base` and the high word at
    /// `high_base`
    pub const fn new(ring_base: u16, high_base: u16) -> Self {
        Self {
            ring_base,
            high_base,
            ticks: 0,
            ten_min: false,
        }
    }

    /// Count one timer interrupt; raises the ten-minute latch when due
    pub fn on_tick(&mut self) {
        self.ticks += 1;
        if self.ticks == TEN_MINUTES {
            self.ticks = 0;
            self.ten_min = true;
        }
    }

    /// True once ten minutes of ticks have accumulated
    pub const fn ten_minutes_elapsed(&self) -> bool {
        self.ten_min
    }

    /// Clear the ten-minute latch
    pub fn clear_ten_minutes(&mut self) {
        self.ten_min = false;
    }

    /// Ring index of the last written slot
    fn index(&self, eeprom: &dyn Eeprom) -> u16 {
        for i in 0..RING_SLOTS - 1 {
            let cur = eeprom.read(self.ring_base + i);
            let next = eeprom.read(self.ring_base + i + 1);
            if next != cur.wrapping_add(1) {
                return i;
            }
        }
        RING_SLOTS - 1
    }

    /// Current counter value as `[low, mid, high]`
    pub fn read(&self, eeprom: &dyn Eeprom) -> [u8; 3] {
        let low = eeprom.read(self.ring_base + self.index(eeprom));
        let mid = eeprom.read(self.high_base);
        let high = eeprom.read(self.high_base + 1);
        [low, mid, high]
    }

    /// Advance the counter by one, rotating to the next ring slot
    pub fn increment(&mut self, eeprom: &mut dyn Eeprom) {
        let i = self.index(eeprom);
        let next = eeprom.read(self.ring_base + i).wrapping_add(1);
        if eeprom.unlock() {
            let slot = (i + 1) % RING_SLOTS;
            eeprom.write(self.ring_base + slot, next);
            if next == 0 {
                let high = u16::from_le_bytes([
                    eeprom.read(self.high_base),
                    eeprom.read(self.high_base + 1),
                ])
                .wrapping_add(1);
                let bytes = high.to_le_bytes();
                eeprom.write(self.high_base, bytes[0]);
                eeprom.write(self.high_base + 1, bytes[1]);
            }
        }
        eeprom.lock();
    }
}
