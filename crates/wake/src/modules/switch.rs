// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay switch module (commands 24..=30)
//!
//! Drives a bank of up to eight relay outputs from a bit image and keeps
//! the previous image around so `On` after `Off` restores the exact
//! output set. The image is persisted lazily and reapplied at reset.

use crate::hal::{Eeprom, RelayBank};
use crate::module::{Module, DEV_SWITCH};
use crate::packet::{Packet, Status, MAX_PAYLOAD};

const GET_STATE: u8 = 24;
const SET_STATE: u8 = 25;
const CLEAR_STATE: u8 = 26;
const WRITE_STATE: u8 = 27;
const SET_CHANNEL: u8 = 28;
const CLEAR_CHANNEL: u8 = 29;
const TOGGLE_CHANNEL: u8 = 30;

/// Relay switch with previous-state memory
#[derive(Debug)]
pub struct Switch<R: RelayBank> {
    relays: R,
    channels: u8,
    nv_offset: u16,
    outputs: u8,
    prev: u8,
}

impl<R: RelayBank> Switch<R> {
    /// Create a switch over `channels` relay outputs, persisting its
    /// image at `nv_offset`
    pub fn new(relays: R, channels: u8, nv_offset: u16) -> Self {
        Self {
            relays,
            channels,
            nv_offset,
            outputs: 0,
            prev: 0,
        }
    }

    /// Current output image
    pub const fn outputs(&self) -> u8 {
        self.outputs
    }

    /// The relay bank collaborator
    pub fn relays(&self) -> &R {
        &self.relays
    }

    fn apply(&mut self) {
        self.relays.write(self.outputs);
    }

    fn set_mask(&mut self, mask: u8) {
        self.prev = self.outputs;
        self.outputs |= mask;
        self.apply();
    }

    fn clear_mask(&mut self, mask: u8) {
        self.prev = self.outputs;
        self.outputs &= !mask;
        self.apply();
    }

    fn write_image(&mut self, image: u8) {
        self.outputs = image;
        self.apply();
    }

    fn toggle_mask(&mut self, mask: u8) {
        if mask == 0xFF {
            if self.outputs != 0 {
                self.prev = self.outputs;
                self.outputs = 0;
            } else {
                self.outputs = self.prev;
            }
        } else {
            self.prev = self.outputs;
            self.outputs ^= mask;
        }
        self.apply();
    }

    /// Reply `{Ok, outputs}` after applying `op` to a full mask argument
    fn form_response(&mut self, p: &mut Packet<MAX_PAYLOAD>, op: fn(&mut Self, u8)) {
        if p.n == 1 {
            op(self, p.buf[0]);
            p.set_status2(Status::Ok, self.outputs);
        } else {
            p.set_status(Status::BadParam);
        }
    }

    /// Reply `{Ok, outputs}` after applying `op` to one channel
    fn form_response_masked(&mut self, p: &mut Packet<MAX_PAYLOAD>, op: fn(&mut Self, u8)) {
        if p.n == 1 && p.buf[0] < self.channels {
            op(self, 1 << p.buf[0]);
            p.set_status2(Status::Ok, self.outputs);
        } else {
            p.set_status(Status::BadParam);
        }
    }
}

impl<R: RelayBank> Module for Switch<R> {
    fn device_mask(&self) -> u8 {
        DEV_SWITCH
    }

    fn features(&self) -> u8 {
        self.channels
    }

    fn restore(&mut self, eeprom: &mut dyn Eeprom) {
        self.outputs = eeprom.read(self.nv_offset);
        self.apply();
    }

    fn process(&mut self, p: &mut Packet<MAX_PAYLOAD>) -> bool {
        match p.cmd {
            GET_STATE => {
                if p.n == 0 {
                    p.buf[0] = Status::Ok as u8;
                    p.buf[1] = self.outputs;
                    p.buf[2] = self.prev;
                    p.n = 3;
                } else {
                    p.set_status(Status::BadParam);
                }
            }
            SET_STATE => self.form_response(p, Self::set_mask),
            CLEAR_STATE => self.form_response(p, Self::clear_mask),
            WRITE_STATE => self.form_response(p, Self::write_image),
            SET_CHANNEL => self.form_response_masked(p, Self::set_mask),
            CLEAR_CHANNEL => self.form_response_masked(p, Self::clear_mask),
            TOGGLE_CHANNEL => self.form_response_masked(p, Self::toggle_mask),
            _ => return false,
        }
        true
    }

    fn on(&mut self) {
        if self.outputs == 0 {
            self.outputs = self.prev;
            self.apply();
        }
    }

    fn off(&mut self) {
        self.clear_mask(0xFF);
    }

    fn toggle(&mut self) {
        self.toggle_mask(0xFF);
    }

    fn save_state(&mut self, eeprom: &mut dyn Eeprom) {
        let current = self.outputs;
        if eeprom.read(self.nv_offset) == current {
            return;
        }
        if eeprom.is_unlocked() {
            eeprom.write(self.nv_offset, current);
        }
    }
}
