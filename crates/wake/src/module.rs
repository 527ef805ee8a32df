// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device module contract and composition
//!
//! A node statically composes up to six modules; their device masks OR
//! into the mask reported by `GetInfo`. The dispatcher walks the whole
//! list for every unreserved command: a module that does not recognise the
//! command reports it back, and once every module has passed, the node
//! answers "not implemented".

use crate::hal::Eeprom;
use crate::packet::{Packet, MAX_PAYLOAD};

/// Null device class
pub const DEV_NULL: u8 = 0x00;
/// LED driver / dimmer
pub const DEV_LED_DRIVER: u8 = 0x01;
/// Relay switch
pub const DEV_SWITCH: u8 = 0x02;
/// RGB driver
pub const DEV_RGB_DRIVER: u8 = 0x04;
/// Generic IO
pub const DEV_GENERIC_IO: u8 = 0x08;
/// Sensor
pub const DEV_SENSOR: u8 = 0x10;
/// Bench power supply
pub const DEV_POWER_SUPPLY: u8 = 0x20;
/// Vendor-specific device
pub const DEV_CUSTOM: u8 = 0x80;

/// One logical device behind the node address
///
/// Commands 12..=127 are routed to every module; each module owns a
/// disjoint sub-range and builds its reply directly in the shared packet.
pub trait Module {
    /// Device class bit (one bit of the composed mask)
    fn device_mask(&self) -> u8;

    /// Feature byte reported by `GetInfo` for this device class
    fn features(&self) -> u8;

    /// Reload persisted state after reset
    fn restore(&mut self, eeprom: &mut dyn Eeprom) {
        let _ = eeprom;
    }

    /// Handle the pending command, mutating `packet` into the reply
    ///
    /// Returns false when the command is not this module's; the packet
    /// must then be left untouched.
    fn process(&mut self, packet: &mut Packet<MAX_PAYLOAD>) -> bool;

    /// Switch the device on (restore its last on-image)
    fn on(&mut self) {}

    /// Switch the device off
    fn off(&mut self) {}

    /// Toggle between on and off
    fn toggle(&mut self) {}

    /// Snapshot dirty state to EEPROM; the caller has already unlocked
    /// the array, and a module must skip the write when the unlock failed
    fn save_state(&mut self, eeprom: &mut dyn Eeprom) {
        let _ = eeprom;
    }

    /// Periodic hook from the timer interrupt (PWM ramping, ADC kicks);
    /// must not block
    fn tick(&mut self) {}
}

/// Placeholder module: no device, no commands
#[derive(Debug, Clone, Copy, Default)]
pub struct NullModule;

impl Module for NullModule {
    fn device_mask(&self) -> u8 {
        DEV_NULL
    }

    fn features(&self) -> u8 {
        0
    }

    fn process(&mut self, _packet: &mut Packet<MAX_PAYLOAD>) -> bool {
        false
    }
}

/// OR of every composed device mask
pub fn composed_mask(modules: &[&mut dyn Module]) -> u8 {
    modules.iter().fold(0, |acc, m| acc | m.device_mask())
}

/// Feature byte of the module owning `mask`, if any
pub fn features_of(modules: &[&mut dyn Module], mask: u8) -> u8 {
    for m in modules.iter() {
        if m.device_mask() == mask {
            return m.features();
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake(u8, u8);

    impl Module for Fake {
        fn device_mask(&self) -> u8 {
            self.0
        }

        fn features(&self) -> u8 {
            self.1
        }

        fn process(&mut self, _packet: &mut Packet<MAX_PAYLOAD>) -> bool {
            false
        }
    }

    #[test]
    fn test_composed_mask_ors_members() {
        let mut a = Fake(DEV_SWITCH, 6);
        let mut b = Fake(DEV_SENSOR, 1);
        let mut null = NullModule;
        let mods: [&mut dyn Module; 3] = [&mut a, &mut b, &mut null];
        assert_eq!(composed_mask(&mods), DEV_SWITCH | DEV_SENSOR);
    }

    #[test]
    fn test_features_lookup() {
        let mut a = Fake(DEV_SWITCH, 6);
        let mut b = Fake(DEV_POWER_SUPPLY, 36);
        let mods: [&mut dyn Module; 2] = [&mut a, &mut b];
        assert_eq!(features_of(&mods, DEV_SWITCH), 6);
        assert_eq!(features_of(&mods, DEV_POWER_SUPPLY), 36);
        assert_eq!(features_of(&mods, DEV_LED_DRIVER), 0);
    }

    #[test]
    fn test_null_module_claims_nothing() {
        let mut null = NullModule;
        let mut p: Packet<MAX_PAYLOAD> = Packet::new();
        p.cmd = 42;
        assert!(!null.process(&mut p));
        assert_eq!(null.device_mask(), DEV_NULL);
    }
}
