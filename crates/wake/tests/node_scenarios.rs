// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end node behaviour over simulated collaborators

mod common;

use common::{exchange, feed, new_node, parse_reply};
use wake::frame::encode_frame;
use wake::hal::Eeprom;
use wake::module::Module;
use wake::modules::{LedDriver, PowerSupply, Switch, TemperatureSensor};
use wake::packet::Status;
use wake::sim::{SimAnalog, SimPwm, SimRelays, SimTempSensor};

fn full_set() -> (
    Switch<SimRelays>,
    LedDriver<SimPwm, SimPwm>,
    PowerSupply<SimAnalog, SimPwm>,
    TemperatureSensor<SimTempSensor>,
) {
    (
        Switch::new(SimRelays::default(), 6, 32),
        LedDriver::new(SimPwm::default(), None, Some(SimPwm::default()), 40),
        PowerSupply::new(SimAnalog::default(), SimPwm::default(), 36, 1580),
        TemperatureSensor::new(SimTempSensor { raw: 47 }),
    )
}

#[test]
fn get_info_covers_every_device_class() {
    let (mut sw, mut led, mut psu, mut sens) = full_set();
    let mut mods: [&mut dyn Module; 4] = [&mut sw, &mut led, &mut psu, &mut sens];
    let mut node = new_node();
    node.init(&mut mods);
    let mut wire = [0u8; 32];

    let len = encode_frame(127, 3, &[], &mut wire).unwrap();
    let reply = exchange(&mut node, &mut mods, &wire[..len]);
    let (_, payload) = parse_reply(&reply);
    // led 0x01 | switch 0x02 | sensor 0x10 | psu 0x20
    assert_eq!(payload, [0x00, 0x33, 0x21]);

    // Feature byte per class: bit 1 is the switch, 6 channels
    let len = encode_frame(127, 3, &[1], &mut wire).unwrap();
    let reply = exchange(&mut node, &mut mods, &wire[..len]);
    let (_, payload) = parse_reply(&reply);
    assert_eq!(payload, [0x00, 6]);

    // Bit 2 (RGB driver) is absent
    let len = encode_frame(127, 3, &[2], &mut wire).unwrap();
    let reply = exchange(&mut node, &mut mods, &wire[..len]);
    let (_, payload) = parse_reply(&reply);
    assert_eq!(payload, [Status::NotImplemented as u8]);
}

#[test]
fn unclaimed_command_answers_not_implemented() {
    let (mut sw, mut led, mut psu, mut sens) = full_set();
    let mut mods: [&mut dyn Module; 4] = [&mut sw, &mut led, &mut psu, &mut sens];
    let mut node = new_node();
    node.init(&mut mods);
    let mut wire = [0u8; 32];
    let len = encode_frame(127, 40, &[], &mut wire).unwrap();
    let reply = exchange(&mut node, &mut mods, &wire[..len]);
    let (_, payload) = parse_reply(&reply);
    assert_eq!(payload, [Status::NotImplemented as u8]);
}

#[test]
fn switch_commands_over_the_wire() {
    let (mut sw, mut led, mut psu, mut sens) = full_set();
    let mut mods: [&mut dyn Module; 4] = [&mut sw, &mut led, &mut psu, &mut sens];
    let mut node = new_node();
    node.init(&mut mods);
    let mut wire = [0u8; 32];

    let len = encode_frame(127, 28, &[3], &mut wire).unwrap();
    let reply = exchange(&mut node, &mut mods, &wire[..len]);
    let (_, payload) = parse_reply(&reply);
    assert_eq!(payload, [0x00, 0b0000_1000]);

    let len = encode_frame(127, 24, &[], &mut wire).unwrap();
    let reply = exchange(&mut node, &mut mods, &wire[..len]);
    let (_, payload) = parse_reply(&reply);
    assert_eq!(payload, [0x00, 0b0000_1000, 0]);
}

#[test]
fn led_and_sensor_over_the_wire() {
    let (mut sw, mut led, mut psu, mut sens) = full_set();
    let mut mods: [&mut dyn Module; 4] = [&mut sw, &mut led, &mut psu, &mut sens];
    let mut node = new_node();
    node.init(&mut mods);
    let mut wire = [0u8; 32];

    // Brightness 80 on channel 1
    let len = encode_frame(127, 17, &[80], &mut wire).unwrap();
    let reply = exchange(&mut node, &mut mods, &wire[..len]);
    let (_, payload) = parse_reply(&reply);
    assert_eq!(payload, [0x00]);

    let len = encode_frame(127, 16, &[0], &mut wire).unwrap();
    let reply = exchange(&mut node, &mut mods, &wire[..len]);
    let (_, payload) = parse_reply(&reply);
    assert_eq!(payload, [0x00, 80]);

    // 47 half-degrees = 23.5 C
    let len = encode_frame(127, 48, &[], &mut wire).unwrap();
    let reply = exchange(&mut node, &mut mods, &wire[..len]);
    let (_, payload) = parse_reply(&reply);
    assert_eq!(payload, [0x00, 235, 0]);
}

#[test]
fn save_settings_flushes_dirty_modules_once() {
    let (mut sw, mut led, mut psu, mut sens) = full_set();
    let mut mods: [&mut dyn Module; 4] = [&mut sw, &mut led, &mut psu, &mut sens];
    let mut node = new_node();
    node.init(&mut mods);
    let mut wire = [0u8; 32];

    let len = encode_frame(127, 28, &[0], &mut wire).unwrap();
    exchange(&mut node, &mut mods, &wire[..len]);

    let len = encode_frame(127, 10, &[], &mut wire).unwrap();
    let reply = exchange(&mut node, &mut mods, &wire[..len]);
    let (_, payload) = parse_reply(&reply);
    assert_eq!(payload, [0x00]);
    assert_eq!(node.eeprom_mut().read(32), 0b1);
    assert_eq!(node.eeprom_mut().write_count(32), 1);
    assert!(!node.eeprom_mut().is_unlocked());

    // Nothing dirty: no further wear
    let len = encode_frame(127, 10, &[], &mut wire).unwrap();
    exchange(&mut node, &mut mods, &wire[..len]);
    assert_eq!(node.eeprom_mut().write_count(32), 1);
}

#[test]
fn save_settings_reports_a_stuck_lock() {
    let (mut sw, mut led, mut psu, mut sens) = full_set();
    let mut mods: [&mut dyn Module; 4] = [&mut sw, &mut led, &mut psu, &mut sens];
    let mut node = new_node();
    node.init(&mut mods);
    let mut wire = [0u8; 32];

    let len = encode_frame(127, 28, &[0], &mut wire).unwrap();
    exchange(&mut node, &mut mods, &wire[..len]);

    node.eeprom_mut().fail_unlock = true;
    let len = encode_frame(127, 10, &[], &mut wire).unwrap();
    let reply = exchange(&mut node, &mut mods, &wire[..len]);
    let (_, payload) = parse_reply(&reply);
    assert_eq!(payload, [Status::EepromLocked as u8]);
    assert_eq!(node.eeprom_mut().read(32), 0);
}

#[test]
fn ten_minutes_of_ticks_advance_the_counter() {
    let (mut sw, mut led, mut psu, mut sens) = full_set();
    let mut mods: [&mut dyn Module; 4] = [&mut sw, &mut led, &mut psu, &mut sens];
    let mut node = new_node();
    node.init(&mut mods);

    for _ in 0..600 * 61 {
        node.on_timer_irq(&mut mods);
    }
    node.poll(&mut mods);

    let mut wire = [0u8; 32];
    let len = encode_frame(127, 6, &[], &mut wire).unwrap();
    let reply = exchange(&mut node, &mut mods, &wire[..len]);
    let (_, payload) = parse_reply(&reply);
    assert_eq!(payload, [0x00, 1, 0, 0]);
    // The periodic tick also kicked the power supply's conversions
    drop(mods);
    assert_eq!(psu.monitor().kicks, 600 * 61);
}

#[test]
fn group_address_can_be_reassigned() {
    let mut node = new_node();
    node.init(&mut []);
    let mut wire = [0u8; 32];

    let len = encode_frame(127, 5, &[85, !85u8], &mut wire).unwrap();
    let reply = exchange(&mut node, &mut [], &wire[..len]);
    let (_, payload) = parse_reply(&reply);
    assert_eq!(payload, [0x00, 85]);
    assert_eq!(node.group_addr(), 85);

    // Read form reports the group address
    let len = encode_frame(127, 4, &[], &mut wire).unwrap();
    let reply = exchange(&mut node, &mut [], &wire[..len]);
    let (_, payload) = parse_reply(&reply);
    assert_eq!(payload, [85]);

    // The old group is foreign now; the new one executes silently
    let len = encode_frame(95, 2, &[1], &mut wire).unwrap();
    assert!(exchange(&mut node, &mut [], &wire[..len]).is_empty());
    let len = encode_frame(85, 2, &[1], &mut wire).unwrap();
    assert!(exchange(&mut node, &mut [], &wire[..len]).is_empty());
}

#[test]
fn addresses_survive_a_restart() {
    let mut node = new_node();
    node.init(&mut []);
    let mut wire = [0u8; 32];
    let len = encode_frame(127, 4, &[50, !50u8], &mut wire).unwrap();
    exchange(&mut node, &mut [], &wire[..len]);

    // Move the EEPROM into a fresh node, as after a power cycle
    let eeprom = std::mem::take(node.eeprom_mut());
    let mut node2 = new_node();
    *node2.eeprom_mut() = eeprom;
    node2.init(&mut []);
    assert_eq!(node2.node_addr(), 50);
}

#[test]
fn driver_enable_brackets_the_reply() {
    let mut node = new_node();
    node.init(&mut []);
    let mut wire = [0u8; 32];
    let len = encode_frame(127, 2, &[0x42], &mut wire).unwrap();
    feed(&mut node, &wire[..len]);
    assert!(!node.driver_enable().active);

    node.poll(&mut []);
    // Transmit window open: direction pin up, receiver interrupt gated
    assert!(node.driver_enable().active);
    assert!(!node.uart_mut().rx_irq_enabled());
    assert!(node.uart_mut().tx_irq_enabled());

    while node.uart_mut().tx_irq_enabled() {
        node.tx_isr();
    }
    // All bytes queued but the shifter has not drained yet
    assert!(node.driver_enable().active);

    node.uart_mut().finish_tx();
    node.tx_isr();
    assert!(!node.driver_enable().active);
    assert!(node.uart_mut().rx_irq_enabled());
    assert_eq!(node.driver_enable().sets, 1);
    assert_eq!(node.driver_enable().clears, 2); // init + end of reply
}

#[test]
fn reboot_stops_feeding_the_watchdog_after_the_reply() {
    let mut node = new_node();
    node.init(&mut []);
    let mut wire = [0u8; 32];
    let len = encode_frame(127, 11, &[0xCB, 0x47, 0xED, 0x91], &mut wire).unwrap();
    let reply = exchange(&mut node, &mut [], &wire[..len]);
    let (_, payload) = parse_reply(&reply);
    assert_eq!(payload, [0x00]);
    assert!(node.reboot_armed());

    let before = node.watchdog().refreshes;
    node.poll(&mut []);
    node.poll(&mut []);
    assert_eq!(node.watchdog().refreshes, before);
}

#[test]
fn max_payload_echo_round_trips() {
    let mut node = new_node();
    node.init(&mut []);
    let payload: Vec<u8> = (0..64u8).collect();
    let mut wire = [0u8; 256];
    let len = encode_frame(127, 2, &payload, &mut wire).unwrap();
    let reply = exchange(&mut node, &mut [], &wire[..len]);
    let (_, got) = parse_reply(&reply);
    assert_eq!(got, payload);
}
