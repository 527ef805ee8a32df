// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protocol engine: interrupt-driven state machines plus the cooperative
//! dispatcher
//!
//! One [`WakeNode`] owns the UART, the driver-enable pin, the EEPROM, the
//! watchdog and the single shared packet buffer. Three entry points are
//! called from interrupt stubs:
//!
//! - [`WakeNode::rx_isr`] on RX-not-empty: feeds the receive state machine
//! - [`WakeNode::tx_isr`] on TX-empty / TX-complete: pumps the reply out
//! - [`WakeNode::on_timer_irq`] on the periodic timer: operation time
//!   accounting and the module tick chain
//!
//! The foreground loop calls [`WakeNode::poll`] forever: it feeds the
//! watchdog, flushes dirty module state every ten minutes, executes the
//! delivered command (built-ins below 12, modules above) and starts the
//! reply.
//!
//! ## Reply policy
//!
//! Every request addressed to the node's individual address gets exactly
//! one reply. Broadcast and group-addressed requests execute their side
//! effects silently, except that a non-broadcast `SetNodeAddress` is
//! always answered (the node address may just have changed, and a
//! group-addressed one still confirms to the sender). Malformed frames
//! are dropped without a reply.

use log::{debug, trace, warn};

use crate::crc::Crc8;
use crate::frame::{DecodeEvent, Destuffer, Stuffer, CRC_INIT, FEND};
use crate::hal::{DriverEnable, Eeprom, Uart, Watchdog};
use crate::module::{composed_mask, features_of, Module};
use crate::optime::OpTime;
use crate::packet::{
    is_group_addr, is_node_addr, Command, Packet, Status, BROADCAST, DEFAULT_GROUP_ADDR,
    DEFAULT_NODE_ADDR, MAX_PAYLOAD, PROTOCOL_VERSION, REBOOT_KEY,
};

/// Watchdog period armed at init
const WATCHDOG_PERIOD_MS: u16 = 1000;

/// EEPROM offsets of the node's housekeeping state
///
/// Only the set of persisted items is fixed; the offsets are layout
/// configuration. Module regions live past the housekeeping block.
#[derive(Debug, Clone, Copy)]
pub struct NvLayout {
    /// Individual node address cell
    pub node_addr: u16,
    /// Group address cell
    pub group_addr: u16,
    /// First slot of the operation-time ring (16 cells)
    pub op_ring: u16,
    /// Little-endian high word of the operation-time counter (2 cells)
    pub op_high: u16,
}

impl Default for NvLayout {
    fn default() -> Self {
        Self {
            node_addr: 0,
            group_addr: 1,
            op_ring: 2,
            op_high: 18,
        }
    }
}

/// Receive state, advanced one unstuffed byte at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    WaitFend,
    Addr,
    Cmd,
    Nbt,
    Data,
}

/// Transmit state, advanced one TX-empty event at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Idle,
    Addr,
    Cmd,
    Nbt,
    Data,
    Crc,
}

/// A Wake slave node: framing engine, dispatcher and built-in commands
pub struct WakeNode<U, D, E, W>
where
    U: Uart,
    D: DriverEnable,
    E: Eeprom,
    W: Watchdog,
{
    uart: U,
    de: D,
    eeprom: E,
    watchdog: W,
    layout: NvLayout,
    node_addr: u8,
    group_addr: u8,
    packet: Packet<MAX_PAYLOAD>,
    rx_state: RxState,
    tx_state: TxState,
    destuffer: Destuffer,
    stuffer: Stuffer,
    crc: Crc8,
    ptr: u8,
    /// Delivered command; 0 while idle. Written by the RX interrupt,
    /// consumed by the foreground loop once the FSM is parked.
    pending: u8,
    optime: OpTime,
    reboot_armed: bool,
}

impl<U, D, E, W> WakeNode<U, D, E, W>
where
    U: Uart,
    D: DriverEnable,
    E: Eeprom,
    W: Watchdog,
{
    /// Create a node over its collaborators
    pub fn new(uart: U, de: D, eeprom: E, watchdog: W, layout: NvLayout) -> Self {
        Self {
            uart,
            de,
            eeprom,
            watchdog,
            layout,
            node_addr: DEFAULT_NODE_ADDR,
            group_addr: DEFAULT_GROUP_ADDR,
            packet: Packet::new(),
            rx_state: RxState::WaitFend,
            tx_state: TxState::Idle,
            destuffer: Destuffer::new(),
            stuffer: Stuffer::new(),
            crc: Crc8::new(CRC_INIT),
            ptr: 0,
            pending: 0,
            optime: OpTime::new(0, 0),
            reboot_armed: false,
        }
    }

    /// Load persisted state, restore the modules, arm the watchdog and
    /// open the receiver
    pub fn init(&mut self, modules: &mut [&mut dyn Module]) {
        self.optime = OpTime::new(self.layout.op_ring, self.layout.op_high);
        let a = self.eeprom.read(self.layout.node_addr);
        self.node_addr = if is_node_addr(a) { a } else { DEFAULT_NODE_ADDR };
        let g = self.eeprom.read(self.layout.group_addr);
        self.group_addr = if is_group_addr(g) { g } else { DEFAULT_GROUP_ADDR };
        debug!("wake node up: addr={} group={}", self.node_addr, self.group_addr);
        for m in modules.iter_mut() {
            m.restore(&mut self.eeprom);
        }
        self.de.clear();
        self.watchdog.start(WATCHDOG_PERIOD_MS);
        self.uart.set_rx_irq(true);
    }

    /// Current individual address
    pub const fn node_addr(&self) -> u8 {
        self.node_addr
    }

    /// Current group address
    pub const fn group_addr(&self) -> u8 {
        self.group_addr
    }

    /// True while a frame is being received
    pub fn rx_active(&self) -> bool {
        self.rx_state != RxState::WaitFend
    }

    /// True while a reply is being transmitted
    pub fn tx_active(&self) -> bool {
        self.tx_state != TxState::Idle
    }

    /// True once a valid `Reboot` has been served; the foreground loop
    /// stops feeding the watchdog as soon as the reply has drained
    pub const fn reboot_armed(&self) -> bool {
        self.reboot_armed
    }

    /// The UART collaborator
    pub fn uart_mut(&mut self) -> &mut U {
        &mut self.uart
    }

    /// The EEPROM collaborator
    pub fn eeprom_mut(&mut self) -> &mut E {
        &mut self.eeprom
    }

    /// The watchdog collaborator
    pub fn watchdog(&self) -> &W {
        &self.watchdog
    }

    /// The driver-enable collaborator
    pub fn driver_enable(&self) -> &D {
        &self.de
    }

    /// RX-not-empty interrupt entry
    pub fn rx_isr(&mut self) {
        let error = self.uart.has_rx_error();
        let raw = self.uart.read_byte();
        if error {
            trace!("uart error, frame dropped");
            self.rx_state = RxState::WaitFend;
            self.pending = Command::Err as u8;
            return;
        }
        match self.destuffer.feed(raw) {
            DecodeEvent::FrameStart => {
                self.crc.reset(CRC_INIT);
                self.crc.update(FEND);
                self.rx_state = RxState::Addr;
            }
            DecodeEvent::Held => {}
            DecodeEvent::BadEscape => {
                if self.rx_state != RxState::WaitFend {
                    trace!("invalid escape, frame dropped");
                    self.rx_state = RxState::WaitFend;
                    self.pending = Command::Err as u8;
                }
            }
            DecodeEvent::Byte(byte) => self.rx_byte(byte),
        }
    }

    fn rx_byte(&mut self, byte: u8) {
        match self.rx_state {
            RxState::WaitFend => {}
            RxState::Addr => {
                if byte & 0x80 != 0 {
                    let a = byte & 0x7F;
                    if a == BROADCAST || a == self.node_addr || a == self.group_addr {
                        self.crc.update(a);
                        self.packet.addr = a;
                        self.rx_state = RxState::Cmd;
                    } else {
                        self.rx_state = RxState::WaitFend;
                    }
                } else {
                    // No address byte: broadcast frame, this is already
                    // the command
                    self.packet.addr = 0;
                    self.rx_state = RxState::Cmd;
                    self.rx_cmd(byte);
                }
            }
            RxState::Cmd => self.rx_cmd(byte),
            RxState::Nbt => {
                if byte as usize > MAX_PAYLOAD {
                    self.rx_state = RxState::WaitFend;
                    self.pending = Command::Err as u8;
                    return;
                }
                self.packet.n = byte;
                self.crc.update(byte);
                self.ptr = 0;
                self.rx_state = RxState::Data;
            }
            RxState::Data => {
                if self.ptr < self.packet.n {
                    self.packet.buf[self.ptr as usize] = byte;
                    self.ptr += 1;
                    self.crc.update(byte);
                    return;
                }
                // All announced bytes in: this one is the checksum
                self.rx_state = RxState::WaitFend;
                if byte == self.crc.value() {
                    self.pending = self.packet.cmd;
                } else {
                    trace!("crc mismatch, frame dropped");
                    self.pending = Command::Err as u8;
                }
            }
        }
    }

    fn rx_cmd(&mut self, byte: u8) {
        if byte & 0x80 != 0 {
            self.rx_state = RxState::WaitFend;
            self.pending = Command::Err as u8;
            return;
        }
        self.packet.cmd = byte;
        self.crc.update(byte);
        self.rx_state = RxState::Nbt;
    }

    /// TX-empty / TX-complete interrupt entry
    pub fn tx_isr(&mut self) {
        if self.uart.is_tx_complete() {
            self.uart.clear_tx_complete();
            self.uart.discard_rx();
            self.uart.set_rx_irq(true);
            self.de.clear();
            return;
        }
        if let Some(owed) = self.stuffer.take_owed() {
            self.uart.write_byte(owed);
            return;
        }
        let byte = match self.tx_state {
            TxState::Addr if self.packet.addr != 0 => {
                self.tx_state = TxState::Cmd;
                // Replies carry the node's own address; checksum the
                // 7-bit value, transmit it with bit 7 set
                let a = self.node_addr;
                self.crc.update(a);
                let wire = self.stuffer.stage(a | 0x80);
                self.uart.write_byte(wire);
                return;
            }
            TxState::Addr | TxState::Cmd => {
                self.tx_state = TxState::Nbt;
                self.packet.cmd & 0x7F
            }
            TxState::Nbt => {
                self.tx_state = TxState::Data;
                self.ptr = 0;
                self.packet.n
            }
            TxState::Data => {
                if self.ptr < self.packet.n {
                    let b = self.packet.buf[self.ptr as usize];
                    self.ptr += 1;
                    b
                } else {
                    self.tx_state = TxState::Crc;
                    let wire = self.stuffer.stage(self.crc.value());
                    self.uart.write_byte(wire);
                    return;
                }
            }
            TxState::Crc | TxState::Idle => {
                self.uart.set_tx_irq(false);
                self.tx_state = TxState::Idle;
                return;
            }
        };
        self.crc.update(byte);
        let wire = self.stuffer.stage(byte);
        self.uart.write_byte(wire);
    }

    /// Periodic timer interrupt entry: operation time accounting and the
    /// module tick chain
    pub fn on_timer_irq(&mut self, modules: &mut [&mut dyn Module]) {
        self.optime.on_tick();
        for m in modules.iter_mut() {
            m.tick();
        }
    }

    /// Foreground loop body
    pub fn poll(&mut self, modules: &mut [&mut dyn Module]) {
        if self.reboot_armed && !self.tx_active() {
            // Reply drained: starve the watchdog and let it reset the MCU
            return;
        }
        self.watchdog.refresh();

        if self.optime.ten_minutes_elapsed() && !self.rx_active() {
            self.optime.clear_ten_minutes();
            self.optime.increment(&mut self.eeprom);
            if self.eeprom.unlock() {
                for m in modules.iter_mut() {
                    m.save_state(&mut self.eeprom);
                }
            }
            self.eeprom.lock();
        }

        let cmd = self.pending;
        if cmd == 0 {
            return;
        }
        if cmd == Command::Err as u8 {
            // Framing error: throw away the half-built packet, no reply
            self.pending = 0;
            return;
        }

        match Command::from_code(cmd) {
            Some(Command::Nop) | Some(Command::Err) | Some(Command::Echo) => {}
            Some(Command::GetInfo) => self.cmd_get_info(modules),
            Some(Command::SetNodeAddress) => self.cmd_set_address(true),
            Some(Command::SetGroupAddress) => self.cmd_set_address(false),
            Some(Command::GetOpTime) => self.cmd_get_op_time(),
            Some(Command::Off) => {
                if self.packet.n == 0 {
                    for m in modules.iter_mut() {
                        m.off();
                    }
                    self.packet.set_status(Status::Ok);
                } else {
                    self.packet.set_status(Status::BadParam);
                }
            }
            Some(Command::On) => {
                if self.packet.n == 0 {
                    for m in modules.iter_mut() {
                        m.on();
                    }
                    self.packet.set_status(Status::Ok);
                } else {
                    self.packet.set_status(Status::BadParam);
                }
            }
            Some(Command::ToggleOnOff) => {
                if self.packet.n == 0 {
                    for m in modules.iter_mut() {
                        m.toggle();
                    }
                    self.packet.set_status(Status::Ok);
                } else {
                    self.packet.set_status(Status::BadParam);
                }
            }
            Some(Command::SaveSettings) => self.cmd_save_settings(modules),
            Some(Command::Reboot) => self.cmd_reboot(),
            None => self.dispatch_to_modules(modules),
        }

        let taddr = self.packet.addr;
        let answer = (taddr != 0 && cmd == Command::SetNodeAddress as u8)
            || taddr == self.node_addr;
        if answer && !self.tx_active() {
            self.start_reply();
        }
        self.pending = 0;
    }

    fn dispatch_to_modules(&mut self, modules: &mut [&mut dyn Module]) {
        let mut processed = 0u8;
        for m in modules.iter_mut() {
            if !m.process(&mut self.packet) {
                processed |= m.device_mask();
            }
        }
        if processed == composed_mask(modules) {
            self.packet.set_status(Status::NotImplemented);
        }
    }

    fn cmd_get_info(&mut self, modules: &mut [&mut dyn Module]) {
        let mask = composed_mask(modules);
        match self.packet.n {
            0 => {
                self.packet.buf[0] = Status::Ok as u8;
                self.packet.buf[1] = mask;
                self.packet.buf[2] = PROTOCOL_VERSION;
                self.packet.n = 3;
            }
            1 => {
                let index = self.packet.buf[0];
                if index < 7 && mask & (1 << index) != 0 {
                    let features = features_of(modules, 1 << index);
                    self.packet.set_status2(Status::Ok, features);
                } else {
                    self.packet.set_status(Status::NotImplemented);
                }
            }
            _ => self.packet.set_status(Status::BadParam),
        }
    }

    fn cmd_set_address(&mut self, node: bool) {
        if self.packet.n == 2 && self.packet.addr != 0 {
            let a = self.packet.buf[0];
            let complement_ok = a == !self.packet.buf[1];
            let range_ok = if node { is_node_addr(a) } else { is_group_addr(a) };
            if complement_ok && range_ok {
                self.packet.buf[0] = Status::Ok as u8;
                self.packet.buf[1] = a;
                let current = if node { self.node_addr } else { self.group_addr };
                if a != current {
                    if self.eeprom.unlock() {
                        let offset = if node {
                            self.layout.node_addr
                        } else {
                            self.layout.group_addr
                        };
                        self.eeprom.write(offset, a);
                        if node {
                            self.node_addr = a;
                        } else {
                            self.group_addr = a;
                        }
                        debug!("{} address set to {}", if node { "node" } else { "group" }, a);
                    } else {
                        self.packet.buf[0] = Status::EepromLocked as u8;
                    }
                    self.eeprom.lock();
                }
            } else {
                self.packet.buf[0] = Status::BadAddress as u8;
            }
        } else if self.packet.n == 0 {
            // Read form: both commands report the group address
            self.packet.buf[0] = self.group_addr;
            self.packet.n = 1;
        } else {
            self.packet.buf[0] = Status::BadParam as u8;
            self.packet.n = 2;
        }
        if self.packet.buf[0] != 0 {
            self.packet.buf[1] = 0;
        }
    }

    fn cmd_get_op_time(&mut self) {
        if self.packet.n == 0 {
            let value = self.optime.read(&self.eeprom);
            self.packet.buf[0] = Status::Ok as u8;
            self.packet.buf[1] = value[0];
            self.packet.buf[2] = value[1];
            self.packet.buf[3] = value[2];
            self.packet.n = 4;
        } else {
            self.packet.set_status(Status::BadParam);
        }
    }

    fn cmd_save_settings(&mut self, modules: &mut [&mut dyn Module]) {
        if self.packet.n != 0 {
            self.packet.set_status(Status::BadParam);
            return;
        }
        if self.eeprom.unlock() {
            for m in modules.iter_mut() {
                m.save_state(&mut self.eeprom);
            }
            self.packet.set_status(Status::Ok);
        } else {
            warn!("eeprom would not unlock, settings not saved");
            self.packet.set_status(Status::EepromLocked);
        }
        self.eeprom.lock();
    }

    fn cmd_reboot(&mut self) {
        if self.packet.n == 4 && self.packet.buf[..4] == REBOOT_KEY {
            debug!("reboot armed");
            self.reboot_armed = true;
            self.packet.set_status(Status::Ok);
        } else {
            self.packet.set_status(Status::BadParam);
        }
    }

    /// Begin transmitting the packet as a reply
    fn start_reply(&mut self) {
        self.de.set();
        self.crc.reset(CRC_INIT);
        self.crc.update(FEND);
        self.uart.write_byte(FEND);
        self.tx_state = TxState::Addr;
        self.stuffer.reset();
        self.uart.set_rx_irq(false);
        self.uart.set_tx_irq(true);
    }
}
