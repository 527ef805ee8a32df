// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The bootloader engine: blocking Wake framing at address 112 plus the
//! flash programming discipline

use log::debug;

use wake::crc::Crc8Bitwise;
use wake::frame::{DecodeEvent, Destuffer, CRC_INIT, FEND, FESC, TFEND, TFESC};
use wake::hal::{DriverEnable, Uart};
use wake::packet::{Packet, Status, BOOT_ADDR, BOOT_MAX_PAYLOAD};

use crate::memory::{AppEntry, BootMemory, McuId, MemoryMap, Region};

/// Handshake byte the host sends right after reset
pub const BOOTSTART_KEY: u8 = 0x5A;

/// Handshake answer opening command mode
pub const BOOTRESPONSE: u8 = 0xAB;

/// Key expected by `GetInfo`
pub const BOOTLOADER_KEY: u8 = 0xA5;

/// Key expected by `Go`, big-endian on the wire
pub const GO_KEY: [u8; 4] = [0x34, 0xB8, 0x12, 0x6E];

/// Bootloader version reported by `GetInfo`
pub const BOOT_VERSION: u8 = 0x01;

/// Largest chunk `Read` returns at once
const READ_CHUNK: u8 = 128;

/// Plausible first opcodes of a programmed application image
const APP_OPCODES: [u8; 2] = [0x82, 0xAC];

const C_NOP: u8 = 0;
const C_ERR: u8 = 1;
const C_ECHO: u8 = 2;
const C_GET_INFO: u8 = 3;
const C_SET_POSITION: u8 = 12;
const C_READ: u8 = 13;
const C_WRITE: u8 = 14;
const C_GO: u8 = 15;

enum RxState {
    WaitFend,
    Addr,
    Cmd,
    Nbt,
    Data,
}

/// The bootloader: one request/reply cycle at a time, blocking
pub struct Bootloader<U, D, M, J>
where
    U: Uart,
    D: DriverEnable,
    M: BootMemory,
    J: AppEntry,
{
    uart: U,
    de: D,
    mem: M,
    app: J,
    map: MemoryMap,
    mcu_id: McuId,
    packet: Packet<BOOT_MAX_PAYLOAD>,
    crc: Crc8Bitwise,
    destuffer: Destuffer,
    mem_ptr: u16,
    region: Region,
}

impl<U, D, M, J> Bootloader<U, D, M, J>
where
    U: Uart,
    D: DriverEnable,
    M: BootMemory,
    J: AppEntry,
{
    /// Create a bootloader over its collaborators
    pub fn new(uart: U, de: D, mem: M, app: J, map: MemoryMap, mcu_id: McuId) -> Self {
        Self {
            uart,
            de,
            mem,
            app,
            map,
            mcu_id,
            packet: Packet::new(),
            crc: Crc8Bitwise::new(CRC_INIT),
            destuffer: Destuffer::new(),
            mem_ptr: map.app_start,
            region: Region::Flash,
        }
    }

    /// Unlock the arrays and release the line
    pub fn init(&mut self) {
        self.mem.unlock();
        self.de.clear();
    }

    /// Reset entry: handshake or chain-jump, then the command loop
    pub fn start(&mut self) -> ! {
        self.init();
        if !self.try_handshake() {
            self.try_start_app();
        }
        // No handshake and no valid application: stay in command mode
        self.run()
    }

    /// Serve commands forever
    pub fn run(&mut self) -> ! {
        loop {
            self.serve();
        }
    }

    /// The UART collaborator
    pub fn uart_mut(&mut self) -> &mut U {
        &mut self.uart
    }

    /// The memory collaborator
    pub fn memory(&self) -> &M {
        &self.mem
    }

    /// The memory collaborator, mutable
    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.mem
    }

    /// The chain-jump collaborator
    pub fn app_entry(&self) -> &J {
        &self.app
    }

    /// Answer a pending [`BOOTSTART_KEY`] byte; true opens command mode
    pub fn try_handshake(&mut self) -> bool {
        if self.uart.is_rx_not_empty() && self.uart.read_byte() == BOOTSTART_KEY {
            debug!("bootloader handshake");
            self.de.set();
            self.putch(BOOTRESPONSE);
            while !self.uart.is_tx_complete() {}
            self.uart.clear_tx_complete();
            self.de.clear();
            return true;
        }
        false
    }

    /// Lock the arrays and jump to the application if its image looks
    /// programmed; false when no plausible image is present
    pub fn try_start_app(&mut self) -> bool {
        let first = self.mem.read(self.map.app_start);
        if APP_OPCODES.contains(&first) {
            debug!("starting application");
            self.mem.lock();
            self.app.jump();
            return true;
        }
        false
    }

    /// Receive one packet and answer it
    pub fn serve(&mut self) {
        match self.receive() {
            C_NOP | C_ERR => return,
            C_ECHO => {}
            C_GET_INFO => self.cmd_get_info(),
            C_SET_POSITION => self.cmd_set_position(),
            C_READ => self.cmd_read(),
            C_WRITE => self.cmd_write(),
            C_GO => {
                if !self.cmd_go() {
                    return;
                }
            }
            _ => {
                self.packet.buf[0] = Status::NotImplemented as u8;
                self.packet.cmd = C_ERR;
                self.packet.n = 1;
            }
        }
        self.transmit();
    }

    fn getch(&mut self) -> u8 {
        while !self.uart.is_rx_not_empty() {}
        self.uart.read_byte()
    }

    fn putch(&mut self, byte: u8) {
        while !self.uart.is_tx_empty() {}
        self.uart.write_byte(byte);
    }

    fn send_stuffed(&mut self, byte: u8) {
        match byte {
            FEND => {
                self.putch(FESC);
                self.putch(TFEND);
            }
            FESC => {
                self.putch(FESC);
                self.putch(TFESC);
            }
            b => self.putch(b),
        }
    }

    /// Block until a frame addressed to [`BOOT_ADDR`] lands; returns its
    /// command
    fn receive(&mut self) -> u8 {
        let mut state = RxState::WaitFend;
        let mut ptr = 0usize;
        self.destuffer.reset();
        loop {
            let raw = self.getch();
            if self.uart.has_rx_error() {
                state = RxState::WaitFend;
                continue;
            }
            let byte = match self.destuffer.feed(raw) {
                DecodeEvent::FrameStart => {
                    self.crc.reset(CRC_INIT);
                    self.crc.update(FEND);
                    state = RxState::Addr;
                    continue;
                }
                DecodeEvent::Held => continue,
                DecodeEvent::BadEscape => {
                    state = RxState::WaitFend;
                    continue;
                }
                DecodeEvent::Byte(b) => b,
            };
            match state {
                RxState::WaitFend => {}
                RxState::Addr => {
                    // Only the bootloader's own address opens a frame;
                    // broadcast is not honoured here. The full wire byte
                    // goes into the checksum.
                    if byte == BOOT_ADDR | 0x80 {
                        self.crc.update(byte);
                        state = RxState::Cmd;
                    } else {
                        state = RxState::WaitFend;
                    }
                }
                RxState::Cmd => {
                    if byte & 0x80 != 0 {
                        state = RxState::WaitFend;
                        continue;
                    }
                    self.packet.cmd = byte;
                    self.crc.update(byte);
                    state = RxState::Nbt;
                }
                RxState::Nbt => {
                    if byte as usize > BOOT_MAX_PAYLOAD {
                        state = RxState::WaitFend;
                        continue;
                    }
                    self.packet.n = byte;
                    self.crc.update(byte);
                    ptr = 0;
                    state = RxState::Data;
                }
                RxState::Data => {
                    if ptr < self.packet.n as usize {
                        self.packet.buf[ptr] = byte;
                        ptr += 1;
                        self.crc.update(byte);
                        continue;
                    }
                    if byte == self.crc.value() {
                        return self.packet.cmd;
                    }
                    state = RxState::WaitFend;
                }
            }
        }
    }

    /// Push the packet out as a reply, spinning on the UART
    fn transmit(&mut self) {
        self.de.set();
        self.crc.reset(CRC_INIT);
        self.crc.update(FEND);
        self.putch(FEND);

        let addr = BOOT_ADDR | 0x80;
        self.crc.update(addr);
        self.send_stuffed(addr);

        let cmd = self.packet.cmd & 0x7F;
        self.crc.update(cmd);
        self.send_stuffed(cmd);

        let n = self.packet.n;
        self.crc.update(n);
        self.send_stuffed(n);

        for i in 0..n as usize {
            let b = self.packet.buf[i];
            self.crc.update(b);
            self.send_stuffed(b);
        }
        let crc = self.crc.value();
        self.send_stuffed(crc);

        while !self.uart.is_tx_complete() {}
        self.uart.clear_tx_complete();
        self.uart.discard_rx();
        self.de.clear();
    }

    fn cmd_get_info(&mut self) {
        if self.packet.n == 1 && self.packet.buf[0] == BOOTLOADER_KEY {
            self.packet.buf[0] = Status::Ok as u8;
            self.packet.buf[1] = (self.mcu_id as u8) << 4 | BOOT_VERSION;
            self.packet.buf[2] = self.map.blocks_offset();
            self.packet.n = 3;
        } else {
            self.packet.set_status(Status::BadParam);
        }
    }

    fn cmd_set_position(&mut self) {
        if self.packet.n != 2 {
            self.packet.set_status(Status::BadParam);
            return;
        }
        let raw = u16::from_le_bytes([self.packet.buf[0], self.packet.buf[1]]);
        let (region, target) = if raw & 0x8000 == 0 {
            (Region::Flash, self.map.app_start.checked_add(raw))
        } else {
            (Region::Eeprom, self.map.eeprom_start.checked_add(raw & 0x7FFF))
        };
        let end = match region {
            Region::Flash => self.map.flash_end,
            Region::Eeprom => self.map.eeprom_end,
        };
        match target {
            Some(addr) if addr < end => {
                self.region = region;
                self.mem_ptr = addr;
                self.packet.buf[0] = Status::Ok as u8;
                self.packet.buf[1..3].copy_from_slice(&addr.to_le_bytes());
                self.packet.n = 3;
            }
            _ => {
                self.packet.set_status(Status::BadAddress);
            }
        }
    }

    fn cmd_read(&mut self) {
        if self.packet.n != 1 || self.packet.buf[0] > READ_CHUNK {
            self.packet.set_status(Status::BadParam);
            return;
        }
        let (end, start) = match self.region {
            Region::Flash => (self.map.flash_end, self.map.app_start),
            Region::Eeprom => (self.map.eeprom_end, self.map.eeprom_start),
        };
        // Clamp at the region end
        let mut len = u16::from(self.packet.buf[0]);
        if u32::from(self.mem_ptr) + u32::from(len) > u32::from(end) {
            len = end - self.mem_ptr;
        }
        for i in 0..len as usize {
            self.packet.buf[3 + i] = self.mem.read(self.mem_ptr);
            self.mem_ptr += 1;
        }
        self.packet.buf[0] = Status::Ok as u8;
        let offset = self.mem_ptr - start;
        self.packet.buf[1..3].copy_from_slice(&offset.to_le_bytes());
        self.packet.n = len as u8 + 3;
    }

    fn cmd_write(&mut self) {
        if !self.mem.is_unlocked() {
            self.packet.set_status(Status::EepromLocked);
            return;
        }
        let block = self.mcu_id.block_size();
        let total = self.packet.n as usize;
        let mut i = 0usize;

        // Leading bytes up to word alignment
        while self.mem_ptr % 4 != 0 && i < total {
            self.mem.program_byte(self.mem_ptr, self.packet.buf[i]);
            self.mem.wait_ready();
            self.mem_ptr += 1;
            i += 1;
        }
        // Leading words up to block alignment
        while self.mem_ptr as usize % block != 0 && total - i >= 4 {
            let mut word = [0u8; 4];
            word.copy_from_slice(&self.packet.buf[i..i + 4]);
            self.mem.program_word(self.mem_ptr, word);
            self.mem.wait_ready();
            self.mem_ptr += 4;
            i += 4;
        }
        // Whole blocks
        while total - i >= block {
            self.mem.program_block(self.mem_ptr, &self.packet.buf[i..i + block]);
            self.mem.wait_ready();
            self.mem_ptr += block as u16;
            i += block;
        }
        // Trailing words
        while total - i >= 4 {
            let mut word = [0u8; 4];
            word.copy_from_slice(&self.packet.buf[i..i + 4]);
            self.mem.program_word(self.mem_ptr, word);
            self.mem.wait_ready();
            self.mem_ptr += 4;
            i += 4;
        }
        // Trailing bytes
        while i < total {
            self.mem.program_byte(self.mem_ptr, self.packet.buf[i]);
            self.mem.wait_ready();
            self.mem_ptr += 1;
            i += 1;
        }
        self.packet.set_status(Status::Ok);
    }

    /// Returns true when a reply should be sent
    fn cmd_go(&mut self) -> bool {
        if self.packet.n == 4 && self.packet.buf[..4] == GO_KEY {
            if self.try_start_app() {
                // On hardware the jump does not return
                return false;
            }
            self.packet.set_status(Status::NotReady);
        } else {
            self.packet.set_status(Status::BadParam);
        }
        true
    }
}
