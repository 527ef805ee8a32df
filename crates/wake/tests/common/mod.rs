// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared harness: a node over simulated collaborators with explicit
//! interrupt pacing

use wake::frame::{decode_frame, DecodedFrame};
use wake::module::Module;
use wake::node::{NvLayout, WakeNode};
use wake::sim::{SimDriverEnable, SimEeprom, SimUart, SimWatchdog};

pub type TestNode = WakeNode<SimUart, SimDriverEnable, SimEeprom, SimWatchdog>;

/// A node over fresh simulated collaborators (not yet initialised)
pub fn new_node() -> TestNode {
    WakeNode::new(
        SimUart::new(),
        SimDriverEnable::default(),
        SimEeprom::new(),
        SimWatchdog::default(),
        NvLayout::default(),
    )
}

/// Deliver raw wire bytes through the RX interrupt
pub fn feed(node: &mut TestNode, bytes: &[u8]) {
    node.uart_mut().push_rx(bytes);
    while node.uart_mut().rx_irq_enabled() && node.uart_mut().rx_pending() {
        node.rx_isr();
    }
}

/// One request/reply cycle: feed the frame, run the foreground loop,
/// pump the transmit interrupts, return the captured reply bytes
pub fn exchange(node: &mut TestNode, modules: &mut [&mut dyn Module], frame: &[u8]) -> Vec<u8> {
    node.uart_mut().clear_tx();
    feed(node, frame);
    node.poll(modules);
    if node.tx_active() || node.uart_mut().tx_irq_enabled() {
        while node.uart_mut().tx_irq_enabled() {
            node.tx_isr();
        }
        node.uart_mut().finish_tx();
        node.tx_isr();
    }
    node.uart_mut().tx().to_vec()
}

/// Decode a captured reply into its frame header and payload
pub fn parse_reply(bytes: &[u8]) -> (DecodedFrame, Vec<u8>) {
    let mut payload = [0u8; 64];
    let frame = decode_frame(bytes, &mut payload).expect("well-formed reply");
    (frame, payload[..frame.len].to_vec())
}
