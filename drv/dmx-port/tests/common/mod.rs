// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A scripted stand-in for the port hardware.
//!
//! `FakePort` plays the role the SoC plays in production: it owns the
//! microsecond clock, the two compare channels, the UART FIFOs, and the
//! direction pin, and it records everything the driver does to them. Tests
//! place words "on the wire" at chosen timestamps with [`feed`], which also
//! delivers any compare-channel deadline that would have fired first, so
//! the end-of-packet watchdog behaves just as it does on hardware.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use drv_dmx_port::{
    CompareChannel, Dmx, PortDirection, PortHw, ReceiveState, RxWord,
};

pub struct FakePort {
    /// The microsecond counter.
    now: Cell<u32>,
    /// How far the counter creeps forward per read. Zero for exact-time
    /// tests; set to 1 by tests that need the driver's bounded spins to
    /// see time passing.
    pub creep: Cell<u32>,
    compare: [Cell<Option<u32>>; 2],
    rx_queue: RefCell<VecDeque<RxWord>>,
    pub tx_bytes: RefCell<Vec<u8>>,
    /// (timestamp, asserted) for every BREAK edge the driver drives.
    pub break_edges: RefCell<Vec<(u32, bool)>>,
    pub break_on: Cell<bool>,
    pub direction: Cell<PortDirection>,
    pub rx_enabled: Cell<bool>,
}

impl FakePort {
    pub fn new() -> Self {
        Self {
            now: Cell::new(0),
            creep: Cell::new(0),
            compare: [Cell::new(None), Cell::new(None)],
            rx_queue: RefCell::new(VecDeque::new()),
            tx_bytes: RefCell::new(Vec::new()),
            break_edges: RefCell::new(Vec::new()),
            break_on: Cell::new(false),
            direction: Cell::new(PortDirection::Input),
            rx_enabled: Cell::new(false),
        }
    }

    fn channel_index(ch: CompareChannel) -> usize {
        match ch {
            CompareChannel::C1 => 0,
            CompareChannel::C3 => 1,
        }
    }

    pub fn set_now(&self, t: u32) {
        self.now.set(t);
    }

    pub fn compare_deadline(&self, ch: CompareChannel) -> Option<u32> {
        self.compare[Self::channel_index(ch)].get()
    }

    pub fn clear_compare(&self, ch: CompareChannel) {
        self.compare[Self::channel_index(ch)].set(None);
    }

    pub fn push_word(&self, word: RxWord) {
        self.rx_queue.borrow_mut().push_back(word);
    }
}

impl PortHw for FakePort {
    fn now(&self) -> u32 {
        let t = self.now.get();
        self.now.set(t.wrapping_add(self.creep.get()));
        t
    }

    fn set_compare(&self, ch: CompareChannel, deadline: u32) {
        self.compare[Self::channel_index(ch)].set(Some(deadline));
    }

    fn rx_pop(&self) -> Option<RxWord> {
        self.rx_queue.borrow_mut().pop_front()
    }

    fn try_tx_push(&self, byte: u8) -> bool {
        self.tx_bytes.borrow_mut().push(byte);
        true
    }

    fn tx_busy(&self) -> bool {
        false
    }

    fn set_break(&self, on: bool) {
        self.break_on.set(on);
        self.break_edges.borrow_mut().push((self.now.get(), on));
    }

    fn set_rx_event_enable(&self, on: bool) {
        self.rx_enabled.set(on);
    }

    fn set_direction_pin(&self, dir: PortDirection) {
        self.direction.set(dir);
    }
}

/// Delivers one word from the wire at time `at`, first firing any timer-1
/// deadline that comes due earlier (the hardware would have interrupted for
/// it first).
pub fn feed(dmx: &Dmx, hw: &FakePort, at: u32, word: RxWord) {
    while let Some(deadline) = hw.compare_deadline(CompareChannel::C1) {
        if deadline >= at {
            break;
        }
        hw.clear_compare(CompareChannel::C1);
        hw.set_now(deadline);
        dmx.handle_timer(hw, CompareChannel::C1);
    }
    hw.set_now(at);
    hw.push_word(word);
    dmx.handle_rx_event(hw);
}

/// Lets the line go quiet: fires pending timer-1 deadlines until the
/// receive machine settles in `Idle` (or nothing is armed).
pub fn run_line_idle(dmx: &Dmx, hw: &FakePort) {
    for _ in 0..64 {
        let Some(deadline) = hw.compare_deadline(CompareChannel::C1) else {
            break;
        };
        hw.clear_compare(CompareChannel::C1);
        hw.set_now(deadline);
        dmx.handle_timer(hw, CompareChannel::C1);
        if dmx.receive_state() == ReceiveState::Idle
            && hw.compare_deadline(CompareChannel::C1).is_none()
        {
            break;
        }
    }
}

/// Puts a whole DMX packet on the wire: BREAK at `start`, then the given
/// slots (start code first) spaced `spacing` µs apart, then silence.
/// Returns the timestamp just after the last slot.
pub fn feed_dmx_packet(
    dmx: &Dmx,
    hw: &FakePort,
    start: u32,
    slots: &[u8],
    spacing: u32,
) -> u32 {
    feed(dmx, hw, start, RxWord::brk());
    let mut t = start + 100; // BREAK + mark-after-break on the wire
    for &slot in slots {
        feed(dmx, hw, t, RxWord::data(slot));
        t += spacing;
    }
    run_line_idle(dmx, hw);
    t
}

/// Puts an RDM burst on the wire behind a BREAK.
pub fn feed_rdm_packet(
    dmx: &Dmx,
    hw: &FakePort,
    start: u32,
    bytes: &[u8],
) -> u32 {
    feed(dmx, hw, start, RxWord::brk());
    let mut t = start + 100;
    for &b in bytes {
        feed(dmx, hw, t, RxWord::data(b));
        t += 44;
    }
    t
}

/// Initializes a driver/fake pair in input mode with data enabled.
pub fn receiving_port() -> (Dmx, FakePort) {
    let dmx = Dmx::new();
    let hw = FakePort::new();
    dmx.init(&hw);
    dmx.set_direction(&hw, PortDirection::Input, true);
    assert!(hw.rx_enabled.get());
    (dmx, hw)
}

/// Builds a minimal valid RDM GET request: 24-byte header, no parameter
/// data, correct checksum. 26 bytes total.
pub fn sample_rdm_request() -> Vec<u8> {
    let mut frame = vec![0u8; rdm_wire::HEADER_SIZE + 2];
    frame[0] = rdm_wire::SC_RDM;
    frame[1] = rdm_wire::SC_SUB_MESSAGE;
    frame[2] = rdm_wire::HEADER_SIZE as u8;
    frame[3..9].copy_from_slice(&rdm_wire::Uid::new(0x0102, 0x03040506).0);
    frame[9..15].copy_from_slice(&rdm_wire::Uid::new(0x7FF0, 0x11223344).0);
    frame[20] = rdm_wire::command_class::GET_COMMAND;
    frame[21..23].copy_from_slice(&0x0020u16.to_be_bytes());
    let sum = rdm_wire::checksum(&frame[..rdm_wire::HEADER_SIZE]);
    frame[rdm_wire::HEADER_SIZE..].copy_from_slice(&sum.to_be_bytes());
    frame
}
