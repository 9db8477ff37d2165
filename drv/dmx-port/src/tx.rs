// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The transmit state machine.
//!
//! Output runs entirely off timer-1 deadlines: assert BREAK, hold it for the
//! configured break time, release it for the mark-after-break, then burst
//! the payload into the UART transmit FIFO and go idle until the next
//! period boundary. The burst is synchronous -- the FIFO is far too shallow
//! to hold a frame -- and runs at IRQ priority for up to
//! `send_data_length * 44 µs`. The period clamp in the timing configuration
//! guarantees the burst always finishes before the BREAK deadline it has
//! just scheduled.
//!
//! The next BREAK is scheduled from `break_start + period`, not `now +
//! period`, so the output rate does not accumulate handler latency.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::{CompareChannel, OutputTiming, PortHw, SLOTS};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum TxState {
    Idle = 0,
    Break,
    Mab,
}

impl TxState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Break,
            2 => Self::Mab,
            _ => Self::Idle,
        }
    }
}

/// This can be used in an array initializer, while `AtomicU8::new(0)`
/// cannot.
#[allow(clippy::declare_interior_mutable_const)]
const ATOMIC_ZERO_BYTE: AtomicU8 = AtomicU8::new(0);

pub(crate) struct TxMachine {
    state: AtomicU8,
    /// Timestamp of the most recent BREAK assertion; period deadlines and
    /// restart-after-direction-flip spacing are both measured from here.
    break_start: AtomicU32,
    /// The payload, slot 0 (start code) first. Byte-atomic because the
    /// foreground may rewrite it while the burst is reading it; DMX is a
    /// best-effort wire and a torn update costs at most one odd frame.
    payload: [AtomicU8; SLOTS],
}

impl TxMachine {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicU8::new(TxState::Idle as u8),
            break_start: AtomicU32::new(0),
            payload: [ATOMIC_ZERO_BYTE; SLOTS],
        }
    }

    pub(crate) fn state(&self) -> TxState {
        TxState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_idle(&self) {
        self.state.store(TxState::Idle as u8, Ordering::Relaxed);
    }

    fn set_state(&self, s: TxState) {
        self.state.store(s as u8, Ordering::Relaxed);
    }

    pub(crate) fn break_start(&self) -> u32 {
        self.break_start.load(Ordering::Relaxed)
    }

    /// Copies a new payload in, starting at slot 0.
    pub(crate) fn set_payload(&self, data: &[u8]) {
        for (slot, &byte) in self.payload.iter().zip(data) {
            slot.store(byte, Ordering::Relaxed);
        }
    }

    /// Zeroes the payload.
    pub(crate) fn clear_payload(&self) {
        for slot in &self.payload {
            slot.store(0, Ordering::Relaxed);
        }
    }

    /// Timer-1 deadline at IRQ priority: advances the BREAK, MAB, data
    /// cycle.
    pub(crate) fn handle_tick(
        &self,
        hw: &impl PortHw,
        now: u32,
        timing: &OutputTiming,
    ) {
        match self.state() {
            TxState::Idle => {
                hw.set_compare(
                    CompareChannel::C1,
                    now.wrapping_add(timing.break_time()),
                );
                hw.set_break(true);
                self.break_start.store(now, Ordering::Relaxed);
                self.set_state(TxState::Break);
            }
            TxState::Break => {
                hw.set_compare(
                    CompareChannel::C1,
                    now.wrapping_add(timing.mab_time()),
                );
                hw.set_break(false);
                self.set_state(TxState::Mab);
            }
            TxState::Mab => {
                // Schedule the next packet's BREAK first; the burst below
                // eats into this period but can never overrun it.
                hw.set_compare(
                    CompareChannel::C1,
                    self.break_start
                        .load(Ordering::Relaxed)
                        .wrapping_add(timing.period()),
                );

                let len = timing.send_data_length() as usize;
                for slot in &self.payload[..len.min(SLOTS)] {
                    let byte = slot.load(Ordering::Relaxed);
                    while !hw.try_tx_push(byte) {}
                }
                while hw.tx_busy() {}

                self.set_state(TxState::Idle);
            }
        }
    }
}
