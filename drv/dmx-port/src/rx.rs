// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The receive state machine.
//!
//! DMX has no in-band end-of-packet marker. A frame ends either at the
//! 512-slot ceiling or when the line goes quiet for longer than the gap the
//! sender has been using between slots -- which we only know by measuring it.
//! So every received slot re-arms a compare-channel deadline a little past
//! the measured gap; if the deadline fires and nothing else has arrived, the
//! watchdog publishes the short packet. Waiting for the next BREAK instead
//! would add up to a second of latency with senders that only transmit on
//! change.
//!
//! RDM rides the same wire. Requests and responses arrive behind a BREAK
//! with start code 0xCC and carry their own length field and checksum.
//! Discovery responses arrive with *no* BREAK -- just 0xFE preamble bytes on
//! an idle line -- and are collected by shape alone.
//!
//! Everything here runs in the UART receive interrupt, except
//! [`RxMachine::handle_watchdog`], which runs at timer (IRQ) priority. The
//! receive interrupt can preempt the watchdog; the watchdog's silence check
//! (no byte for longer than the measured gap) makes the window where both
//! touch the same frame unreachable in practice, and a lost race costs one
//! garbage frame on a wire that offers no delivery guarantee anyway.

use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU8, Ordering};

use crate::ring::{DmxFrame, FrameRing, RdmFrame, RDM_FRAME_SIZE};
use crate::{
    CompareChannel, Event, EventCounters, PortHw, RxWord, Totals,
    DMX_RING_DEPTH, RDM_RING_DEPTH, SLOT_GAP_MIN, UNIVERSE_SIZE,
    WATCHDOG_SLACK,
};

/// Receive-path states. `Disc*` states track an RDM discovery response,
/// which is the only traffic that arrives without a BREAK.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ReceiveState {
    Idle = 0,
    Break,
    DmxData,
    RdmData,
    ChecksumHigh,
    ChecksumLow,
    DiscPreamble,
    DiscEuid,
    DiscChecksum,
}

impl ReceiveState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Break,
            2 => Self::DmxData,
            3 => Self::RdmData,
            4 => Self::ChecksumHigh,
            5 => Self::ChecksumLow,
            6 => Self::DiscPreamble,
            7 => Self::DiscEuid,
            8 => Self::DiscChecksum,
            _ => Self::Idle,
        }
    }
}

/// Receive-path mutable state. Fields are written from the receive
/// interrupt unless noted; the atomics exist so the watchdog and the
/// foreground can observe them without tearing.
pub(crate) struct RxMachine {
    state: AtomicU8,
    /// Write index into the frame under construction (DMX slot array or RDM
    /// byte buffer). Slot 0 is the start code, so this starts at 1.
    index: AtomicU32,
    /// Running 16-bit RDM checksum accumulator. Seeded with the start code,
    /// incremented per data byte, decremented by the two wire checksum
    /// bytes; zero at the end means the sums matched.
    checksum: AtomicU16,
    /// Byte counter within the discovery EUID / encoded-checksum sections.
    disc_index: AtomicU8,
    /// Timestamp of the most recent receive event. The watchdog compares
    /// this against the deadline to distinguish "line went quiet" from "the
    /// deadline raced a late byte".
    last_event: AtomicU32,
    /// Timestamp of the receive event before that; slot-to-slot timing.
    prev_event: AtomicU32,
    /// Timestamp of the most recent BREAK.
    break_latest: AtomicU32,
    /// Timestamp of the BREAK that opened the previous DMX packet.
    break_previous: AtomicU32,
    /// Whether the previous BREAK turned out to open a DMX packet; the
    /// break-to-break statistic only spans consecutive DMX packets.
    previous_break_dmx: AtomicBool,
    /// Measured slot gap of the frame under construction, mirrored out of
    /// the frame statistics for the watchdog.
    slot_gap: AtomicU32,
    /// Time the last complete RDM frame was published. Foreground-readable;
    /// RDM response timing is measured from this.
    receive_end: AtomicU32,
}

impl RxMachine {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicU8::new(ReceiveState::Idle as u8),
            index: AtomicU32::new(0),
            checksum: AtomicU16::new(0),
            disc_index: AtomicU8::new(0),
            last_event: AtomicU32::new(0),
            prev_event: AtomicU32::new(0),
            break_latest: AtomicU32::new(0),
            break_previous: AtomicU32::new(0),
            previous_break_dmx: AtomicBool::new(false),
            slot_gap: AtomicU32::new(0),
            receive_end: AtomicU32::new(0),
        }
    }

    pub(crate) fn state(&self) -> ReceiveState {
        ReceiveState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, s: ReceiveState) {
        self.state.store(s as u8, Ordering::Relaxed);
    }

    pub(crate) fn rdm_receive_end(&self) -> u32 {
        self.receive_end.load(Ordering::Relaxed)
    }

    /// Forces the machine back to `Idle`, discarding any frame in flight.
    /// Called by the direction controller with receive events disabled.
    pub(crate) fn reset(&self) {
        self.set_state(ReceiveState::Idle);
        self.index.store(0, Ordering::Relaxed);
        self.previous_break_dmx.store(false, Ordering::Relaxed);
    }

    /// Processes one received word. `now` is the timestamp taken at
    /// interrupt entry.
    pub(crate) fn handle_word(
        &self,
        hw: &impl PortHw,
        word: RxWord,
        now: u32,
        dmx_ring: &FrameRing<DmxFrame, DMX_RING_DEPTH>,
        rdm_ring: &FrameRing<RdmFrame, RDM_RING_DEPTH>,
        totals: &Totals,
        events: &EventCounters,
    ) {
        self.last_event.store(now, Ordering::Relaxed);

        if word.is_break() {
            // A BREAK preempts whatever we were doing; any frame in flight
            // is abandoned where it lies.
            self.set_state(ReceiveState::Break);
            self.break_latest.store(now, Ordering::Relaxed);
        } else {
            self.handle_data(hw, word.byte, now, dmx_ring, rdm_ring, totals, events);
        }

        self.prev_event.store(now, Ordering::Relaxed);
    }

    fn handle_data(
        &self,
        hw: &impl PortHw,
        byte: u8,
        now: u32,
        dmx_ring: &FrameRing<DmxFrame, DMX_RING_DEPTH>,
        rdm_ring: &FrameRing<RdmFrame, RDM_RING_DEPTH>,
        totals: &Totals,
        events: &EventCounters,
    ) {
        match self.state() {
            ReceiveState::Idle => {
                // Discovery responses are the only unframed traffic; their
                // preamble byte on an otherwise idle line opens a capture.
                if byte == rdm_wire::DISC_PREAMBLE {
                    // Safety: receive-interrupt context is the RDM ring's
                    // producer.
                    let frame = unsafe { rdm_ring.head_slot_mut() };
                    frame.data[0] = rdm_wire::DISC_PREAMBLE;
                    self.index.store(1, Ordering::Relaxed);
                    self.set_state(ReceiveState::DiscPreamble);
                }
            }

            ReceiveState::Break => self.dispatch_start_code(byte, totals, events, dmx_ring, rdm_ring),

            ReceiveState::DmxData => {
                let gap = now
                    .wrapping_sub(self.prev_event.load(Ordering::Relaxed))
                    .max(SLOT_GAP_MIN);
                self.slot_gap.store(gap, Ordering::Relaxed);

                let index = self.index.load(Ordering::Relaxed) as usize;
                // Safety: receive-interrupt context is the DMX ring's
                // producer; the watchdog cannot run while we are here.
                let frame = unsafe { dmx_ring.head_slot_mut() };
                frame.stats.slot_to_slot = gap;
                frame.data[index] = byte;
                self.index.store(index as u32 + 1, Ordering::Relaxed);

                // End-of-packet detector: a hair more than one measured gap
                // of silence means the packet is over.
                hw.set_compare(
                    CompareChannel::C1,
                    now.wrapping_add(gap + WATCHDOG_SLACK),
                );

                if index >= UNIVERSE_SIZE {
                    frame.stats.slots_in_packet = UNIVERSE_SIZE as u32;
                    if !dmx_ring.publish() {
                        events.count(Event::DmxRingFull);
                    }
                    self.set_state(ReceiveState::Idle);
                }
            }

            ReceiveState::RdmData => {
                let index = self.index.load(Ordering::Relaxed) as usize;
                if index >= RDM_FRAME_SIZE {
                    events.count(Event::RdmOversize);
                    self.set_state(ReceiveState::Idle);
                    return;
                }
                // Safety: as above; single producer context.
                let frame = unsafe { rdm_ring.head_slot_mut() };
                frame.data[index] = byte;
                self.index.store(index as u32 + 1, Ordering::Relaxed);
                let sum = self.checksum.load(Ordering::Relaxed);
                self.checksum
                    .store(sum.wrapping_add(u16::from(byte)), Ordering::Relaxed);

                // The header's message-length field is the checksum offset.
                // It is trustworthy once it has actually been received
                // (index 2 stored, i.e. index counter past 2).
                let message_length =
                    frame.data[rdm_wire::MESSAGE_LENGTH_OFFSET];
                if index + 1 > rdm_wire::MESSAGE_LENGTH_OFFSET
                    && index as u32 + 1 == u32::from(message_length)
                {
                    self.set_state(ReceiveState::ChecksumHigh);
                }
            }

            ReceiveState::ChecksumHigh => {
                if self.append_rdm(rdm_ring, byte, events) {
                    let sum = self.checksum.load(Ordering::Relaxed);
                    self.checksum.store(
                        sum.wrapping_sub(u16::from(byte) << 8),
                        Ordering::Relaxed,
                    );
                    self.set_state(ReceiveState::ChecksumLow);
                }
            }

            ReceiveState::ChecksumLow => {
                if self.append_rdm(rdm_ring, byte, events) {
                    let sum = self
                        .checksum
                        .load(Ordering::Relaxed)
                        .wrapping_sub(u16::from(byte));
                    self.checksum.store(sum, Ordering::Relaxed);

                    // Safety: as above; single producer context.
                    let frame = unsafe { rdm_ring.head_slot_mut() };
                    let sub_start_code =
                        frame.data[rdm_wire::SUB_START_CODE_OFFSET];
                    if sum == 0 && sub_start_code == rdm_wire::SC_SUB_MESSAGE
                    {
                        frame.len = self.index.load(Ordering::Relaxed) as u16;
                        if rdm_ring.publish() {
                            self.receive_end.store(now, Ordering::Relaxed);
                        } else {
                            events.count(Event::RdmRingFull);
                        }
                    } else {
                        events.count(Event::RdmChecksumMismatch);
                    }
                    self.set_state(ReceiveState::Idle);
                }
            }

            ReceiveState::DiscPreamble => match byte {
                rdm_wire::DISC_PREAMBLE => {
                    let index = self.index.load(Ordering::Relaxed) as usize;
                    if index >= rdm_wire::DISC_PREAMBLE_MAX {
                        // More preamble than any responder sends; not a
                        // discovery response after all.
                        events.count(Event::DiscFraming);
                        self.set_state(ReceiveState::Idle);
                    } else {
                        // Safety: as above; single producer context.
                        let frame = unsafe { rdm_ring.head_slot_mut() };
                        frame.data[index] = rdm_wire::DISC_PREAMBLE;
                        self.index.store(index as u32 + 1, Ordering::Relaxed);
                    }
                }
                rdm_wire::DISC_SEPARATOR => {
                    let index = self.index.load(Ordering::Relaxed) as usize;
                    // Safety: as above; single producer context.
                    let frame = unsafe { rdm_ring.head_slot_mut() };
                    frame.data[index] = rdm_wire::DISC_SEPARATOR;
                    self.index.store(index as u32 + 1, Ordering::Relaxed);
                    self.disc_index.store(0, Ordering::Relaxed);
                    self.set_state(ReceiveState::DiscEuid);
                }
                _ => {
                    events.count(Event::DiscFraming);
                    self.set_state(ReceiveState::Idle);
                }
            },

            ReceiveState::DiscEuid => {
                if self.append_rdm(rdm_ring, byte, events) {
                    let n = self.disc_index.load(Ordering::Relaxed) + 1;
                    self.disc_index.store(n, Ordering::Relaxed);
                    if usize::from(n) == rdm_wire::DISC_EUID_SIZE {
                        self.disc_index.store(0, Ordering::Relaxed);
                        self.set_state(ReceiveState::DiscChecksum);
                    }
                }
            }

            ReceiveState::DiscChecksum => {
                if self.append_rdm(rdm_ring, byte, events) {
                    let n = self.disc_index.load(Ordering::Relaxed) + 1;
                    self.disc_index.store(n, Ordering::Relaxed);
                    if usize::from(n) == rdm_wire::DISC_CHECKSUM_SIZE {
                        // Safety: as above; single producer context.
                        let frame = unsafe { rdm_ring.head_slot_mut() };
                        frame.len = self.index.load(Ordering::Relaxed) as u16;
                        if rdm_ring.publish() {
                            self.receive_end.store(now, Ordering::Relaxed);
                        } else {
                            events.count(Event::RdmRingFull);
                        }
                        self.set_state(ReceiveState::Idle);
                    }
                }
            }
        }
    }

    /// Start-code dispatch, one byte after a BREAK. Packet totals count
    /// here -- at arrival, before the frame is known to be valid -- because
    /// the monitoring surfaces have always counted arrivals.
    fn dispatch_start_code(
        &self,
        byte: u8,
        totals: &Totals,
        events: &EventCounters,
        dmx_ring: &FrameRing<DmxFrame, DMX_RING_DEPTH>,
        rdm_ring: &FrameRing<RdmFrame, RDM_RING_DEPTH>,
    ) {
        match byte {
            crate::SC_DMX => {
                // Safety: receive-interrupt context is the DMX ring's
                // producer.
                let frame = unsafe { dmx_ring.head_slot_mut() };
                frame.data[0] = crate::SC_DMX;
                frame.stats.break_to_break = 0;
                self.index.store(1, Ordering::Relaxed);
                totals.count_dmx();

                let latest = self.break_latest.load(Ordering::Relaxed);
                if self.previous_break_dmx.load(Ordering::Relaxed) {
                    frame.stats.break_to_break = latest
                        .wrapping_sub(self.break_previous.load(Ordering::Relaxed));
                } else {
                    self.previous_break_dmx.store(true, Ordering::Relaxed);
                }
                self.break_previous.store(latest, Ordering::Relaxed);
                self.set_state(ReceiveState::DmxData);
            }
            rdm_wire::SC_RDM => {
                // Safety: as above; single producer context.
                let frame = unsafe { rdm_ring.head_slot_mut() };
                frame.data[0] = rdm_wire::SC_RDM;
                self.checksum
                    .store(u16::from(rdm_wire::SC_RDM), Ordering::Relaxed);
                self.index.store(1, Ordering::Relaxed);
                totals.count_rdm();
                self.previous_break_dmx.store(false, Ordering::Relaxed);
                self.set_state(ReceiveState::RdmData);
            }
            _ => {
                // Alternate start codes are dropped by design.
                events.count(Event::AlternateStartCode);
                self.previous_break_dmx.store(false, Ordering::Relaxed);
                self.set_state(ReceiveState::Idle);
            }
        }
    }

    /// Appends one byte to the RDM frame under construction, bouncing to
    /// `Idle` if the buffer is exhausted. Returns whether the byte landed.
    fn append_rdm(
        &self,
        rdm_ring: &FrameRing<RdmFrame, RDM_RING_DEPTH>,
        byte: u8,
        events: &EventCounters,
    ) -> bool {
        let index = self.index.load(Ordering::Relaxed) as usize;
        if index >= RDM_FRAME_SIZE {
            events.count(Event::RdmOversize);
            self.set_state(ReceiveState::Idle);
            return false;
        }
        // Safety: receive-interrupt context is the RDM ring's producer.
        let frame = unsafe { rdm_ring.head_slot_mut() };
        frame.data[index] = byte;
        self.index.store(index as u32 + 1, Ordering::Relaxed);
        true
    }

    /// Timer-1 deadline at IRQ priority: the end-of-packet detector armed
    /// after each DMX slot.
    pub(crate) fn handle_watchdog(
        &self,
        hw: &impl PortHw,
        now: u32,
        dmx_ring: &FrameRing<DmxFrame, DMX_RING_DEPTH>,
        events: &EventCounters,
    ) {
        if self.state() != ReceiveState::DmxData {
            return;
        }
        let gap = self.slot_gap.load(Ordering::Relaxed);
        let since_last = now.wrapping_sub(self.last_event.load(Ordering::Relaxed));
        if since_last > gap {
            // The line has actually been quiet for a full slot gap; the
            // packet is over.
            let index = self.index.load(Ordering::Relaxed);
            // Safety: state is DmxData and the wire is quiet, so the
            // receive interrupt is not mid-frame; we are the producer now.
            let frame = unsafe { dmx_ring.head_slot_mut() };
            frame.stats.slots_in_packet = index.saturating_sub(1);
            if !dmx_ring.publish() {
                events.count(Event::DmxRingFull);
            }
            self.set_state(ReceiveState::Idle);
        } else {
            // A byte beat the deadline; push it out another gap.
            hw.set_compare(CompareChannel::C1, now.wrapping_add(gap));
        }
    }
}
