// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver for a DMX512/RDM port on a small ARM SoC.
//!
//! One UART and one transceiver direction pin carry both directions of the
//! DMX512 wire (250 kbaud, 8N2, packets framed by a BREAK and a
//! mark-after-break), plus the RDM dialect that rides on it. Reception runs
//! off the UART receive interrupt -- a fast interrupt on the target, for
//! timing's sake -- together with a timer-compare deadline that detects
//! end-of-packet silence. Transmission runs entirely off timer-compare
//! deadlines. The two paths never run concurrently: the direction
//! controller fully quiesces one before starting the other.
//!
//! The driver is hardware-agnostic behind the [`PortHw`] trait, which
//! captures the handful of primitives it needs: a free-running microsecond
//! counter with compare channels, UART FIFO access and BREAK control, the
//! receive-event gate, and the direction pin. The platform wires the real
//! interrupt trampolines to [`Dmx::handle_rx_event`] and
//! [`Dmx::handle_timer`]; tests drive the same entry points with a fake.
//!
//! Completed frames land in two single-producer single-consumer rings (one
//! DMX, one RDM) that the foreground drains with [`Dmx::take_frame`],
//! [`Dmx::take_rdm_frame`], and the change-detection shortcut
//! [`Dmx::take_frame_if_changed`]. Nothing here allocates, and nothing
//! blocks outside the two bounded waits called out on
//! [`Dmx::set_direction`].

#![cfg_attr(not(test), no_std)]

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use static_assertions::{const_assert, const_assert_eq};

pub mod ring;
mod rx;
mod tx;

pub use ring::{DmxFrame, FrameStats, RdmFrame, RDM_FRAME_SIZE};
pub use rx::ReceiveState;

use ring::FrameRing;
use rx::RxMachine;
use tx::{TxMachine, TxState};

/// Slots in a DMX frame buffer: the start code plus one full universe.
pub const SLOTS: usize = 513;

/// Channel slots in a full universe, start code excluded.
pub const UNIVERSE_SIZE: usize = 512;

/// Start code of a standard DMX packet. (RDM's is `rdm_wire::SC_RDM`.)
pub const SC_DMX: u8 = 0x00;

/// Time one slot occupies on the wire: 11 bits at 250 kbaud.
pub const SLOT_TIME: u32 = 44;

/// Floor for measured slot-to-slot gaps; see [`FrameStats::slot_to_slot`].
pub const SLOT_GAP_MIN: u32 = 44;

/// Slack added to the measured slot gap when arming the end-of-packet
/// deadline. Absorbs sender jitter without ever shrinking the window below
/// one slot time.
pub const WATCHDOG_SLACK: u32 = 12;

/// Minimum BREAK duration the transmitter will be configured for, µs.
pub const BREAK_TIME_MIN: u32 = 92;

/// Minimum mark-after-break the transmitter will be configured for, µs.
pub const MAB_TIME_MIN: u32 = 12;

/// Minimum BREAK-to-BREAK output period, µs.
pub const BREAK_TO_BREAK_MIN: u32 = 1204;

/// Depth of the DMX frame ring.
pub const DMX_RING_DEPTH: usize = 4;

/// Depth of the RDM frame ring.
pub const RDM_RING_DEPTH: usize = 8;

const_assert!(DMX_RING_DEPTH.is_power_of_two());
const_assert!(RDM_RING_DEPTH.is_power_of_two());
const_assert_eq!(SLOTS, UNIVERSE_SIZE + 1);
const_assert!(RDM_FRAME_SIZE >= rdm_wire::MESSAGE_MAX);

bitflags::bitflags! {
    /// Receive status delivered with each UART word, laid out like the
    /// PL011 receive-data register's error bits.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct RxFlags: u16 {
        const FRAMING_ERROR = 1 << 8;
        const PARITY_ERROR = 1 << 9;
        const BREAK = 1 << 10;
        const OVERRUN = 1 << 11;
    }
}

/// One word out of the UART receive FIFO: the data byte and its status.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RxWord {
    pub byte: u8,
    pub flags: RxFlags,
}

impl RxWord {
    pub const fn data(byte: u8) -> Self {
        Self {
            byte,
            flags: RxFlags::empty(),
        }
    }

    pub const fn brk() -> Self {
        Self {
            byte: 0,
            flags: RxFlags::BREAK,
        }
    }

    pub fn is_break(&self) -> bool {
        self.flags.contains(RxFlags::BREAK)
    }
}

/// Compare channels of the free-running system timer this driver may arm.
/// (On BCM2835-class parts, channels 0 and 2 belong to the firmware.)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompareChannel {
    /// Receive end-of-packet deadline, or transmit pacing, depending on
    /// direction.
    C1,
    /// Once-per-second statistics tick.
    C3,
}

/// Which way the transceiver is facing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PortDirection {
    Input = 0,
    Output = 1,
}

/// The hardware primitives the driver runs on. One implementation wraps
/// the real SoC registers; tests substitute a scripted fake.
///
/// All methods must be callable from interrupt context; none may block
/// (the driver does its own bounded FIFO waits around `try_tx_push` and
/// `tx_busy`).
pub trait PortHw {
    /// Reads the free-running microsecond counter. Wraps at 2³².
    fn now(&self) -> u32;

    /// Arms a timer compare channel to match at `deadline`.
    fn set_compare(&self, ch: CompareChannel, deadline: u32);

    /// Pops one word from the UART receive FIFO, if any.
    fn rx_pop(&self) -> Option<RxWord>;

    /// Tries to push one byte into the UART transmit FIFO; `false` means
    /// the FIFO is full.
    fn try_tx_push(&self, byte: u8) -> bool;

    /// Whether the UART is still shifting bits out.
    fn tx_busy(&self) -> bool;

    /// Asserts (`true`) or releases (`false`) the line BREAK condition.
    fn set_break(&self, on: bool);

    /// Gates delivery of receive events to [`Dmx::handle_rx_event`]. On
    /// the target this enables or disables the UART fast interrupt.
    fn set_rx_event_enable(&self, on: bool);

    /// Drives the transceiver direction pin.
    fn set_direction_pin(&self, dir: PortDirection);
}

/// Data memory barrier: issued at interrupt handler entry/exit and around
/// foreground reads of shared state. A full fence stands in on the host.
fn barrier() {
    #[cfg(target_os = "none")]
    cortex_m::asm::dmb();
    #[cfg(not(target_os = "none"))]
    core::sync::atomic::fence(Ordering::SeqCst);
}

/// What a timer compare channel is currently bound to. The timer trampoline
/// dispatches on this instead of on function pointers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
enum TimerRole {
    Unbound = 0,
    TxTick,
    RxWatchdog,
    ThroughputTick,
}

impl TimerRole {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::TxTick,
            2 => Self::RxWatchdog,
            3 => Self::ThroughputTick,
            _ => Self::Unbound,
        }
    }
}

/// Output timing configuration. Written by the foreground, read at IRQ
/// priority by the transmit machine.
pub(crate) struct OutputTiming {
    break_time: AtomicU32,
    mab_time: AtomicU32,
    /// Effective period, always long enough to fit a whole packet.
    period: AtomicU32,
    /// What the caller actually asked for; re-clamped whenever the packet
    /// length changes.
    period_requested: AtomicU32,
    send_data_length: AtomicU32,
}

impl OutputTiming {
    const fn new() -> Self {
        Self {
            break_time: AtomicU32::new(BREAK_TIME_MIN),
            mab_time: AtomicU32::new(MAB_TIME_MIN),
            // Matches the clamp for a full universe at minimum framing.
            period: AtomicU32::new(
                BREAK_TIME_MIN
                    + MAB_TIME_MIN
                    + SLOTS as u32 * SLOT_TIME
                    + SLOT_TIME,
            ),
            period_requested: AtomicU32::new(0),
            send_data_length: AtomicU32::new(SLOTS as u32),
        }
    }

    pub(crate) fn break_time(&self) -> u32 {
        self.break_time.load(Ordering::Relaxed)
    }

    pub(crate) fn mab_time(&self) -> u32 {
        self.mab_time.load(Ordering::Relaxed)
    }

    pub(crate) fn period(&self) -> u32 {
        self.period.load(Ordering::Relaxed)
    }

    pub(crate) fn send_data_length(&self) -> u32 {
        self.send_data_length.load(Ordering::Relaxed)
    }

    fn set_break_time(&self, us: u32) {
        self.break_time
            .store(us.max(BREAK_TIME_MIN), Ordering::Relaxed);
        self.recompute_period();
    }

    fn set_mab_time(&self, us: u32) {
        self.mab_time.store(us.max(MAB_TIME_MIN), Ordering::Relaxed);
        self.recompute_period();
    }

    fn set_period(&self, us: u32) {
        self.period_requested.store(us, Ordering::Relaxed);
        self.recompute_period();
    }

    fn set_send_data_length(&self, len: u32) {
        self.send_data_length.store(len, Ordering::Relaxed);
        self.recompute_period();
    }

    /// Re-derives the effective period. A request shorter than the packet
    /// itself (or of zero, meaning "as fast as allowed") becomes the packet
    /// length plus one slot time, floored at the DMX minimum -- the bus can
    /// never be oversubscribed.
    fn recompute_period(&self) {
        let packet = self.break_time() + self.mab_time()
            + self.send_data_length() * SLOT_TIME;
        let requested = self.period_requested.load(Ordering::Relaxed);
        let effective = if requested != 0 && requested >= packet {
            requested
        } else {
            (packet + SLOT_TIME).max(BREAK_TO_BREAK_MIN)
        };
        self.period.store(effective, Ordering::Relaxed);
    }
}

/// Total packet arrivals since the last reset.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PacketCounts {
    pub dmx_packets: u32,
    pub rdm_packets: u32,
}

pub(crate) struct Totals {
    dmx: AtomicU32,
    rdm: AtomicU32,
}

impl Totals {
    const fn new() -> Self {
        Self {
            dmx: AtomicU32::new(0),
            rdm: AtomicU32::new(0),
        }
    }

    pub(crate) fn count_dmx(&self) {
        self.dmx.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_rdm(&self) {
        self.rdm.fetch_add(1, Ordering::Relaxed);
    }

    fn dmx(&self) -> u32 {
        self.dmx.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> PacketCounts {
        PacketCounts {
            dmx_packets: self.dmx.load(Ordering::Relaxed),
            rdm_packets: self.rdm.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.dmx.store(0, Ordering::Relaxed);
        self.rdm.store(0, Ordering::Relaxed);
    }
}

/// Conditions the datapath handles silently, counted for diagnosis. DMX is
/// best-effort; none of these surface as errors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A completed DMX frame was dropped because the ring was full.
    DmxRingFull,
    /// A completed RDM frame was dropped because the ring was full.
    RdmRingFull,
    /// A packet with an alternate start code was discarded.
    AlternateStartCode,
    /// An RDM frame failed its checksum or sub-start-code check.
    RdmChecksumMismatch,
    /// An RDM frame overran the frame buffer.
    RdmOversize,
    /// A discovery-response capture hit an unexpected byte.
    DiscFraming,
    /// `set_direction` gave up waiting for the transmitter to go idle.
    TxStopTimeout,
}

const EVENT_KINDS: usize = 7;

/// This can be used in an array initializer, while `AtomicU32::new(0)`
/// cannot.
#[allow(clippy::declare_interior_mutable_const)]
const ATOMIC_ZERO: AtomicU32 = AtomicU32::new(0);

pub(crate) struct EventCounters {
    counts: [AtomicU32; EVENT_KINDS],
}

impl EventCounters {
    const fn new() -> Self {
        Self {
            counts: [ATOMIC_ZERO; EVENT_KINDS],
        }
    }

    pub(crate) fn count(&self, event: Event) {
        self.counts[event as usize].fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self, event: Event) -> u32 {
        self.counts[event as usize].load(Ordering::Relaxed)
    }

    fn reset(&self) {
        for c in &self.counts {
            c.store(0, Ordering::Relaxed);
        }
    }
}

/// A snapshot of the silent-condition counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub dmx_ring_full: u32,
    pub rdm_ring_full: u32,
    pub alternate_start_code: u32,
    pub rdm_checksum_mismatch: u32,
    pub rdm_oversize: u32,
    pub disc_framing: u32,
    pub tx_stop_timeout: u32,
}

/// Change-detection snapshot for [`Dmx::take_frame_if_changed`].
/// Foreground-owned; nothing at interrupt priority touches it.
struct ChangeDetector {
    last_slots: AtomicU32,
    snapshot: UnsafeCell<[u8; SLOTS]>,
}

/// Safety: `snapshot` is only accessed from the foreground, which is a
/// single context.
unsafe impl Sync for ChangeDetector {}

impl ChangeDetector {
    const fn new() -> Self {
        Self {
            last_slots: AtomicU32::new(0),
            snapshot: UnsafeCell::new([0; SLOTS]),
        }
    }

    /// Records `frame` and reports whether it differs from the previous
    /// observation -- either a different slot count, or any byte changed.
    fn observe(&self, frame: &DmxFrame) -> bool {
        // Safety: foreground-only, per the struct contract.
        let snapshot = unsafe { &mut *self.snapshot.get() };
        if frame.stats.slots_in_packet != self.last_slots.load(Ordering::Relaxed)
        {
            self.last_slots
                .store(frame.stats.slots_in_packet, Ordering::Relaxed);
            snapshot.copy_from_slice(&frame.data);
            return true;
        }
        if snapshot[..] != frame.data[..] {
            snapshot.copy_from_slice(&frame.data);
            return true;
        }
        false
    }

    fn reset(&self) {
        self.last_slots.store(0, Ordering::Relaxed);
        // Safety: foreground-only, per the struct contract.
        unsafe { &mut *self.snapshot.get() }.fill(0);
    }
}

/// Driver control block for one DMX port. Designed to live in a `static`:
///
/// ```ignore
/// static PORT: Dmx = Dmx::new();
/// ```
///
/// The platform calls [`Dmx::handle_rx_event`] from the UART receive
/// interrupt and [`Dmx::handle_timer`] from the timer interrupt; everything
/// else is foreground API.
pub struct Dmx {
    rx: RxMachine,
    tx: TxMachine,
    dmx_ring: FrameRing<DmxFrame, DMX_RING_DEPTH>,
    rdm_ring: FrameRing<RdmFrame, RDM_RING_DEPTH>,
    timing: OutputTiming,
    totals: Totals,
    events: EventCounters,
    /// DMX packets admitted during the last whole second.
    updates_per_second: AtomicU32,
    /// Totals snapshot the 1 Hz tick diffs against.
    packets_snapshot: AtomicU32,
    direction: AtomicU8,
    data_enabled: AtomicBool,
    /// Whether the transmit machine owns timer-1 (`dmx_send_always` of
    /// old): `set_direction` must wait out a packet in flight before
    /// rebinding.
    sending: AtomicBool,
    timer1_role: AtomicU8,
    timer3_role: AtomicU8,
    changes: ChangeDetector,
}

impl Dmx {
    pub const fn new() -> Self {
        Self {
            rx: RxMachine::new(),
            tx: TxMachine::new(),
            dmx_ring: FrameRing::new([DmxFrame::EMPTY; DMX_RING_DEPTH]),
            rdm_ring: FrameRing::new([RdmFrame::EMPTY; RDM_RING_DEPTH]),
            timing: OutputTiming::new(),
            totals: Totals::new(),
            events: EventCounters::new(),
            updates_per_second: AtomicU32::new(0),
            packets_snapshot: AtomicU32::new(0),
            direction: AtomicU8::new(PortDirection::Input as u8),
            data_enabled: AtomicBool::new(false),
            sending: AtomicBool::new(false),
            timer1_role: AtomicU8::new(TimerRole::Unbound as u8),
            timer3_role: AtomicU8::new(TimerRole::Unbound as u8),
            changes: ChangeDetector::new(),
        }
    }

    /// Resets the driver and points the transceiver inward: direction
    /// input, data disabled, buffers and statistics zeroed.
    ///
    /// Call once, before the interrupt trampolines are wired up. (The UART
    /// itself -- baud rate, 8N2 framing, FIFO setup -- is the platform's to
    /// configure.)
    pub fn init(&self, hw: &impl PortHw) {
        self.timer1_role
            .store(TimerRole::Unbound as u8, Ordering::Relaxed);
        self.timer3_role
            .store(TimerRole::Unbound as u8, Ordering::Relaxed);
        hw.set_rx_event_enable(false);

        self.rx.reset();
        self.tx.set_idle();
        self.tx.clear_payload();
        // Safety: no interrupts are wired yet, per this function's
        // contract; both rings are quiescent.
        unsafe {
            for frame in self.dmx_ring.slots_mut() {
                *frame = DmxFrame::EMPTY;
            }
            self.dmx_ring.reset();
            for frame in self.rdm_ring.slots_mut() {
                *frame = RdmFrame::EMPTY;
            }
            self.rdm_ring.reset();
        }
        self.totals.reset();
        self.events.reset();
        self.changes.reset();
        self.updates_per_second.store(0, Ordering::Relaxed);
        self.packets_snapshot.store(0, Ordering::Relaxed);

        hw.set_direction_pin(PortDirection::Input);
        self.direction
            .store(PortDirection::Input as u8, Ordering::Relaxed);
        self.data_enabled.store(false, Ordering::Relaxed);
        barrier();
    }

    // --- interrupt entry points ---

    /// UART receive event, called from the fast-interrupt trampoline.
    /// Drains the receive FIFO through the receive state machine.
    pub fn handle_rx_event(&self, hw: &impl PortHw) {
        barrier();
        let now = hw.now();
        while let Some(word) = hw.rx_pop() {
            self.rx.handle_word(
                hw,
                word,
                now,
                &self.dmx_ring,
                &self.rdm_ring,
                &self.totals,
                &self.events,
            );
        }
        barrier();
    }

    /// Timer compare match, called from the timer interrupt trampoline with
    /// the channel that fired.
    pub fn handle_timer(&self, hw: &impl PortHw, ch: CompareChannel) {
        let role = match ch {
            CompareChannel::C1 => &self.timer1_role,
            CompareChannel::C3 => &self.timer3_role,
        };
        let now = hw.now();
        match TimerRole::from_u8(role.load(Ordering::Relaxed)) {
            TimerRole::TxTick => self.tx.handle_tick(hw, now, &self.timing),
            TimerRole::RxWatchdog => {
                self.rx.handle_watchdog(hw, now, &self.dmx_ring, &self.events)
            }
            TimerRole::ThroughputTick => self.throughput_tick(hw, now),
            TimerRole::Unbound => (),
        }
    }

    /// The 1 Hz tick: diffs the DMX arrival total against last second's.
    fn throughput_tick(&self, hw: &impl PortHw, now: u32) {
        hw.set_compare(CompareChannel::C3, now.wrapping_add(1_000_000));
        let total = self.totals.dmx();
        let previous = self.packets_snapshot.load(Ordering::Relaxed);
        self.updates_per_second
            .store(total.wrapping_sub(previous), Ordering::Relaxed);
        self.packets_snapshot.store(total, Ordering::Relaxed);
    }

    // --- direction control ---

    /// Points the transceiver `dir`-ward and, if `enable_data`, starts the
    /// matching state machine.
    ///
    /// Always quiesces the previous mode first: an output packet in flight
    /// is allowed to finish (bounded by one output period -- the one place
    /// the foreground blocks), receive events are gated off, and any
    /// partially received frame is discarded.
    pub fn set_direction(
        &self,
        hw: &impl PortHw,
        dir: PortDirection,
        enable_data: bool,
    ) {
        self.stop(hw);
        hw.set_direction_pin(dir);
        self.direction.store(dir as u8, Ordering::Relaxed);
        if enable_data {
            self.start(hw);
        }
        self.data_enabled.store(enable_data, Ordering::Relaxed);
    }

    fn stop(&self, hw: &impl PortHw) {
        if self.sending.load(Ordering::Relaxed) {
            // Let the packet in flight finish; a stuck transmitter forfeits
            // after one period and we proceed regardless.
            let t0 = hw.now();
            loop {
                barrier();
                if self.tx.state() == TxState::Idle {
                    break;
                }
                if hw.now().wrapping_sub(t0) >= self.timing.period() {
                    self.events.count(Event::TxStopTimeout);
                    break;
                }
            }
            self.sending.store(false, Ordering::Relaxed);
            self.timer1_role
                .store(TimerRole::Unbound as u8, Ordering::Relaxed);
        }

        hw.set_rx_event_enable(false);
        barrier();
        self.timer1_role
            .store(TimerRole::Unbound as u8, Ordering::Relaxed);
        self.rx.reset();

        // Scrub per-frame slot counts so a stale count can't masquerade as
        // fresh data after the flip.
        //
        // Safety: transmit is idle and unbound, receive events are gated
        // off; nothing else can touch the ring until `start`.
        unsafe {
            for frame in self.dmx_ring.slots_mut() {
                frame.stats.slots_in_packet = 0;
            }
        }
        barrier();
    }

    fn start(&self, hw: &impl PortHw) {
        match self.direction() {
            PortDirection::Output => {
                self.tx.set_idle();
                self.sending.store(true, Ordering::Relaxed);
                barrier();
                self.timer1_role
                    .store(TimerRole::TxTick as u8, Ordering::Relaxed);

                // Space the first BREAK at least one period from the last
                // one, so back-to-back direction flips can't shorten the
                // bus idle time.
                let now = hw.now();
                let period = self.timing.period();
                let since_break = now.wrapping_sub(self.tx.break_start());
                let deadline = if since_break > period {
                    now.wrapping_add(4)
                } else {
                    self.tx.break_start().wrapping_add(period + 4)
                };
                hw.set_compare(CompareChannel::C1, deadline);
                barrier();
            }
            PortDirection::Input => {
                barrier();
                self.timer1_role
                    .store(TimerRole::RxWatchdog as u8, Ordering::Relaxed);
                self.timer3_role
                    .store(TimerRole::ThroughputTick as u8, Ordering::Relaxed);
                hw.set_compare(
                    CompareChannel::C3,
                    hw.now().wrapping_add(1_000_000),
                );
                barrier();
                hw.set_rx_event_enable(true);
            }
        }
    }

    // --- output configuration ---

    /// Sets the transmitted BREAK duration, floored at the DMX minimum of
    /// 92 µs.
    pub fn set_output_break_time(&self, us: u32) {
        self.timing.set_break_time(us);
    }

    /// Sets the transmitted mark-after-break, floored at the DMX minimum
    /// of 12 µs.
    pub fn set_output_mab_time(&self, us: u32) {
        self.timing.set_mab_time(us);
    }

    /// Requests a BREAK-to-BREAK output period. Zero means "as fast as the
    /// packet allows"; any request shorter than the packet itself is
    /// stretched to fit (see [`Dmx::output_period`] for the result).
    pub fn set_output_period(&self, us: u32) {
        self.timing.set_period(us);
    }

    /// Replaces the transmitted payload, starting with the start code at
    /// slot 0, and adjusts the packet length to match. Truncates input
    /// beyond a full universe; an empty slice is ignored.
    ///
    /// May be called while output is running; the update is not atomic
    /// with respect to a burst in progress.
    pub fn set_send_data(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let len = data.len().min(SLOTS);
        self.tx.set_payload(&data[..len]);
        self.timing.set_send_data_length(len as u32);
    }

    pub fn output_break_time(&self) -> u32 {
        self.timing.break_time()
    }

    pub fn output_mab_time(&self) -> u32 {
        self.timing.mab_time()
    }

    /// The effective BREAK-to-BREAK period: the requested one if it fits a
    /// whole packet, otherwise `max(1204, break + mab + 44·len + 44)`.
    pub fn output_period(&self) -> u32 {
        self.timing.period()
    }

    pub fn send_data_length(&self) -> u32 {
        self.timing.send_data_length()
    }

    // --- frame consumers ---

    /// Takes the oldest completed DMX frame, if any, lending it to `body`.
    pub fn take_frame<R>(&self, body: impl FnOnce(&DmxFrame) -> R) -> Option<R> {
        barrier();
        self.dmx_ring.take(body)
    }

    /// Takes the oldest completed RDM frame, if any, lending its wire bytes
    /// to `body`.
    pub fn take_rdm_frame<R>(
        &self,
        body: impl FnOnce(&[u8]) -> R,
    ) -> Option<R> {
        barrier();
        self.rdm_ring.take(|frame| body(frame.bytes()))
    }

    /// Takes the oldest completed DMX frame and lends it to `body` only if
    /// it differs from the last frame observed through this method -- a
    /// different slot count, or any changed byte. The frame is consumed
    /// either way.
    pub fn take_frame_if_changed<R>(
        &self,
        body: impl FnOnce(&DmxFrame) -> R,
    ) -> Option<R> {
        barrier();
        self.dmx_ring
            .take(|frame| {
                if self.changes.observe(frame) {
                    Some(body(frame))
                } else {
                    None
                }
            })
            .flatten()
    }

    // --- statistics and introspection ---

    pub fn total_packet_counts(&self) -> PacketCounts {
        barrier();
        self.totals.snapshot()
    }

    pub fn reset_packet_counts(&self) {
        self.totals.reset();
        self.packets_snapshot.store(0, Ordering::Relaxed);
    }

    /// DMX packets that arrived during the last whole second, updated once
    /// per second while receiving.
    pub fn updates_per_second(&self) -> u32 {
        barrier();
        self.updates_per_second.load(Ordering::Relaxed)
    }

    /// Timestamp of the most recent completed RDM frame, zero before the
    /// first. RDM response-timeout decisions are measured from this.
    pub fn rdm_receive_end(&self) -> u32 {
        barrier();
        self.rx.rdm_receive_end()
    }

    pub fn direction(&self) -> PortDirection {
        if self.direction.load(Ordering::Relaxed) == PortDirection::Output as u8
        {
            PortDirection::Output
        } else {
            PortDirection::Input
        }
    }

    /// Current receive-path state, for the monitor surfaces.
    pub fn receive_state(&self) -> ReceiveState {
        barrier();
        self.rx.state()
    }

    /// Snapshot of the silently handled conditions since the last reset.
    pub fn event_counts(&self) -> EventCounts {
        barrier();
        EventCounts {
            dmx_ring_full: self.events.get(Event::DmxRingFull),
            rdm_ring_full: self.events.get(Event::RdmRingFull),
            alternate_start_code: self.events.get(Event::AlternateStartCode),
            rdm_checksum_mismatch: self
                .events
                .get(Event::RdmChecksumMismatch),
            rdm_oversize: self.events.get(Event::RdmOversize),
            disc_framing: self.events.get(Event::DiscFraming),
            tx_stop_timeout: self.events.get(Event::TxStopTimeout),
        }
    }

    pub fn reset_event_counts(&self) {
        self.events.reset();
    }

    /// Zeroes every DMX frame buffer and the transmit payload. Only legal
    /// while data is disabled; calls while enabled are ignored.
    pub fn clear_data(&self) {
        if self.data_enabled.load(Ordering::Relaxed) {
            return;
        }
        // Safety: data is disabled, so neither interrupt path is running;
        // the foreground is the only context touching the rings.
        unsafe {
            for frame in self.dmx_ring.slots_mut() {
                *frame = DmxFrame::EMPTY;
            }
            self.dmx_ring.reset();
        }
        self.tx.clear_payload();
        self.changes.reset();
    }
}

impl Default for Dmx {
    fn default() -> Self {
        Self::new()
    }
}
