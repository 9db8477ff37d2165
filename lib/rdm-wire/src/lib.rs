// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RDM (ANSI E1.20) wire-format types.
//!
//! RDM rides on the DMX512 line coding: a request or response is framed like
//! a DMX packet, but with start code 0xCC, and carries a fixed 24-byte header
//! followed by parameter data and a 16-bit additive checksum. Discovery
//! responses are the one exception -- they are sent without a BREAK, as a run
//! of 0xFE preamble bytes, a 0xAA separator, and a doubly-encoded UID and
//! checksum (see [`decode_discovery_response`]).
//!
//! This crate only describes the octets on the wire. It does not interpret
//! parameter IDs, and it does not know about timing; both belong to the
//! driver and to policy layers above it.

#![cfg_attr(not(test), no_std)]

use zerocopy::byteorder::big_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Start code for RDM messages, in slot 0 where DMX carries 0x00.
pub const SC_RDM: u8 = 0xCC;

/// Sub-start code for a standard RDM message (the only one E1.20 defines).
pub const SC_SUB_MESSAGE: u8 = 0x01;

/// Preamble byte of a discovery response. A responder may send up to seven of
/// these before the separator.
pub const DISC_PREAMBLE: u8 = 0xFE;

/// Preamble separator of a discovery response.
pub const DISC_SEPARATOR: u8 = 0xAA;

/// Maximum number of preamble bytes before the separator.
pub const DISC_PREAMBLE_MAX: usize = 7;

/// Size of a UID on the wire.
pub const UID_SIZE: usize = 6;

/// Number of bytes in an encoded UID (each UID byte is transmitted twice).
pub const DISC_EUID_SIZE: usize = 2 * UID_SIZE;

/// Number of bytes in an encoded discovery checksum (two bytes, each
/// transmitted twice).
pub const DISC_CHECKSUM_SIZE: usize = 4;

/// Command class constants from E1.20 table A-1, as they appear in the
/// `command_class` header field.
pub mod command_class {
    pub const DISCOVERY_COMMAND: u8 = 0x10;
    pub const DISCOVERY_COMMAND_RESPONSE: u8 = 0x11;
    pub const GET_COMMAND: u8 = 0x20;
    pub const GET_COMMAND_RESPONSE: u8 = 0x21;
    pub const SET_COMMAND: u8 = 0x30;
    pub const SET_COMMAND_RESPONSE: u8 = 0x31;
}

/// A 6-byte RDM device identifier: a 2-byte ESTA manufacturer ID followed by
/// a 4-byte device ID, both big-endian on the wire.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
#[repr(transparent)]
pub struct Uid(pub [u8; UID_SIZE]);

impl Uid {
    pub const SIZE: usize = UID_SIZE;

    /// The all-devices broadcast UID (FFFF:FFFFFFFF).
    pub const BROADCAST: Self = Self([0xFF; Self::SIZE]);

    pub const fn new(manufacturer: u16, device: u32) -> Self {
        let m = manufacturer.to_be_bytes();
        let d = device.to_be_bytes();
        Self([m[0], m[1], d[0], d[1], d[2], d[3]])
    }

    pub fn manufacturer(&self) -> u16 {
        u16::from_be_bytes([self.0[0], self.0[1]])
    }

    pub fn device(&self) -> u32 {
        u32::from_be_bytes([self.0[2], self.0[3], self.0[4], self.0[5]])
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

/// The fixed RDM message header, exactly as it appears on the wire starting
/// at slot 0. `message_length` counts every byte from `start_code` through
/// the end of the parameter data, i.e. everything except the two checksum
/// bytes; it is also the offset of the checksum.
#[derive(
    Copy,
    Clone,
    Debug,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
#[repr(C)]
pub struct MessageHeader {
    pub start_code: u8,
    pub sub_start_code: u8,
    pub message_length: u8,
    pub destination: Uid,
    pub source: Uid,
    pub transaction_number: u8,
    pub port_id: u8,
    pub message_count: u8,
    pub sub_device: U16,
    pub command_class: u8,
    pub parameter_id: U16,
    pub parameter_data_length: u8,
}

/// Size of [`MessageHeader`] on the wire.
pub const HEADER_SIZE: usize = core::mem::size_of::<MessageHeader>();

/// Offset of `sub_start_code` within a frame. A receiver needs this field
/// (and `message_length`, below) before a whole header exists.
pub const SUB_START_CODE_OFFSET: usize = 1;

/// Offset of `message_length` within a frame.
pub const MESSAGE_LENGTH_OFFSET: usize = 2;

/// Smallest legal `message_length`: a header with no parameter data.
pub const MESSAGE_LENGTH_MIN: u8 = HEADER_SIZE as u8;

/// Largest complete message, checksum included: a 231-byte parameter data
/// field is the E1.20 ceiling.
pub const MESSAGE_MAX: usize = HEADER_SIZE + 231 + 2;

impl MessageHeader {
    /// Borrows the header out of the front of a raw frame, if the frame is
    /// long enough to contain one.
    pub fn read_from(frame: &[u8]) -> Option<&Self> {
        Self::ref_from_prefix(frame).ok().map(|(header, _rest)| header)
    }
}

/// Computes the E1.20 additive checksum: the 16-bit wrapping sum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)))
}

/// Checks a complete frame (header + parameter data + 2 checksum bytes): the
/// sum of everything before the checksum must equal the big-endian checksum
/// field, and the length fields must be consistent.
pub fn verify(frame: &[u8]) -> bool {
    let Some(header) = MessageHeader::read_from(frame) else {
        return false;
    };
    let len = usize::from(header.message_length);
    if len < HEADER_SIZE || frame.len() != len + 2 {
        return false;
    }
    let wire = u16::from_be_bytes([frame[len], frame[len + 1]]);
    checksum(&frame[..len]) == wire
}

/// Encodes a discovery response the way a responder puts it on the wire:
/// seven preamble bytes, the separator, the UID with each byte sent twice
/// (OR 0xAA then OR 0x55), and the four encoded checksum bytes. The checksum
/// covers the twelve encoded UID bytes, not the raw UID.
pub fn encode_discovery_response(
    uid: Uid,
    out: &mut [u8; DISC_PREAMBLE_MAX
        + 1
        + DISC_EUID_SIZE
        + DISC_CHECKSUM_SIZE],
) {
    out[..DISC_PREAMBLE_MAX].fill(DISC_PREAMBLE);
    out[DISC_PREAMBLE_MAX] = DISC_SEPARATOR;

    let euid = &mut out[DISC_PREAMBLE_MAX + 1..][..DISC_EUID_SIZE];
    for (pair, &b) in euid.chunks_exact_mut(2).zip(uid.0.iter()) {
        pair[0] = b | 0xAA;
        pair[1] = b | 0x55;
    }
    let sum = checksum(euid);
    let [hi, lo] = sum.to_be_bytes();

    let ecs =
        &mut out[DISC_PREAMBLE_MAX + 1 + DISC_EUID_SIZE..][..DISC_CHECKSUM_SIZE];
    ecs[0] = hi | 0xAA;
    ecs[1] = hi | 0x55;
    ecs[2] = lo | 0xAA;
    ecs[3] = lo | 0x55;
}

/// Decodes a captured discovery response: zero to seven preamble bytes, the
/// separator, twelve encoded UID bytes, four encoded checksum bytes. Each
/// encoded pair is ANDed back together. Returns the UID only if the frame
/// has exactly that shape and the checksum matches.
pub fn decode_discovery_response(frame: &[u8]) -> Option<Uid> {
    let preamble = frame.iter().take_while(|&&b| b == DISC_PREAMBLE).count();
    if preamble > DISC_PREAMBLE_MAX {
        return None;
    }
    let rest = &frame[preamble..];
    if rest.len() != 1 + DISC_EUID_SIZE + DISC_CHECKSUM_SIZE
        || rest[0] != DISC_SEPARATOR
    {
        return None;
    }
    let euid = &rest[1..][..DISC_EUID_SIZE];
    let ecs = &rest[1 + DISC_EUID_SIZE..];

    let wire = u16::from_be_bytes([ecs[0] & ecs[1], ecs[2] & ecs[3]]);
    if checksum(euid) != wire {
        return None;
    }

    let mut uid = Uid([0; Uid::SIZE]);
    for (b, pair) in uid.0.iter_mut().zip(euid.chunks_exact(2)) {
        *b = pair[0] & pair[1];
    }
    Some(uid)
}

#[cfg(test)]
mod tests {
    use super::*;

    // A GET SUPPORTED_PARAMETERS request, built by hand from the E1.20
    // layout. No parameter data, so message_length is the header size.
    fn sample_request() -> [u8; HEADER_SIZE + 2] {
        let mut frame = [0u8; HEADER_SIZE + 2];
        frame[0] = SC_RDM;
        frame[1] = SC_SUB_MESSAGE;
        frame[2] = MESSAGE_LENGTH_MIN;
        frame[3..9].copy_from_slice(&Uid::new(0x0102, 0x03040506).0);
        frame[9..15].copy_from_slice(&Uid::new(0x7FF0, 0x11223344).0);
        frame[15] = 1; // transaction number
        frame[16] = 1; // port id
        frame[20] = command_class::GET_COMMAND;
        frame[21..23].copy_from_slice(&0x0050u16.to_be_bytes());
        let sum = checksum(&frame[..HEADER_SIZE]);
        frame[HEADER_SIZE..].copy_from_slice(&sum.to_be_bytes());
        frame
    }

    #[test]
    fn header_layout_is_24_bytes() {
        assert_eq!(HEADER_SIZE, 24);
    }

    #[test]
    fn header_fields_land_where_the_wire_puts_them() {
        let frame = sample_request();
        let header = MessageHeader::read_from(&frame).unwrap();
        assert_eq!(header.start_code, SC_RDM);
        assert_eq!(header.sub_start_code, SC_SUB_MESSAGE);
        assert_eq!(header.message_length, 24);
        assert_eq!(header.destination, Uid::new(0x0102, 0x03040506));
        assert_eq!(header.source, Uid::new(0x7FF0, 0x11223344));
        assert_eq!(header.command_class, command_class::GET_COMMAND);
        assert_eq!(header.parameter_id.get(), 0x0050);
        assert_eq!(header.parameter_data_length, 0);
    }

    #[test]
    fn header_needs_24_bytes() {
        let frame = sample_request();
        assert!(MessageHeader::read_from(&frame[..23]).is_none());
        assert!(MessageHeader::read_from(&frame[..24]).is_some());
    }

    #[test]
    fn verify_accepts_good_frame() {
        assert!(verify(&sample_request()));
    }

    #[test]
    fn verify_rejects_flipped_byte() {
        let mut frame = sample_request();
        frame[HEADER_SIZE + 1] ^= 0xFF;
        assert!(!verify(&frame));
    }

    #[test]
    fn verify_rejects_truncation() {
        let frame = sample_request();
        assert!(!verify(&frame[..frame.len() - 1]));
    }

    #[test]
    fn uid_halves() {
        let uid = Uid::new(0x7FF0, 0xDEADBEEF);
        assert_eq!(uid.manufacturer(), 0x7FF0);
        assert_eq!(uid.device(), 0xDEADBEEF);
        assert!(!uid.is_broadcast());
        assert!(Uid::BROADCAST.is_broadcast());
    }

    #[test]
    fn discovery_roundtrip() {
        let uid = Uid::new(0x02A0, 0x00000001);
        let mut wire = [0u8; 24];
        encode_discovery_response(uid, &mut wire);
        assert_eq!(decode_discovery_response(&wire), Some(uid));
    }

    #[test]
    fn discovery_tolerates_eaten_preamble() {
        // A controller may join the line mid-preamble and capture anywhere
        // from zero to seven 0xFE bytes.
        let uid = Uid::new(0x02A0, 0x12345678);
        let mut wire = [0u8; 24];
        encode_discovery_response(uid, &mut wire);
        for eaten in 0..=DISC_PREAMBLE_MAX {
            assert_eq!(
                decode_discovery_response(&wire[eaten..]),
                Some(uid),
                "failed with {eaten} preamble bytes eaten"
            );
        }
    }

    #[test]
    fn discovery_rejects_corrupt_euid() {
        let uid = Uid::new(0x02A0, 0x00000001);
        let mut wire = [0u8; 24];
        encode_discovery_response(uid, &mut wire);
        wire[10] ^= 0x01;
        assert_eq!(decode_discovery_response(&wire), None);
    }

    #[test]
    fn discovery_rejects_missing_separator() {
        let uid = Uid::new(0x02A0, 0x00000001);
        let mut wire = [0u8; 24];
        encode_discovery_response(uid, &mut wire);
        wire[DISC_PREAMBLE_MAX] = 0xFD;
        assert_eq!(decode_discovery_response(&wire), None);
    }
}
