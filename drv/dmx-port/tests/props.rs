// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire-level properties checked over generated traffic.

mod common;

use common::*;
use drv_dmx_port::RxWord;
use proptest::prelude::*;

/// One burst on the wire: a BREAK, a start code, some slots.
#[derive(Debug, Clone)]
enum Burst {
    Dmx(Vec<u8>),
    /// Alternate start code plus payload; must never publish.
    Other(u8, Vec<u8>),
}

fn burst() -> impl Strategy<Value = Burst> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 1..24).prop_map(Burst::Dmx),
        // Start codes and payloads kept clear of 0x00/0xCC/0xFE/0xAA so
        // the junk can't accidentally spell DMX, RDM, or discovery traffic.
        (0x01u8..0x7F, prop::collection::vec(0x01u8..0x7F, 0..16))
            .prop_map(|(sc, payload)| Burst::Other(sc, payload)),
    ]
}

proptest! {
    /// Published DMX frames are exactly the well-formed 0x00-start-code
    /// bursts, in wire order; everything else vanishes.
    #[test]
    fn published_frames_mirror_wellformed_bursts(
        bursts in prop::collection::vec(burst(), 1..12),
    ) {
        let (dmx, hw) = receiving_port();
        let mut start = 10_000u32;
        let mut expected = Vec::new();
        let mut published = Vec::new();

        for b in &bursts {
            let wire: Vec<u8> = match b {
                Burst::Dmx(slots) => {
                    expected.push(slots.clone());
                    std::iter::once(0x00).chain(slots.iter().copied()).collect()
                }
                Burst::Other(sc, payload) => std::iter::once(*sc)
                    .chain(payload.iter().copied())
                    .collect(),
            };
            feed_dmx_packet(&dmx, &hw, start, &wire, 48);
            // Consume as we go so ring depth can't censor the comparison.
            while let Some(frame) = dmx.take_frame(|f| {
                f.data[1..=f.stats.slots_in_packet as usize].to_vec()
            }) {
                published.push(frame);
            }
            start += 10_000;
        }

        prop_assert_eq!(published, expected);
    }

    /// No frame ever reports a slot-to-slot gap under the physical floor,
    /// however late the receive interrupt ran. Gaps stay under the
    /// end-of-packet window so the stream reads as one packet.
    #[test]
    fn slot_gap_never_reports_below_physical(
        gaps in prop::collection::vec(1u32..56, 1..40),
    ) {
        let (dmx, hw) = receiving_port();
        feed(&dmx, &hw, 1_000, RxWord::brk());
        feed(&dmx, &hw, 1_100, RxWord::data(0x00));
        let mut t = 1_100;
        for (i, gap) in gaps.iter().enumerate() {
            t += gap;
            feed(&dmx, &hw, t, RxWord::data(i as u8));
        }
        run_line_idle(&dmx, &hw);

        let stats = dmx.take_frame(|f| f.stats).expect("frame");
        prop_assert!(stats.slot_to_slot >= 44);
        prop_assert_eq!(stats.slots_in_packet as usize, gaps.len());
    }

    /// An RDM frame is published exactly when its 16-bit sum checks out
    /// and its sub-start-code is 0x01.
    #[test]
    fn rdm_publishes_iff_sum_and_sub_start_code_hold(
        pd in prop::collection::vec(any::<u8>(), 0..40),
        good_sub in any::<bool>(),
        good_sum in any::<bool>(),
    ) {
        let mut frame = vec![0u8; rdm_wire::HEADER_SIZE];
        frame[0] = rdm_wire::SC_RDM;
        frame[1] = if good_sub { rdm_wire::SC_SUB_MESSAGE } else { 0x02 };
        frame[2] = (rdm_wire::HEADER_SIZE + pd.len()) as u8;
        frame[23] = pd.len() as u8;
        frame.extend_from_slice(&pd);
        let sum = rdm_wire::checksum(&frame);
        frame.extend_from_slice(&sum.to_be_bytes());
        if !good_sum {
            let last = frame.len() - 1;
            frame[last] ^= 0xFF;
        }

        let (dmx, hw) = receiving_port();
        feed_rdm_packet(&dmx, &hw, 2_000, &frame);

        let taken = dmx.take_rdm_frame(|b| b.to_vec());
        if good_sub && good_sum {
            prop_assert_eq!(taken.as_deref(), Some(&frame[..]));
        } else {
            prop_assert_eq!(taken, None);
        }
        // Arrival counting is unconditional either way.
        prop_assert_eq!(dmx.total_packet_counts().rdm_packets, 1);
    }
}
