//! End-to-end decode tests: segmented transport reassembly through a
//! session, plus the anomaly-handling paths of the body decoders.

use std::sync::Arc;

use dissect_core::prelude::*;
use dissect_core::{AnomalyKind, FragmentOutcome, IpduMapping, ReassemblyEngine};

fn can_ctx(frame_number: u64) -> UnitContext {
    UnitContext::new(Medium::Can, 0x7e0, frame_number)
}

fn flow_key() -> FlowKey {
    FlowKey {
        medium: Medium::Can,
        flow_id: 0x7e0,
        subaddress: None,
    }
}

/// Two fragments, declared total 20, arriving in order.
#[test]
fn two_fragment_message_in_order() {
    let mut session = Session::default();

    let mut ff = vec![0x10, 20];
    ff.extend_from_slice(&[0xaa; 14]);
    let units = session.process_unit(&can_ctx(1), &ff).unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].payload, Payload::None);
    assert_eq!(session.open_flows(), 1);

    let mut cf = vec![0x21];
    cf.extend_from_slice(&[0xbb; 6]);
    let units = session.process_unit(&can_ctx(2), &cf).unwrap();
    match &units[0].payload {
        Payload::Reassembled { data, fragment_frames } => {
            assert_eq!(data.len(), 20);
            assert_eq!(&data[..14], &[0xaa; 14]);
            assert_eq!(&data[14..], &[0xbb; 6]);
            assert_eq!(fragment_frames, &[1, 2]);
        }
        other => panic!("expected reassembled payload, got {other:?}"),
    }
    assert_eq!(session.open_flows(), 0);
    assert_eq!(session.reassembly_stats().flows_completed, 1);
}

/// The same fragments in reverse order produce the identical message.
#[test]
fn fragments_reordered_within_window() {
    let mut engine = ReassemblyEngine::default();
    let key = flow_key();

    assert_eq!(engine.start(key, 20, &[0xaa; 14], 1), FragmentOutcome::Accepted);
    // Fragment 2 lands before fragment 1
    assert_eq!(engine.add_fragment(key, 2, &[0xcc; 3], 2), FragmentOutcome::Accepted);
    match engine.add_fragment(key, 1, &[0xbb; 3], 3) {
        FragmentOutcome::Completed(msg) => {
            assert_eq!(msg.data.len(), 20);
            assert_eq!(&msg.data[..14], &[0xaa; 14]);
            assert_eq!(&msg.data[14..17], &[0xbb; 3]);
            assert_eq!(&msg.data[17..20], &[0xcc; 3]);
            assert_eq!(msg.fragment_frames, vec![1, 3, 2]);
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

/// A fragment 9 positions beyond the expected sequence kills the flow for
/// good: later fragments, correct or not, never produce output.
#[test]
fn jump_beyond_window_is_terminal() {
    let mut engine = ReassemblyEngine::default();
    let key = flow_key();

    engine.start(key, 100, &[0x01; 6], 1);
    assert_eq!(
        engine.add_fragment(key, 10, &[0x02; 7], 2),
        FragmentOutcome::SequenceError { expected: 1, got: 10 }
    );
    assert!(engine.is_errored(&key));

    // The in-sequence fragment arrives late: still discarded
    assert_eq!(engine.add_fragment(key, 1, &[0x03; 7], 3), FragmentOutcome::Discarded);
    for seq in 2..=14 {
        assert_eq!(
            engine.add_fragment(key, seq, &[0x04; 7], 3 + seq),
            FragmentOutcome::Discarded
        );
    }
    assert_eq!(engine.stats().flows_completed, 0);
}

/// A fresh first fragment reopens an errored flow as a new message.
#[test]
fn errored_flow_recovers_on_new_first_fragment() {
    let mut session = Session::default();

    let mut ff = vec![0x10, 20];
    ff.extend_from_slice(&[0x00; 6]);
    session.process_unit(&can_ctx(1), &ff).unwrap();

    // Sequence nibble 10 against expected 1: outside the window
    let mut cf = vec![0x2b];
    cf.extend_from_slice(&[0x00; 7]);
    let units = session.process_unit(&can_ctx(2), &cf).unwrap();
    assert_eq!(
        units[0].anomalies_of(AnomalyKind::ReassemblySequenceError).count(),
        1
    );

    // New message on the same flow id decodes normally
    let mut ff = vec![0x10, 10];
    ff.extend_from_slice(&[0x11; 6]);
    session.process_unit(&can_ctx(3), &ff).unwrap();
    let mut cf = vec![0x21];
    cf.extend_from_slice(&[0x22; 4]);
    let units = session.process_unit(&can_ctx(4), &cf).unwrap();
    assert!(matches!(&units[0].payload, Payload::Reassembled { data, .. } if data.len() == 10));
}

/// Inconsistent section lengths clip with exactly one anomaly.
#[test]
fn kv_inconsistent_lengths_clip() {
    let mut session = Session::default();

    // GET request: extras 4, key 3, total body 5 (4 + 3 > 5)
    let mut data = vec![
        0x80, 0x00, 0x00, 0x03, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    data.extend_from_slice(&[1, 2, 3, 4, b'k']);

    let ctx = UnitContext::new(Medium::Stream, 1, 1);
    let units = session.process_unit(&ctx, &data).unwrap();
    let unit = &units[0];
    assert_eq!(unit.anomalies_of(AnomalyKind::LengthInconsistency).count(), 1);
    // Key clipped to the one byte left after extras
    assert_eq!(unit.get("extras"), Some(&FieldValue::Bytes(&[1, 2, 3, 4])));
    assert_eq!(unit.get("key"), Some(&FieldValue::Str("k")));
}

/// An oversized container entry is skipped; its siblings still decode.
#[test]
fn container_entry_overrun_skipped() {
    let config = IpduConfig::new()
        .with_mapping(0x42, IpduMapping::new(0, 8, 1))
        .with_mapping(0x42, IpduMapping::new(8, 64, 2))
        .with_mapping(0x42, IpduMapping::new(16, 8, 3));
    let mut session = Session::new(SessionConfig::default(), Arc::new(config));

    let ctx = UnitContext::new(Medium::PduTransport, 0x42, 1);
    let units = session.process_unit(&ctx, &[0x0a, 0x0b, 0x0c]).unwrap();
    let unit = &units[0];
    assert_eq!(unit.anomalies_of(AnomalyKind::LengthInconsistency).count(), 1);
    assert_eq!(unit.get("pdu_count"), Some(&FieldValue::UInt32(2)));
}

/// An unknown opcode decodes with visible header fields and one anomaly.
#[test]
fn kv_unknown_opcode_still_decodes() {
    let mut session = Session::default();

    let data = [
        0x80, 0xee, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x12, 0x34,
        0x56, 0x78, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    let ctx = UnitContext::new(Medium::Stream, 1, 1);
    let units = session.process_unit(&ctx, &data).unwrap();
    let unit = &units[0];
    assert_eq!(unit.anomalies_of(AnomalyKind::UnknownEnumValue).count(), 1);
    assert_eq!(unit.get("opcode"), Some(&FieldValue::UInt8(0xee)));
    assert_eq!(unit.get("opaque"), Some(&FieldValue::UInt32(0x78563412)));
}

/// Flows on different ids never share fragments.
#[test]
fn flows_are_isolated_per_id() {
    let mut session = Session::default();

    let mut ff = vec![0x10, 10];
    ff.extend_from_slice(&[0xaa; 6]);
    session.process_unit(&UnitContext::new(Medium::Can, 0x100, 1), &ff).unwrap();

    let mut ff = vec![0x10, 12];
    ff.extend_from_slice(&[0xbb; 6]);
    session.process_unit(&UnitContext::new(Medium::Can, 0x200, 2), &ff).unwrap();
    assert_eq!(session.open_flows(), 2);

    let mut cf = vec![0x21];
    cf.extend_from_slice(&[0xcc; 4]);
    let units = session
        .process_unit(&UnitContext::new(Medium::Can, 0x100, 3), &cf)
        .unwrap();
    match &units[0].payload {
        Payload::Reassembled { data, .. } => {
            assert_eq!(data.len(), 10);
            assert_eq!(&data[..6], &[0xaa; 6]);
        }
        other => panic!("expected reassembly on flow 0x100, got {other:?}"),
    }
    assert_eq!(session.open_flows(), 1);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any arrival order of up to 9 fragments (all within the default
        /// reorder window) reassembles to the original message.
        #[test]
        fn order_independent_within_window(
            message in proptest::collection::vec(any::<u8>(), 8..60),
            order in Just((0..8usize).collect::<Vec<_>>()).prop_shuffle(),
        ) {
            let mut engine = ReassemblyEngine::default();
            let key = flow_key();

            let first = &message[..6.min(message.len())];
            let rest: Vec<&[u8]> = message[first.len()..].chunks(7).collect();
            prop_assume!(rest.len() >= 2 && rest.len() <= 8);

            engine.start(key, message.len(), first, 0);

            let mut completed = None;
            for (pos, &i) in order.iter().filter(|&&i| i < rest.len()).enumerate() {
                match engine.add_fragment(key, (i + 1) as u64, rest[i], pos as u64 + 1) {
                    FragmentOutcome::Completed(msg) => completed = Some(msg),
                    FragmentOutcome::Accepted => {}
                    other => prop_assert!(false, "unexpected outcome {other:?}"),
                }
            }
            let msg = completed.expect("all fragments delivered");
            prop_assert_eq!(msg.data, message);
        }

        /// Arbitrary bytes on any medium never panic the session.
        #[test]
        fn arbitrary_input_never_panics(
            data in proptest::collection::vec(any::<u8>(), 0..64),
            medium_idx in 0usize..6,
        ) {
            let media = [
                Medium::Can,
                Medium::CanFd,
                Medium::Lin,
                Medium::FlexRay,
                Medium::PduTransport,
                Medium::Stream,
            ];
            let mut session = Session::default();
            let ctx = UnitContext::new(media[medium_idx], 1, 1);
            let _ = session.process_unit(&ctx, &data);
        }

        /// Every truncation of a valid unit decodes or fails cleanly.
        #[test]
        fn truncation_never_panics(cut in 0usize..32) {
            let mut data = vec![
                0x80, 0x01, 0x00, 0x03, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0d, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            ];
            data.extend_from_slice(&[0u8; 8]);
            data.extend_from_slice(b"keyok");
            data.truncate(cut.min(data.len()));

            let mut session = Session::default();
            let ctx = UnitContext::new(Medium::Stream, 1, 1);
            let _ = session.process_unit(&ctx, &data);
        }
    }
}
