use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace, warn};

use crate::dissect::Medium;

/// Identity under which a segmented message is reassembled.
///
/// Two units with equal key and adjacent sequence numbers belong to the
/// same logical message.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct FlowKey {
    /// Bus / medium kind the flow lives on.
    pub medium: Medium,
    /// Numeric channel / arbitration identifier.
    pub flow_id: u32,
    /// Optional sub-address (extended addressing).
    pub subaddress: Option<u8>,
}

/// One stored fragment awaiting reassembly.
#[derive(Debug, Clone)]
struct Fragment {
    data: Vec<u8>,
    frame_number: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowState {
    /// Fragments are being accumulated.
    Collecting,
    /// A sequence error occurred; terminal. Bookkeeping continues for
    /// diagnostics but no output is ever emitted for this key.
    Errored,
}

/// Buffer for one in-progress segmented message.
#[derive(Debug)]
struct ReassemblyBuffer {
    declared_total: usize,
    /// Fragment payloads keyed by sequence number. BTreeMap keeps
    /// concatenation order ascending regardless of arrival order.
    fragments: BTreeMap<u64, Fragment>,
    /// Sum of stored fragment payload lengths.
    accumulated: usize,
    /// Lowest sequence number not yet present (length of the contiguous
    /// prefix starting at 0).
    next_expected: u64,
    state: FlowState,
    /// Highest sequence number seen, tracked even after an error.
    last_seq: u64,
}

impl ReassemblyBuffer {
    fn new(declared_total: usize) -> Self {
        Self {
            declared_total,
            fragments: BTreeMap::new(),
            accumulated: 0,
            next_expected: 0,
            state: FlowState::Collecting,
            last_seq: 0,
        }
    }

    fn advance_expected(&mut self) {
        while self.fragments.contains_key(&self.next_expected) {
            self.next_expected += 1;
        }
    }

    /// True when every slot from 0 is filled and enough bytes arrived.
    fn is_satisfied(&self) -> bool {
        self.next_expected == self.fragments.len() as u64
            && self.accumulated >= self.declared_total
    }

    /// Concatenate fragments in ascending sequence order, trimming any
    /// overshoot down to the declared total.
    fn assemble(self) -> ReassembledMessage {
        let mut data = Vec::with_capacity(self.declared_total);
        let mut fragment_frames = Vec::with_capacity(self.fragments.len());
        for fragment in self.fragments.into_values() {
            data.extend_from_slice(&fragment.data);
            fragment_frames.push(fragment.frame_number);
        }
        data.truncate(self.declared_total);
        ReassembledMessage {
            data,
            fragment_frames,
            declared_total: self.declared_total,
        }
    }
}

/// A fully reassembled message, emitted exactly once per flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledMessage {
    /// The reassembled payload, exactly `declared_total` bytes.
    pub data: Vec<u8>,
    /// Frame numbers of the contributing fragments, in sequence order.
    pub fragment_frames: Vec<u64>,
    /// Total length declared by the first fragment.
    pub declared_total: usize,
}

/// Result of feeding one fragment to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// Fragment stored; the message is not yet complete.
    Accepted,
    /// The terminal fragment arrived; the message is emitted exactly once
    /// and the flow entry is removed.
    Completed(ReassembledMessage),
    /// Sequence number outside the out-of-order window. The flow is now
    /// errored: no output will ever be produced for this key.
    SequenceError { expected: u64, got: u64 },
    /// Flow is already errored; the fragment was recorded for diagnostics
    /// only and will never contribute to an output.
    Discarded,
    /// No first-fragment has been seen for this key.
    NoFlow,
}

/// Counters mirroring the state of one engine instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub flows_opened: u64,
    pub flows_completed: u64,
    pub flows_errored: u64,
    pub fragments_accepted: u64,
    pub duplicate_overwrites: u64,
}

/// Tracks partial multi-fragment messages keyed by flow identity.
///
/// One engine per capture/analysis session; the host guarantees serialized
/// delivery per session, so the engine needs no interior locking. Stale
/// entries are never expired by a timer: an incomplete buffer simply never
/// emits and is dropped on [`clear`](ReassemblyEngine::clear) or when the
/// engine is.
#[derive(Debug)]
pub struct ReassemblyEngine {
    flows: HashMap<FlowKey, ReassemblyBuffer>,
    /// Out-of-order tolerance: a fragment may arrive at most this many
    /// positions past the next expected sequence number.
    window: u64,
    stats: ReassemblyStats,
}

impl ReassemblyEngine {
    /// Default out-of-order window.
    pub const DEFAULT_WINDOW: u64 = 8;

    pub fn new(window: u64) -> Self {
        Self {
            flows: HashMap::new(),
            window,
            stats: ReassemblyStats::default(),
        }
    }

    /// Open (or reopen) a flow on receipt of a first fragment.
    ///
    /// A fresh first-fragment always starts a new logical message: any
    /// existing entry under the key, errored or collecting, is discarded.
    /// If the first fragment already satisfies the declared total the
    /// message completes immediately.
    pub fn start(
        &mut self,
        key: FlowKey,
        declared_total: usize,
        first_payload: &[u8],
        frame_number: u64,
    ) -> FragmentOutcome {
        if let Some(old) = self.flows.remove(&key) {
            debug!(
                ?key,
                state = ?old.state,
                accumulated = old.accumulated,
                "discarding stale flow on fresh first fragment"
            );
        }

        self.stats.flows_opened += 1;
        self.stats.fragments_accepted += 1;

        let mut buffer = ReassemblyBuffer::new(declared_total);
        buffer.fragments.insert(
            0,
            Fragment {
                data: first_payload.to_vec(),
                frame_number,
            },
        );
        buffer.accumulated = first_payload.len();
        buffer.next_expected = 1;
        trace!(?key, declared_total, first = first_payload.len(), "flow opened");

        if buffer.is_satisfied() {
            self.stats.flows_completed += 1;
            return FragmentOutcome::Completed(buffer.assemble());
        }
        self.flows.insert(key, buffer);
        FragmentOutcome::Accepted
    }

    /// Feed a consecutive fragment with absolute sequence number `seq`
    /// (first fragment is 0, consecutive fragments count up from 1).
    pub fn add_fragment(
        &mut self,
        key: FlowKey,
        seq: u64,
        payload: &[u8],
        frame_number: u64,
    ) -> FragmentOutcome {
        let Some(buffer) = self.flows.get_mut(&key) else {
            return FragmentOutcome::NoFlow;
        };

        buffer.last_seq = buffer.last_seq.max(seq);

        if buffer.state == FlowState::Errored {
            // Bookkeeping only: the flow stays terminal.
            trace!(?key, seq, last_seq = buffer.last_seq, "fragment for errored flow discarded");
            return FragmentOutcome::Discarded;
        }

        let expected = buffer.next_expected;
        if seq > expected + self.window {
            warn!(?key, expected, got = seq, "fragment beyond reorder window, flow errored");
            buffer.state = FlowState::Errored;
            buffer.fragments.clear();
            buffer.accumulated = 0;
            self.stats.flows_errored += 1;
            return FragmentOutcome::SequenceError { expected, got: seq };
        }

        self.stats.fragments_accepted += 1;

        // Duplicate delivery overwrites the slot: last write wins.
        if let Some(old) = buffer.fragments.insert(
            seq,
            Fragment {
                data: payload.to_vec(),
                frame_number,
            },
        ) {
            buffer.accumulated -= old.data.len();
            self.stats.duplicate_overwrites += 1;
        }
        buffer.accumulated += payload.len();
        buffer.advance_expected();

        if buffer.is_satisfied() {
            // Borrow of `buffer` ended; the entry is known to be present.
            let buffer = self.flows.remove(&key).unwrap();
            self.stats.flows_completed += 1;
            let message = buffer.assemble();
            debug!(
                ?key,
                len = message.data.len(),
                fragments = message.fragment_frames.len(),
                "reassembly complete"
            );
            return FragmentOutcome::Completed(message);
        }
        FragmentOutcome::Accepted
    }

    /// Next sequence number the flow expects, if the flow is tracked.
    /// Errored flows report from their diagnostic bookkeeping.
    pub fn next_expected(&self, key: &FlowKey) -> Option<u64> {
        self.flows.get(key).map(|b| b.next_expected)
    }

    /// True if the key is tracked and terminally errored.
    pub fn is_errored(&self, key: &FlowKey) -> bool {
        self.flows
            .get(key)
            .is_some_and(|b| b.state == FlowState::Errored)
    }

    /// Number of tracked flows (collecting or errored).
    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    /// Engine counters.
    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Drop all tracked flows. Used on session teardown or an explicit
    /// host-driven reset; counters are kept.
    pub fn clear(&mut self) {
        self.flows.clear();
    }
}

impl Default for ReassemblyEngine {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> FlowKey {
        FlowKey {
            medium: Medium::Can,
            flow_id: 0x7e0,
            subaddress: None,
        }
    }

    // Test 1: two fragments in order (14 + 6 = 20 bytes)
    #[test]
    fn test_two_fragments_in_order() {
        let mut engine = ReassemblyEngine::default();

        let first = vec![0xaa; 14];
        let second = vec![0xbb; 6];

        assert_eq!(engine.start(key(), 20, &first, 1), FragmentOutcome::Accepted);
        match engine.add_fragment(key(), 1, &second, 2) {
            FragmentOutcome::Completed(msg) => {
                assert_eq!(msg.data.len(), 20);
                assert_eq!(&msg.data[..14], &first[..]);
                assert_eq!(&msg.data[14..], &second[..]);
                assert_eq!(msg.fragment_frames, vec![1, 2]);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        // Entry removed after emission
        assert_eq!(engine.flow_count(), 0);
    }

    // Test 2: fragments out of order within the window produce the same result
    #[test]
    fn test_out_of_order_within_window() {
        let mut engine = ReassemblyEngine::default();

        assert_eq!(engine.start(key(), 12, &[1; 4], 1), FragmentOutcome::Accepted);
        // Fragment 2 before fragment 1
        assert_eq!(engine.add_fragment(key(), 2, &[3; 4], 2), FragmentOutcome::Accepted);
        match engine.add_fragment(key(), 1, &[2; 4], 3) {
            FragmentOutcome::Completed(msg) => {
                assert_eq!(msg.data, [[1u8; 4], [2; 4], [3; 4]].concat());
                // Frames reported in sequence order, not arrival order
                assert_eq!(msg.fragment_frames, vec![1, 3, 2]);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    // Test 3: fragment beyond the window errors the flow terminally
    #[test]
    fn test_sequence_error_is_terminal() {
        let mut engine = ReassemblyEngine::new(8);

        engine.start(key(), 100, &[0; 6], 1);
        // Expected 1, got 10: 9 positions beyond, outside an 8-entry window
        assert_eq!(
            engine.add_fragment(key(), 10, &[0; 6], 2),
            FragmentOutcome::SequenceError { expected: 1, got: 10 }
        );
        assert!(engine.is_errored(&key()));

        // A "correct" fragment afterwards is recorded but never emits
        assert_eq!(engine.add_fragment(key(), 1, &[0; 94], 3), FragmentOutcome::Discarded);
        assert_eq!(engine.stats().flows_errored, 1);
        assert_eq!(engine.stats().flows_completed, 0);
    }

    // Test 4: duplicate sequence number overwrites, last write wins
    #[test]
    fn test_duplicate_overwrites() {
        let mut engine = ReassemblyEngine::default();

        engine.start(key(), 12, &[1; 4], 1);
        assert_eq!(engine.add_fragment(key(), 1, &[9; 4], 2), FragmentOutcome::Accepted);
        // Same sequence number again: overwrite, not an error
        assert_eq!(engine.add_fragment(key(), 1, &[2; 4], 3), FragmentOutcome::Accepted);
        assert_eq!(engine.stats().duplicate_overwrites, 1);

        match engine.add_fragment(key(), 2, &[3; 4], 4) {
            FragmentOutcome::Completed(msg) => {
                assert_eq!(msg.data, [[1u8; 4], [2; 4], [3; 4]].concat());
                // Frame of the overwriting delivery is the one reported
                assert_eq!(msg.fragment_frames, vec![1, 3, 4]);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    // Test 5: overshoot is trimmed to the declared total
    #[test]
    fn test_overshoot_trimmed() {
        let mut engine = ReassemblyEngine::default();

        engine.start(key(), 10, &[1; 6], 1);
        match engine.add_fragment(key(), 1, &[2; 6], 2) {
            FragmentOutcome::Completed(msg) => {
                assert_eq!(msg.data.len(), 10);
                assert_eq!(msg.declared_total, 10);
                assert_eq!(&msg.data[6..], &[2; 4]);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    // Test 6: a fresh first-fragment restarts the logical message
    #[test]
    fn test_restart_on_first_fragment() {
        let mut engine = ReassemblyEngine::default();

        engine.start(key(), 100, &[1; 6], 1);
        engine.add_fragment(key(), 1, &[1; 6], 2);

        // New first fragment discards the old partial message
        assert_eq!(engine.start(key(), 8, &[7; 4], 3), FragmentOutcome::Accepted);
        match engine.add_fragment(key(), 1, &[8; 4], 4) {
            FragmentOutcome::Completed(msg) => assert_eq!(msg.data, [[7u8; 4], [8; 4]].concat()),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    // Test 7: single first fragment satisfying the total completes at once
    #[test]
    fn test_immediate_completion() {
        let mut engine = ReassemblyEngine::default();
        match engine.start(key(), 4, &[5; 4], 1) {
            FragmentOutcome::Completed(msg) => {
                assert_eq!(msg.data, vec![5; 4]);
                assert_eq!(msg.fragment_frames, vec![1]);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(engine.flow_count(), 0);
    }

    // Test 8: fragment for an unknown flow
    #[test]
    fn test_no_flow() {
        let mut engine = ReassemblyEngine::default();
        assert_eq!(engine.add_fragment(key(), 1, &[0; 4], 1), FragmentOutcome::NoFlow);
    }

    // Test 9: sibling flows are unaffected by an errored one
    #[test]
    fn test_flow_isolation() {
        let mut engine = ReassemblyEngine::new(4);
        let other = FlowKey {
            medium: Medium::Can,
            flow_id: 0x7e8,
            subaddress: None,
        };

        engine.start(key(), 100, &[0; 6], 1);
        engine.add_fragment(key(), 9, &[0; 6], 2); // errors flow 0x7e0

        engine.start(other, 8, &[1; 4], 3);
        match engine.add_fragment(other, 1, &[2; 4], 4) {
            FragmentOutcome::Completed(_) => {}
            other => panic!("sibling flow should complete, got {other:?}"),
        }
    }

    // Test 10: completion requires contiguity, not just byte count
    #[test]
    fn test_no_completion_with_gap() {
        let mut engine = ReassemblyEngine::default();

        engine.start(key(), 12, &[1; 4], 1);
        // Fragments 2 and 3 bring accumulated to 12, but fragment 1 is missing
        assert_eq!(engine.add_fragment(key(), 2, &[3; 4], 2), FragmentOutcome::Accepted);
        assert_eq!(engine.add_fragment(key(), 3, &[4; 4], 3), FragmentOutcome::Accepted);
        assert_eq!(engine.flow_count(), 1);

        // The hole fills; now it completes with seq-ordered data, trimmed
        match engine.add_fragment(key(), 1, &[2; 4], 4) {
            FragmentOutcome::Completed(msg) => {
                assert_eq!(msg.data, [[1u8; 4], [2; 4], [3; 4]].concat());
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    // Test 11: clear drops flows but keeps counters
    #[test]
    fn test_clear() {
        let mut engine = ReassemblyEngine::default();
        engine.start(key(), 100, &[0; 6], 1);
        assert_eq!(engine.flow_count(), 1);

        engine.clear();
        assert_eq!(engine.flow_count(), 0);
        assert_eq!(engine.stats().flows_opened, 1);
        assert_eq!(engine.add_fragment(key(), 1, &[0; 6], 2), FragmentOutcome::NoFlow);
    }
}
