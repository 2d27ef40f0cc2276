//! Edge-event detection.
//!
//! An edge-mask transition reports which screen edges a node's cursor
//! touches. Each changed bit becomes an arrive or depart event; the
//! per-direction ring history backs multi-tap recognition.

use farside_types::{Direction, EdgeMask};

/// Ring length per direction. Multi-tap looks back `(taps − 1) × 2`
/// entries, so 6 covers up to triple-tap.
pub const EDGE_HISTORY_LEN: usize = 6;

/// The cursor entered or left a screen-edge band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeEvent {
    Arrive,
    Depart,
}

impl std::fmt::Display for EdgeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Arrive => "arrive",
            Self::Depart => "depart",
        })
    }
}

/// Same event type twice in a row: the sender's mask stream is out of
/// sync with ours. The event is not recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfSync;

/// Per-direction ring of edge-event timestamps.
///
/// Arrive and depart must alternate; only timestamps are stored since
/// the type at any slot follows from the last event's type.
#[derive(Debug, Clone)]
pub struct EdgeHistory {
    times: [u64; EDGE_HISTORY_LEN],
    idx: usize,
    last: Option<EdgeEvent>,
}

impl Default for EdgeHistory {
    fn default() -> Self {
        Self {
            times: [0; EDGE_HISTORY_LEN],
            idx: 0,
            last: None,
        }
    }
}

impl EdgeHistory {
    /// Record an event, rejecting a repeat of the last type.
    pub fn record(&mut self, event: EdgeEvent, now: u64) -> Result<(), OutOfSync> {
        if self.last == Some(event) {
            return Err(OutOfSync);
        }
        self.idx = (self.idx + 1) % EDGE_HISTORY_LEN;
        self.times[self.idx] = now;
        self.last = Some(event);
        Ok(())
    }

    /// Timestamp `rel` entries behind the most recent one (0 = the
    /// entry just recorded).
    #[must_use]
    pub fn entry_back(&self, rel: usize) -> u64 {
        debug_assert!(rel < EDGE_HISTORY_LEN);
        self.times[(self.idx + EDGE_HISTORY_LEN - rel % EDGE_HISTORY_LEN) % EDGE_HISTORY_LEN]
    }

    #[must_use]
    pub fn last_event(&self) -> Option<EdgeEvent> {
        self.last
    }
}

/// Edge histories for all four directions of one node's display.
#[derive(Debug, Clone, Default)]
pub struct EdgeState {
    histories: [EdgeHistory; 4],
}

impl EdgeState {
    pub fn record(&mut self, dir: Direction, event: EdgeEvent, now: u64) -> Result<(), OutOfSync> {
        self.histories[dir.index()].record(event, now)
    }

    #[must_use]
    pub fn entry_back(&self, dir: Direction, rel: usize) -> u64 {
        self.histories[dir.index()].entry_back(rel)
    }

    #[must_use]
    pub fn last_event(&self, dir: Direction) -> Option<EdgeEvent> {
        self.histories[dir.index()].last_event()
    }
}

/// Decompose a mask transition into per-direction events.
pub fn mask_transitions(old: EdgeMask, new: EdgeMask) -> Vec<(Direction, EdgeEvent)> {
    Direction::ALL
        .into_iter()
        .filter(|dir| old.contains(*dir) != new.contains(*dir))
        .map(|dir| {
            let event = if new.contains(dir) {
                EdgeEvent::Arrive
            } else {
                EdgeEvent::Depart
            };
            (dir, event)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_cover_changed_bits_only() {
        let old = EdgeMask::default().with(Direction::Left);
        let new = EdgeMask::default().with(Direction::Right);
        let events = mask_transitions(old, new);
        assert_eq!(
            events,
            vec![
                (Direction::Left, EdgeEvent::Depart),
                (Direction::Right, EdgeEvent::Arrive),
            ]
        );
        assert!(mask_transitions(new, new).is_empty());
    }

    #[test]
    fn repeat_event_type_is_out_of_sync() {
        let mut hist = EdgeHistory::default();
        hist.record(EdgeEvent::Arrive, 10).unwrap();
        assert_eq!(hist.record(EdgeEvent::Arrive, 20), Err(OutOfSync));
        // The rejected event must not disturb the ring.
        assert_eq!(hist.entry_back(0), 10);
        hist.record(EdgeEvent::Depart, 30).unwrap();
        assert_eq!(hist.entry_back(0), 30);
        assert_eq!(hist.entry_back(1), 10);
    }

    #[test]
    fn events_alternate_by_construction() {
        let mut hist = EdgeHistory::default();
        let mut expect = EdgeEvent::Arrive;
        for t in 0..20u64 {
            hist.record(expect, t).unwrap();
            assert_eq!(hist.last_event(), Some(expect));
            expect = match expect {
                EdgeEvent::Arrive => EdgeEvent::Depart,
                EdgeEvent::Depart => EdgeEvent::Arrive,
            };
        }
    }

    #[test]
    fn lookback_matches_double_tap_index() {
        // arrive, depart, arrive: the first tap's arrival sits two
        // entries back from the final arrival.
        let mut hist = EdgeHistory::default();
        hist.record(EdgeEvent::Arrive, 1000).unwrap();
        hist.record(EdgeEvent::Depart, 1050).unwrap();
        hist.record(EdgeEvent::Arrive, 1200).unwrap();
        assert_eq!(hist.entry_back(2), 1000);
        assert_eq!(hist.entry_back(1), 1050);
        assert_eq!(hist.entry_back(0), 1200);
    }

    #[test]
    fn ring_wraps_without_losing_recent_entries() {
        let mut hist = EdgeHistory::default();
        let mut event = EdgeEvent::Arrive;
        for t in 0..(EDGE_HISTORY_LEN as u64 * 3) {
            hist.record(event, t * 10).unwrap();
            event = match event {
                EdgeEvent::Arrive => EdgeEvent::Depart,
                EdgeEvent::Depart => EdgeEvent::Arrive,
            };
        }
        let newest = (EDGE_HISTORY_LEN as u64 * 3 - 1) * 10;
        for rel in 0..EDGE_HISTORY_LEN {
            assert_eq!(hist.entry_back(rel), newest - (rel as u64 * 10));
        }
    }
}
