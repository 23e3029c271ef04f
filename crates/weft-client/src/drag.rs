//! Drag coalescing.
//!
//! A drag produces a position change per pointer frame. The view applies
//! each one immediately, but the document only needs the latest position per
//! node every commit interval. Release commits at once.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use weft_types::{NodeId, Position};

#[derive(Debug)]
pub struct DragCoalescer {
    interval: Duration,
    pending: BTreeMap<NodeId, Position>,
    last_commit: Option<Instant>,
}

impl DragCoalescer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: BTreeMap::new(),
            last_commit: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Remember the latest position of a dragged node.
    pub fn record(&mut self, id: NodeId, position: Position) {
        self.pending.insert(id, position);
    }

    /// Stop tracking a node (its position is committed elsewhere).
    pub fn forget(&mut self, id: &NodeId) -> Option<Position> {
        self.pending.remove(id)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Positions not yet committed.
    pub fn pending(&self) -> impl Iterator<Item = (&NodeId, &Position)> {
        self.pending.iter()
    }

    /// When the next commit may happen, if anything is pending.
    pub fn deadline(&self) -> Option<Instant> {
        if self.pending.is_empty() {
            return None;
        }
        Some(match self.last_commit {
            Some(last) => last + self.interval,
            None => Instant::now(),
        })
    }

    /// Whether a commit is due at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        !self.pending.is_empty()
            && self
                .last_commit
                .is_none_or(|last| now.duration_since(last) >= self.interval)
    }

    /// Take every pending position and mark a commit at `now`.
    pub fn drain(&mut self, now: Instant) -> Vec<(NodeId, Position)> {
        self.last_commit = Some(now);
        std::mem::take(&mut self.pending).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_latest_position_wins_and_commits_are_spaced() {
        let mut drags = DragCoalescer::new(Duration::from_millis(50));
        let id = NodeId::new("n");
        drags.record(id.clone(), Position::new(1.0, 1.0));
        drags.record(id.clone(), Position::new(2.0, 2.0));

        let start = Instant::now();
        assert!(drags.is_due(start), "first commit is immediate");
        assert_eq!(drags.drain(start), vec![(id.clone(), Position::new(2.0, 2.0))]);

        drags.record(id.clone(), Position::new(3.0, 3.0));
        assert!(!drags.is_due(Instant::now()));
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(drags.is_due(Instant::now()));
    }

    #[test]
    fn test_forget() {
        let mut drags = DragCoalescer::new(Duration::from_millis(50));
        drags.record(NodeId::new("n"), Position::ORIGIN);
        assert_eq!(drags.forget(&NodeId::new("n")), Some(Position::ORIGIN));
        assert!(drags.is_empty());
    }
}
