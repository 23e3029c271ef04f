//! Cursor sampling and smoothing.
//!
//! Outgoing: [`CursorThrottle`] limits how often the local cursor is sent
//! (leading and trailing edge, so the final resting position always goes
//! out). Incoming: [`CursorInterpolator`] eases a remote cursor from its
//! previous sample to the newest one so sparse updates still render smoothly.

use std::time::Duration;

use tokio::time::Instant;
use weft_types::Cursor;

use crate::constants::CURSOR_MAX_INTERPOLATION;

#[derive(Debug)]
pub struct CursorThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
    trailing: Option<Cursor>,
}

impl CursorThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            trailing: None,
        }
    }

    /// Offer a new sample. Returns it if it may be sent now; otherwise keeps
    /// it as the trailing sample.
    pub fn offer(&mut self, cursor: Cursor, now: Instant) -> Option<Cursor> {
        let ready = self
            .last_sent
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if ready {
            self.last_sent = Some(now);
            self.trailing = None;
            Some(cursor)
        } else {
            self.trailing = Some(cursor);
            None
        }
    }

    /// When the trailing sample becomes sendable.
    pub fn deadline(&self) -> Option<Instant> {
        match (self.trailing, self.last_sent) {
            (Some(_), Some(last)) => Some(last + self.interval),
            (Some(_), None) => Some(Instant::now()),
            _ => None,
        }
    }

    /// Take the trailing sample if its time has come.
    pub fn poll(&mut self, now: Instant) -> Option<Cursor> {
        let due = self.deadline().is_some_and(|d| now >= d);
        if !due {
            return None;
        }
        self.last_sent = Some(now);
        self.trailing.take()
    }

    /// Pointer left the canvas; nothing pending should follow.
    pub fn reset(&mut self) {
        self.trailing = None;
    }
}

/// Linear easing between consecutive samples of one remote cursor.
#[derive(Debug, Clone)]
pub struct CursorInterpolator {
    from: Cursor,
    to: Cursor,
    started: Instant,
    duration: Duration,
    last_sample: Option<Instant>,
}

impl CursorInterpolator {
    pub fn new(initial: Cursor, now: Instant) -> Self {
        Self {
            from: initial,
            to: initial,
            started: now,
            duration: Duration::ZERO,
            last_sample: Some(now),
        }
    }

    /// Feed a new sample. The ease lasts as long as the gap since the previous
    /// sample, capped at [`CURSOR_MAX_INTERPOLATION`].
    pub fn add_point(&mut self, point: Cursor, now: Instant) {
        self.from = self.position(now);
        self.to = point;
        self.started = now;
        let gap = self
            .last_sample
            .map(|last| now.duration_since(last))
            .unwrap_or(Duration::ZERO);
        self.duration = gap.min(CURSOR_MAX_INTERPOLATION);
        self.last_sample = Some(now);
    }

    pub fn position(&self, now: Instant) -> Cursor {
        if self.duration.is_zero() {
            return self.to;
        }
        let t = (now.duration_since(self.started).as_secs_f64() / self.duration.as_secs_f64())
            .clamp(0.0, 1.0);
        Cursor {
            x: self.from.x + (self.to.x - self.from.x) * t,
            y: self.from.y + (self.to.y - self.from.y) * t,
        }
    }

    pub fn target(&self) -> Cursor {
        self.to
    }
}
