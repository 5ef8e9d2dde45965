//! Circular write cursor.
//!
//! [`CircularCursor`] decides which bucket the producer writes next and which
//! buckets hold completed data. It deals in positions only and never touches
//! sample memory; [`AcquisitionBuffer`](crate::AcquisitionBuffer) couples it
//! to a ring.
//!
//! # Lifecycle
//!
//! ```text
//! Unconfigured --set_limits--> Configured --starts_with--> Armed --advance--> Active
//!                                  ^                                            |
//!                                  +------------------- stop -------------------+
//! ```
//!
//! The first `advance()` of a session claims the start position itself; each
//! later call moves one slot forward, wrapping from `max` to `min`.

use parking_lot::Mutex;

use crate::error::CursorError;

/// A slot index in `[min, max]`.
pub type Position = usize;

type Result<T> = std::result::Result<T, CursorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unconfigured,
    Configured,
    /// `starts_with` called, start slot not claimed yet
    Armed,
    /// Start slot claimed; `current` is the slot being written
    Active,
}

#[derive(Debug)]
struct CursorState {
    phase: Phase,
    min: Position,
    max: Position,
    first: Position,
    current: Position,
    has_looped: bool,
}

impl CursorState {
    fn span(&self) -> usize {
        self.max - self.min + 1
    }

    fn next(&self, p: Position) -> Position {
        if p >= self.max {
            self.min
        } else {
            p + 1
        }
    }

    fn prev(&self, p: Position) -> Position {
        if p <= self.min {
            self.max
        } else {
            p - 1
        }
    }

    /// Move `p` back by `n` slots.
    fn back(&self, p: Position, n: usize) -> Position {
        let span = self.span();
        self.min + (p - self.min + span - n % span) % span
    }

    /// Slots from `from` forward to `to`, exclusive of `to`.
    fn distance(&self, from: Position, to: Position) -> usize {
        let span = self.span();
        (to + span - from) % span
    }

    fn configured(&self) -> Result<()> {
        match self.phase {
            Phase::Unconfigured => Err(CursorError::NotConfigured),
            _ => Ok(()),
        }
    }
}

/// Thread-safe tracker of the circular write position.
#[derive(Debug)]
pub struct CircularCursor {
    state: Mutex<CursorState>,
}

impl Default for CircularCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl CircularCursor {
    /// Create an unconfigured cursor.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CursorState {
                phase: Phase::Unconfigured,
                min: 0,
                max: 0,
                first: 0,
                current: 0,
                has_looped: false,
            }),
        }
    }

    /// Create a cursor with limits `[min, max]` already set.
    pub fn with_limits(min: Position, max: Position) -> Result<Self> {
        let cursor = Self::new();
        cursor.set_limits(min, max)?;
        Ok(cursor)
    }

    /// Set the inclusive position range. Fails while a session is running.
    pub fn set_limits(&self, min: Position, max: Position) -> Result<()> {
        if min >= max {
            return Err(CursorError::InvalidLimits { min, max });
        }
        let mut state = self.state.lock();
        if matches!(state.phase, Phase::Armed | Phase::Active) {
            return Err(CursorError::AlreadyActive);
        }
        state.min = min;
        state.max = max;
        state.first = min;
        state.current = min;
        state.has_looped = false;
        state.phase = Phase::Configured;
        Ok(())
    }

    /// Arm a new session starting at `position`.
    ///
    /// May be called again before the first `advance()` to move the start.
    pub fn starts_with(&self, position: Position) -> Result<()> {
        let mut state = self.state.lock();
        state.configured()?;
        if state.phase == Phase::Active {
            return Err(CursorError::AlreadyActive);
        }
        if !(state.min..=state.max).contains(&position) {
            return Err(CursorError::OutOfRange {
                position,
                min: state.min,
                max: state.max,
            });
        }
        state.first = position;
        state.current = position;
        state.has_looped = false;
        state.phase = Phase::Armed;
        Ok(())
    }

    /// End the session. Idempotent; limits are kept.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if state.phase != Phase::Unconfigured {
            state.phase = Phase::Configured;
        }
        state.has_looped = false;
    }

    /// Claim the next slot for writing and return it.
    pub fn advance(&self) -> Result<Position> {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Armed => {
                state.phase = Phase::Active;
            }
            Phase::Active => {
                state.current = state.next(state.current);
                if state.current == state.first {
                    state.has_looped = true;
                }
            }
            Phase::Unconfigured | Phase::Configured => return Err(CursorError::NotStarted),
        }
        Ok(state.current)
    }

    /// Slot currently claimed for writing.
    pub fn current(&self) -> Result<Position> {
        let state = self.state.lock();
        match state.phase {
            Phase::Active => Ok(state.current),
            _ => Err(CursorError::NotStarted),
        }
    }

    /// Most recently completed slot, or `None` before the first completion.
    pub fn last_completed(&self) -> Option<Position> {
        let state = self.state.lock();
        if state.phase != Phase::Active || (!state.has_looped && state.current == state.first) {
            return None;
        }
        Some(state.prev(state.current))
    }

    /// Resolve the last `max_count` completed slots, skipping the
    /// `back_offset` most recent ones.
    ///
    /// Returns the inclusive range `(first, last)`, possibly wrapping, or
    /// `None` if no completed slot lies that far back. A window reaching past
    /// the oldest written slot is truncated; once the ring has looped, the
    /// window never includes the slot being written.
    ///
    /// # Errors
    /// [`CursorError::EmptyWindow`] for `max_count == 0` and
    /// [`CursorError::WindowTooLarge`] for `max_count > max - min`.
    pub fn lookback_window(
        &self,
        max_count: usize,
        back_offset: usize,
    ) -> Result<Option<(Position, Position)>> {
        if max_count == 0 {
            return Err(CursorError::EmptyWindow);
        }
        let state = self.state.lock();
        state.configured()?;

        let capacity = state.max - state.min;
        if max_count > capacity {
            return Err(CursorError::WindowTooLarge {
                requested: max_count,
                capacity,
            });
        }
        if state.phase != Phase::Active {
            return Ok(None);
        }

        let written = if state.has_looped {
            capacity
        } else {
            state.distance(state.first, state.current)
        };
        if back_offset >= written {
            return Ok(None);
        }

        let count = max_count.min(written - back_offset);
        let last = state.back(state.current, back_offset + 1);
        let first = state.back(last, count - 1);
        Ok(Some((first, last)))
    }

    /// Position after `p`, wrapping at `max`.
    pub fn next(&self, p: Position) -> Position {
        self.state.lock().next(p)
    }

    /// Position before `p`, wrapping at `min`.
    pub fn prev(&self, p: Position) -> Position {
        self.state.lock().prev(p)
    }

    /// Configured `(min, max)`, if any.
    pub fn limits(&self) -> Option<(Position, Position)> {
        let state = self.state.lock();
        state.configured().ok().map(|()| (state.min, state.max))
    }

    /// Whether the write position has wrapped back to the start slot.
    pub fn has_looped(&self) -> bool {
        self.state.lock().has_looped
    }

    /// Whether a session has claimed its first slot.
    pub fn is_active(&self) -> bool {
        self.state.lock().phase == Phase::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(min: Position, max: Position, start: Position) -> CircularCursor {
        let cursor = CircularCursor::with_limits(min, max).unwrap();
        cursor.starts_with(start).unwrap();
        cursor
    }

    #[test]
    fn test_normal_flow() {
        let cursor = started(0, 5, 0);

        // First advance claims the start slot itself
        assert_eq!(cursor.advance().unwrap(), 0);
        assert_eq!(cursor.last_completed(), None);
        assert_eq!(cursor.lookback_window(1, 0).unwrap(), None);

        // Six completed acquisitions
        for _ in 0..6 {
            cursor.advance().unwrap();
        }
        assert_eq!(cursor.current().unwrap(), 0);
        assert!(cursor.has_looped());
        assert_eq!(cursor.last_completed(), Some(5));
        assert_eq!(cursor.lookback_window(5, 0).unwrap(), Some((1, 5)));
        assert_eq!(
            cursor.lookback_window(6, 0),
            Err(CursorError::WindowTooLarge {
                requested: 6,
                capacity: 5
            })
        );
    }

    #[test]
    fn test_partial_history_from_offset_start() {
        let cursor = started(0, 5, 1);
        cursor.advance().unwrap();
        cursor.advance().unwrap();

        assert_eq!(cursor.current().unwrap(), 2);
        assert_eq!(cursor.last_completed(), Some(1));
        // Only one slot has been written
        assert_eq!(cursor.lookback_window(3, 0).unwrap(), Some((1, 1)));
        assert_eq!(cursor.lookback_window(3, 1).unwrap(), None);
    }

    #[test]
    fn test_advance_monotonicity() {
        let (min, max) = (2, 6);
        let span = max - min + 1;

        for start in min..=max {
            for n in 1..=3 * span {
                let cursor = started(min, max, start);
                let mut last = 0;
                for _ in 0..n {
                    last = cursor.advance().unwrap();
                }
                let expected = (start - min + n - 1) % span + min;
                assert_eq!(last, expected, "start={start} n={n}");
                assert_eq!(cursor.current().unwrap(), expected);
                assert_eq!(cursor.has_looped(), n > span, "start={start} n={n}");
            }
        }
    }

    #[test]
    fn test_stop_and_restart_resets_session() {
        let cursor = started(0, 3, 0);
        for _ in 0..6 {
            cursor.advance().unwrap();
        }
        assert!(cursor.has_looped());

        cursor.stop();
        cursor.stop();
        assert!(!cursor.is_active());
        assert!(!cursor.has_looped());
        assert_eq!(cursor.advance(), Err(CursorError::NotStarted));
        assert_eq!(cursor.current(), Err(CursorError::NotStarted));
        assert_eq!(cursor.last_completed(), None);

        cursor.starts_with(2).unwrap();
        assert_eq!(cursor.advance().unwrap(), 2);
        assert_eq!(cursor.last_completed(), None);
        assert!(!cursor.has_looped());

        let fresh = started(0, 3, 2);
        fresh.advance().unwrap();
        assert_eq!(cursor.current(), fresh.current());
        assert_eq!(cursor.lookback_window(1, 0), fresh.lookback_window(1, 0));
    }

    #[test]
    fn test_configuration_errors() {
        let cursor = CircularCursor::new();
        assert_eq!(cursor.limits(), None);
        assert_eq!(cursor.starts_with(0), Err(CursorError::NotConfigured));
        assert_eq!(cursor.advance(), Err(CursorError::NotStarted));
        assert_eq!(cursor.lookback_window(1, 0), Err(CursorError::NotConfigured));

        assert_eq!(
            cursor.set_limits(3, 3),
            Err(CursorError::InvalidLimits { min: 3, max: 3 })
        );
        cursor.set_limits(1, 4).unwrap();
        assert_eq!(cursor.limits(), Some((1, 4)));
        assert_eq!(
            cursor.starts_with(5),
            Err(CursorError::OutOfRange {
                position: 5,
                min: 1,
                max: 4
            })
        );

        cursor.starts_with(1).unwrap();
        assert_eq!(cursor.set_limits(0, 9), Err(CursorError::AlreadyActive));
        cursor.advance().unwrap();
        assert_eq!(cursor.starts_with(2), Err(CursorError::AlreadyActive));
        assert_eq!(cursor.lookback_window(0, 0), Err(CursorError::EmptyWindow));
    }

    #[test]
    fn test_lookback_with_back_offset() {
        let cursor = started(0, 5, 0);
        // Complete slots 0..=3, now writing 4
        for _ in 0..5 {
            cursor.advance().unwrap();
        }
        assert_eq!(cursor.current().unwrap(), 4);

        assert_eq!(cursor.lookback_window(2, 0).unwrap(), Some((2, 3)));
        assert_eq!(cursor.lookback_window(2, 1).unwrap(), Some((1, 2)));
        // Truncated at the oldest written slot
        assert_eq!(cursor.lookback_window(3, 2).unwrap(), Some((0, 1)));
        assert_eq!(cursor.lookback_window(1, 4).unwrap(), None);
    }

    #[test]
    fn test_lookback_after_loop_wraps_and_skips_in_flight_slot() {
        let cursor = started(0, 5, 3);
        // 3,4,5,0,1,2,3,4: looped, now writing 4
        for _ in 0..8 {
            cursor.advance().unwrap();
        }
        assert!(cursor.has_looped());
        assert_eq!(cursor.current().unwrap(), 4);

        assert_eq!(cursor.lookback_window(5, 0).unwrap(), Some((5, 3)));
        assert_eq!(cursor.lookback_window(5, 2).unwrap(), Some((5, 1)));
        assert_eq!(cursor.lookback_window(2, 4).unwrap(), Some((5, 5)));
        assert_eq!(cursor.lookback_window(1, 5).unwrap(), None);
    }

    #[test]
    fn test_next_prev_wrap_inside_limits() {
        let cursor = CircularCursor::with_limits(10, 12).unwrap();
        assert_eq!(cursor.next(11), 12);
        assert_eq!(cursor.next(12), 10);
        assert_eq!(cursor.prev(10), 12);
        assert_eq!(cursor.prev(11), 10);
    }
}
