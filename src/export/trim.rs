//! Trim range over a clip timeline

use serde::{Deserialize, Serialize};

/// Smallest allowed distance between trim start and end, in seconds
pub const MIN_TRIM_GAP: f64 = 0.5;

/// A `[start, end]` window in seconds over a clip of known duration.
///
/// Always satisfies `0 <= start`, `start + MIN_TRIM_GAP <= end <= duration`,
/// except for clips shorter than the gap, which collapse to `[0, duration]`.
/// Moving one bound drags the other along when needed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimRange {
    start: f64,
    end: f64,
    duration: f64,
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

impl TrimRange {
    /// Full range over a clip of `duration` seconds
    pub fn new(duration: f64) -> Self {
        let duration = sanitize(duration);
        Self {
            start: 0.0,
            end: duration,
            duration,
        }
    }

    /// Range with the requested bounds, clamped into a clip of `duration`
    pub fn with_bounds(start: f64, end: f64, duration: f64) -> Self {
        let mut range = Self::new(duration);
        range.update_end(end);
        range.update_start(start);
        range
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    /// Total clip duration the range is bounded by
    pub fn total(&self) -> f64 {
        self.duration
    }

    /// Length of the selected window
    pub fn length(&self) -> f64 {
        self.end - self.start
    }

    /// Move the start bound, pushing the end out if the gap gets too small
    pub fn update_start(&mut self, start: f64) {
        if start.is_nan() {
            return;
        }
        let max_start = (self.duration - MIN_TRIM_GAP).max(0.0);
        self.start = start.clamp(0.0, max_start);
        if self.end < self.start + MIN_TRIM_GAP {
            self.end = (self.start + MIN_TRIM_GAP).min(self.duration);
        }
    }

    /// Move the end bound, pulling the start in if the gap gets too small
    pub fn update_end(&mut self, end: f64) {
        if end.is_nan() {
            return;
        }
        let min_end = MIN_TRIM_GAP.min(self.duration);
        self.end = end.clamp(min_end, self.duration);
        if self.start > self.end - MIN_TRIM_GAP {
            self.start = (self.end - MIN_TRIM_GAP).max(0.0);
        }
    }

    /// The same window re-clamped to a clip of a different duration
    pub fn clamped_to(&self, duration: f64) -> Self {
        Self::with_bounds(self.start, self.end, duration)
    }

    pub fn is_full(&self) -> bool {
        self.start <= 0.0 && self.end >= self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn holds(range: &TrimRange) -> bool {
        let d = range.total();
        if d < MIN_TRIM_GAP {
            range.start() == 0.0 && range.end() == d
        } else {
            range.start() >= 0.0
                && range.start() + MIN_TRIM_GAP <= range.end() + 1e-9
                && range.end() <= d
        }
    }

    #[test]
    fn test_new_covers_whole_clip() {
        let range = TrimRange::new(12.0);
        assert_eq!(range.start(), 0.0);
        assert_eq!(range.end(), 12.0);
        assert!(range.is_full());
    }

    #[test]
    fn test_start_pushes_end() {
        let mut range = TrimRange::new(10.0);
        range.update_end(3.0);
        range.update_start(2.8);
        assert_eq!(range.start(), 2.8);
        assert!((range.end() - 3.3).abs() < 1e-9);
    }

    #[test]
    fn test_end_pulls_start() {
        let mut range = TrimRange::new(10.0);
        range.update_start(6.0);
        range.update_end(6.2);
        assert!((range.start() - 5.7).abs() < 1e-9);
        assert_eq!(range.end(), 6.2);
    }

    #[test]
    fn test_start_clamped_near_end_of_clip() {
        let mut range = TrimRange::new(10.0);
        range.update_start(50.0);
        assert_eq!(range.start(), 9.5);
        assert_eq!(range.end(), 10.0);
    }

    #[test]
    fn test_negative_values_clamp_to_zero() {
        let mut range = TrimRange::new(10.0);
        range.update_start(-4.0);
        range.update_end(-1.0);
        assert_eq!(range.start(), 0.0);
        assert_eq!(range.end(), 0.5);
    }

    #[test]
    fn test_clip_shorter_than_gap() {
        let mut range = TrimRange::new(0.3);
        range.update_start(0.2);
        assert_eq!((range.start(), range.end()), (0.0, 0.3));
        range.update_end(0.1);
        assert_eq!((range.start(), range.end()), (0.0, 0.3));
    }

    #[test]
    fn test_clamped_to_shorter_duration() {
        let range = TrimRange::with_bounds(8.0, 12.0, 20.0);
        let clamped = range.clamped_to(9.0);
        assert_eq!(clamped.end(), 9.0);
        assert_eq!(clamped.start(), 8.0);
        assert!(holds(&clamped));
    }

    #[test]
    fn test_nan_is_ignored() {
        let mut range = TrimRange::with_bounds(1.0, 4.0, 10.0);
        range.update_start(f64::NAN);
        range.update_end(f64::NAN);
        assert_eq!((range.start(), range.end()), (1.0, 4.0));
    }

    #[derive(Debug, Clone)]
    enum Update {
        Start(f64),
        End(f64),
    }

    fn update() -> impl Strategy<Value = Update> {
        prop_oneof![
            (-10.0f64..100.0).prop_map(Update::Start),
            (-10.0f64..100.0).prop_map(Update::End),
        ]
    }

    proptest! {
        #[test]
        fn prop_invariant_survives_any_updates(
            duration in 0.0f64..60.0,
            updates in prop::collection::vec(update(), 0..40),
        ) {
            let mut range = TrimRange::new(duration);
            prop_assert!(holds(&range));
            for u in updates {
                match u {
                    Update::Start(v) => range.update_start(v),
                    Update::End(v) => range.update_end(v),
                }
                prop_assert!(holds(&range), "{:?}", range);
            }
        }
    }
}
