//! Position tracking
//!
//! Turns measurement-channel edges into displacement in DPLL phase units,
//! and watches the range that displacement covers.

use super::Dpll;

/// Accumulates measurement position from the DPLL's unwrapped phase
#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    last_phase: i64,
    current_position: i64,
}

impl PositionTracker {
    /// Tracker at position zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a measurement edge seen at reference phase `phase`.
    ///
    /// Each edge moves the position by one turn less the reference phase
    /// elapsed since the previous edge, so a measurement signal running at
    /// the reference frequency leaves the position unchanged.
    pub fn edge(&mut self, phase: i64) -> i64 {
        let phase_diff = phase.wrapping_sub(self.last_phase);
        self.last_phase = phase;
        self.current_position += Dpll::TURN - phase_diff;
        self.current_position
    }

    /// Current position
    pub fn position(&self) -> i64 {
        self.current_position
    }
}

/// Tracks min and max of a signal over fixed windows
#[derive(Debug, Clone)]
pub struct MinMaxMonitor {
    cycle_sample_count: u32,
    current_sample_count: u32,
    current_min: i64,
    current_max: i64,
}

impl MinMaxMonitor {
    /// Monitor reporting every `cycle_sample_count` inputs
    pub fn new(cycle_sample_count: u32) -> Self {
        MinMaxMonitor {
            cycle_sample_count,
            current_sample_count: 0,
            current_min: i64::MAX,
            current_max: i64::MIN,
        }
    }

    /// Drop the current window
    pub fn reset(&mut self) {
        self.current_sample_count = 0;
        self.current_min = i64::MAX;
        self.current_max = i64::MIN;
    }

    /// Add a value; returns `(min, max)` when the window completes
    pub fn input(&mut self, value: i64) -> Option<(i64, i64)> {
        self.current_max = self.current_max.max(value);
        self.current_min = self.current_min.min(value);
        self.current_sample_count += 1;
        if self.current_sample_count >= self.cycle_sample_count {
            let range = (self.current_min, self.current_max);
            self.reset();
            Some(range)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_stationary_at_reference_rate() {
        let mut tracker = PositionTracker::new();
        tracker.edge(Dpll::TURN);
        for n in 2..10 {
            assert_eq!(tracker.edge(n * Dpll::TURN), 0);
        }
    }

    #[test]
    fn test_position_moves_with_doppler_shift() {
        let mut tracker = PositionTracker::new();
        tracker.edge(Dpll::TURN);
        // measurement edges arriving 1/16 turn early each period
        let step = Dpll::TURN - Dpll::TURN / 16;
        let mut phase = Dpll::TURN;
        for n in 1..=4 {
            phase += step;
            assert_eq!(tracker.edge(phase), n * Dpll::TURN / 16);
        }
        assert_eq!(tracker.position(), Dpll::TURN / 4);
    }

    #[test]
    fn test_min_max_window() {
        let mut monitor = MinMaxMonitor::new(4);
        assert_eq!(monitor.input(5), None);
        assert_eq!(monitor.input(-3), None);
        assert_eq!(monitor.input(9), None);
        assert_eq!(monitor.input(0), Some((-3, 9)));
        // next window starts fresh
        assert_eq!(monitor.input(1), None);
        monitor.reset();
        for v in [7, 7, 7] {
            assert_eq!(monitor.input(v), None);
        }
        assert_eq!(monitor.input(7), Some((7, 7)));
    }
}
