//! Beat-synced screen pulse.

use std::ops::Range;

use crate::{PresentationMode, RenderSurface};

/// Tolerance for clock readings that land a hair before a beat.
const BEAT_EPSILON: f64 = 1e-9;

/// Emits beat indices as a clock passes them. Polled from the controller
/// loop with the time elapsed since the track anchor, so there is a single
/// scheduler regardless of how many beats the track has.
#[derive(Debug, Clone)]
pub struct BeatTracker {
    beat_seconds: f64,
    beats: u32,
    next: u32,
}

impl BeatTracker {
    pub fn new(beat_seconds: f64, beats: u32) -> Self {
        Self {
            beat_seconds: beat_seconds.max(f64::EPSILON),
            beats,
            next: 0,
        }
    }

    /// Beats whose offset is at or before `elapsed` seconds and that have not
    /// been reported yet. Late polls report every missed beat at once.
    pub fn due(&mut self, elapsed: f64) -> Range<u32> {
        let start = self.next;
        if elapsed < 0.0 || start >= self.beats {
            return start..start;
        }

        let reached = ((elapsed + BEAT_EPSILON) / self.beat_seconds).floor() as u64 + 1;
        let end = reached.min(u64::from(self.beats)) as u32;
        self.next = end.max(start);
        start..self.next
    }

    /// Beats reported so far.
    pub fn emitted(&self) -> u32 {
        self.next
    }

    /// Whether every beat of the grid has been reported.
    pub fn is_finished(&self) -> bool {
        self.next >= self.beats
    }
}

/// Shakes the screen and pumps the pulse targets for one beat. The caller
/// clears the pump after a short delay.
pub fn trigger<S: RenderSurface + ?Sized>(surface: &mut S) {
    surface.restart_mode(PresentationMode::Shake);
    surface.set_pump(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySurface;

    #[test]
    fn reports_each_beat_once() {
        let mut tracker = BeatTracker::new(0.5, 4);
        assert_eq!(tracker.due(0.0), 0..1);
        assert_eq!(tracker.due(0.2), 1..1);
        assert_eq!(tracker.due(0.5), 1..2);
        assert_eq!(tracker.due(0.5), 2..2);
        assert_eq!(tracker.due(1.7), 2..4);
        assert!(tracker.is_finished());
        assert_eq!(tracker.due(10.0), 4..4);
    }

    #[test]
    fn ignores_time_before_anchor() {
        let mut tracker = BeatTracker::new(0.5, 4);
        assert!(tracker.due(-0.1).is_empty());
        assert_eq!(tracker.emitted(), 0);
    }

    #[test]
    fn trigger_restarts_shake_and_pumps() {
        let mut surface = MemorySurface::new();
        trigger(&mut surface);
        assert!(surface.is_mode_enabled(PresentationMode::Shake));
        assert!(surface.is_pumped());
        assert_eq!(surface.stats().restarts, 1);
    }
}
