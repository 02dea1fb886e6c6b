use std::time::Duration;

use tokio::time::Instant;

use crate::types::GlobalOrder;

/// Remembers since when the global orders right above the watermark have been missing.
///
/// Only one hole is tracked at a time: the projector never looks past the first one.
#[derive(Debug, Default)]
pub(crate) struct HoleTracker {
    open: Option<OpenHole>,
}

#[derive(Debug, Clone, Copy)]
struct OpenHole {
    start: GlobalOrder,
    end: GlobalOrder,
    first_seen: Instant,
}

impl HoleTracker {
    /// Records that `start..=end` is missing at `now`, and returns how long it has been missing.
    ///
    /// A hole that shrank, because some of its lowest orders committed, keeps its age.
    pub fn observe(&mut self, start: GlobalOrder, end: GlobalOrder, now: Instant) -> Duration {
        match self.open {
            Some(hole) if hole.start <= start && end <= hole.end => {
                self.open = Some(OpenHole { start, end, ..hole });
                now.saturating_duration_since(hole.first_seen)
            }
            _ => {
                self.open = Some(OpenHole {
                    start,
                    end,
                    first_seen: now,
                });
                Duration::ZERO
            }
        }
    }

    /// Forgets the hole once the watermark went past its end, whether its orders committed or
    /// were skipped.
    pub fn release(&mut self, watermark: GlobalOrder) {
        if matches!(self.open, Some(hole) if hole.end <= watermark) {
            self.open = None;
        }
    }
}
