use std::sync::atomic::{AtomicI64, Ordering};

use crate::types::GlobalOrder;

/// Hands out global order numbers to events being appended.
///
/// Implementors must never issue the same number twice, and must not wait on other writers to do
/// so: a number taken by a transaction that later aborts is simply lost, leaving a gap.
pub trait Sequencer: Send + Sync {
    /// Issues the next global order number.
    fn next_order(&self) -> GlobalOrder;

    /// The highest number issued so far, committed or not.
    fn last_issued(&self) -> GlobalOrder;
}

/// Lock free [`Sequencer`] scoped to a single store, backed by an atomic counter.
#[derive(Debug, Default)]
pub struct AtomicSequencer {
    last: AtomicI64,
}

impl AtomicSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sequencer whose first issued number is `order + 1`. Used when reopening a log
    /// that already contains events.
    pub fn starting_after(order: GlobalOrder) -> Self {
        Self {
            last: AtomicI64::new(order),
        }
    }
}

impl Sequencer for AtomicSequencer {
    fn next_order(&self) -> GlobalOrder {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn last_issued(&self) -> GlobalOrder {
        self.last.load(Ordering::SeqCst)
    }
}
