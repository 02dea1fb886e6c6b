use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::GapMonitorConfig;
use crate::store::EventStore;
use crate::types::GlobalOrder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Critical,
}

/// A run of consecutive global orders missing for longer than the grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub start: GlobalOrder,
    /// Last missing order of the run, inclusive.
    pub end: GlobalOrder,
    /// Time since the first audit that found the run missing.
    pub age: Duration,
    pub severity: Severity,
}

impl Gap {
    pub fn orders(&self) -> RangeInclusive<GlobalOrder> {
        self.start..=self.end
    }

    /// Number of missing orders in the run.
    pub fn count(&self) -> u64 {
        (self.end - self.start + 1) as u64
    }
}

/// Outcome of a single audit of the global order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapReport {
    /// Lowest and highest committed order in the audited window, `None` for an empty store.
    pub range: Option<(GlobalOrder, GlobalOrder)>,
    /// Missing runs past the grace period, ascending.
    pub gaps: Vec<Gap>,
    /// Missing runs still within the grace period, most likely uncommitted transactions.
    pub in_flight: Vec<RangeInclusive<GlobalOrder>>,
    /// Orders reported as gaps by an earlier audit that have committed since.
    pub late_fills: Vec<GlobalOrder>,
}

impl GapReport {
    /// Nothing missing past the grace period, and nothing committed late.
    pub fn is_clean(&self) -> bool {
        self.gaps.is_empty() && self.late_fills.is_empty()
    }

    /// Every missing order past the grace period, ascending.
    pub fn confirmed(&self) -> impl Iterator<Item = GlobalOrder> + '_ {
        self.gaps.iter().flat_map(Gap::orders)
    }

    pub fn critical(&self) -> impl Iterator<Item = &Gap> + '_ {
        self.gaps.iter().filter(|gap| gap.severity == Severity::Critical)
    }
}

/// Audits the most recent global orders of a store for numbers that never showed up.
///
/// A missing number is either a transaction still in flight, an aborted transaction, or a
/// transaction that will commit much later than expected. The monitor cannot tell them apart on
/// a single look: it tracks since when each run of numbers is missing and reports it only after the
/// grace period. It only reads from the store, and never holds anything writers or projectors wait on.
///
/// Missing numbers are handled as runs, so the cost of an audit depends on the size of the window,
/// not on how far apart two committed orders are.
pub struct GapMonitor<S> {
    store: S,
    config: GapMonitorConfig,
    /// Missing runs of the last audit, by first order: last order and when first seen missing.
    missing: BTreeMap<GlobalOrder, (GlobalOrder, Instant)>,
    /// Runs of the last audit that were past the grace period.
    reported: Vec<RangeInclusive<GlobalOrder>>,
}

impl<S> GapMonitor<S>
where
    S: EventStore,
{
    pub fn new(store: S, config: GapMonitorConfig) -> Self {
        Self {
            store,
            config,
            missing: BTreeMap::new(),
            reported: vec![],
        }
    }

    pub fn config(&self) -> &GapMonitorConfig {
        &self.config
    }

    /// Audits the last `last_n` committed global orders.
    pub async fn check(&mut self, last_n: usize) -> Result<GapReport, S::Error> {
        let global_orders: Vec<GlobalOrder> = self.store.recent_global_orders(last_n).await?;
        Ok(self.audit(&global_orders, Instant::now()))
    }

    /// Audits every `every`, logging each report, until the store fails.
    pub async fn run(mut self, every: Duration, last_n: usize) -> S::Error {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match self.check(last_n).await {
                Ok(report) => emit(&report),
                Err(error) => {
                    tracing::error!(error = %error, "gap monitor could not read the global order");
                    return error;
                }
            }
        }
    }

    /// [`GapMonitor::run`] with the configured interval and sample size.
    pub async fn run_on_schedule(self) -> S::Error {
        let (every, last_n) = (self.config.interval, self.config.sample_size);
        self.run(every, last_n).await
    }

    fn audit(&mut self, global_orders: &[GlobalOrder], now: Instant) -> GapReport {
        let (Some(&min), Some(&max)) = (global_orders.first(), global_orders.last()) else {
            self.missing.clear();
            self.reported.clear();
            return GapReport {
                range: None,
                gaps: vec![],
                in_flight: vec![],
                late_fills: vec![],
            };
        };

        let late_fills: Vec<GlobalOrder> = self
            .reported
            .iter()
            .flat_map(|run| {
                let from: usize = global_orders.partition_point(|order| order < run.start());
                let to: usize = global_orders.partition_point(|order| order <= run.end());
                global_orders[from..to].iter().copied()
            })
            .collect();

        let mut missing: BTreeMap<GlobalOrder, (GlobalOrder, Instant)> = BTreeMap::new();
        let mut gaps: Vec<Gap> = vec![];
        let mut in_flight: Vec<RangeInclusive<GlobalOrder>> = vec![];

        for pair in global_orders.windows(2) {
            let (start, end) = (pair[0] + 1, pair[1] - 1);
            if start > end {
                continue;
            }

            // Missing runs only shrink or split as orders commit: a run is as old as the run of the
            // last audit it overlaps. Runs that slid out of the window are forgotten.
            let first_seen: Instant = self
                .missing
                .range(..=end)
                .next_back()
                .filter(|(_, (previous_end, _))| *previous_end >= start)
                .map_or(now, |(_, (_, first_seen))| *first_seen);
            missing.insert(start, (end, first_seen));

            let age: Duration = now.saturating_duration_since(first_seen);
            if age < self.config.grace_period {
                in_flight.push(start..=end);
                continue;
            }

            let severity = if age >= self.config.critical_after {
                Severity::Critical
            } else {
                Severity::Warning
            };

            gaps.push(Gap {
                start,
                end,
                age,
                severity,
            });
        }

        self.missing = missing;
        self.reported = gaps.iter().map(Gap::orders).collect();

        GapReport {
            range: Some((min, max)),
            gaps,
            in_flight,
            late_fills,
        }
    }
}

fn emit(report: &GapReport) {
    let Some((min, max)) = report.range else {
        tracing::debug!("gap audit found an empty store");
        return;
    };

    for gap in &report.gaps {
        match gap.severity {
            Severity::Critical => tracing::error!(
                start = gap.start,
                end = gap.end,
                missing = gap.count(),
                age = ?gap.age,
                "global orders missing, transaction most likely aborted or lost"
            ),
            Severity::Warning => tracing::warn!(
                start = gap.start,
                end = gap.end,
                missing = gap.count(),
                age = ?gap.age,
                "global orders missing past the grace period"
            ),
        }
    }

    if !report.late_fills.is_empty() {
        tracing::warn!(
            late_fills = ?report.late_fills,
            "global orders committed after being reported missing, projectors may have skipped them"
        );
    }

    tracing::debug!(
        min,
        max,
        gaps = report.gaps.len(),
        in_flight = report.in_flight.len(),
        late_fills = report.late_fills.len(),
        "gap audit done"
    );
}
