use std::time::Duration;

/// Tuning of a [`crate::projector::Projector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectorConfig {
    /// How long a missing global order may stay missing before the projector considers it
    /// aborted and moves past it. Should exceed the longest expected write transaction.
    pub lag_window: Duration,
    /// How long the projector may stay behind the write frontier without advancing before it
    /// reports itself stalled.
    pub stall_timeout: Duration,
    /// Sleep between polls when there was nothing to apply.
    pub poll_interval: Duration,
    /// Maximum number of events fetched per poll.
    pub batch_size: usize,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            lag_window: Duration::from_secs(10),
            stall_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
            batch_size: 500,
        }
    }
}

impl ProjectorConfig {
    pub fn with_lag_window(self, lag_window: Duration) -> Self {
        Self { lag_window, ..self }
    }

    pub fn with_stall_timeout(self, stall_timeout: Duration) -> Self {
        Self { stall_timeout, ..self }
    }

    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Self { poll_interval, ..self }
    }

    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            ..self
        }
    }
}

/// Tuning of a [`crate::gap::GapMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapMonitorConfig {
    /// Missing orders younger than this are in-flight transactions, not gaps.
    pub grace_period: Duration,
    /// Gaps older than this are reported as critical.
    pub critical_after: Duration,
    /// How many of the most recent global orders each audit looks at.
    pub sample_size: usize,
    /// Time between audits when running on a schedule.
    pub interval: Duration,
}

impl Default for GapMonitorConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(10),
            critical_after: Duration::from_secs(300),
            sample_size: 1_000,
            interval: Duration::from_secs(30),
        }
    }
}

impl GapMonitorConfig {
    pub fn with_grace_period(self, grace_period: Duration) -> Self {
        Self { grace_period, ..self }
    }

    pub fn with_critical_after(self, critical_after: Duration) -> Self {
        Self { critical_after, ..self }
    }

    pub fn with_sample_size(self, sample_size: usize) -> Self {
        Self { sample_size, ..self }
    }

    pub fn with_interval(self, interval: Duration) -> Self {
        Self { interval, ..self }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a non negative integer, got `{value}`")]
    InvalidNumber { key: String, value: String },
}

/// Settings read from `EVENTLINE_*` environment variables. Durations are in milliseconds.
///
/// | variable                               | field                          |
/// |----------------------------------------|--------------------------------|
/// | `EVENTLINE_DATABASE_URL`               | `database_url`                 |
/// | `EVENTLINE_PROJECTOR_LAG_WINDOW_MS`    | `projector.lag_window`         |
/// | `EVENTLINE_PROJECTOR_STALL_TIMEOUT_MS` | `projector.stall_timeout`      |
/// | `EVENTLINE_PROJECTOR_POLL_INTERVAL_MS` | `projector.poll_interval`      |
/// | `EVENTLINE_PROJECTOR_BATCH_SIZE`       | `projector.batch_size`         |
/// | `EVENTLINE_GAP_GRACE_PERIOD_MS`        | `gap_monitor.grace_period`     |
/// | `EVENTLINE_GAP_CRITICAL_AFTER_MS`      | `gap_monitor.critical_after`   |
/// | `EVENTLINE_GAP_SAMPLE_SIZE`            | `gap_monitor.sample_size`      |
/// | `EVENTLINE_GAP_INTERVAL_MS`            | `gap_monitor.interval`         |
///
/// Unset variables keep their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub database_url: Option<String>,
    pub projector: ProjectorConfig,
    pub gap_monitor: GapMonitorConfig,
}

impl Settings {
    const PREFIX: &'static str = "EVENTLINE_";

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the settings from any key/value source, e.g. a map in tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            let key: String = format!("{}{}", Self::PREFIX, name);
            lookup(&key).map(|value| (key, value))
        };

        let mut settings = Self {
            database_url: get("DATABASE_URL").map(|(_, value)| value),
            ..Self::default()
        };

        if let Some(entry) = get("PROJECTOR_LAG_WINDOW_MS") {
            settings.projector.lag_window = parse_millis(entry)?;
        }
        if let Some(entry) = get("PROJECTOR_STALL_TIMEOUT_MS") {
            settings.projector.stall_timeout = parse_millis(entry)?;
        }
        if let Some(entry) = get("PROJECTOR_POLL_INTERVAL_MS") {
            settings.projector.poll_interval = parse_millis(entry)?;
        }
        if let Some(entry) = get("PROJECTOR_BATCH_SIZE") {
            settings.projector = settings.projector.with_batch_size(parse_number(entry)? as usize);
        }
        if let Some(entry) = get("GAP_GRACE_PERIOD_MS") {
            settings.gap_monitor.grace_period = parse_millis(entry)?;
        }
        if let Some(entry) = get("GAP_CRITICAL_AFTER_MS") {
            settings.gap_monitor.critical_after = parse_millis(entry)?;
        }
        if let Some(entry) = get("GAP_SAMPLE_SIZE") {
            settings.gap_monitor.sample_size = parse_number(entry)? as usize;
        }
        if let Some(entry) = get("GAP_INTERVAL_MS") {
            settings.gap_monitor.interval = parse_millis(entry)?;
        }

        Ok(settings)
    }
}

fn parse_number((key, value): (String, String)) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidNumber { key, value })
}

fn parse_millis(entry: (String, String)) -> Result<Duration, ConfigError> {
    parse_number(entry).map(Duration::from_millis)
}
