//! Rotation job configuration.
//!
//! All settings come from environment variables, read once at startup into an
//! immutable [`RotatorConfig`] that is passed to every component. Numeric
//! values are parsed leniently: a missing, blank or malformed value silently
//! falls back to its default so a typo in a CronJob manifest never stops the
//! job from running.

use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use tracing::warn;

use crate::error::ConfigError;
use crate::model::Labels;

/// Label selecting the nodes this job is allowed to rotate.
pub const DEFAULT_MANAGED_NODE_SELECTOR: &str = "provisioner.cast.ai/managed-by=cast.ai";

/// Workloads whose host nodes are rotated last.
pub const DEFAULT_CRITICAL_WORKLOADS: &str =
    "app.kubernetes.io/name=castai-agent,app.kubernetes.io/name=castai-cluster-controller";

/// Substring of the job's own pod name, used to find the node it runs on.
pub const DEFAULT_SELF_POD_SUBSTRING: &str = "castai-node-drainer";

/// Format of `LAST_RUN`.
const LAST_RUN_FORMAT: &str = "%H:%M:%S";

/// A single `label=value` equality match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticalSelector {
    pub key: String,
    pub value: String,
}

impl CriticalSelector {
    pub fn matches(&self, labels: &Labels) -> bool {
        labels.get(&self.key) == Some(&self.value)
    }
}

impl FromStr for CriticalSelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidSelector(s.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::InvalidSelector(s.to_string()));
        }
        Ok(Self {
            key: key.to_string(),
            value: value.trim().to_string(),
        })
    }
}

/// Parse a comma-separated `label=value` list, skipping malformed entries.
pub fn parse_critical_workloads(raw: &str) -> Vec<CriticalSelector> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse() {
            Ok(selector) => Some(selector),
            Err(e) => {
                warn!(error = %e, "Ignoring critical workload selector");
                None
            }
        })
        .collect()
}

/// Settings for one rotation run.
#[derive(Debug, Clone)]
pub struct RotatorConfig {
    /// Settle time after new ready nodes were found (`DELAY_AFTER_READY`)
    pub delay_after_ready: Duration,
    /// Selectors marking critical workloads (`CRITICAL_WORKLOADS`)
    pub critical_workloads: Vec<CriticalSelector>,
    /// Sleep before touching the cluster (`STARTUP_SLEEP_TIME`)
    pub startup_sleep: Duration,
    /// Delay between non-critical rotation and the pending-pod check
    /// (`DELAY_WAIT_PENDING_PODS`)
    pub delay_wait_pending_pods: Duration,
    /// New ready nodes required before critical rotation (`MIN_READY_NODES`)
    pub min_ready_nodes: usize,
    /// Substring identifying the job's own pod (`CRON_JOB_POD_SUBSTRING`)
    pub self_pod_substring: String,
    /// Age threshold in days (`MIN_NODE_AGE_DAYS`)
    pub min_node_age_days: u32,
    /// Bound on the external drain (`NODE_DRAIN_TIMEOUT`)
    pub node_drain_timeout: Duration,
    /// Readiness polls before giving up (`TOTAL_WAIT_CYCLES`)
    pub total_wait_cycles: u32,
    /// Local wall-clock time after which the job stops (`LAST_RUN`)
    pub last_run: Option<NaiveTime>,
    /// Label selector for managed nodes (`MANAGED_NODE_SELECTOR`)
    pub managed_node_selector: String,
    /// Rotate the job's own host last (`ROTATE_SELF_NODE`)
    pub rotate_self_node: bool,
    /// Optional bound on the per-controller Pending wait (`PENDING_WAIT_TIMEOUT`).
    /// `None` waits until the pods are scheduled, however long that takes.
    pub pending_wait_timeout: Option<Duration>,
    /// Reporting instance on emitted events (`HOSTNAME`)
    pub reporting_instance: String,
    pub pending_poll_interval: Duration,
    pub eviction_settle: Duration,
    pub readiness_poll_interval: Duration,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            delay_after_ready: Duration::from_secs(10),
            critical_workloads: parse_critical_workloads(DEFAULT_CRITICAL_WORKLOADS),
            startup_sleep: Duration::from_secs(20),
            delay_wait_pending_pods: Duration::from_secs(20),
            min_ready_nodes: 1,
            self_pod_substring: DEFAULT_SELF_POD_SUBSTRING.to_string(),
            min_node_age_days: 7,
            node_drain_timeout: Duration::from_secs(1200),
            total_wait_cycles: 18,
            last_run: None,
            managed_node_selector: DEFAULT_MANAGED_NODE_SELECTOR.to_string(),
            rotate_self_node: false,
            pending_wait_timeout: None,
            reporting_instance: "unknown".to_string(),
            pending_poll_interval: Duration::from_secs(5),
            eviction_settle: Duration::from_secs(5),
            readiness_poll_interval: Duration::from_secs(10),
        }
    }
}

impl RotatorConfig {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let secs = |key: &str, default: Duration| {
            Duration::from_secs(lenient(lookup(key).as_deref(), default.as_secs()))
        };

        let critical_workloads = lookup("CRITICAL_WORKLOADS")
            .map_or(defaults.critical_workloads.clone(), |raw| {
                parse_critical_workloads(&raw)
            });

        let self_pod_substring = non_blank(lookup("CRON_JOB_POD_SUBSTRING"))
            .or_else(|| non_blank(lookup("CRON_JOB_PREFIX")))
            .unwrap_or(defaults.self_pod_substring);

        let last_run = non_blank(lookup("LAST_RUN")).and_then(|raw| {
            NaiveTime::parse_from_str(raw.trim(), LAST_RUN_FORMAT)
                .map_err(|e| warn!(value = %raw, error = %e, "Ignoring unparseable LAST_RUN"))
                .ok()
        });

        let pending_wait_timeout = match lenient(lookup("PENDING_WAIT_TIMEOUT").as_deref(), 0) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            delay_after_ready: secs("DELAY_AFTER_READY", defaults.delay_after_ready),
            critical_workloads,
            startup_sleep: secs("STARTUP_SLEEP_TIME", defaults.startup_sleep),
            delay_wait_pending_pods: secs(
                "DELAY_WAIT_PENDING_PODS",
                defaults.delay_wait_pending_pods,
            ),
            min_ready_nodes: lenient(lookup("MIN_READY_NODES").as_deref(), defaults.min_ready_nodes),
            self_pod_substring,
            min_node_age_days: lenient(
                lookup("MIN_NODE_AGE_DAYS").as_deref(),
                defaults.min_node_age_days,
            ),
            node_drain_timeout: secs("NODE_DRAIN_TIMEOUT", defaults.node_drain_timeout),
            total_wait_cycles: lenient(
                lookup("TOTAL_WAIT_CYCLES").as_deref(),
                defaults.total_wait_cycles,
            ),
            last_run,
            managed_node_selector: non_blank(lookup("MANAGED_NODE_SELECTOR"))
                .unwrap_or(defaults.managed_node_selector),
            rotate_self_node: lookup("ROTATE_SELF_NODE")
                .as_deref()
                .is_some_and(is_truthy),
            pending_wait_timeout,
            reporting_instance: non_blank(lookup("HOSTNAME"))
                .unwrap_or(defaults.reporting_instance),
            ..defaults
        }
    }

    /// Whether `now` (local wall-clock time) is past the configured `LAST_RUN`.
    pub fn last_run_passed(&self, now: NaiveTime) -> bool {
        self.last_run.is_some_and(|cutoff| now > cutoff)
    }
}

/// Parse `raw` as `T`, falling back to `default` when unset, blank or invalid.
pub fn lenient<T: FromStr>(raw: Option<&str>, default: T) -> T {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
