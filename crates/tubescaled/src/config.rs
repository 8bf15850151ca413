//! tubescaled.toml configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! daemon that talks to `beanstalkd:11300`, runs in-cluster, and ticks
//! every five seconds. Durations are strings: `"5s"`, `"500ms"`, `"2m"`,
//! or a bare number of seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use tubescale_autoscale::{Backoff, DEFAULT_NAME_PREFIX};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub queue: QueueConfig,
    pub orchestrator: OrchestratorConfig,
    pub controller: ControllerConfig,
    pub retry: RetryConfig,
}

/// `[queue]`: where beanstalkd lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// `host:port` of the beanstalkd server.
    pub addr: String,
    /// Bound on connecting and on every command.
    pub timeout: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            addr: "beanstalkd:11300".to_string(),
            timeout: "5s".to_string(),
        }
    }
}

/// `[orchestrator]`: the Kubernetes side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// API server URL. When unset the in-cluster service account is used.
    pub server: Option<String>,
    /// Service-account directory to take the token and CA bundle from
    /// when `server` is set.
    pub credentials_dir: Option<PathBuf>,
    /// Namespace override. Defaults to the service account's namespace.
    pub namespace: Option<String>,
    /// ReplicaSet template document.
    pub template: PathBuf,
    /// Prefix joined with the tube name to form the ReplicaSet name.
    pub name_prefix: String,
    /// Per-request timeout.
    pub timeout: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            server: None,
            credentials_dir: None,
            namespace: None,
            template: PathBuf::from("./consumer.yml"),
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            timeout: "5s".to_string(),
        }
    }
}

/// `[controller]`: loop cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Pause between the end of one tick and the start of the next.
    pub interval: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval: "5s".to_string(),
        }
    }
}

/// `[retry]`: conflict retries inside one reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub steps: u32,
    pub initial: String,
    pub factor: f64,
    pub jitter: f64,
    pub cap: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let backoff = Backoff::default();
        Self {
            steps: backoff.steps,
            initial: format!("{}ms", backoff.initial.as_millis()),
            factor: backoff.factor,
            jitter: backoff.jitter,
            cap: format!("{}s", backoff.cap.as_secs()),
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: DaemonConfig =
            toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Check that every duration parses and every number is in range.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.queue.timeout()?;
        self.orchestrator.timeout()?;
        let interval = self.controller.interval()?;
        if interval.is_zero() {
            bail!("controller.interval must be greater than zero");
        }
        self.retry.backoff()?;
        if self.queue.addr.trim().is_empty() {
            bail!("queue.addr must not be empty");
        }
        Ok(())
    }
}

impl QueueConfig {
    pub fn timeout(&self) -> anyhow::Result<Duration> {
        duration_field("queue.timeout", &self.timeout)
    }
}

impl OrchestratorConfig {
    pub fn timeout(&self) -> anyhow::Result<Duration> {
        duration_field("orchestrator.timeout", &self.timeout)
    }
}

impl ControllerConfig {
    pub fn interval(&self) -> anyhow::Result<Duration> {
        duration_field("controller.interval", &self.interval)
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> anyhow::Result<Backoff> {
        if self.steps == 0 {
            bail!("retry.steps must be at least 1");
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            bail!("retry.factor must be a finite number >= 1.0");
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            bail!("retry.jitter must be between 0.0 and 1.0");
        }
        Ok(Backoff {
            steps: self.steps,
            initial: duration_field("retry.initial", &self.initial)?,
            factor: self.factor,
            jitter: self.jitter,
            cap: duration_field("retry.cap", &self.cap)?,
        })
    }
}

fn duration_field(field: &str, value: &str) -> anyhow::Result<Duration> {
    parse_duration(value).with_context(|| format!("{field}: invalid duration {value:?}"))
}

/// Parse `"5s"`, `"500ms"`, `"2m"`, or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
