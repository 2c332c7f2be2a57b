//! Daemon configuration loading.
//!
//! TOML is the sole config source. Two-layer pattern: `Raw*` types mirror
//! the file shape with every field optional, then `load_*` validates and
//! applies defaults into the strict public types the rest of the daemon
//! uses (forwarder/src/config.rs's `RawConfig` -> `ForwarderConfig` split).

use conduit_queue::OverflowPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub base_dir: PathBuf,
    pub share_dir: PathBuf,
    pub max_procs: usize,
    pub shutdown_grace: Duration,
    pub report_interval: Duration,
    pub pack_pool_capacity: usize,
    pub runners: Vec<RunnerConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    Input,
    Filter,
    Output,
}

#[derive(Debug, Clone)]
pub struct RetryPolicyConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: i64,
    pub jitter_pct: f64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        RetryPolicyConfig {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            max_retries: -1,
            jitter_pct: 0.25,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferingConfig {
    pub max_file_size: u64,
    pub max_buffer_size: u64,
    pub overflow_policy: OverflowPolicy,
    pub cursor_update_count: u64,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub name: String,
    pub kind: RunnerKind,
    pub plugin: String,
    pub matcher: Option<String>,
    pub inbound_capacity: usize,
    pub ticker_interval: Option<Duration>,
    pub can_exit: bool,
    pub retry: RetryPolicyConfig,
    pub buffering: Option<BufferingConfig>,
    pub params: toml::Value,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    base_dir: Option<String>,
    share_dir: Option<String>,
    max_procs: Option<usize>,
    shutdown_grace_ms: Option<u64>,
    report_interval_ms: Option<u64>,
    pack_pool_capacity: Option<usize>,
    runners: Option<Vec<RawRunnerConfig>>,
}

#[derive(Debug, Deserialize)]
struct RawRunnerConfig {
    name: Option<String>,
    kind: Option<String>,
    plugin: Option<String>,
    matcher: Option<String>,
    inbound_capacity: Option<usize>,
    ticker_interval_ms: Option<u64>,
    can_exit: Option<bool>,
    retry: Option<RawRetryConfig>,
    buffering: Option<RawBufferingConfig>,
    #[serde(flatten)]
    params: toml::Value,
}

#[derive(Debug, Deserialize)]
struct RawRetryConfig {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    max_retries: Option<i64>,
    jitter_pct: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawBufferingConfig {
    max_file_size: Option<u64>,
    max_buffer_size: Option<u64>,
    overflow_policy: Option<String>,
    cursor_update_count: Option<u64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<DaemonConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

pub fn load_config_from_str(toml_str: &str) -> Result<DaemonConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let base_dir = raw.base_dir.unwrap_or_else(|| "/var/lib/conduit".to_owned());
    let share_dir = raw.share_dir.unwrap_or_else(|| "/usr/share/conduit".to_owned());
    let max_procs = raw.max_procs.unwrap_or_else(|| {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    });
    let shutdown_grace = Duration::from_millis(raw.shutdown_grace_ms.unwrap_or(5_000));
    let report_interval = Duration::from_millis(raw.report_interval_ms.unwrap_or(60_000));
    let pack_pool_capacity = raw.pack_pool_capacity.unwrap_or(1_000);

    let raw_runners = raw.runners.unwrap_or_default();
    let mut runners = Vec::with_capacity(raw_runners.len());
    for (i, r) in raw_runners.into_iter().enumerate() {
        runners.push(validate_runner(r, i)?);
    }

    Ok(DaemonConfig {
        base_dir: PathBuf::from(base_dir),
        share_dir: PathBuf::from(share_dir),
        max_procs,
        shutdown_grace,
        report_interval,
        pack_pool_capacity,
        runners,
    })
}

/// Parse one dynamically-discovered plugin file (§6): the runner's name
/// comes from its file stem, not the file body, so any `name` field inside
/// the TOML itself is overridden.
pub fn parse_single_runner(name: &str, toml_str: &str) -> Result<RunnerConfig, ConfigError> {
    let mut raw: RawRunnerConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    raw.name = Some(name.to_owned());
    validate_runner(raw, 0)
}

fn validate_runner(r: RawRunnerConfig, index: usize) -> Result<RunnerConfig, ConfigError> {
    let name = r
        .name
        .ok_or_else(|| ConfigError::MissingField(format!("runners[{index}].name")))?;
    let kind_str = r
        .kind
        .ok_or_else(|| ConfigError::MissingField(format!("runners[{index}].kind")))?;
    let kind = match kind_str.as_str() {
        "input" => RunnerKind::Input,
        "filter" => RunnerKind::Filter,
        "output" => RunnerKind::Output,
        other => {
            return Err(ConfigError::InvalidValue(format!(
                "runners[{index}].kind must be input/filter/output, got '{other}'"
            )))
        }
    };
    let plugin = r
        .plugin
        .ok_or_else(|| ConfigError::MissingField(format!("runners[{index}].plugin")))?;

    let retry = match r.retry {
        Some(raw) => RetryPolicyConfig {
            initial_delay: Duration::from_millis(raw.initial_delay_ms.unwrap_or(250)),
            max_delay: Duration::from_millis(raw.max_delay_ms.unwrap_or(30_000)),
            max_retries: raw.max_retries.unwrap_or(-1),
            jitter_pct: raw.jitter_pct.unwrap_or(0.25),
        },
        None => RetryPolicyConfig::default(),
    };

    let buffering = match r.buffering {
        Some(raw) => {
            let overflow_policy = match raw.overflow_policy.as_deref().unwrap_or("block") {
                "shutdown" => OverflowPolicy::Shutdown,
                "drop" => OverflowPolicy::Drop,
                "block" => OverflowPolicy::Block,
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "runners[{index}].buffering.overflow_policy must be shutdown/drop/block, got '{other}'"
                    )))
                }
            };
            Some(BufferingConfig {
                max_file_size: raw.max_file_size.unwrap_or(16 * 1024 * 1024),
                max_buffer_size: raw.max_buffer_size.unwrap_or(0),
                overflow_policy,
                cursor_update_count: raw.cursor_update_count.unwrap_or(1),
            })
        }
        None => None,
    };

    Ok(RunnerConfig {
        name,
        kind,
        plugin,
        matcher: r.matcher,
        inbound_capacity: r.inbound_capacity.unwrap_or(50),
        ticker_interval: r.ticker_interval_ms.map(Duration::from_millis),
        can_exit: r.can_exit.unwrap_or(false),
        retry,
        buffering,
        params: r.params,
    })
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "I/O error: {s}"),
            ConfigError::Parse(s) => write!(f, "parse error: {s}"),
            ConfigError::MissingField(s) => write!(f, "missing required field: {s}"),
            ConfigError::InvalidValue(s) => write!(f, "invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let toml = r#"
            [[runners]]
            name = "access_log"
            kind = "input"
            plugin = "log_streamer_input"
        "#;
        let cfg = load_config_from_str(toml).unwrap();
        assert_eq!(cfg.runners.len(), 1);
        assert_eq!(cfg.runners[0].inbound_capacity, 50);
        assert_eq!(cfg.runners[0].retry.max_retries, -1);
    }

    #[test]
    fn rejects_unknown_runner_kind() {
        let toml = r#"
            [[runners]]
            name = "bad"
            kind = "bogus"
            plugin = "x"
        "#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn parses_buffering_overflow_policy() {
        let toml = r#"
            [[runners]]
            name = "slow_out"
            kind = "output"
            plugin = "file_output"
            [runners.buffering]
            overflow_policy = "drop"
            max_buffer_size = 1024
        "#;
        let cfg = load_config_from_str(toml).unwrap();
        let buffering = cfg.runners[0].buffering.as_ref().unwrap();
        assert_eq!(buffering.overflow_policy, OverflowPolicy::Drop);
        assert_eq!(buffering.max_buffer_size, 1024);
    }
}
