//! Configuration used within sandrun.
//!
//! A few notes on the structure of this crate.
//!
//! * Configuration objects are considered immutable once loaded; they are
//!   constructed either programmatically through the builder or by merging
//!   the default sources with [`Config::load()`].
//! * Every limit here applies per container. Fairness across concurrent
//!   executions is out of scope.

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use bon::Builder;
use figment::Figment;
use figment::providers::Env;
use figment::providers::Format;
use figment::providers::Serialized;
use figment::providers::Toml;
use serde::Deserialize;
use serde::Serialize;

/// The file name used when looking for configuration files for sandrun.
pub const FILE_NAME: &str = "sandrun.toml";

/// The prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "SANDRUN_";

/// The default wall-clock cap for one execution, in seconds.
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 60;

/// The default per-container memory cap.
pub const DEFAULT_MEMORY_LIMIT: &str = "1g";

/// The default CFS quota.
pub const DEFAULT_CPU_QUOTA: i64 = 100_000;

/// The default CFS period.
pub const DEFAULT_CPU_PERIOD: i64 = 100_000;

/// The default sandbox container name prefix.
pub const DEFAULT_CONTAINER_PREFIX: &str = "sandrun";

/// The default SIGTERM-to-SIGKILL grace when stopping a container, in
/// seconds.
pub const DEFAULT_STOP_GRACE_SECS: i64 = 3;

/// A utility function used to set the default value of `execution-timeout-secs`
/// via serde.
fn default_execution_timeout_secs() -> u64 {
    DEFAULT_EXECUTION_TIMEOUT_SECS
}

/// A utility function used to set the default value of `memory-limit` via
/// serde.
fn default_memory_limit() -> String {
    DEFAULT_MEMORY_LIMIT.to_string()
}

/// A utility function used to set the default value of `cpu-quota` via serde.
fn default_cpu_quota() -> i64 {
    DEFAULT_CPU_QUOTA
}

/// A utility function used to set the default value of `cpu-period` via serde.
fn default_cpu_period() -> i64 {
    DEFAULT_CPU_PERIOD
}

/// A utility function used to set the default value of `pull-on-startup` via
/// serde.
fn default_pull_on_startup() -> bool {
    true
}

/// A utility function used to set the default value of `container-prefix` via
/// serde.
fn default_container_prefix() -> String {
    DEFAULT_CONTAINER_PREFIX.to_string()
}

/// A utility function used to set the default value of `stop-grace-secs` via
/// serde.
fn default_stop_grace_secs() -> i64 {
    DEFAULT_STOP_GRACE_SECS
}

/// A global configuration object for sandrun.
#[derive(Builder, Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
#[builder(builder_type = Builder)]
pub struct Config {
    /// The drain deadline for one execution, in seconds.
    ///
    /// The install path gets three times this budget.
    #[serde(default = "default_execution_timeout_secs")]
    #[builder(default = DEFAULT_EXECUTION_TIMEOUT_SECS)]
    execution_timeout_secs: u64,

    /// The per-container memory cap, e.g. `512m` or `1g`.
    #[serde(default = "default_memory_limit")]
    #[builder(default = DEFAULT_MEMORY_LIMIT.to_string(), into)]
    memory_limit: String,

    /// The per-container CFS quota.
    #[serde(default = "default_cpu_quota")]
    #[builder(default = DEFAULT_CPU_QUOTA)]
    cpu_quota: i64,

    /// The per-container CFS period.
    #[serde(default = "default_cpu_period")]
    #[builder(default = DEFAULT_CPU_PERIOD)]
    cpu_period: i64,

    /// Whether to pre-pull every registry image at startup.
    #[serde(default = "default_pull_on_startup")]
    #[builder(default = true)]
    pull_on_startup: bool,

    /// The sandbox container name prefix; also the orphan-sweep key.
    #[serde(default = "default_container_prefix")]
    #[builder(default = DEFAULT_CONTAINER_PREFIX.to_string(), into)]
    container_prefix: String,

    /// The SIGTERM-to-SIGKILL grace when stopping a container, in seconds.
    #[serde(default = "default_stop_grace_secs")]
    #[builder(default = DEFAULT_STOP_GRACE_SECS)]
    stop_grace_secs: i64,
}

impl Config {
    /// Loads the configuration from the default sources.
    ///
    /// Sources, weakest first: built-in defaults, `<CWD>/sandrun.toml`, and
    /// `SANDRUN_*` environment variables (kebab-case keys with `-` written as
    /// `_`, e.g. `SANDRUN_MEMORY_LIMIT=512m`).
    pub fn load() -> Result<Self> {
        let config: Self = Self::default_sources()
            .extract()
            .context("loading sandrun configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Gets a [`Figment`] with the default sources preloaded.
    pub fn default_sources() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if let Ok(mut path) = std::env::current_dir() {
            path.push(FILE_NAME);
            figment = figment.admerge(Toml::file(path));
        }

        figment.admerge(Env::prefixed(ENV_PREFIX).map(|key| key.as_str().replace('_', "-").into()))
    }

    /// Validates the configuration object.
    pub fn validate(&self) -> Result<()> {
        if self.execution_timeout_secs == 0 {
            bail!("`execution-timeout-secs` must be greater than zero");
        }

        if self.container_prefix.is_empty() {
            bail!("`container-prefix` must not be empty");
        }

        // Surfaces bad values at startup instead of at first execution.
        self.memory_limit_bytes()?;
        Ok(())
    }

    /// Gets the execution timeout, in seconds.
    pub fn execution_timeout_secs(&self) -> u64 {
        self.execution_timeout_secs
    }

    /// Gets the raw memory limit string.
    pub fn memory_limit(&self) -> &str {
        &self.memory_limit
    }

    /// Parses the memory limit into bytes.
    ///
    /// Accepts a plain byte count or a `k`/`m`/`g`-suffixed value (case
    /// insensitive).
    pub fn memory_limit_bytes(&self) -> Result<i64> {
        parse_memory(&self.memory_limit)
    }

    /// Gets the CFS quota.
    pub fn cpu_quota(&self) -> i64 {
        self.cpu_quota
    }

    /// Gets the CFS period.
    pub fn cpu_period(&self) -> i64 {
        self.cpu_period
    }

    /// Gets whether to pre-pull every registry image at startup.
    pub fn pull_on_startup(&self) -> bool {
        self.pull_on_startup
    }

    /// Gets the sandbox container name prefix.
    pub fn container_prefix(&self) -> &str {
        &self.container_prefix
    }

    /// Gets the stop grace, in seconds.
    pub fn stop_grace_secs(&self) -> i64 {
        self.stop_grace_secs
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Parses a human-friendly memory size (`1048576`, `512m`, `1g`) into bytes.
fn parse_memory(value: &str) -> Result<i64> {
    let value = value.trim();

    if value.is_empty() {
        bail!("memory limit must not be empty");
    }

    let (digits, multiplier) = match value.chars().last().map(|c| c.to_ascii_lowercase()) {
        Some('k') => (&value[..value.len() - 1], 1024),
        Some('m') => (&value[..value.len() - 1], 1024 * 1024),
        Some('g') => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        _ => (value, 1),
    };

    let count: i64 = digits
        .parse()
        .with_context(|| format!("invalid memory limit `{value}`"))?;

    Ok(count * multiplier)
}
