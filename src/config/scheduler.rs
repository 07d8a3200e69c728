//! Scheduler, plugin and result-buffer configuration structures.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// What to drop when a result buffer is full. The scheduler never blocks on
/// export, so backpressure is not an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest unexported result to make room.
    #[default]
    DropOldest,
    /// Discard the incoming result.
    DropNewest,
}

/// Per-connector result buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Maximum results held per connector.
    #[serde(default = "default_buffer_capacity")]
    pub capacity: usize,
    /// Overflow behaviour.
    #[serde(default)]
    pub overflow: OverflowPolicy,
    /// Maximum results handed to an exporter in one run.
    #[serde(default = "default_export_batch")]
    pub export_batch_max: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_buffer_capacity(),
            overflow: OverflowPolicy::default(),
            export_batch_max: default_export_batch(),
        }
    }
}

/// Per-plugin overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Replaces the capacity declared by the plugin descriptor.
    #[serde(default)]
    pub capacity: Option<u32>,
}

/// Root scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Default per-item execution timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Hard ceiling for any execution, in seconds.
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,
    /// How long `stop` waits for in-flight executions before aborting them.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Tasks waiting for plugin capacity longer than this are logged.
    #[serde(default = "default_capacity_wait_warn_secs")]
    pub capacity_wait_warn_secs: u64,
    /// Result buffer settings.
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Map of plugin name to overrides.
    #[serde(default)]
    pub plugins: HashMap<String, PluginConfig>,
}

const fn default_timeout_secs() -> u64 {
    3
}

const fn default_max_timeout_secs() -> u64 {
    30
}

const fn default_shutdown_grace_secs() -> u64 {
    5
}

const fn default_capacity_wait_warn_secs() -> u64 {
    10
}

const fn default_buffer_capacity() -> usize {
    1000
}

const fn default_export_batch() -> usize {
    100
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_timeout_secs: default_max_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            capacity_wait_warn_secs: default_capacity_wait_warn_secs(),
            buffer: BufferConfig::default(),
            plugins: HashMap::new(),
        }
    }
}

impl BufferConfig {
    /// Validate buffer values.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("buffer capacity must be greater than 0".into());
        }
        if self.export_batch_max == 0 {
            return Err("export_batch_max must be greater than 0".into());
        }
        Ok(())
    }
}

impl SchedulerConfig {
    /// Validate timeouts, the buffer and every plugin override.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_timeout_secs == 0 {
            return Err("max_timeout_secs must be greater than 0".into());
        }
        if self.timeout_secs == 0 || self.timeout_secs > self.max_timeout_secs {
            return Err(format!(
                "timeout_secs must be between 1 and {}",
                self.max_timeout_secs
            ));
        }
        self.buffer.validate()?;
        for (name, plugin) in &self.plugins {
            if plugin.capacity == Some(0) {
                return Err(format!("plugin `{name}` invalid: capacity must be greater than 0"));
            }
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Malformed JSON or values rejected by [`SchedulerConfig::validate`].
    pub fn from_json_str(input: &str) -> AppResult<Self> {
        let cfg: Self =
            serde_json::from_str(input).context("failed to parse scheduler configuration")?;
        cfg.validate()
            .map_err(|e| anyhow!(e))
            .context("invalid scheduler configuration")?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// I/O failure, or the errors of [`SchedulerConfig::from_json_str`].
    pub fn from_json_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json_str(&input).with_context(|| format!("in {}", path.display()))
    }

    /// Build configuration from defaults plus `AGENT_*` environment variables,
    /// loading a `.env` file first if one is present.
    ///
    /// # Errors
    ///
    /// Unparsable overrides or an invalid resulting configuration.
    pub fn from_env() -> AppResult<Self> {
        // a missing .env file is the normal case
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        cfg.apply_overrides(|name| std::env::var(name).ok())
            .map_err(|e| anyhow!(e))
            .context("invalid AGENT_* environment override")?;
        cfg.validate()
            .map_err(|e| anyhow!(e))
            .context("invalid scheduler configuration")?;
        Ok(cfg)
    }

    /// Apply `AGENT_*` overrides from an arbitrary lookup.
    ///
    /// Recognised names: `AGENT_TIMEOUT`, `AGENT_MAX_TIMEOUT`, `AGENT_SHUTDOWN_GRACE`,
    /// `AGENT_CAPACITY_WAIT_WARN`, `AGENT_BUFFER_SIZE`, `AGENT_BUFFER_OVERFLOW`
    /// (`drop_oldest` | `drop_newest`), `AGENT_EXPORT_BATCH`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |name: &str| -> Result<Option<u64>, String> {
            lookup(name)
                .map(|raw| raw.trim().parse::<u64>().map_err(|e| format!("{name}: {e}")))
                .transpose()
        };

        if let Some(v) = number("AGENT_TIMEOUT")? {
            self.timeout_secs = v;
        }
        if let Some(v) = number("AGENT_MAX_TIMEOUT")? {
            self.max_timeout_secs = v;
        }
        if let Some(v) = number("AGENT_SHUTDOWN_GRACE")? {
            self.shutdown_grace_secs = v;
        }
        if let Some(v) = number("AGENT_CAPACITY_WAIT_WARN")? {
            self.capacity_wait_warn_secs = v;
        }
        if let Some(v) = number("AGENT_BUFFER_SIZE")? {
            self.buffer.capacity = usize::try_from(v).map_err(|e| format!("AGENT_BUFFER_SIZE: {e}"))?;
        }
        if let Some(v) = number("AGENT_EXPORT_BATCH")? {
            self.buffer.export_batch_max =
                usize::try_from(v).map_err(|e| format!("AGENT_EXPORT_BATCH: {e}"))?;
        }
        if let Some(raw) = lookup("AGENT_BUFFER_OVERFLOW") {
            self.buffer.overflow = match raw.trim() {
                "drop_oldest" => OverflowPolicy::DropOldest,
                "drop_newest" => OverflowPolicy::DropNewest,
                other => return Err(format!("AGENT_BUFFER_OVERFLOW: unknown policy `{other}`")),
            };
        }
        Ok(())
    }

    /// Default per-item execution timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Hard execution ceiling.
    #[must_use]
    pub const fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.max_timeout_secs)
    }

    /// Shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Capacity wait warning threshold.
    #[must_use]
    pub const fn capacity_wait_warn(&self) -> Duration {
        Duration::from_secs(self.capacity_wait_warn_secs)
    }
}
