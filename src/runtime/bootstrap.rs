//! Agent bootstrap helpers that run before any connector exists.
//!
//! The hostname is either configured explicitly or collected through the direct
//! check path, so a running [`Manager`] is required even though no server
//! connection has been made yet.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::core::{Manager, SchedulerError};

/// Longest accepted hostname.
pub const HOSTNAME_MAX_LEN: usize = 128;

/// Item used when neither a hostname nor a hostname item is configured.
pub const DEFAULT_HOSTNAME_ITEM: &str = "system.hostname";

/// Check timeout used when none is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 3;

/// Hostname-related configuration.
#[derive(Debug, Clone)]
pub struct HostnameOptions {
    /// Explicit hostname; wins over `hostname_item`.
    pub hostname: Option<String>,
    /// Item used to collect the hostname.
    pub hostname_item: Option<String>,
    /// Check timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HostnameOptions {
    fn default() -> Self {
        Self {
            hostname: None,
            hostname_item: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Hostname resolution failure.
#[derive(Debug, Clone, Error)]
pub enum BootstrapError {
    /// The configured hostname is unusable.
    #[error("invalid \"Hostname\" configuration parameter: {0}")]
    InvalidHostname(String),
    /// The hostname item failed or returned an unusable value.
    #[error("cannot get system hostname using \"{item}\" item {origin} configuration parameter: {reason}")]
    ItemFailed {
        /// Item key that was checked.
        item: String,
        /// Whether the item was configured or defaulted.
        origin: &'static str,
        /// What went wrong.
        reason: String,
    },
}

const SPECIFIED: &str = "specified by \"HostnameItem\"";
const DEFAULTED: &str = "as default for \"HostnameItem\"";

/// Validate hostname characters: ASCII alphanumerics, `.`, space, `_` and `-`.
///
/// # Errors
///
/// Names the first character that is not allowed.
pub fn check_hostname(hostname: &str) -> Result<(), String> {
    if hostname.is_empty() {
        return Err("host name cannot be empty".into());
    }
    match hostname
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | ' ' | '_' | '-')))
    {
        Some(c) => Err(format!("character \"{c}\" is not allowed in host name")),
        None => Ok(()),
    }
}

/// Resolve the agent hostname.
///
/// # Errors
///
/// Returns a [`BootstrapError`] naming the offending parameter or item.
pub async fn resolve_hostname(
    manager: &Manager,
    options: &HostnameOptions,
) -> Result<String, BootstrapError> {
    if let Some(hostname) = explicit(options)? {
        return Ok(hostname);
    }
    let (item, origin) = hostname_item(options);
    let outcome = manager.perform_task(item, timeout(options)).await;
    finish(item, origin, outcome)
}

/// Blocking variant of [`resolve_hostname`] for callers outside the runtime.
///
/// # Errors
///
/// As [`resolve_hostname`].
pub fn resolve_hostname_blocking(
    manager: &Manager,
    options: &HostnameOptions,
) -> Result<String, BootstrapError> {
    if let Some(hostname) = explicit(options)? {
        return Ok(hostname);
    }
    let (item, origin) = hostname_item(options);
    let outcome = manager.perform_task_blocking(item, timeout(options));
    finish(item, origin, outcome)
}

fn explicit(options: &HostnameOptions) -> Result<Option<String>, BootstrapError> {
    let Some(hostname) = options.hostname.as_deref().filter(|h| !h.is_empty()) else {
        return Ok(None);
    };
    if options.hostname_item.as_deref().is_some_and(|i| !i.is_empty()) {
        warn!("both \"Hostname\" and \"HostnameItem\" configuration parameter defined, using \"Hostname\"");
    }
    if hostname.len() > HOSTNAME_MAX_LEN {
        return Err(BootstrapError::InvalidHostname(format!(
            "configuration parameter cannot be longer than {HOSTNAME_MAX_LEN} characters"
        )));
    }
    check_hostname(hostname).map_err(BootstrapError::InvalidHostname)?;
    Ok(Some(hostname.to_string()))
}

fn hostname_item(options: &HostnameOptions) -> (&str, &'static str) {
    match options.hostname_item.as_deref().filter(|i| !i.is_empty()) {
        Some(item) => (item, SPECIFIED),
        None => (DEFAULT_HOSTNAME_ITEM, DEFAULTED),
    }
}

const fn timeout(options: &HostnameOptions) -> Duration {
    Duration::from_secs(options.timeout_secs)
}

fn finish(
    item: &str,
    origin: &'static str,
    outcome: Result<String, SchedulerError>,
) -> Result<String, BootstrapError> {
    let fail = |origin: &'static str, reason: String| BootstrapError::ItemFailed {
        item: item.to_string(),
        origin,
        reason,
    };
    let mut hostname = outcome.map_err(|e| fail(origin, e.to_string()))?;
    if hostname.is_empty() {
        return Err(fail(SPECIFIED, "value is empty".into()));
    }
    if hostname.len() > HOSTNAME_MAX_LEN {
        let mut end = HOSTNAME_MAX_LEN;
        while !hostname.is_char_boundary(end) {
            end -= 1;
        }
        hostname.truncate(end);
        warn!(
            "the returned value of \"{item}\" item specified by \"HostnameItem\" configuration parameter is too long, using first {HOSTNAME_MAX_LEN} characters"
        );
    }
    check_hostname(&hostname).map_err(|reason| fail(SPECIFIED, reason))?;
    Ok(hostname)
}
