//! Runtime adapters, bootstrap helpers and API surface.

pub mod api;
pub mod bootstrap;
pub mod tokio_spawner;

pub use api::{
    format_check, handle_check, health, list_plugins, CheckRequest, CheckResponse, Health,
    PluginSnapshot,
};
pub use bootstrap::{
    check_hostname, resolve_hostname, resolve_hostname_blocking, BootstrapError,
    HostnameOptions, DEFAULT_HOSTNAME_ITEM, DEFAULT_TIMEOUT_SECS, HOSTNAME_MAX_LEN,
};
pub use tokio_spawner::{build_runtime, TokioSpawner};
