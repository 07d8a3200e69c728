//! # Agent Task Manager
//!
//! The task scheduler at the heart of a host-monitoring agent.
//!
//! Plugins answer item keys (`system.hostname`, `vfs.fs.size[/,free]`, ...). The
//! manager decides *when* each check runs and on *which* plugin, keeps every
//! plugin within its concurrency capacity, and routes results either back to a
//! waiting caller or into a per-connector buffer for later export.
//!
//! ## Core Problem Solved
//!
//! An agent polls many items on independent intervals while also answering
//! ad-hoc checks from servers and from its own bootstrap:
//!
//! - **Bounded plugins**: some collectors must never run twice at once
//! - **Hung collectors**: a stuck plugin call must not stall anything else
//! - **Overruns**: a slow periodic check skips missed windows instead of bursting
//! - **Slow consumers**: result buffers are bounded and never block scheduling
//!
//! ## Key Features
//!
//! - **Timer Queue**: earliest-due first, direct checks ahead of periodic ones
//! - **Plugin Executors**: per-plugin capacity with a FIFO wait list
//! - **Isolation**: per-execution timeout and panic containment
//! - **Result Sink**: drop-oldest (or drop-newest) buffers per connector, pull or push export
//! - **Blocking and async APIs**: usable from bootstrap code before any runtime work
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use agent_taskmgr::builders::ManagerBuilder;
//! use agent_taskmgr::core::{PeriodicRequest, PluginDescriptor};
//!
//! let manager = ManagerBuilder::new()
//!     .plugin(
//!         PluginDescriptor::new("system", 1).with_keys(["system.hostname"]),
//!         Arc::new(Hostname),
//!     )
//!     .build()?;
//! manager.start()?;
//!
//! let hostname = manager
//!     .perform_task("system.hostname", Duration::from_secs(3))
//!     .await?;
//! manager.submit_periodic(PeriodicRequest::new("system.hostname", Duration::from_secs(60)))?;
//!
//! manager.stop().await;
//! ```
//!
//! For complete examples, see the integration tests under `tests/`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: tasks, plugins, executors and the manager.
pub mod core;
/// Configuration models for the scheduler, plugins and result buffers.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Infrastructure adapters for the timer queue and result buffers.
pub mod infra;
/// Runtime adapters, bootstrap helpers and API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
