//! Configuration models for the scheduler, plugins and result buffers.

pub mod scheduler;

pub use scheduler::{BufferConfig, OverflowPolicy, PluginConfig, SchedulerConfig};
