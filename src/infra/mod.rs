//! Infrastructure adapters for queues and result buffers.

pub mod mailbox;
pub mod queue;
pub use mailbox::ResultBuffer;
pub use queue::TimerQueue;
