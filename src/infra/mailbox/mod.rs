//! Result buffer backends.

pub mod memory;

pub use memory::ResultBuffer;
