pub mod clock;
pub mod item_key;
pub mod telemetry;

pub use clock::*;
pub use item_key::*;
pub use telemetry::*;
