//! Bluetooth common library

/// Wall clock interface used for persisted timestamps
pub mod time;

mod logging;
pub use logging::*;
