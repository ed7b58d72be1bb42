//! Core emulator primitives shared by every system crate.

pub mod interrupts;
pub mod logging;

pub use interrupts::{IrqLines, IrqSink, IrqSource};
pub use logging::{log, LogCategory, LogConfig, LogFlags, LogLevel};
