//! BBC Micro serial subsystem: the MC6850 ACIA, the serial ULA that routes
//! it to cassette or RS423, and the surrounding machine plumbing it needs.

pub mod cpu_driver;
pub mod options;
pub mod peer;
pub mod serial;
pub mod tape;

pub use cpu_driver::{CpuDriver, CpuMode, ExecutionEngine};
pub use options::{BbcOptions, LOG_FLAG_SERIAL_STATE};
pub use peer::{ByteInput, ByteOutput, ByteQueue, ChannelInput, WriterOutput};
pub use serial::SerialController;
pub use tape::TapeDeck;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BbcError {
    #[error("Unknown CPU mode: {0}")]
    UnknownCpuMode(String),
    #[error("Invalid save state: {0}")]
    InvalidState(String),
    #[error("Unsupported save state version {found} (expected {expected})")]
    StateVersion { expected: u64, found: u64 },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
