//! Machine options consumed by the BBC subsystems.

use emu_core::LogFlags;
use serde::{Deserialize, Serialize};

use crate::cpu_driver::CpuMode;
use crate::BbcError;

/// Verbose state tracing for the ACIA and serial ULA.
pub const LOG_FLAG_SERIAL_STATE: &str = "serial:state";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BbcOptions {
    /// Comma-separated `subsystem:flag` list, e.g. `serial:state`.
    pub log_flags: LogFlags,
    pub cpu_mode: CpuMode,
}

impl BbcOptions {
    pub fn with_log_flags(list: &str) -> Self {
        Self {
            log_flags: LogFlags::parse(list),
            ..Self::default()
        }
    }

    /// Parse options from JSON; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, BbcError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn has_log_flag(&self, flag: &str) -> bool {
        self.log_flags.has(flag)
    }
}
