//! CPU execution strategy selection.
//!
//! The machine picks one strategy at construction time. Everything else in
//! the machine (the serial controller included) talks to the CPU only through
//! interrupt lines and never cares which strategy is running. The interface
//! here is the part other subsystems can see: notifications about memory
//! that changed under the CPU's feet, and debugger queries.

use std::fmt;
use std::str::FromStr;

use emu_core::logging::{log, LogCategory, LogLevel};
use serde::{Deserialize, Serialize};

use crate::BbcError;

/// Which execution strategy drives the 6502.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuMode {
    /// Plain fetch/decode/execute interpreter.
    #[default]
    Interp,
    /// Threaded interpreter, one handler per opcode.
    Inturbo,
    /// Compiles 6502 blocks to host code.
    Jit,
}

impl FromStr for CpuMode {
    type Err = BbcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "interp" | "interpreter" => Ok(CpuMode::Interp),
            "inturbo" => Ok(CpuMode::Inturbo),
            "jit" => Ok(CpuMode::Jit),
            other => Err(BbcError::UnknownCpuMode(other.to_string())),
        }
    }
}

impl fmt::Display for CpuMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CpuMode::Interp => "interp",
            CpuMode::Inturbo => "inturbo",
            CpuMode::Jit => "jit",
        };
        f.write_str(name)
    }
}

/// What the rest of the machine may ask of an execution engine.
///
/// Defaults match an engine with no cached translation of guest code.
pub trait ExecutionEngine {
    fn init(&mut self) {}

    /// Guest memory in `addr..addr + len` was written behind the CPU's back.
    fn on_memory_range_written(&mut self, _addr: u16, _len: u16) {}

    /// Guest memory in `addr..addr + len` was reset (ROM swap, power cycle).
    fn on_memory_range_reset(&mut self, _addr: u16, _len: u16) {}

    /// Four-character annotation for a debugger disassembly column.
    fn address_debug_info(&self, _addr: u16) -> String {
        "    ".to_string()
    }

    fn address_has_compiled_code(&self, _addr: u16) -> bool {
        false
    }

    /// A translated block now starts at `addr`. Ignored by interpreters.
    fn note_compiled_block(&mut self, _addr: u16) {}
}

#[derive(Debug, Default)]
struct Interpreter;

impl ExecutionEngine for Interpreter {}

#[derive(Debug, Default)]
struct ThreadedInterpreter;

impl ExecutionEngine for ThreadedInterpreter {}

/// Block cache bookkeeping of the JIT.
///
/// One flag per guest address marking the start of a compiled block.
#[derive(Debug)]
struct JitEngine {
    block_starts: Vec<bool>,
}

impl JitEngine {
    fn new() -> Self {
        Self {
            block_starts: vec![false; 0x10000],
        }
    }

    fn invalidate(&mut self, addr: u16, len: u16) {
        let start = addr as usize;
        let end = (start + len as usize).min(self.block_starts.len());
        let mut dropped = 0usize;
        for flag in &mut self.block_starts[start..end] {
            if *flag {
                dropped += 1;
            }
            *flag = false;
        }
        if dropped > 0 {
            log(LogCategory::Cpu, LogLevel::Debug, || {
                format!("jit: invalidated {} block(s) in {:04X}+{:X}", dropped, addr, len)
            });
        }
    }
}

impl ExecutionEngine for JitEngine {
    fn init(&mut self) {
        self.block_starts.iter_mut().for_each(|f| *f = false);
    }

    fn on_memory_range_written(&mut self, addr: u16, len: u16) {
        self.invalidate(addr, len);
    }

    fn on_memory_range_reset(&mut self, addr: u16, len: u16) {
        self.invalidate(addr, len);
    }

    fn address_debug_info(&self, addr: u16) -> String {
        if self.address_has_compiled_code(addr) {
            "[J] ".to_string()
        } else {
            "    ".to_string()
        }
    }

    fn address_has_compiled_code(&self, addr: u16) -> bool {
        self.block_starts[addr as usize]
    }

    fn note_compiled_block(&mut self, addr: u16) {
        self.block_starts[addr as usize] = true;
    }
}

/// The engine chosen for this machine.
pub struct CpuDriver {
    mode: CpuMode,
    engine: Box<dyn ExecutionEngine>,
}

impl CpuDriver {
    /// Build and initialise the engine for `mode`.
    pub fn new(mode: CpuMode) -> Self {
        let mut engine: Box<dyn ExecutionEngine> = match mode {
            CpuMode::Interp => Box::new(Interpreter),
            CpuMode::Inturbo => Box::new(ThreadedInterpreter),
            CpuMode::Jit => Box::new(JitEngine::new()),
        };
        engine.init();
        log(LogCategory::Cpu, LogLevel::Info, || format!("cpu driver: {}", mode));
        Self { mode, engine }
    }

    pub fn mode(&self) -> CpuMode {
        self.mode
    }

    pub fn note_compiled_block(&mut self, addr: u16) {
        self.engine.note_compiled_block(addr);
    }

    pub fn on_memory_range_written(&mut self, addr: u16, len: u16) {
        self.engine.on_memory_range_written(addr, len);
    }

    pub fn on_memory_range_reset(&mut self, addr: u16, len: u16) {
        self.engine.on_memory_range_reset(addr, len);
    }

    pub fn address_debug_info(&self, addr: u16) -> String {
        self.engine.address_debug_info(addr)
    }

    pub fn address_has_compiled_code(&self, addr: u16) -> bool {
        self.engine.address_has_compiled_code(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("interp".parse::<CpuMode>().unwrap(), CpuMode::Interp);
        assert_eq!("INTURBO".parse::<CpuMode>().unwrap(), CpuMode::Inturbo);
        assert_eq!("jit".parse::<CpuMode>().unwrap(), CpuMode::Jit);
        assert!(matches!(
            "turbo".parse::<CpuMode>(),
            Err(BbcError::UnknownCpuMode(m)) if m == "turbo"
        ));
        assert_eq!(CpuMode::Inturbo.to_string(), "inturbo");
    }

    #[test]
    fn test_interpreters_have_no_compiled_code() {
        for mode in [CpuMode::Interp, CpuMode::Inturbo] {
            let mut driver = CpuDriver::new(mode);
            driver.note_compiled_block(0x8000);
            assert_eq!(driver.mode(), mode);
            assert!(!driver.address_has_compiled_code(0x8000));
            assert_eq!(driver.address_debug_info(0x8000), "    ");
            driver.on_memory_range_written(0x8000, 0x100);
        }
    }

    #[test]
    fn test_jit_blocks_invalidated_by_writes() {
        let mut driver = CpuDriver::new(CpuMode::Jit);
        driver.note_compiled_block(0x1900);
        driver.note_compiled_block(0x1A00);
        assert!(driver.address_has_compiled_code(0x1900));
        assert_eq!(driver.address_debug_info(0x1900), "[J] ");

        driver.on_memory_range_written(0x1900, 0x80);
        assert!(!driver.address_has_compiled_code(0x1900));
        assert!(driver.address_has_compiled_code(0x1A00));

        driver.on_memory_range_reset(0x0000, 0xFFFF);
        assert!(!driver.address_has_compiled_code(0x1A00));
    }

    #[test]
    fn test_jit_range_clamps_at_top_of_memory() {
        let mut driver = CpuDriver::new(CpuMode::Jit);
        driver.note_compiled_block(0xFFFF);
        driver.on_memory_range_written(0xFFF0, 0x100);
        assert!(!driver.address_has_compiled_code(0xFFFF));
    }
}
