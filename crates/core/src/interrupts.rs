//! Level-triggered interrupt lines.
//!
//! The 6502 has a single IRQ input that several chips pull low (wired-OR).
//! Each chip drives its own level, tagged by source, and the CPU sees the
//! line asserted while any source holds it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::logging::{log, LogCategory, LogLevel};

/// A chip that can pull the CPU's IRQ line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IrqSource {
    SystemVia,
    UserVia,
    SerialAcia,
}

impl IrqSource {
    pub const ALL: [IrqSource; 3] = [IrqSource::SystemVia, IrqSource::UserVia, IrqSource::SerialAcia];

    fn bit(self) -> u8 {
        match self {
            IrqSource::SystemVia => 0x01,
            IrqSource::UserVia => 0x02,
            IrqSource::SerialAcia => 0x04,
        }
    }
}

/// Receiver of interrupt levels.
///
/// Drivers call this every time they re-evaluate their interrupt condition,
/// even when the level has not changed. Implementations must not call back
/// into the driver.
pub trait IrqSink {
    fn set_irq_level(&mut self, source: IrqSource, level: bool);
}

impl<T: IrqSink + ?Sized> IrqSink for &mut T {
    fn set_irq_level(&mut self, source: IrqSource, level: bool) {
        (**self).set_irq_level(source, level);
    }
}

impl<T: IrqSink + ?Sized> IrqSink for Box<T> {
    fn set_irq_level(&mut self, source: IrqSource, level: bool) {
        (**self).set_irq_level(source, level);
    }
}

impl<T: IrqSink + ?Sized> IrqSink for Rc<RefCell<T>> {
    fn set_irq_level(&mut self, source: IrqSource, level: bool) {
        self.borrow_mut().set_irq_level(source, level);
    }
}

/// The shared IRQ wire.
///
/// Clones share the same levels, so a peripheral can own one clone while
/// the CPU side polls another.
#[derive(Debug, Clone, Default)]
pub struct IrqLines {
    levels: Rc<Cell<u8>>,
}

impl IrqLines {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while any source holds the line.
    pub fn is_asserted(&self) -> bool {
        self.levels.get() != 0
    }

    pub fn level(&self, source: IrqSource) -> bool {
        self.levels.get() & source.bit() != 0
    }

    /// Sources currently holding the line.
    pub fn asserted_sources(&self) -> Vec<IrqSource> {
        IrqSource::ALL
            .into_iter()
            .filter(|&s| self.level(s))
            .collect()
    }

    pub fn clear(&self) {
        self.levels.set(0);
    }
}

impl IrqSink for IrqLines {
    fn set_irq_level(&mut self, source: IrqSource, level: bool) {
        let old = self.levels.get();
        let new = if level { old | source.bit() } else { old & !source.bit() };
        if new != old {
            log(LogCategory::Interrupts, LogLevel::Debug, || {
                format!("{:?} -> {}", source, if level { "high" } else { "low" })
            });
        }
        self.levels.set(new);
    }
}
