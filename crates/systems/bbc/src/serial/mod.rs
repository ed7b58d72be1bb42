//! Serial controller: MC6850 ACIA plus the serial ULA in front of it.
//!
//! The ULA decides where the ACIA is wired: to the cassette path (which also
//! has a motor relay) or to the RS423 socket. It also produces the two
//! handshake lines the ACIA samples, DCD and CTS. The ACIA's IRQ output is a
//! function of its control register, its status register and the CTS line,
//! and is re-evaluated after every change to any of them.
//!
//! # Memory map (SHEILA)
//!
//! ```text
//! &FE08-&FE0F: ACIA, even = control/status, odd = data
//! &FE10-&FE17: serial ULA control (write only)
//! ```
//!
//! # Line levels
//!
//! Levels are electrical: `true` means the line is high.
//!
//! - CTS is low with tape selected. With RS423 selected it is low only while
//!   something is plugged into the output side.
//! - DCD is always low with RS423 selected (per the Advanced User Guide);
//!   with tape selected it follows the carrier tone.
//!
//! A low-to-high DCD edge latches status bit 2 until the data register is read
//! or the ACIA is reset. Dropping DCD again does not clear the latch.
//!
//! # Quirks reproduced
//!
//! - Writing `11` to control bits 1-0 resets the ACIA and the value is not
//!   stored. The MC6850 datasheet reads as if the other bits should still take
//!   effect; real machines disagree.
//! - Reading the serial ULA returns 0 but behaves like writing `&FE` to it.
//!   The ULA has no R/W input, so every access is a write, and on a 6502 read
//!   cycle the data bus still carries the high address byte.
//! - A byte arriving while RDRF is set overwrites the previous one.

pub mod acia;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use emu_core::logging::{log, LogCategory, LogConfig, LogLevel};
use emu_core::{IrqLines, IrqSink, IrqSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::options::{BbcOptions, LOG_FLAG_SERIAL_STATE};
use crate::peer::{ByteInput, ByteOutput};
use crate::tape::TapeDeck;
use crate::BbcError;

use acia::{
    STATUS_CTS, STATUS_DCD, STATUS_IRQ, STATUS_RDRF, STATUS_TDRE,
};

/// ULA control bit: 1 = RS423, 0 = cassette.
pub const ULA_RS423: u8 = 0x40;
/// ULA control bit: cassette motor relay.
pub const ULA_MOTOR: u8 = 0x80;

/// What a read of the ULA register implicitly writes.
const ULA_READ_BUS_VALUE: u8 = 0xFE;

pub const ACIA_BASE: u16 = 0xFE08;
pub const ACIA_END: u16 = 0xFE0F;
pub const ULA_BASE: u16 = 0xFE10;
pub const ULA_END: u16 = 0xFE17;

const STATE_VERSION: u64 = 1;
const STATE_SYSTEM: &str = "bbc-serial";

/// Register and line state. Everything here is plain data and is what a
/// save state captures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct SerialState {
    acia_control: u8,
    acia_status: u8,
    acia_receive: u8,
    acia_transmit: u8,
    line_level_dcd: bool,
    line_level_cts: bool,
    ula_rs423_selected: bool,
    ula_motor_on: bool,
    tape_is_carrier: bool,
}

/// The ACIA, the serial ULA and their connections to the rest of the machine.
pub struct SerialController<S: IrqSink = IrqLines> {
    state: SerialState,
    irq: S,
    input: Option<Box<dyn ByteInput>>,
    output: Option<Box<dyn ByteOutput>>,
    tape: Option<Weak<RefCell<dyn TapeDeck>>>,
    log_state: bool,
}

impl<S: IrqSink> SerialController<S> {
    /// Power-on: nothing connected, tape path selected, motor off, then reset.
    ///
    /// Log flags in `options` also raise their categories in the global
    /// `LogConfig` so the tracing they ask for is visible.
    pub fn new(irq: S, options: &BbcOptions) -> Self {
        LogConfig::global().enable_flags(&options.log_flags);
        let mut serial = Self {
            state: SerialState::default(),
            irq,
            input: None,
            output: None,
            tape: None,
            log_state: options.has_log_flag(LOG_FLAG_SERIAL_STATE),
        };
        serial.reset();
        serial
    }

    /// Plug peers into the RS423 socket; `None` leaves that side unconnected.
    pub fn set_io_handles(
        &mut self,
        input: Option<Box<dyn ByteInput>>,
        output: Option<Box<dyn ByteOutput>>,
    ) {
        self.input = input;
        self.output = output;
        self.check_line_levels();
    }

    /// Attach the cassette deck. Only a weak reference is kept.
    ///
    /// Binding twice is a caller bug: it asserts in debug builds and the second
    /// deck is ignored otherwise.
    pub fn bind_tape<T: TapeDeck + 'static>(&mut self, tape: &Rc<RefCell<T>>) {
        debug_assert!(self.tape.is_none(), "tape deck bound twice");
        if self.tape.is_some() {
            log(LogCategory::Tape, LogLevel::Warn, || {
                "serial: tape deck already bound, ignoring".to_string()
            });
            return;
        }
        let weak = Rc::downgrade(tape);
        let weak: Weak<RefCell<dyn TapeDeck>> = weak;
        self.tape = Some(weak);
    }

    pub fn tape_is_bound(&self) -> bool {
        self.tape.as_ref().is_some_and(|t| t.strong_count() > 0)
    }

    /// Master reset of the ACIA.
    ///
    /// Clears both data latches, RDRF and the DCD latch and sets TDRE. The line
    /// levels come from outside the chip and survive.
    pub fn reset(&mut self) {
        self.trace(|| "reset".to_string());

        self.state.acia_receive = 0;
        self.state.acia_transmit = 0;
        self.state.acia_status = STATUS_TDRE;

        self.check_line_levels();
        self.update_irq();
    }

    /// Move bytes between the ACIA and the RS423 peers. Call once per
    /// emulated timing quantum; does nothing with tape selected.
    pub fn tick(&mut self) {
        if !self.state.ula_rs423_selected {
            return;
        }

        let do_receive = acia::receive_permitted(self.state.acia_control)
            && self.state.acia_status & STATUS_RDRF == 0;
        if do_receive {
            let mut received = None;
            if let Some(input) = self.input.as_mut() {
                if input.readable_bytes() > 0 {
                    match input.read_byte() {
                        Ok(byte) => received = Some(byte),
                        Err(e) => log(LogCategory::Serial, LogLevel::Error, || {
                            format!("serial: RS423 read failed: {}", e)
                        }),
                    }
                }
            }
            if let Some(byte) = received {
                // The BBC expects CR line endings.
                let byte = if byte == b'\n' { b'\r' } else { byte };
                self.receive(byte);
            }
        }

        if self.state.acia_status & STATUS_TDRE == 0 {
            if let Some(output) = self.output.as_mut() {
                let byte = self.state.acia_transmit;
                // May block; the host is assumed to outrun the emulated line.
                if let Err(e) = output.write_byte(byte) {
                    log(LogCategory::Serial, LogLevel::Error, || {
                        format!("serial: RS423 write of {:02X} failed: {}", byte, e)
                    });
                }
                self.state.acia_status |= STATUS_TDRE;
                self.update_irq();
            }
        }
    }

    /// ACIA register read: even offsets are status, odd offsets are data.
    pub fn read(&mut self, reg: u8) -> u8 {
        if reg & 1 == 0 {
            self.read_status()
        } else {
            self.read_data()
        }
    }

    /// Status register as the CPU sees it. No side effects.
    pub fn read_status(&self) -> u8 {
        acia::status_view(
            self.state.acia_status,
            self.state.line_level_cts,
            self.state.line_level_dcd,
        )
    }

    /// Data register read. Acknowledges the received byte and the latched
    /// DCD edge: clears RDRF and the DCD latch.
    pub fn read_data(&mut self) -> u8 {
        self.state.acia_status &= !(STATUS_RDRF | STATUS_DCD);
        self.update_irq();
        self.state.acia_receive
    }

    /// ACIA register write: even offsets are control, odd offsets are data.
    pub fn write(&mut self, reg: u8, val: u8) {
        if reg & 1 == 0 {
            self.write_control(val);
        } else {
            self.write_data(val);
        }
    }

    pub fn write_control(&mut self, val: u8) {
        if acia::is_master_reset(val) {
            self.reset();
        } else {
            self.state.acia_control = val;
        }
        self.update_irq();
    }

    /// Queue a byte for transmission.
    ///
    /// Software must wait for TDRE first. Writing while a byte is still
    /// pending asserts in debug builds; release builds overwrite it.
    pub fn write_data(&mut self, val: u8) {
        debug_assert!(
            self.state.acia_status & STATUS_TDRE != 0,
            "ACIA data written while TDRE clear"
        );
        self.state.acia_transmit = val;
        self.state.acia_status &= !STATUS_TDRE;
        self.update_irq();
    }

    /// Serial ULA "read": returns 0 and acts as a write of `&FE`.
    pub fn ula_read(&mut self) -> u8 {
        self.ula_write(ULA_READ_BUS_VALUE);
        0
    }

    /// Serial ULA control write: bit 6 selects RS423, bit 7 drives the motor.
    pub fn ula_write(&mut self, val: u8) {
        let rs423_selected = val & ULA_RS423 != 0;
        let motor_on = val & ULA_MOTOR != 0;

        if motor_on != self.state.ula_motor_on {
            self.trace(|| format!("new motor state: {}", motor_on as u8));
            self.drive_tape_motor(motor_on);
        }
        self.state.ula_motor_on = motor_on;

        if rs423_selected != self.state.ula_rs423_selected {
            self.trace(|| format!("new rs423 selected state: {}", rs423_selected as u8));
        }
        self.state.ula_rs423_selected = rs423_selected;

        // Switching paths, or the motor with tape selected, can move CTS and DCD.
        self.check_line_levels();
    }

    /// A byte recovered from tape. Dropped unless the tape path is selected.
    pub fn tape_receive_byte(&mut self, byte: u8) {
        if !self.state.ula_rs423_selected {
            self.receive(byte);
        }
    }

    /// The deck reports whether a carrier tone is under the head.
    pub fn tape_set_carrier(&mut self, carrier: bool) {
        self.state.tape_is_carrier = carrier;
        self.check_line_levels();
    }

    /// SHEILA read. `None` if `addr` is not a serial register.
    pub fn read_mapped(&mut self, addr: u16) -> Option<u8> {
        match addr {
            ACIA_BASE..=ACIA_END => Some(self.read((addr & 1) as u8)),
            ULA_BASE..=ULA_END => Some(self.ula_read()),
            _ => None,
        }
    }

    /// SHEILA write. Returns false if `addr` is not a serial register.
    pub fn write_mapped(&mut self, addr: u16, val: u8) -> bool {
        match addr {
            ACIA_BASE..=ACIA_END => self.write((addr & 1) as u8, val),
            ULA_BASE..=ULA_END => self.ula_write(val),
            _ => {
                log(LogCategory::Bus, LogLevel::Trace, || {
                    format!("serial: ignoring write {:02X} to {:04X}", val, addr)
                });
                return false;
            }
        }
        true
    }

    /// Stored status register, without the read-time CTS/DCD adjustments.
    pub fn status(&self) -> u8 {
        self.state.acia_status
    }

    pub fn control(&self) -> u8 {
        self.state.acia_control
    }

    /// DCD line level, true = high (carrier present).
    pub fn line_level_dcd(&self) -> bool {
        self.state.line_level_dcd
    }

    /// CTS line level, true = high (not clear to send).
    pub fn line_level_cts(&self) -> bool {
        self.state.line_level_cts
    }

    pub fn rs423_selected(&self) -> bool {
        self.state.ula_rs423_selected
    }

    pub fn motor_on(&self) -> bool {
        self.state.ula_motor_on
    }

    pub fn irq_asserted(&self) -> bool {
        self.state.acia_status & STATUS_IRQ != 0
    }

    pub fn irq_sink(&self) -> &S {
        &self.irq
    }

    /// Versioned JSON snapshot of registers, ULA and line state.
    ///
    /// Peers, the tape binding and the interrupt sink are not included.
    pub fn save_state(&self) -> Value {
        serde_json::json!({
            "version": STATE_VERSION,
            "system": STATE_SYSTEM,
            "serial": self.state,
        })
    }

    pub fn load_state(&mut self, v: &Value) -> Result<(), BbcError> {
        let version = v["version"].as_u64().unwrap_or(0);
        if version != STATE_VERSION {
            return Err(BbcError::StateVersion {
                expected: STATE_VERSION,
                found: version,
            });
        }
        let system = v["system"].as_str().unwrap_or("");
        if system != STATE_SYSTEM {
            return Err(BbcError::InvalidState(format!("not a serial state: {:?}", system)));
        }
        let serial = v
            .get("serial")
            .ok_or_else(|| BbcError::InvalidState("missing serial section".to_string()))?;
        self.state = serde_json::from_value(serial.clone())?;
        // CTS depends on the peers plugged in now, not at save time.
        self.check_line_levels();
        Ok(())
    }

    fn receive(&mut self, byte: u8) {
        if self.state.acia_status & STATUS_RDRF != 0 {
            log(LogCategory::Stubs, LogLevel::Warn, || {
                "serial: receive buffer full".to_string()
            });
        }
        self.state.acia_status |= STATUS_RDRF;
        self.state.acia_receive = byte;
        self.update_irq();
    }

    fn drive_tape_motor(&mut self, on: bool) {
        let Some(tape) = self.tape.as_ref().and_then(Weak::upgrade) else {
            log(LogCategory::Tape, LogLevel::Warn, || {
                format!("serial: motor {} with no tape deck", if on { "on" } else { "off" })
            });
            return;
        };
        let mut deck = tape.borrow_mut();
        if on {
            deck.play();
        } else {
            deck.stop();
        }
    }

    fn check_line_levels(&mut self) {
        let (cts, dcd) = if self.state.ula_rs423_selected {
            (self.output.is_none(), false)
        } else {
            (false, self.state.tape_is_carrier)
        };

        if dcd && !self.state.line_level_dcd {
            self.trace(|| "DCD going high".to_string());
            self.state.acia_status |= STATUS_DCD;
        }

        if cts {
            self.state.acia_status |= STATUS_CTS;
        } else {
            self.state.acia_status &= !STATUS_CTS;
        }

        self.state.line_level_dcd = dcd;
        self.state.line_level_cts = cts;

        // CTS falling can release a transmit interrupt.
        self.update_irq();
    }

    fn update_irq(&mut self) {
        let fire = acia::interrupt_fires(
            self.state.acia_control,
            self.state.acia_status,
            self.state.line_level_cts,
        );
        if fire {
            self.state.acia_status |= STATUS_IRQ;
        } else {
            self.state.acia_status &= !STATUS_IRQ;
        }
        self.irq.set_irq_level(IrqSource::SerialAcia, fire);
    }

    fn trace<F>(&self, message_fn: F)
    where
        F: FnOnce() -> String,
    {
        if self.log_state {
            log(LogCategory::Serial, LogLevel::Info, message_fn);
        }
    }
}
