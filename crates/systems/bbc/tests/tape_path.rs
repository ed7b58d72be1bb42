//! Cassette side of the serial ULA: motor relay, carrier detect, byte delivery.

use emu_bbc::serial::acia::{CONTROL_RIE, STATUS_DCD, STATUS_RDRF};
use emu_bbc::serial::{ACIA_BASE, ULA_BASE, ULA_MOTOR, ULA_RS423};
use emu_bbc::{BbcOptions, SerialController, TapeDeck};
use emu_core::IrqLines;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Default)]
struct Deck {
    playing: bool,
    starts: usize,
}

impl TapeDeck for Deck {
    fn play(&mut self) {
        self.playing = true;
        self.starts += 1;
    }

    fn stop(&mut self) {
        self.playing = false;
    }
}

fn tape_machine() -> (SerialController, IrqLines, Rc<RefCell<Deck>>) {
    let irq = IrqLines::new();
    let mut serial = SerialController::new(irq.clone(), &BbcOptions::with_log_flags("serial:state"));
    let deck = Rc::new(RefCell::new(Deck::default()));
    serial.bind_tape(&deck);
    (serial, irq, deck)
}

#[test]
fn test_load_sequence() {
    let (mut serial, irq, deck) = tape_machine();
    serial.write_mapped(ACIA_BASE, CONTROL_RIE | 0x16);
    serial.write_mapped(ULA_BASE, ULA_MOTOR);
    assert!(deck.borrow().playing);

    // Leader tone.
    serial.tape_set_carrier(true);
    assert!(irq.is_asserted());
    assert_ne!(serial.read_mapped(ACIA_BASE).unwrap() & STATUS_DCD, 0);
    serial.read_mapped(ACIA_BASE + 1);
    assert!(!irq.is_asserted());

    let mut loaded = Vec::new();
    for &byte in b"*\x2A\x00" {
        serial.tape_receive_byte(byte);
        assert!(irq.is_asserted());
        assert_ne!(serial.read_mapped(ACIA_BASE).unwrap() & STATUS_RDRF, 0);
        loaded.push(serial.read_mapped(ACIA_BASE + 1).unwrap());
    }
    assert_eq!(loaded, b"*\x2A\x00".to_vec());

    serial.tape_set_carrier(false);
    serial.write_mapped(ULA_BASE, 0x00);
    assert!(!deck.borrow().playing);
    assert_eq!(deck.borrow().starts, 1);
    assert!(!irq.is_asserted());
}

#[test]
fn test_switching_to_rs423_keeps_motor_state() {
    let (mut serial, _, deck) = tape_machine();
    serial.write_mapped(ULA_BASE, ULA_MOTOR);
    serial.write_mapped(ULA_BASE, ULA_MOTOR | ULA_RS423);
    assert!(deck.borrow().playing);
    assert_eq!(deck.borrow().starts, 1);

    serial.tape_set_carrier(true);
    assert!(!serial.line_level_dcd());
    serial.tape_receive_byte(0x55);
    assert_eq!(serial.status() & STATUS_RDRF, 0);
}

#[test]
fn test_ula_read_starts_motor() {
    let (mut serial, _, deck) = tape_machine();
    assert_eq!(serial.read_mapped(ULA_BASE + 3), Some(0));
    assert!(deck.borrow().playing);
    assert!(serial.rs423_selected());
}

#[test]
fn test_dropped_deck_is_treated_as_unbound() {
    let (mut serial, _, deck) = tape_machine();
    drop(deck);
    serial.write_mapped(ULA_BASE, ULA_MOTOR);
    assert!(serial.motor_on());
    assert!(!serial.tape_is_bound());
}
