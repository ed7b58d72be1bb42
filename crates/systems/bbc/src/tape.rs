//! Cassette deck as seen from the serial ULA.
//!
//! The deck recovers bits from the carrier tone itself and reports back
//! through `SerialController::tape_set_carrier` and
//! `SerialController::tape_receive_byte`. The ULA only switches the motor.

/// Motor relay control of a tape deck.
///
/// Called synchronously from inside the serial controller; implementations
/// must not call back into it from `play` or `stop`.
pub trait TapeDeck {
    fn play(&mut self);
    fn stop(&mut self);
}
