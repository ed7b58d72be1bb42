//! MC6850 ACIA register bits and the pure parts of its behavior.
//!
//! # Status register (read, offset 0)
//!
//! | Bit | Name | Meaning                                          |
//! |-----|------|--------------------------------------------------|
//! | 0   | RDRF | receive data register full (sticky)              |
//! | 1   | TDRE | transmit data register empty, inhibited by CTS high |
//! | 2   | DCD  | carrier lost latch, else follows the line        |
//! | 3   | CTS  | clear-to-send line level, high = not clear       |
//! | 7   | IRQ  | some enabled interrupt condition holds           |
//!
//! # Control register (write, offset 0)
//!
//! | Bits | Meaning                                               |
//! |------|-------------------------------------------------------|
//! | 1-0  | counter divide; `11` is master reset                  |
//! | 6-5  | transmit control (RTS level, transmit IRQ enable)     |
//! | 7    | receive IRQ enable                                    |

pub const STATUS_RDRF: u8 = 0x01;
pub const STATUS_TDRE: u8 = 0x02;
pub const STATUS_DCD: u8 = 0x04;
pub const STATUS_CTS: u8 = 0x08;
pub const STATUS_IRQ: u8 = 0x80;

pub const CONTROL_MASTER_RESET: u8 = 0x03;
pub const CONTROL_TCB_MASK: u8 = 0x60;
pub const CONTROL_RIE: u8 = 0x80;

/// Transmit control: RTS low, transmit interrupt enabled.
pub const TCB_RTS_AND_TIE: u8 = 0x20;
/// Transmit control: RTS high, transmit interrupt disabled.
pub const TCB_NO_RTS_NO_TIE: u8 = 0x40;

/// Both divide bits set selects master reset rather than a configuration.
pub fn is_master_reset(control: u8) -> bool {
    control & CONTROL_MASTER_RESET == CONTROL_MASTER_RESET
}

pub fn send_interrupt_armed(control: u8) -> bool {
    control & CONTROL_TCB_MASK == TCB_RTS_AND_TIE
}

pub fn receive_interrupt_armed(control: u8) -> bool {
    control & CONTROL_RIE != 0
}

/// RTS deasserted means the remote end has been told to stop sending.
pub fn receive_permitted(control: u8) -> bool {
    control & CONTROL_TCB_MASK != TCB_NO_RTS_NO_TIE
}

/// The ACIA's IRQ output for a given control/status/CTS combination.
///
/// Only RDRF, TDRE and DCD of `status` take part; the stored IRQ bit is ignored.
pub fn interrupt_fires(control: u8, status: u8, cts_high: bool) -> bool {
    let send = send_interrupt_armed(control) && status & STATUS_TDRE != 0 && !cts_high;
    let receive = receive_interrupt_armed(control) && status & (STATUS_RDRF | STATUS_DCD) != 0;
    send || receive
}

/// What the CPU sees when it reads the status register.
///
/// CTS high inhibits TDRE, and an unlatched DCD bit follows the live line.
/// Neither adjustment touches the stored status.
pub fn status_view(status: u8, cts_high: bool, dcd_high: bool) -> u8 {
    let mut ret = status;
    if cts_high {
        ret &= !STATUS_TDRE;
    }
    if ret & STATUS_DCD == 0 && dcd_high {
        ret |= STATUS_DCD;
    }
    ret
}
