//! User interface.
//!
//! A hexadecimal rotary switch selects the top-level mode when no card is
//! present, and a status LED blinks along with activity. The external
//! pushbutton is debounced in hardware; the switch is debounced here by
//! requiring eight identical reads at a 10 ms cadence.

use crate::clock::Deadline;

/// Debounce sampling cadence in milliseconds.
pub const UI_DEBOUNCE_TIMEOUT: u32 = 10;

/// Consecutive identical samples required for a stable reading.
pub const UI_DEBOUNCE_DEPTH: u8 = 8;

/// The physical controls.
pub trait Controls {
    /// Raw hex switch code, `0..=15`.
    fn hex_code(&self) -> u8;

    /// Pushbutton state, active high.
    fn input(&self) -> bool;

    /// Drive the status LED.
    fn led(&mut self, on: bool);
}

/// Debounced view of the controls.
pub struct Ui<C: Controls> {
    pins: C,
    hex: u8,
    candidate: u8,
    debounce: u8,
    deadline: Deadline,
}

impl<C: Controls> Ui<C> {
    pub fn new(pins: C, now: u32) -> Self {
        Self {
            pins,
            hex: 0,
            candidate: 0,
            debounce: 0,
            deadline: Deadline::after(now, 0),
        }
    }

    /// Sample the hex switch at the debounce cadence. Returns whether the
    /// reading is stable.
    pub fn debounce(&mut self, now: u32) -> bool {
        if self.deadline.expired(now) {
            self.deadline = Deadline::after(now, UI_DEBOUNCE_TIMEOUT);

            let code = self.pins.hex_code() & 0x0F;
            if code != self.candidate {
                self.candidate = code;
                self.debounce = 0;
            } else if self.debounce < UI_DEBOUNCE_DEPTH {
                self.debounce += 1;
            } else {
                self.hex = self.candidate;
            }
        }

        self.hex == self.candidate && self.debounce == UI_DEBOUNCE_DEPTH
    }

    /// Debounced switch position as a hex character, `'0'..='F'`.
    pub fn hex(&self) -> char {
        if self.hex < 10 {
            (b'0' + self.hex) as char
        } else {
            (b'A' + self.hex - 10) as char
        }
    }

    /// Debounced switch position as a value.
    pub fn digit(&self) -> u8 {
        self.hex
    }

    /// Pushbutton state.
    pub fn input(&self) -> bool {
        self.pins.input()
    }

    /// Drive the status LED.
    pub fn led(&mut self, on: bool) {
        self.pins.led(on);
    }
}
