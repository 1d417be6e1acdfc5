//! Serial line seam.
//!
//! The UART receive interrupt is modelled as a status word plus data byte
//! handed to the active decoder hook. Framing errors double as the DMX
//! break detector and as the TPM2 de-aliasing signal, so the status must be
//! reported even when no byte was latched.

/// Status flags accompanying one received byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineStatus {
    /// Framing or noise error on the line (a DMX break reports this).
    pub error: bool,
    /// A data byte was latched.
    pub ready: bool,
}

impl LineStatus {
    /// A cleanly received byte.
    pub const fn ok() -> Self {
        Self {
            error: false,
            ready: true,
        }
    }

    /// A framing/noise condition (break).
    pub const fn broken() -> Self {
        Self {
            error: true,
            ready: false,
        }
    }
}

/// Control over the physical serial port.
pub trait SerialPort {
    /// Reprogram the baud rate generator.
    fn set_baud(&mut self, baud: u32);

    /// Transmit bytes, blocking until they are on the wire.
    fn write(&mut self, bytes: &[u8]);
}
