//! DMX512 input.
//!
//! The universe is received continuously into the second half of the
//! working buffer, slot 0 (the start code) first. At the start of the next
//! universe the completed one is published to the first half in a single
//! copy, but only while `trip` is clear; it is raised in turn. Incomplete
//! universes therefore never reach the mapper, which avoids flicker from
//! torn frames.
//!
//! The line runs at the standard 250 kBd 8N2; a framing error is taken as
//! the break that precedes a packet.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::buffer::{WorkBuffer, MAXDMX};
use crate::clock::Deadline;
use crate::serial::LineStatus;

/// DMX line rate.
pub const DMX_BAUD: u32 = 250_000;

/// Null start code for dimmer data.
const DMX_START: u8 = 0x00;

/// Signal-present watchdog, in milliseconds.
const DMX_TIMEOUT: u32 = 1000;

/// Cursor value that discards the rest of a packet.
const IGNORE: usize = MAXDMX + 1;

/// The DMX universe receiver.
pub struct DmxReceiver {
    cursor: usize,
    trip: AtomicBool,
    trap: bool,
    watchdog: Deadline,
}

impl DmxReceiver {
    pub fn new(now: u32) -> Self {
        Self {
            cursor: IGNORE,
            trip: AtomicBool::new(false),
            trap: false,
            watchdog: Deadline::after(now, DMX_TIMEOUT),
        }
    }

    /// Drop receive state; the next break starts a fresh packet.
    pub fn reset(&mut self, now: u32) {
        self.trip.store(false, Ordering::Release);
        self.trap = false;
        self.cursor = IGNORE;
        self.watchdog = Deadline::after(now, DMX_TIMEOUT);
    }

    /// Whether a published universe is waiting in the buffer.
    pub fn trip(&self) -> bool {
        self.trip.load(Ordering::Acquire)
    }

    /// Consume the pending universe.
    pub fn clear(&self) {
        self.trip.store(false, Ordering::Release);
    }

    /// Serial receive hook.
    pub fn feed(&mut self, buf: &mut WorkBuffer, status: LineStatus, ch: u8) {
        if status.error {
            // Assume break
            self.cursor = 0;
            return;
        }

        if !status.ready {
            return;
        }

        if self.cursor == 0 {
            if ch == DMX_START {
                self.trap = true;
                if !self.trip() {
                    buf.publish_universe();
                    self.trip.store(true, Ordering::Release);
                }

                buf[MAXDMX] = ch;
                self.cursor = 1;
            } else {
                // Alternate start codes are vendor specific; skip them.
                self.cursor = IGNORE;
            }
        } else if self.cursor < MAXDMX {
            buf[MAXDMX + self.cursor] = ch;
            self.cursor += 1;
        }
    }

    /// Whether a DMX signal is present; a valid start code within the last
    /// second qualifies.
    pub fn detect(&mut self, now: u32) -> bool {
        if self.trap {
            self.trap = false;
            self.watchdog = Deadline::after(now, DMX_TIMEOUT);
            return true;
        }

        !self.watchdog.expired(now)
    }
}
