//! Pixel engine.
//!
//! Generates the parallel serial waveform for up to six LED strings in
//! lock-step. Pixels are stored bit-plane transposed: byte `i` of the frame
//! buffer is the `i`-th bit-time sample of all strings at once, bit `k`
//! belonging to string `k`. A set bit ends the output pulse at `T0` (a wire
//! `0` bit), a clear bit at `T1` (a wire `1` bit), so the all-ones pattern
//! is dark. Emission of the buffer is delegated to a [`WaveformSink`] that
//! owns the hardware-timed part; after a full frame every string has
//! received exactly `length * 24` bit-times.
//!
//! The frame-rate generator is polled cooperatively: [`PixelEngine::poll`]
//! stands in for the timer interrupt and fires [`PixelEngine::universe`] at
//! the configured rate. Writers acquire the buffer with
//! [`PixelEngine::capture`], which inhibits the generator; a tick that
//! falls into a capture or an active transfer is dropped, never queued.

mod map;
mod plane;

pub use map::{LedMap, MapChannel};

use crate::clock::Deadline;
use crate::Rgb;
use plane::BitPlane;

/// Maximum number of LEDs per string.
pub const MAXLEDS: usize = 500;

/// Start-up delay before the first frame after power-on, in milliseconds.
const STARTUP: u32 = 100;

/// Hardware-timed emission of one bit-plane frame.
///
/// `begin_frame` starts the transfer asynchronously; `busy` must stay true
/// until the waveform and the chip-reset gap have completed. `set_power`
/// gates the LED supply rail. While the rail is off the sink must keep the
/// data lines low so no current leaks into the strings.
pub trait WaveformSink {
    /// Start emitting `bits` (one byte per bit-time, bit `k` = string `k`).
    fn begin_frame(&mut self, bits: &[u8]);

    /// Whether a transfer (including the reset gap) is in progress.
    fn busy(&self) -> bool;

    /// Gate the LED supply rail.
    fn set_power(&mut self, on: bool);
}

/// Scale one color component by the global dim factor.
///
/// The `+1` on nonzero components compensates for the right shift by 8
/// standing in for a division by 255, so `scale(c, 255) == c` and
/// `scale(255, s) == s` for the whole range.
pub const fn scale(c: u8, s: u8) -> u8 {
    ((c as u16 + (c > 0) as u16) * s as u16 >> 8) as u8
}

/// Dim and arrange a pixel for the wire.
///
/// Bit arrangement is G7..G0 R7..R0 B7..B0; the complement maps it onto the
/// inverted bit-plane encoding.
fn wire_triplet(color: Rgb, dim: Rgb) -> u32 {
    let r = scale(color.r, dim.r) as u32;
    let g = scale(color.g, dim.g) as u32;
    let b = scale(color.b, dim.b) as u32;
    !((g << 16) | (r << 8) | b)
}

/// The pixel engine.
pub struct PixelEngine<W: WaveformSink> {
    sink: W,
    plane: BitPlane,
    nbits: usize,
    dim: Rgb,
    period: u32,
    armed: bool,
    captured: bool,
    inhibit: bool,
    startup: Option<Deadline>,
    next_frame: Option<Deadline>,
}

impl<W: WaveformSink> PixelEngine<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            plane: BitPlane::new(),
            nbits: plane::MAXBITS,
            dim: Rgb::new(255, 255, 255),
            period: 0,
            armed: false,
            captured: false,
            inhibit: true,
            startup: None,
            next_frame: None,
        }
    }

    /// Store length, frame rate and global dim in one go.
    pub fn configure(&mut self, length: u16, fps: u16, dim: Rgb, now: u32) {
        self.set_dim(dim);
        self.set_length(length);
        self.framerate(fps, now);
    }

    /// Set the string length; clipped to `1..=MAXLEDS`.
    pub fn set_length(&mut self, length: u16) {
        let length = (length.max(1) as usize).min(MAXLEDS);
        self.nbits = length * 3 * 8;
    }

    /// Install the global dim triplet.
    pub fn set_dim(&mut self, dim: Rgb) {
        self.dim = dim;
    }

    /// Reprogram the frame-rate generator.
    ///
    /// Zero selects manual triggering via [`Self::universe`]; anything else
    /// is clamped to at most 50 fps. A running start-up delay is continued.
    pub fn framerate(&mut self, fps: u16, now: u32) {
        self.inhibit = true;
        self.next_frame = None;

        if fps == 0 {
            self.period = 0;
            return;
        }

        self.period = 1000 / fps.min(50) as u32;
        if self.armed {
            if self.startup.is_none() {
                self.next_frame = Some(Deadline::after(now, self.period));
            }
            self.inhibit = false;
        }
    }

    /// Power-gate the LED rail.
    ///
    /// On the rising edge the frame buffer is cleared and the first frame is
    /// scheduled after the start-up delay. On the falling edge three blank
    /// frames are emitted before the rail is cut, so the strings go dark
    /// instead of freezing on stale data.
    pub fn enable(&mut self, on: bool, now: u32) {
        self.inhibit = true;
        self.startup = None;
        self.next_frame = None;

        if on {
            self.armed = true;
            while self.sink.busy() {}

            self.sink.set_power(true);
            self.clear();

            self.startup = Some(Deadline::after(now, STARTUP));
            self.inhibit = false;
        } else {
            for _ in 0..3 {
                while self.sink.busy() {}
                self.clear();
                self.universe();
            }

            while self.sink.busy() {}
            self.armed = false;
            self.sink.set_power(false);
        }
    }

    /// Whether a waveform transfer is in progress.
    pub fn busy(&self) -> bool {
        self.sink.busy()
    }

    /// Schedule emission of the current frame buffer.
    ///
    /// No-op while a transfer is active; silently discards the frame when
    /// the rail is unpowered.
    pub fn universe(&mut self) {
        if !self.armed {
            // Prevent parasitic currents into the unpowered rail.
            self.captured = false;
            return;
        }

        if self.sink.busy() {
            return;
        }

        self.sink.begin_frame(self.plane.bits(self.nbits));
        self.captured = false;
    }

    /// Try to acquire exclusive write access to the frame buffer.
    ///
    /// Succeeds only when the start-up delay has elapsed, no capture is
    /// held, and no transfer is active. Success inhibits the frame-rate
    /// generator until [`Self::release`].
    pub fn capture(&mut self) -> bool {
        if self.startup.is_some() {
            return false;
        }

        if self.captured {
            return false;
        }

        self.inhibit = true;
        if self.sink.busy() {
            return false;
        }

        self.captured = true;
        true
    }

    /// End a capture.
    ///
    /// Releases the frame-rate generator; if the generator is not running,
    /// a captured frame is emitted immediately.
    pub fn release(&mut self) {
        self.inhibit = false;

        if self.captured && self.startup.is_none() && self.next_frame.is_none() {
            self.universe();
        }
    }

    /// Drive the frame-rate generator; the cooperative stand-in for the
    /// frame timer interrupt. Ticks that fall into a capture or an active
    /// transfer are dropped.
    pub fn poll(&mut self, now: u32) {
        if self.inhibit || !self.armed {
            return;
        }

        if let Some(deadline) = self.startup {
            if !deadline.expired(now) {
                return;
            }

            self.startup = None;
            if self.period > 0 {
                self.next_frame = Some(Deadline::after(now, self.period));
            } else {
                // Single default frame, generator stays off.
                self.inhibit = true;
            }

            self.universe();
            return;
        }

        if let Some(deadline) = self.next_frame {
            if !deadline.expired(now) {
                return;
            }

            self.next_frame = Some(Deadline::after(now, self.period));
            self.universe();
        }
    }

    /// Write one RGB pixel, dimmed and transposed.
    pub fn rgb(&mut self, index: u16, string: u8, color: Rgb) {
        let index = (index as usize).min(MAXLEDS - 1);
        let triplet = wire_triplet(color, self.dim);
        self.plane.transpose(index, string.min(5), triplet);
    }

    /// Write one CMY pixel (complemented channels), dimmed and transposed.
    pub fn cmy(&mut self, index: u16, string: u8, cyan: u8, magenta: u8, yellow: u8) {
        let index = (index as usize).min(MAXLEDS - 1);
        let color = Rgb::new(!cyan, !magenta, !yellow);
        let triplet = wire_triplet(color, self.dim);
        self.plane.transpose(index, string.min(5), triplet);
    }

    /// Set all outputs dark.
    pub fn clear(&mut self) {
        self.plane.clear();
    }

    /// Evaluate one LED map against the working buffer.
    pub fn map(&mut self, map: &LedMap, buf: &[u8]) {
        let string = map.string.min(5);
        let begin = (map.begin as usize).min(MAXLEDS - 1);
        let mut taps = [
            map::Tap::new(&map.red),
            map::Tap::new(&map.green),
            map::Tap::new(&map.blue),
        ];

        let mut i = begin as i32;
        while i >= 0 && (i as usize) < MAXLEDS {
            let r = taps[0].get(buf);
            let g = taps[1].get(buf);
            let b = taps[2].get(buf);
            let color = if map.cmy {
                Rgb::new(!r, !g, !b)
            } else {
                Rgb::new(r, g, b)
            };

            self.plane
                .transpose(i as usize, string, wire_triplet(color, self.dim));

            if i as u16 == map.end {
                break;
            }

            for tap in &mut taps {
                tap.advance();
            }

            i += map.step as i32;
        }
    }

    /// Apply all stored maps in order.
    pub fn maps(&mut self, maps: &[LedMap], buf: &[u8]) {
        for map in maps {
            self.map(map, buf);
        }
    }

    /// The bit-plane prefix that a frame emission covers.
    pub fn frame(&self) -> &[u8] {
        self.plane.bits(self.nbits)
    }
}
