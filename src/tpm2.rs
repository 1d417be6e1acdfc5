//! TPM2 decoding.
//!
//! Decodes TPM2 serial blocks (specification V1.0 as of 2013) plus the TPZ
//! run-length variant. A block is
//!
//! ```text
//!     C9 <type> <len hi> <len lo> <len bytes ...> 36
//! ```
//!
//! with type `DA` (raw data) or `CA` (run-length data). In a continuous
//! sequence of blocks the end byte and the start bytes concatenate to a
//! three-byte magic, which is what the detector latches on: only after five
//! consecutive valid block starts does the decoder leave `Detect`. Combined
//! with a rotating baud-rate probe this doubles as the auto-baud mechanism.
//!
//! Decoded payload lands in the working buffer; a completed frame raises
//! the latched `trip` flag, which the consumer clears after rendering.
//! While `trip` is set incoming blocks are skipped, never torn.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::buffer::{WorkBuffer, MAXBUFF};
use crate::clock::Deadline;
use crate::serial::{LineStatus, SerialPort};

/// Block start byte.
pub const BLOCK_START: u8 = 0xC9;
/// Raw data block type.
pub const BLOCK_DATA: u8 = 0xDA;
/// Run-length data block type (TPZ).
pub const BLOCK_ZDATA: u8 = 0xCA;
/// Block end byte.
pub const BLOCK_END: u8 = 0x36;

/// Baud rates probed by the detector, in rotation order.
pub const BAUD_RATES: [u32; 8] = [
    9600, 19200, 38400, 57600, 115200, 230400, 460800, 500000,
];

/// Detector dwell time per baud rate, in milliseconds.
pub const TPM2_TIMEOUT: u32 = 1000;

/// Mid-block stall watchdog, in milliseconds.
const FRAME_TIMEOUT: u32 = 4;

/// Framing-error count that gates the detector.
const SHIFT_THRESHOLD: u8 = 16;

const fn magic(kind: u8) -> u32 {
    ((BLOCK_END as u32) << 16) | ((BLOCK_START as u32) << 8) | kind as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Detect,
    Start,
    Type,
    LenHi,
    LenLo,
    Data,
    Repeat,
    Skip,
    End,
}

/// The TPM2/TPZ stream decoder.
pub struct Tpm2Decoder {
    state: State,
    length: u16,
    index: usize,
    sync: u8,
    ch0: u32,
    ch1: u32,
    repeat: bool,
    trip: AtomicBool,
    trap: bool,
    shift: u8,
    baud: usize,
    detect_deadline: Deadline,
    frame_deadline: Deadline,
}

impl Tpm2Decoder {
    pub fn new(now: u32) -> Self {
        Self {
            state: State::Detect,
            length: 0,
            index: 0,
            sync: 0,
            ch0: 0,
            ch1: 0,
            repeat: false,
            trip: AtomicBool::new(false),
            trap: false,
            shift: 0,
            baud: 0,
            detect_deadline: Deadline::after(now, TPM2_TIMEOUT),
            frame_deadline: Deadline::after(now, FRAME_TIMEOUT),
        }
    }

    /// Drop all decoder state and return to detection.
    pub fn reset(&mut self, now: u32) {
        self.ch0 = 0;
        self.ch1 = 0;
        self.trip.store(false, Ordering::Release);
        self.trap = false;
        self.shift = 0;
        self.sync = 0;
        self.detect_deadline = Deadline::after(now, TPM2_TIMEOUT);
        self.state = State::Detect;
    }

    /// Whether a complete frame is waiting in the working buffer.
    pub fn trip(&self) -> bool {
        self.trip.load(Ordering::Acquire)
    }

    /// Consume the pending frame.
    pub fn clear(&self) {
        self.trip.store(false, Ordering::Release);
    }

    /// Replicate the last triplet until `index` reaches `upto` (TPZ).
    fn unroll(&mut self, buf: &mut WorkBuffer, upto: usize) {
        for k in self.index..upto {
            buf[k] = buf[k - 3];
        }
        self.index = upto;
    }

    /// Run one byte through the block decoder. Returns true when a block
    /// just completed.
    pub fn digest(&mut self, buf: &mut WorkBuffer, ch: u8) -> bool {
        self.ch0 = (self.ch0 << 8) | ch as u32;
        self.ch1 = (self.ch1 << 8) | (self.ch0 >> 24);

        match self.state {
            State::Detect | State::Start => {
                if ch == BLOCK_START {
                    self.state = State::Type;
                }
            }

            State::Type => {
                self.repeat = false;
                if ch == BLOCK_ZDATA {
                    self.state = State::LenHi;
                    self.repeat = true;
                } else if ch == BLOCK_DATA {
                    self.state = State::LenHi;
                } else {
                    self.state = State::Start;
                }
            }

            State::LenHi => {
                self.state = State::LenLo;
            }

            State::LenLo => {
                self.index = 0;
                self.length = (self.ch0 & 0xFFFF) as u16;
                if self.length == 0 {
                    self.state = State::End;
                } else if self.trip() {
                    self.state = State::Skip;
                } else {
                    self.state = State::Data;
                }
            }

            State::Skip => {
                self.length -= 1;
                if self.length == 0 {
                    self.state = State::End;
                }
            }

            State::Data => {
                buf[self.index] = ch;
                self.index += 1;
                self.length -= 1;
                if self.length == 0 {
                    self.state = State::End;
                    self.trip.store(true, Ordering::Release);
                } else if self.index >= MAXBUFF {
                    log::warn!("tpm2: block exceeds buffer, truncating");
                    self.state = State::Skip;
                    self.trip.store(true, Ordering::Release);
                } else if self.repeat
                    && self.index >= 6
                    && (self.ch0 & 0x00FF_FFFF) == (self.ch1 & 0x00FF_FFFF)
                {
                    self.state = State::Repeat;
                }
            }

            State::Repeat => {
                let upto = self.index + ch as usize * 3;
                if upto >= MAXBUFF {
                    // Sanity
                    self.state = State::Skip;
                    self.unroll(buf, MAXBUFF);
                } else {
                    self.state = State::Data;
                    self.unroll(buf, upto);
                }

                self.ch0 >>= 8;
                self.ch1 = self.ch0;
                self.length -= 1;
                if self.length == 0 {
                    self.state = State::End;
                }

                if self.state != State::Data {
                    self.trip.store(true, Ordering::Release);
                }
            }

            State::End => {
                self.state = State::Start;
                if ch == BLOCK_END {
                    self.trap = true;
                    return true;
                }
            }
        }

        false
    }

    /// Digest bytes from a slice, stopping after a completed block.
    /// Returns the number of bytes consumed.
    pub fn digest_slice(&mut self, buf: &mut WorkBuffer, data: &[u8]) -> usize {
        let mut taken = 0;
        for &ch in data {
            taken += 1;
            if self.digest(buf, ch) {
                break;
            }
        }

        taken
    }

    /// Serial receive hook.
    ///
    /// Framing errors reset to detection and count towards the shift
    /// threshold. In `Detect` the last three bytes are watched for the
    /// block magic; five in a row latch the decoder onto the stream. A
    /// stalled block is realigned by the frame watchdog, provided the
    /// sender inserts a short gap between frames.
    pub fn feed(&mut self, buf: &mut WorkBuffer, status: LineStatus, ch: u8, now: u32) {
        if status.error {
            self.length = 0;
            self.sync = 0;
            self.state = State::Detect;
            if self.shift < SHIFT_THRESHOLD {
                self.shift += 1;
            }
        } else if self.state == State::Detect {
            self.ch0 = (self.ch0 << 8) | ch as u32;
            let magic_ = self.ch0 & 0x00FF_FFFF;
            if magic_ == magic(BLOCK_DATA) || magic_ == magic(BLOCK_ZDATA) {
                self.repeat = magic_ == magic(BLOCK_ZDATA);
                self.sync += 1;
                if self.sync == 5 {
                    self.sync = 0;
                    self.frame_deadline = Deadline::after(now, FRAME_TIMEOUT);
                    self.state = State::LenHi;
                    self.trip.store(false, Ordering::Release);
                    self.trap = false;
                }
            }
        } else {
            // The protocol has no frame sync, so a single missed byte would
            // misalign the stream forever. Catch on a short interruption.
            if self.frame_deadline.expired(now) {
                self.state = State::Start;
            }

            if status.ready {
                self.frame_deadline = Deadline::after(now, FRAME_TIMEOUT);
                self.digest(buf, ch);
            }
        }
    }

    /// Whether the stream is locked; rotates to the next baud rate when the
    /// dwell time passes without a complete block.
    pub fn detect(&mut self, tty: &mut impl SerialPort, now: u32) -> bool {
        if self.trap {
            self.trap = false;
            self.detect_deadline = Deadline::after(now, TPM2_TIMEOUT);
            return true;
        }

        if !self.detect_deadline.expired(now) && self.shift < SHIFT_THRESHOLD {
            return true;
        }

        // Try another baud rate
        self.baud = (self.baud + 1) % BAUD_RATES.len();
        tty.set_baud(BAUD_RATES[self.baud]);

        self.detect_deadline = Deadline::after(now, TPM2_TIMEOUT);
        self.shift = 0;
        false
    }
}

/// Wrap a payload into a TPM2 block envelope.
///
/// Returns false when the output buffer cannot hold the block.
pub fn envelope<const N: usize>(
    kind: u8,
    payload: &[u8],
    out: &mut heapless::Vec<u8, N>,
) -> bool {
    if out.len() + payload.len() + 5 > N || payload.len() > u16::MAX as usize {
        return false;
    }

    let len = payload.len() as u16;
    let _ = out.push(BLOCK_START);
    let _ = out.push(kind);
    let _ = out.push((len >> 8) as u8);
    let _ = out.push(len as u8);
    let _ = out.extend_from_slice(payload);
    let _ = out.push(BLOCK_END);
    true
}

/// Run-length encode a frame for a TPZ (`CA`) block.
///
/// Two successive equal pixel triplets are followed by a one-byte count of
/// further repetitions, capped at 250.
pub fn compress<const N: usize>(raw: &[u8], out: &mut heapless::Vec<u8, N>) -> bool {
    let mut i = 0;
    while i < raw.len() {
        if out.push(raw[i]).is_err() {
            return false;
        }
        i += 1;
        if i < 6 {
            continue;
        }

        if raw[i - 6..i - 3] == raw[i - 3..i] {
            let mut n: u8 = 0;
            let mut j = i + 3;
            while j <= raw.len() {
                if raw[i - 3..i] != raw[j - 3..j] {
                    break;
                }

                j += 3;
                n += 1;
                if n == 250 {
                    break;
                }
            }

            if out.push(n).is_err() {
                return false;
            }
            i = j - 3;
        }
    }

    true
}
