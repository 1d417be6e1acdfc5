//! Coordinator text protocol.
//!
//! A node configured as coordinator exposes a line-based ASCII protocol on
//! the serial port and translates it to radio packets. A request is a verb
//! plus space-separated integer arguments, terminated by a blank line; the
//! response starts with a three-digit code, carries optional `Key: value`
//! lines and ends with a blank line.
//!
//! ```text
//!     > PING 42
//!     >
//!     < 100 Pong
//!     < Vbat: 4012
//!     < Rssi: -61
//!     < Temperature: 28
//!     <
//! ```
//!
//! Frame payloads for `TPM2` travel as base64 and are decoded in place
//! before they are chunked onto the air.

use core::fmt::Write as _;

use heapless::{String, Vec};

use crate::base64;
use crate::buffer::MAXBUFF;
use crate::clock::Clock;
use crate::handler::Commander;
use crate::radio::{RadioBus, MAXPACK};
use crate::serial::{LineStatus, SerialPort};

/// Serial rate of the coordinator port.
pub const SERVER_BAUD: u32 = 57600;

pub const SRV_OK: u16 = 100;
pub const SRV_NO_RSSI: u16 = 300;
pub const SRV_BAD_REQUEST: u16 = 400;
pub const SRV_ILL_ARG: u16 = 401;
pub const SRV_NO_NODE: u16 = 404;

/// Response assembly buffer.
type Response = String<1024>;

/// Identity and sensor snapshot for the local requests.
pub struct ServerInfo {
    pub uid: u32,
    pub hardware: u16,
    pub software: u16,
    pub vbat: u16,
    pub temperature: i16,
}

/// The request server.
pub struct Server {
    line: Vec<u8, MAXBUFF>,
    ready: bool,
}

impl Server {
    pub fn new() -> Self {
        Self {
            line: Vec::new(),
            ready: false,
        }
    }

    /// Serial receive hook; assembles one request up to its blank line.
    pub fn feed(&mut self, status: LineStatus, ch: u8) {
        if self.ready {
            return;
        }

        if status.error {
            // Flush input
            self.line.clear();
            return;
        }

        if !status.ready {
            return;
        }

        if self.line.last() == Some(&b'\n') && ch == b'\n' {
            // End of header
            self.line.pop();
            self.ready = true;
            return;
        }

        if self.line.push(ch).is_err() {
            // Overflow without end of header
            self.line.clear();
        }
    }

    fn flush(&mut self) {
        self.line.clear();
        self.ready = false;
    }

    /// Execute the pending request, if any. Returns whether a well-formed
    /// request was served.
    pub fn serve<B: RadioBus, C: Clock>(
        &mut self,
        cmd: &mut Commander<'_, B, C>,
        info: &ServerInfo,
        tty: &mut impl SerialPort,
    ) -> bool {
        if !self.ready {
            return false;
        }

        // Flush if solely whitespace
        let mut p = self.line.as_slice();
        while let [first, rest @ ..] = p {
            if !first.is_ascii_whitespace() {
                break;
            }
            p = rest;
        }

        if p.is_empty() {
            self.flush();
            return false;
        }

        // Parse request type and arguments
        let mut verb: String<8> = String::new();
        let mut taken = 0;
        for &ch in p {
            if !ch.is_ascii_alphanumeric() {
                break;
            }

            taken += 1;
            let _ = verb.push(ch.to_ascii_uppercase() as char);
        }

        let arg = &p[(taken + 1).min(p.len())..];

        let mut response = Response::new();
        let served = dispatch(&verb, arg, cmd, info, &mut response);

        let _ = response.push('\n');
        tty.write(response.as_bytes());
        self.flush();
        served
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

fn status(out: &mut Response, code: u16, text: &str) {
    let _ = writeln!(out, "{} {}", code, text);
}

/// Scan one decimal integer, with optional sign and surrounding
/// whitespace. Returns the value and the remaining text.
fn scan_int(mut p: &[u8], min: i32, max: i32) -> Option<(i32, &[u8])> {
    while let [first, rest @ ..] = p {
        if !first.is_ascii_whitespace() {
            break;
        }
        p = rest;
    }

    let mut negative = false;
    if let [sign @ (b'-' | b'+'), rest @ ..] = p {
        negative = *sign == b'-';
        p = rest;
    }

    while let [first, rest @ ..] = p {
        if !first.is_ascii_whitespace() {
            break;
        }
        p = rest;
    }

    if !matches!(p.first(), Some(d) if d.is_ascii_digit()) {
        return None;
    }

    let mut value: i32 = 0;
    while let [digit, rest @ ..] = p {
        if !digit.is_ascii_digit() {
            break;
        }

        let digit = (digit - b'0') as i32;
        value = if negative {
            value.checked_mul(10)?.checked_sub(digit)?
        } else {
            value.checked_mul(10)?.checked_add(digit)?
        };
        p = rest;
    }

    if value < min || value > max {
        return None;
    }

    // Also skip trailing whitespace for convenience
    while let [first, rest @ ..] = p {
        if !first.is_ascii_whitespace() {
            break;
        }
        p = rest;
    }

    Some((value, p))
}

fn dispatch<B: RadioBus, C: Clock>(
    verb: &str,
    arg: &[u8],
    cmd: &mut Commander<'_, B, C>,
    info: &ServerInfo,
    out: &mut Response,
) -> bool {
    match verb {
        "HELO" => {
            status(out, SRV_OK, "Ready");
            let _ = writeln!(out, "Hardware version: {}", info.hardware);
            let _ = writeln!(out, "Software version: {}", info.software);
            let _ = writeln!(out, "Vbat: {}", info.vbat);
            let _ = writeln!(out, "Temperature: {}", info.temperature);
            let _ = writeln!(out, "Identifier: {:08X}", info.uid);
        }

        "WAKE" => {
            let Some((id, _)) = scan_int(arg, 1, 254) else {
                status(out, SRV_ILL_ARG, "Illegal argument");
                return false;
            };

            if cmd.wake(id as u8) {
                status(out, SRV_OK, "Wake up");
            } else {
                status(out, SRV_NO_NODE, "No node");
            }
        }

        "SLEEP" => {
            let Some((id, _)) = scan_int(arg, 1, 254) else {
                status(out, SRV_ILL_ARG, "Illegal argument");
                return false;
            };

            if cmd.sleep(id as u8) {
                status(out, SRV_OK, "Sleep");
            } else {
                status(out, SRV_NO_NODE, "No node");
            }
        }

        "PING" => {
            let Some((id, _)) = scan_int(arg, 0, 254) else {
                status(out, SRV_ILL_ARG, "Illegal argument");
                return false;
            };

            match cmd.ping(id as u8) {
                Some((vbat, rssi, temperature)) => {
                    status(out, SRV_OK, "Pong");
                    let _ = writeln!(out, "Vbat: {}", vbat);
                    let _ = writeln!(out, "Rssi: {}", rssi);
                    let _ = writeln!(out, "Temperature: {}", temperature);
                }
                None => status(out, SRV_NO_NODE, "No node"),
            }
        }

        "FINGER" => {
            let Some((id, _)) = scan_int(arg, 0, 254) else {
                status(out, SRV_ILL_ARG, "Illegal argument");
                return false;
            };

            match cmd.finger(id as u8) {
                Some((uid, hardware, software)) => {
                    status(out, SRV_OK, "Finger");
                    let _ = writeln!(out, "Hardware version: {}", hardware);
                    let _ = writeln!(out, "Software version: {}", software);
                    let _ = writeln!(out, "Identifier: {:08X}", uid);
                }
                None => status(out, SRV_NO_NODE, "No node"),
            }
        }

        "START" => {
            let Some((id, rest)) = scan_int(arg, 0, 254) else {
                status(out, SRV_ILL_ARG, "Illegal argument");
                return false;
            };
            let Some((scene, _)) = scan_int(rest, 0, u16::MAX as i32) else {
                status(out, SRV_ILL_ARG, "Illegal argument");
                return false;
            };

            if cmd.start(id as u8, scene as u16) {
                status(out, SRV_OK, "Playing");
                let _ = writeln!(out, "Scene: {}", scene);
            } else {
                status(out, SRV_NO_NODE, "No node");
            }
        }

        "PAUSE" => {
            let Some((id, _)) = scan_int(arg, 0, 254) else {
                status(out, SRV_ILL_ARG, "Illegal argument");
                return false;
            };

            if cmd.pause(id as u8) {
                status(out, SRV_OK, "Paused");
            } else {
                status(out, SRV_NO_NODE, "No node");
            }
        }

        "SKIP" => {
            let Some((id, _)) = scan_int(arg, 0, 254) else {
                status(out, SRV_ILL_ARG, "Illegal argument");
                return false;
            };

            if cmd.skip(id as u8) {
                status(out, SRV_OK, "Skipped");
            } else {
                status(out, SRV_NO_NODE, "No node");
            }
        }

        "STOP" => {
            let Some((id, _)) = scan_int(arg, 0, 254) else {
                status(out, SRV_ILL_ARG, "Illegal argument");
                return false;
            };

            if cmd.stop(id as u8) {
                status(out, SRV_OK, "Stopped");
            } else {
                status(out, SRV_NO_NODE, "No node");
            }
        }

        "FRAME" => {
            let Some((id, _)) = scan_int(arg, 0, 254) else {
                status(out, SRV_ILL_ARG, "Illegal argument");
                return false;
            };

            if cmd.frame(id as u8) {
                status(out, SRV_OK, "Frame generated");
            } else {
                status(out, SRV_NO_NODE, "No node");
            }
        }

        "DIM" => {
            let parsed = scan_int(arg, 0, 254).and_then(|(id, rest)| {
                let (red, rest) = scan_int(rest, 0, 255)?;
                let (green, rest) = scan_int(rest, 0, 255)?;
                let (blue, _) = scan_int(rest, 0, 255)?;
                Some((id, red, green, blue))
            });

            let Some((id, red, green, blue)) = parsed else {
                status(out, SRV_ILL_ARG, "Illegal argument");
                return false;
            };

            if cmd.dim(id as u8, red as u8, green as u8, blue as u8) {
                status(out, SRV_OK, "Dimmed");
            } else {
                status(out, SRV_NO_NODE, "No node");
            }
        }

        "RSSI" => {
            let now = cmd.clock.now();
            if cmd.rf.received(now) {
                status(out, SRV_OK, "Rssi");
                let _ = writeln!(out, "Rssi: {}", cmd.rf.rssi());
                let _ = writeln!(out, "Fei: {}", cmd.rf.fei());

                // Discard packet
                let mut msg = [0u8; MAXPACK];
                let (_, length) = cmd.rf.receive(&mut msg, now);
                let _ = write!(out, "Package:");
                for &byte in &msg[..length] {
                    let _ = write!(out, " 0x{:X}", byte);
                }
                let _ = out.push('\n');
            } else {
                status(out, SRV_NO_RSSI, "No rssi");
            }
        }

        "TPM2" => {
            let Some((id, rest)) = scan_int(arg, 0, 254) else {
                status(out, SRV_ILL_ARG, "Illegal argument");
                return false;
            };

            // Translate in place
            let mut frame: Vec<u8, MAXBUFF> = Vec::new();
            let _ = frame.extend_from_slice(rest);
            let length = frame.len();
            let Some(decoded) = base64::decode_in_place(&mut frame, length) else {
                status(out, SRV_ILL_ARG, "Illegal argument");
                return false;
            };

            if cmd.tpm2(id as u8, &frame[..decoded]) {
                status(out, SRV_OK, "Frame sent");
            } else {
                status(out, SRV_NO_NODE, "No node");
            }
        }

        _ => {
            status(out, SRV_BAD_REQUEST, "Bad Request");
            return false;
        }
    }

    true
}
