//! Radio application protocol: command codes and packet codec.
//!
//! The first payload byte of every packet is a command code; arguments
//! follow in little-endian order. [`Writer`] and [`Reader`] are the typed
//! counterparts of a format-string codec: `u8/i8/u16/i16/u32/i32` plus a
//! four-byte magic. A reply is well formed only when the reader consumed
//! the payload exactly, which [`Reader::finish`] checks.

use crate::radio::MAXPACK;

/// Battery, signal and temperature report.
pub const HND_PING: u8 = 0x01;
/// Start a scene, `scene: u16` argument.
pub const HND_START: u8 = 0x33;
/// End the current scene command.
pub const HND_SKIP: u8 = 0x34;
/// Stop the scene.
pub const HND_STOP: u8 = 0x35;
/// Pause the scene.
pub const HND_PAUSE: u8 = 0x37;
/// Force a one-shot frame emission.
pub const HND_FRAME: u8 = 0x99;
/// Global dim, `r, g, b` arguments.
pub const HND_DIM: u8 = 0xD1;
/// TPM2 stream chunk; an empty chunk resets the decoder.
pub const HND_TPM2: u8 = 0xDA;
/// Identification request.
pub const HND_FINGER: u8 = 0xF1;

/// Wake burst magic. `0xCA` doubles as a reserved command code.
pub const WAKE_MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];
/// Sleep request magic. `0xDE` doubles as a reserved command code.
pub const SLEEP_MAGIC: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

/// Broadcast address.
pub const BROADCAST: u8 = 0xFF;

/// Little-endian payload builder.
pub struct Writer {
    buf: [u8; MAXPACK],
    len: usize,
}

impl Writer {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAXPACK],
            len: 0,
        }
    }

    fn push(&mut self, bytes: &[u8]) -> &mut Self {
        let n = bytes.len().min(MAXPACK - self.len);
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        self
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.push(&[v])
    }

    pub fn i8(&mut self, v: i8) -> &mut Self {
        self.push(&[v as u8])
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.push(&[v as u8])
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.push(&v.to_le_bytes())
    }

    pub fn i16(&mut self, v: i16) -> &mut Self {
        self.push(&v.to_le_bytes())
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.push(&v.to_le_bytes())
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.push(&v.to_le_bytes())
    }

    pub fn magic(&mut self, m: &[u8; 4]) -> &mut Self {
        self.push(m)
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.push(data)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

/// Little-endian payload reader.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.data.get(self.pos..self.pos + N)?;
        self.pos += N;
        bytes.try_into().ok()
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|b| b[0])
    }

    pub fn i8(&mut self) -> Option<i8> {
        self.take::<1>().map(|b| b[0] as i8)
    }

    pub fn u16(&mut self) -> Option<u16> {
        self.take::<2>().map(u16::from_le_bytes)
    }

    pub fn i16(&mut self) -> Option<i16> {
        self.take::<2>().map(i16::from_le_bytes)
    }

    pub fn u32(&mut self) -> Option<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    pub fn i32(&mut self) -> Option<i32> {
        self.take::<4>().map(i32::from_le_bytes)
    }

    pub fn skip_magic(&mut self) -> Option<()> {
        self.take::<4>().map(|_| ())
    }

    /// Whether the payload was consumed exactly.
    pub fn finish(&self) -> bool {
        self.pos == self.data.len()
    }
}
