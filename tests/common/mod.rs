//! Shared fixtures: a manual/real test clock, a recording waveform sink, an
//! in-memory volume, serial and control stubs, and a scripted transceiver
//! chip pair connected through a shared air.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use strandcast::clock::Clock;
use strandcast::node::{Node, Parts, Platform, Sensors, SystemCtl};
use strandcast::pixel::WaveformSink;
use strandcast::radio::regs;
use strandcast::radio::RadioBus;
use strandcast::serial::SerialPort;
use strandcast::storage::{Source, Volume};
use strandcast::ui::Controls;

// ---------------------------------------------------------------------------
// Clock

#[derive(Clone)]
pub struct TestClock {
    origin: Option<std::time::Instant>,
    ticks: Arc<AtomicU32>,
}

impl TestClock {
    /// A clock that only moves when advanced (or one tick per idle).
    pub fn manual() -> Self {
        Self {
            origin: None,
            ticks: Arc::new(AtomicU32::new(0)),
        }
    }

    /// A clock that follows the wall clock, for threaded tests.
    pub fn real() -> Self {
        Self {
            origin: Some(std::time::Instant::now()),
            ticks: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn advance(&self, msecs: u32) {
        self.ticks.fetch_add(msecs, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now(&self) -> u32 {
        match self.origin {
            Some(origin) => origin.elapsed().as_millis() as u32,
            None => self.ticks.load(Ordering::SeqCst),
        }
    }

    fn idle(&self) {
        match self.origin {
            Some(_) => std::thread::sleep(std::time::Duration::from_micros(200)),
            None => {
                self.ticks.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Waveform sink

#[derive(Clone, Default)]
pub struct RecordingSink {
    pub frames: Arc<Mutex<Vec<Vec<u8>>>>,
    pub powered: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn last_frame(&self) -> Option<Vec<u8>> {
        self.frames.lock().unwrap().last().cloned()
    }

    pub fn clear(&self) {
        self.frames.lock().unwrap().clear();
    }
}

impl WaveformSink for RecordingSink {
    fn begin_frame(&mut self, bits: &[u8]) {
        self.frames.lock().unwrap().push(bits.to_vec());
    }

    fn busy(&self) -> bool {
        false
    }

    fn set_power(&mut self, on: bool) {
        self.powered.store(on, Ordering::SeqCst);
    }
}

/// Reconstruct one pixel from an emitted bit plane.
pub fn pixel_at(frame: &[u8], string: u8, index: usize) -> (u8, u8, u8) {
    let mut triplet: u32 = 0;
    for i in 0..24 {
        let bit = (frame[index * 24 + i] >> string) & 1;
        triplet = (triplet << 1) | bit as u32;
    }

    let triplet = !triplet & 0x00FF_FFFF;
    let g = (triplet >> 16) as u8;
    let r = (triplet >> 8) as u8;
    let b = triplet as u8;
    (r, g, b)
}

// ---------------------------------------------------------------------------
// Serial port

#[derive(Clone, Default)]
pub struct RecordingSerial {
    pub baud: Arc<AtomicU32>,
    pub out: Arc<Mutex<Vec<u8>>>,
}

impl RecordingSerial {
    pub fn new() -> Self {
        Self {
            baud: Arc::new(AtomicU32::new(9600)),
            out: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn baud(&self) -> u32 {
        self.baud.load(Ordering::SeqCst)
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.out.lock().unwrap()).into_owned()
    }

    pub fn clear(&self) {
        self.out.lock().unwrap().clear();
    }
}

impl SerialPort for RecordingSerial {
    fn set_baud(&mut self, baud: u32) {
        self.baud.store(baud, Ordering::SeqCst);
    }

    fn write(&mut self, bytes: &[u8]) {
        self.out.lock().unwrap().extend_from_slice(bytes);
    }
}

// ---------------------------------------------------------------------------
// Storage

#[derive(Clone, Default)]
pub struct MemVolume {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemVolume {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, name: &str, data: &[u8]) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), data.to_vec());
        self
    }

    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(name).cloned()
    }
}

pub struct OwnedSource {
    data: Vec<u8>,
    pos: usize,
}

impl Source for OwnedSource {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let left = &self.data[self.pos.min(self.data.len())..];
        let n = buf.len().min(left.len());
        buf[..n].copy_from_slice(&left[..n]);
        self.pos += n;
        n
    }

    fn seek(&mut self, pos: u32) {
        self.pos = (pos as usize).min(self.data.len());
    }

    fn tell(&self) -> u32 {
        self.pos as u32
    }

    fn eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn size(&self) -> u32 {
        self.data.len() as u32
    }
}

impl Volume for MemVolume {
    type File = OwnedSource;

    fn open(&mut self, name: &str) -> Option<OwnedSource> {
        let data = self.files.lock().unwrap().get(name).cloned()?;
        Some(OwnedSource { data, pos: 0 })
    }

    fn append(&mut self, name: &str, text: &str) -> bool {
        self.files
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .extend_from_slice(text.as_bytes());
        true
    }

    fn size_of(&mut self, name: &str) -> u32 {
        self.files
            .lock()
            .unwrap()
            .get(name)
            .map_or(0, |data| data.len() as u32)
    }
}

// ---------------------------------------------------------------------------
// Transceiver

struct ChipState {
    regs: [u8; 0x80],
    fifo: Vec<u8>,
    rx: Vec<Vec<u8>>,
    rx_taken: usize,
    wake_armed: bool,
    wake_latch: bool,
    rssi: u8,
}

impl ChipState {
    fn new() -> Self {
        Self {
            regs: [0; 0x80],
            fifo: Vec::new(),
            rx: Vec::new(),
            rx_taken: 0,
            wake_armed: false,
            wake_latch: false,
            rssi: 122, // -61 dBm
        }
    }

    fn listening(&self) -> bool {
        let op = self.regs[regs::REG_OP_MODE as usize];
        op & regs::OP_MODE_MODE == regs::OP_MODE_RX || op & regs::OP_MODE_LISTEN_ON != 0
    }

    fn accepts(&self, dst: u8) -> bool {
        if !self.listening() {
            return false;
        }

        match self.regs[regs::REG_PACKET_CONFIG1 as usize] & 0x06 {
            regs::PACKET_CONFIG1_FILTER_NODE_BC => {
                dst == self.regs[regs::REG_NODE_ADRS as usize]
                    || dst == self.regs[regs::REG_BROADCAST_ADRS as usize]
            }
            _ => true,
        }
    }

    fn pop_byte(&mut self) -> u8 {
        if let Some(packet) = self.rx.first_mut() {
            if self.rx_taken < packet.len() {
                let byte = packet[self.rx_taken];
                self.rx_taken += 1;
                if self.rx_taken == packet.len() {
                    self.rx.remove(0);
                    self.rx_taken = 0;
                }
                return byte;
            }
        }

        if !self.fifo.is_empty() {
            return self.fifo.remove(0);
        }

        0
    }
}

struct AirState {
    chips: Vec<ChipState>,
    /// Every packet that ever went on air, as `(sender, bytes)`.
    log: Vec<(usize, Vec<u8>)>,
}

/// The shared medium; spawn chips off it.
#[derive(Clone)]
pub struct Air {
    state: Arc<Mutex<AirState>>,
}

impl Air {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(AirState {
                chips: Vec::new(),
                log: Vec::new(),
            })),
        }
    }

    pub fn chip(&self) -> FakeChip {
        let mut state = self.state.lock().unwrap();
        state.chips.push(ChipState::new());
        FakeChip {
            air: self.clone(),
            index: state.chips.len() - 1,
        }
    }

    pub fn sent_packets(&self) -> Vec<(usize, Vec<u8>)> {
        self.state.lock().unwrap().log.clone()
    }
}

impl Default for Air {
    fn default() -> Self {
        Self::new()
    }
}

/// One scripted transceiver on the shared air. Clones share the same chip
/// and serve as register probes.
#[derive(Clone)]
pub struct FakeChip {
    air: Air,
    index: usize,
}

impl FakeChip {
    pub fn reg(&self, reg: u8) -> u8 {
        self.air.state.lock().unwrap().chips[self.index].regs[reg as usize]
    }

    /// Inject a raw packet `len | dst | payload` into this chip's receive
    /// path, subject to its address filter.
    pub fn inject(&self, dst: u8, payload: &[u8]) {
        let mut state = self.air.state.lock().unwrap();
        let chip = &mut state.chips[self.index];
        if !chip.accepts(dst) {
            return;
        }

        let mut packet = vec![payload.len() as u8 + 2, dst];
        packet.extend_from_slice(payload);
        chip.rx.push(packet);
        if chip.wake_armed {
            chip.wake_latch = true;
        }
    }

    /// Complete auto-mode transmissions once the FIFO holds the packet.
    fn pump(state: &mut AirState, index: usize) {
        let auto = state.chips[index].regs[regs::REG_AUTO_MODES as usize];
        let tx_armed = auto & 0x03 == regs::AUTO_MODES_INTERMEDIATE_TX;
        if !tx_armed {
            return;
        }

        let fifo_len = state.chips[index].fifo.len();
        if fifo_len < 2 || fifo_len < state.chips[index].fifo[0] as usize {
            return;
        }

        let packet = std::mem::take(&mut state.chips[index].fifo);
        let dst = packet[1];
        state.log.push((index, packet.clone()));

        for (i, chip) in state.chips.iter_mut().enumerate() {
            if i == index || !chip.accepts(dst) {
                continue;
            }

            chip.rx.push(packet.clone());
            if chip.wake_armed {
                chip.wake_latch = true;
            }
        }
    }
}

impl RadioBus for FakeChip {
    fn write(&mut self, reg: u8, value: u8) {
        let mut state = self.air.state.lock().unwrap();
        {
            let chip = &mut state.chips[self.index];
            match reg {
                regs::REG_FIFO => chip.fifo.push(value),
                regs::REG_IRQ_FLAGS2 => {
                    if value & regs::IRQ2_FIFO_OVERRUN != 0 {
                        chip.fifo.clear();
                    }
                }
                regs::REG_OP_MODE => {
                    chip.regs[reg as usize] = value;
                    // Re-entering RX finalizes a half-read packet
                    if value & regs::OP_MODE_MODE == regs::OP_MODE_RX && chip.rx_taken > 0 {
                        chip.rx.remove(0);
                        chip.rx_taken = 0;
                    }
                }
                _ => chip.regs[reg as usize] = value,
            }
        }

        Self::pump(&mut state, self.index);
    }

    fn read(&mut self, reg: u8) -> u8 {
        let mut state = self.air.state.lock().unwrap();
        Self::pump(&mut state, self.index);
        let chip = &mut state.chips[self.index];
        match reg {
            regs::REG_FIFO => chip.pop_byte(),
            regs::REG_IRQ_FLAGS1 => regs::IRQ1_MODE_READY,
            regs::REG_IRQ_FLAGS2 => {
                let mut flags = 0;
                if !chip.fifo.is_empty() {
                    flags |= regs::IRQ2_FIFO_NOT_EMPTY;
                }
                if !chip.rx.is_empty() {
                    flags |= regs::IRQ2_PAYLOAD_READY;
                }
                flags
            }
            regs::REG_OSC1 => regs::OSC1_RC_CAL_DONE,
            regs::REG_RSSI_VALUE => chip.rssi,
            _ => chip.regs[reg as usize],
        }
    }

    fn write_fifo(&mut self, data: &[u8]) {
        let mut state = self.air.state.lock().unwrap();
        state.chips[self.index].fifo.extend_from_slice(data);
        Self::pump(&mut state, self.index);
    }

    fn read_fifo(&mut self, data: &mut [u8]) {
        let mut state = self.air.state.lock().unwrap();
        let chip = &mut state.chips[self.index];
        for byte in data.iter_mut() {
            *byte = chip.pop_byte();
        }
    }

    fn dio0(&self) -> bool {
        let state = self.air.state.lock().unwrap();
        !state.chips[self.index].rx.is_empty()
    }

    fn wake_event(&self) -> bool {
        let state = self.air.state.lock().unwrap();
        state.chips[self.index].wake_latch
    }

    fn arm_wake(&mut self) {
        let mut state = self.air.state.lock().unwrap();
        let chip = &mut state.chips[self.index];
        chip.wake_armed = true;
        chip.wake_latch = false;
    }

    fn disarm_wake(&mut self) {
        let mut state = self.air.state.lock().unwrap();
        let chip = &mut state.chips[self.index];
        chip.wake_armed = false;
        chip.wake_latch = false;
    }
}

// ---------------------------------------------------------------------------
// Sensors, system, controls

#[derive(Clone)]
pub struct TestSensors {
    pub vbat: u16,
    pub vled: u16,
    pub temperature: i16,
}

impl Default for TestSensors {
    fn default() -> Self {
        Self {
            vbat: 4000,
            vled: 5000,
            temperature: 25,
        }
    }
}

impl Sensors for TestSensors {
    fn vbat(&mut self) -> u16 {
        self.vbat
    }

    fn vled(&mut self) -> u16 {
        self.vled
    }

    fn temperature(&mut self) -> i16 {
        self.temperature
    }

    fn kick(&mut self) {}
}

#[derive(Clone)]
pub struct TestSystem {
    pub clock: TestClock,
    pub serial: [u8; 12],
}

impl SystemCtl for TestSystem {
    fn serial(&self) -> [u8; 12] {
        self.serial
    }

    fn hardware_version(&self) -> u16 {
        2
    }

    fn software_version(&self) -> u16 {
        7
    }

    fn slow_clock(&mut self) {}

    fn fast_clock(&mut self) {}

    fn stop_until_event(&mut self) {
        self.clock.idle();
    }
}

#[derive(Clone, Default)]
pub struct TestControls {
    pub hex: Arc<AtomicU8>,
    pub input: Arc<AtomicBool>,
    pub led: Arc<AtomicBool>,
}

impl TestControls {
    pub fn set_hex(&self, code: u8) {
        self.hex.store(code, Ordering::SeqCst);
    }
}

impl Controls for TestControls {
    fn hex_code(&self) -> u8 {
        self.hex.load(Ordering::SeqCst)
    }

    fn input(&self) -> bool {
        self.input.load(Ordering::SeqCst)
    }

    fn led(&mut self, on: bool) {
        self.led.store(on, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Node assembly

pub struct TestPlatform;

impl Platform for TestPlatform {
    type Clock = TestClock;
    type Radio = FakeChip;
    type Sink = RecordingSink;
    type Serial = RecordingSerial;
    type Volume = MemVolume;
    type Controls = TestControls;
    type Sensors = TestSensors;
    type System = TestSystem;
}

/// Everything a test needs to drive and observe one node.
pub struct Bench {
    pub node: Node<TestPlatform>,
    pub clock: TestClock,
    pub sink: RecordingSink,
    pub serial: RecordingSerial,
    pub controls: TestControls,
    pub volume: MemVolume,
}

/// Assemble a node on the given air with the given card contents.
pub fn bench(air: &Air, clock: TestClock, volume: MemVolume, hex: u8) -> Bench {
    let sink = RecordingSink::new();
    let serial = RecordingSerial::new();
    let controls = TestControls::default();
    controls.set_hex(hex);

    let node = Node::new(Parts {
        clock: clock.clone(),
        radio: air.chip(),
        sink: sink.clone(),
        serial: serial.clone(),
        volume: volume.clone(),
        controls: controls.clone(),
        sensors: TestSensors::default(),
        system: TestSystem {
            clock: clock.clone(),
            serial: *b"stc-unit-001",
        },
    });

    Bench {
        node,
        clock,
        sink,
        serial,
        controls,
        volume,
    }
}
