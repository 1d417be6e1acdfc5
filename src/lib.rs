//! Node pipeline and coordinator protocol for distributed WS2812/SK6812
//! stripe controllers.
//!
//! A fleet of identical node devices drives up to six parallel LED strings
//! in lock-step. Nodes run autonomously from a configuration file on a
//! removable card, decode TPM2/TPM2.z frames from a serial port or a DMX512
//! universe, and answer a host coordinator over a narrow-band sub-GHz link.
//!
//! The crate is hardware-agnostic: every seam to the outside world is a
//! trait ([`pixel::WaveformSink`], [`radio::RadioBus`],
//! [`serial::SerialPort`], [`storage::Volume`], [`node::Sensors`],
//! [`node::SystemCtl`], [`ui::Controls`], [`clock::Clock`]), so the whole
//! pipeline runs unchanged on the bench and in integration tests.
//!
//! Everything is driven from a single cooperative loop; subsystems expose a
//! `poll`/`play`-style tick that takes the current millisecond count and
//! never blocks beyond the documented suspension points.

#![no_std]

pub mod base64;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod dmx;
pub mod handler;
pub mod node;
pub mod pixel;
pub mod radio;
pub mod scene;
pub mod serial;
pub mod server;
pub mod storage;
pub mod tpm2;
pub mod ui;
pub mod wire;

/// 8-bit-per-channel RGB color used throughout the crate.
pub type Rgb = smart_leds::RGB8;

pub use buffer::{WorkBuffer, MAXBUFF, MAXDMX};
pub use clock::{Clock, Deadline, SystemClock};
pub use config::{Config, RunMode};
pub use node::{Node, Platform};
pub use pixel::{LedMap, MapChannel, PixelEngine, WaveformSink, MAXLEDS};
pub use radio::{RadioBus, Rfio, MAXPACK};
pub use scene::SceneEngine;
