//! Node configuration.
//!
//! The configuration lives in a block-structured text file on the card and
//! is parsed in two passes: a structural pass fills in the values below and
//! records the byte offsets of `default`, `map` and `scene` blocks, and at
//! run time the scene engine re-seeks into the same stream and parses one
//! statement per tick. This trades CPU for RAM; no syntax tree is ever
//! materialized.

pub mod lexer;
pub mod parser;

pub use lexer::ParseError;
pub use parser::{ConfigStream, SceneStep};

use crate::pixel::{LedMap, MAXLEDS};
use crate::Rgb;

use heapless::Vec;

/// Name of the configuration file on the card.
pub const CONFIG_FILE: &str = "config.txt";

/// Number of persistent map slots.
pub const MAXMAPS: usize = 16;

/// Number of directly addressable scene offsets.
pub const MAXSCENES: usize = 10;

/// Top-level run mode of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Beacon,
    Dmx,
    Rx,
    Scene,
    Standalone,
    Tpm2,
    Tx,
}

impl RunMode {
    /// Look up a mode by its configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "beacon" => Some(Self::Beacon),
            "dmx" => Some(Self::Dmx),
            "rx" => Some(Self::Rx),
            "scene" => Some(Self::Scene),
            "standalone" => Some(Self::Standalone),
            "tpm2" => Some(Self::Tpm2),
            "tx" => Some(Self::Tx),
            _ => None,
        }
    }
}

/// Radio link parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioConfig {
    pub frequency: u32,
    pub bitrate: u32,
    pub afcbw: u32,
    pub rxbw: u32,
    pub fdev: u32,
    pub power: i8,
    pub sensitivity: i16,
    pub mesh: u16,
    pub node: u8,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            frequency: 868_000_000,
            bitrate: 4800,
            afcbw: 15_600,
            rxbw: 10_400,
            fdev: 5000,
            power: 13,
            sensitivity: -90,
            mesh: 0xAAAA,
            node: 1,
        }
    }
}

/// LED string parameters and the persistent maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedsConfig {
    pub length: u16,
    pub framerate: u16,
    pub dim: Rgb,
    pub maps: Vec<LedMap, MAXMAPS>,
    /// Byte offset of the `default` map block, zero when absent.
    pub default_block: u32,
}

impl Default for LedsConfig {
    fn default() -> Self {
        Self {
            length: MAXLEDS as u16,
            framerate: 1,
            dim: Rgb::new(0xFF, 0xFF, 0xFF),
            maps: Vec::new(),
            default_block: 0,
        }
    }
}

/// Run mode selection and scene table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeConfig {
    pub mode: Option<RunMode>,
    /// Listen-mode period in milliseconds.
    pub listen: u32,
    /// Byte offsets of the directly addressable scenes, zero when absent.
    pub scenes: [u32; MAXSCENES],
    /// Byte offset of the mode block for linear scene search, zero when
    /// no mode block was parsed.
    pub block: u32,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            mode: None,
            listen: 1000,
            scenes: [0; MAXSCENES],
            block: 0,
        }
    }
}

/// The configuration root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub rf: RadioConfig,
    pub leds: LedsConfig,
    pub mode: ModeConfig,
}
