//! SX1231-family register map.
//!
//! Only the registers and fields the driver touches are spelled out; the
//! names follow the data sheet.

pub const REG_FIFO: u8 = 0x00;

pub const REG_OP_MODE: u8 = 0x01;
pub const OP_MODE_LISTEN_ON: u8 = 0x40;
pub const OP_MODE_LISTEN_ABORT: u8 = 0x20;
pub const OP_MODE_MODE: u8 = 0x1C;
pub const OP_MODE_SLEEP: u8 = 0x00;
pub const OP_MODE_STDBY: u8 = 0x04;
pub const OP_MODE_FS: u8 = 0x08;
pub const OP_MODE_TX: u8 = 0x0C;
pub const OP_MODE_RX: u8 = 0x10;

pub const REG_DATA_MODUL: u8 = 0x02;
pub const DATA_MODUL_PACKET_FSK: u8 = 0x00;

pub const REG_BITRATE_MSB: u8 = 0x03;
pub const REG_BITRATE_LSB: u8 = 0x04;

pub const REG_FDEV_MSB: u8 = 0x05;
pub const REG_FDEV_LSB: u8 = 0x06;

pub const REG_FRF_MSB: u8 = 0x07;
pub const REG_FRF_MID: u8 = 0x08;
pub const REG_FRF_LSB: u8 = 0x09;

pub const REG_OSC1: u8 = 0x0A;
pub const OSC1_RC_CAL_START: u8 = 0x80;
pub const OSC1_RC_CAL_DONE: u8 = 0x40;

pub const REG_AFC_CTRL: u8 = 0x0B;
pub const REG_LOW_BAT: u8 = 0x0C;

pub const REG_LISTEN1: u8 = 0x0D;
pub const LISTEN1_RESOL_IDLE_64US: u8 = 0x40;
pub const LISTEN1_RESOL_IDLE_4MS: u8 = 0x80;
pub const LISTEN1_RESOL_IDLE_262MS: u8 = 0xC0;
pub const LISTEN1_RESOL_RX_64US: u8 = 0x10;
pub const LISTEN1_RESOL_RX_4MS: u8 = 0x20;
pub const LISTEN1_RESOL_RX_262MS: u8 = 0x30;
pub const LISTEN1_CRITERIA_SYNC: u8 = 0x08;
pub const LISTEN1_END_RESUME: u8 = 0x04;

pub const REG_LISTEN2: u8 = 0x0E;
pub const REG_LISTEN3: u8 = 0x0F;

pub const REG_PA_LEVEL: u8 = 0x11;
pub const PA_LEVEL_PA0_ON: u8 = 0x80;
pub const PA_LEVEL_OUTPUT_POWER: u8 = 0x1F;

pub const REG_PA_RAMP: u8 = 0x12;
pub const PA_RAMP_40US: u8 = 0x09;

pub const REG_OCP: u8 = 0x13;
pub const OCP_ON: u8 = 0x10;

pub const REG_LNA: u8 = 0x18;
pub const LNA_GAIN_AGC: u8 = 0x00;

pub const REG_RX_BW: u8 = 0x19;
pub const REG_AFC_BW: u8 = 0x1A;
pub const RX_BW_DCC_FREQ_4: u8 = 0x40;
pub const RX_BW_MANT: u8 = 0x18;
pub const RX_BW_EXP: u8 = 0x07;

pub const REG_AFC_FEI: u8 = 0x1E;
pub const AFC_FEI_AFC_CLEAR: u8 = 0x02;
pub const AFC_FEI_AFC_AUTO_ON: u8 = 0x04;
pub const AFC_FEI_AFC_AUTOCLEAR_ON: u8 = 0x08;

pub const REG_FEI_MSB: u8 = 0x21;
pub const REG_FEI_LSB: u8 = 0x22;

pub const REG_RSSI_VALUE: u8 = 0x24;

pub const REG_DIO_MAPPING1: u8 = 0x25;
pub const DIO_MAPPING1_DIO0_0: u8 = 0x40;

pub const REG_DIO_MAPPING2: u8 = 0x26;
pub const DIO_MAPPING2_CLK_OUT: u8 = 0x07;
pub const DIO_MAPPING2_CLK_OUT_4: u8 = 0x02;

pub const REG_IRQ_FLAGS1: u8 = 0x27;
pub const IRQ1_MODE_READY: u8 = 0x80;
pub const IRQ1_AUTO_MODE: u8 = 0x02;

pub const REG_IRQ_FLAGS2: u8 = 0x28;
pub const IRQ2_FIFO_NOT_EMPTY: u8 = 0x40;
pub const IRQ2_FIFO_OVERRUN: u8 = 0x10;
pub const IRQ2_PAYLOAD_READY: u8 = 0x04;

pub const REG_RSSI_THRESH: u8 = 0x29;
pub const REG_RX_TIMEOUT1: u8 = 0x2A;
pub const REG_RX_TIMEOUT2: u8 = 0x2B;

pub const REG_PREAMBLE_MSB: u8 = 0x2C;
pub const REG_PREAMBLE_LSB: u8 = 0x2D;

pub const REG_SYNC_CONFIG: u8 = 0x2E;
pub const SYNC_CONFIG_ON: u8 = 0x80;
pub const fn sync_config_size(n: u8) -> u8 {
    (n << 3) & 0x38
}

pub const fn reg_sync_value(n: u8) -> u8 {
    0x2F + (n & 0x07)
}

pub const REG_PACKET_CONFIG1: u8 = 0x37;
pub const PACKET_CONFIG1_FORMAT_VARIABLE: u8 = 0x80;
pub const PACKET_CONFIG1_DC_FREE_MANCHESTER: u8 = 0x20;
pub const PACKET_CONFIG1_CRC_ON: u8 = 0x10;
pub const PACKET_CONFIG1_FILTER_NONE: u8 = 0x00;
pub const PACKET_CONFIG1_FILTER_NODE_BC: u8 = 0x04;

pub const REG_PAYLOAD_LENGTH: u8 = 0x38;
pub const REG_NODE_ADRS: u8 = 0x39;
pub const REG_BROADCAST_ADRS: u8 = 0x3A;

pub const REG_AUTO_MODES: u8 = 0x3B;
pub const AUTO_MODES_ENTER_FIFO_NOT_EMPTY: u8 = 0x20;
pub const AUTO_MODES_ENTER_FIFO_LEVEL: u8 = 0x40;
pub const AUTO_MODES_EXIT_FIFO_EMPTY: u8 = 0x04;
pub const AUTO_MODES_EXIT_PACKET_SENT: u8 = 0x18;
pub const AUTO_MODES_INTERMEDIATE_STDBY: u8 = 0x01;
pub const AUTO_MODES_INTERMEDIATE_TX: u8 = 0x03;

pub const REG_FIFO_THRESH: u8 = 0x3C;
pub const FIFO_THRESH_TX_START_LEVEL: u8 = 0x00;
pub const fn fifo_thresh_level(n: u8) -> u8 {
    n & 0x7F
}

pub const REG_PACKET_CONFIG2: u8 = 0x3D;
pub const PACKET_CONFIG2_RESTART_RX: u8 = 0x04;
pub const PACKET_CONFIG2_AUTO_RX_RESTART_ON: u8 = 0x02;
pub const fn packet_config2_rx_delay(n: u8) -> u8 {
    (n << 4) & 0xF0
}

pub const REG_TEST_LNA: u8 = 0x58;
pub const TEST_LNA_SENSITIVITY_NORMAL: u8 = 0x1B;

pub const REG_TEST_DAGC: u8 = 0x6F;
pub const TEST_DAGC_CONTINUOUS_HI_BETA: u8 = 0x30;

/// Transceiver FIFO depth in bytes.
pub const FIFO_SIZE: usize = 66;
