//! Info register decoding.
//!
//! The FPGA describes itself in a single 32-bit word read once at bring-up.

use crate::constants::{MAX_BUS_WIDTH_PARAM, MIN_NUM_SG_ELEMS, MIN_SG_BUF_SIZE};
use crate::error::{ConfigError, ConfigResult};

/// Channel count mask (bits 0..3)
pub const INFO_CHANNELS_MASK: u32 = 0xF;
/// Bus master enabled
pub const INFO_BUS_MASTER: u32 = 1 << 4;
/// Link width shift (bits 5..10)
pub const INFO_LINK_WIDTH_SHIFT: u32 = 5;
/// Link width mask (6 bits)
pub const INFO_LINK_WIDTH_MASK: u32 = 0x3F;
/// Link rate shift (bits 11..12)
pub const INFO_LINK_RATE_SHIFT: u32 = 11;
/// Link rate mask (2 bits)
pub const INFO_LINK_RATE_MASK: u32 = 0x3;
/// Max payload shift (bits 13..15)
pub const INFO_MAX_PAYLOAD_SHIFT: u32 = 13;
/// Max read request shift (bits 16..18)
pub const INFO_MAX_READ_REQ_SHIFT: u32 = 16;
/// Encoded size mask (3 bits)
pub const INFO_SIZE_MASK: u32 = 0x7;
/// Bus width parameter shift (bits 19..22)
pub const INFO_BUS_WIDTH_SHIFT: u32 = 19;
/// Bus width parameter mask (4 bits)
pub const INFO_BUS_WIDTH_MASK: u32 = 0xF;

/// Decoded info register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInfo {
    /// Raw register value
    pub raw: u32,
    /// Channels implemented by the FPGA design
    pub num_channels: usize,
    /// PCIe bus mastering enabled
    pub bus_master: bool,
    /// Negotiated link width (lanes)
    pub link_width: u32,
    /// Negotiated link rate (encoded)
    pub link_rate: u32,
    /// Max payload size in bytes
    pub max_payload: u32,
    /// Max read request size in bytes
    pub max_read_request: u32,
    /// Data bus width in multiples of 32 bits
    pub bus_width_param: u32,
}

impl DeviceInfo {
    /// Create from the raw info register value
    pub fn from_raw(raw: u32) -> Self {
        Self {
            raw,
            num_channels: (raw & INFO_CHANNELS_MASK) as usize,
            bus_master: (raw & INFO_BUS_MASTER) != 0,
            link_width: (raw >> INFO_LINK_WIDTH_SHIFT) & INFO_LINK_WIDTH_MASK,
            link_rate: (raw >> INFO_LINK_RATE_SHIFT) & INFO_LINK_RATE_MASK,
            max_payload: 128 << ((raw >> INFO_MAX_PAYLOAD_SHIFT) & INFO_SIZE_MASK),
            max_read_request: 128 << ((raw >> INFO_MAX_READ_REQ_SHIFT) & INFO_SIZE_MASK),
            bus_width_param: (raw >> INFO_BUS_WIDTH_SHIFT) & INFO_BUS_WIDTH_MASK,
        }
    }

    /// Reject bus widths the descriptor sizing can't handle
    pub fn validate(&self) -> ConfigResult<()> {
        if self.bus_width_param == 0 || self.bus_width_param > MAX_BUS_WIDTH_PARAM {
            return Err(ConfigError::UnsupportedBusWidth);
        }
        Ok(())
    }

    /// Data bus width in bits
    pub fn bus_width_bits(&self) -> u32 {
        self.bus_width_param * 32
    }

    /// Size of each channel-direction's descriptor buffer
    pub fn sg_buf_size(&self) -> usize {
        MIN_SG_BUF_SIZE * self.bus_width_param as usize
    }

    /// Descriptor element budget advertised by the hardware
    pub fn max_sg_elements(&self) -> usize {
        MIN_NUM_SG_ELEMS * self.bus_width_param as usize
    }
}
