//! Configuration types for the RIFFA DMA engine

use crate::constants::{
    DEFAULT_EVENT_QUEUE_DEPTH, DEFAULT_WORKER_NAME, FPGA_NAME_LEN, MAX_CHANNELS, SPILL_BUF_SIZE,
    WORD_SIZE,
};
use crate::error::{ConfigError, ConfigResult};

/// Facts about one FPGA supplied by the enumeration collaborator.
///
/// Immutable once the device is ready. The engine keeps its own copy and
/// never writes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FpgaDescriptor {
    /// Driver-assigned FPGA id
    pub id: u64,
    /// PCI vendor id
    pub vendor_id: u32,
    /// PCI device id
    pub device_id: u32,
    /// Human-readable name (at most 16 bytes)
    pub name: String,
    /// Number of DMA channels
    pub num_channels: usize,
}

impl FpgaDescriptor {
    /// Create a descriptor for the given FPGA
    #[must_use]
    pub fn new(id: u64, vendor_id: u32, device_id: u32, name: &str, num_channels: usize) -> Self {
        Self {
            id,
            vendor_id,
            device_id,
            name: name.to_owned(),
            num_channels,
        }
    }

    /// Check the descriptor against the engine's limits
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.len() > FPGA_NAME_LEN {
            return Err(ConfigError::NameTooLong);
        }
        if self.num_channels == 0 || self.num_channels > MAX_CHANNELS {
            return Err(ConfigError::InvalidChannelCount);
        }
        Ok(())
    }
}

/// Engine configuration shared by every FPGA of a driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Descriptor element budget override; `None` derives it from the info word
    pub max_sg_elements: Option<usize>,
    /// Spill buffer size in bytes
    pub spill_buffer_size: usize,
    /// Event ring depth multiplier
    pub event_queue_depth: usize,
    /// Worker thread name prefix
    pub worker_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    /// Create a new configuration with defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_sg_elements: None,
            spill_buffer_size: SPILL_BUF_SIZE,
            event_queue_depth: DEFAULT_EVENT_QUEUE_DEPTH,
            worker_name: DEFAULT_WORKER_NAME.to_owned(),
        }
    }

    // =========================================================================
    // Builder Methods
    // =========================================================================

    /// Cap the descriptor element budget below what the hardware advertises
    #[must_use]
    pub fn with_max_sg_elements(mut self, max: usize) -> Self {
        self.max_sg_elements = Some(max);
        self
    }

    /// Set the spill buffer size
    #[must_use]
    pub fn with_spill_buffer_size(mut self, size: usize) -> Self {
        self.spill_buffer_size = size;
        self
    }

    /// Set the event ring depth multiplier
    #[must_use]
    pub fn with_event_queue_depth(mut self, depth: usize) -> Self {
        self.event_queue_depth = depth;
        self
    }

    /// Set the worker thread name prefix
    #[must_use]
    pub fn with_worker_name(mut self, name: &str) -> Self {
        self.worker_name = name.to_owned();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_sg_elements == Some(0) {
            return Err(ConfigError::InvalidConfig);
        }
        // The spill buffer must at least hold the one partial word it exists for
        if self.spill_buffer_size < WORD_SIZE || self.spill_buffer_size % WORD_SIZE != 0 {
            return Err(ConfigError::InvalidConfig);
        }
        if self.event_queue_depth == 0 {
            return Err(ConfigError::InvalidConfig);
        }
        Ok(())
    }
}
