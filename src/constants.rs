//! Centralized Constants
//!
//! This module provides a single source of truth for the magic numbers used
//! throughout the DMA engine.
//!
//! # Organization
//!
//! Constants are grouped by category:
//! - **Limits**: channel and FPGA counts
//! - **Transfer geometry**: word size, descriptor element layout
//! - **Buffer sizes**: descriptor and spill common buffers
//! - **Interrupt vector layout**: bits per channel, reserved bits
//! - **Defaults**: event ring depth, worker naming
//!
//! # Note
//!
//! Register offsets and bit fields remain in their respective modules
//! (`register/channel.rs`, `register/info.rs`) as they are specific to
//! those register blocks.

// =============================================================================
// Limits
// =============================================================================

/// Maximum number of DMA channels a single FPGA exposes
pub const MAX_CHANNELS: usize = 12;

/// Maximum number of FPGAs handled by one driver instance
pub const MAX_FPGAS: usize = 5;

/// Maximum length of an FPGA name in bytes
pub const FPGA_NAME_LEN: usize = 16;

// =============================================================================
// Transfer Geometry
// =============================================================================

/// Hardware transfer granularity in bytes (one 32-bit word)
pub const WORD_SIZE: usize = 4;

/// Maximum transfer length in words (the length registers are 32 bits wide)
pub const MAX_TRANSFER_WORDS: u64 = 0xFFFF_FFFF;

/// Maximum offset value (the OFFLAST word keeps bit 0 for the last flag)
pub const MAX_OFFSET: u32 = 0x7FFF_FFFF;

/// Words per scatter-gather element: address low, address high, length, reserved
pub const SG_ELEMENT_WORDS: usize = 4;

/// Bytes per scatter-gather element
pub const SG_ELEMENT_SIZE: usize = SG_ELEMENT_WORDS * WORD_SIZE;

// =============================================================================
// Buffer Sizes
// =============================================================================

/// Descriptor buffer size per unit of bus width parameter
pub const MIN_SG_BUF_SIZE: usize = 4 * 1024;

/// Descriptor element budget per unit of bus width parameter
pub const MIN_NUM_SG_ELEMS: usize = 200;

/// Largest bus width parameter the engine supports (x32 bits)
pub const MAX_BUS_WIDTH_PARAM: u32 = 4;

/// Default spill buffer size per device
pub const SPILL_BUF_SIZE: usize = 4 * 1024;

// =============================================================================
// Interrupt Vector Layout
// =============================================================================

/// Channels reported in each interrupt status register
pub const CHANNELS_PER_VECTOR: usize = 6;

/// Interrupt status bits used by each channel
pub const IRQ_BITS_PER_CHANNEL: usize = 5;

/// Bits that healthy hardware never sets in an interrupt vector
pub const IRQ_RESERVED_MASK: u32 = 0xC000_0000;

/// Number of interrupt status registers
pub const NUM_VECTORS: usize = MAX_CHANNELS / CHANNELS_PER_VECTOR;

/// Distinct event kinds a single channel-direction can have pending
pub const EVENTS_PER_DIRECTION: usize = 3;

// =============================================================================
// Defaults
// =============================================================================

/// Default event ring depth multiplier (see [`EVENTS_PER_DIRECTION`])
pub const DEFAULT_EVENT_QUEUE_DEPTH: usize = 4;

/// Default worker thread name prefix
pub const DEFAULT_WORKER_NAME: &str = "riffa-dma";
