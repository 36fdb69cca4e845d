//! RIFFA DMA Engine
//!
//! Host-resident DMA transaction engine for PCIe FPGAs that speak the RIFFA
//! channel protocol.
//!
//! Each FPGA exposes up to twelve independent channels. Every channel has a
//! send direction (host to FPGA) and a receive direction (FPGA to host), each
//! driven by its own transaction state machine through a fixed BAR0 register
//! handshake.
//!
//! # Architecture
//!
//! The engine is organized in layers:
//!
//! 1. **Register Layer** ([`register`]): BAR0 access, per-channel register
//!    blocks, info word decode
//! 2. **DMA Layer** ([`dma`]): buffer traits, scatter-gather lists, the spill
//!    buffer for partial receive words
//! 3. **Transaction Layer** ([`channel`], [`interrupt`], [`supervisor`]):
//!    channel-direction state machines, interrupt decode, deadlines
//! 4. **Device Layer** ([`FpgaDevice`], [`Driver`], [`Worker`]): one FPGA,
//!    the FPGA set, and the deferred-context threads
//!
//! ## Contexts
//!
//! - **Interrupt**: [`FpgaDevice::handle_interrupt`] reads and clears the
//!   status vectors and queues decoded events. No engine locks, no allocation.
//! - **Deferred**: a [`Worker`] per FPGA applies events, arms queued requests
//!   and enforces timeouts.
//! - **Caller**: [`Driver::submit`] validates and queues; [`Driver::transfer`]
//!   additionally blocks for the completion.
//!
//! # Features
//!
//! - `defmt`: Enable defmt formatting for error and status types
//!
//! # Example
//!
//! ```ignore
//! use riffa_dma::{Driver, EngineConfig, FpgaDescriptor, Request};
//!
//! let mut driver = Driver::new(EngineConfig::default())?;
//! let descriptor = FpgaDescriptor::new(0, 0x10EE, 0x7024, "kc705", 4);
//! driver.add_fpga(descriptor, bar0, &allocator)?;
//! driver.start_workers()?;
//!
//! // Stream a buffer to channel 1
//! let completion = driver.transfer(0, Request::send(1, buffer).with_last(true))?;
//! assert_eq!(completion.result()?, len);
//! ```

#![deny(missing_docs)]
#![allow(unsafe_code)]
#![deny(unsafe_op_in_unsafe_fn)]
// Clippy lint levels live here and in Cargo.toml.
#![deny(clippy::correctness)]
#![warn(
    clippy::suspicious,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::cloned_instead_of_copied,
    clippy::explicit_iter_loop,
    clippy::implicit_clone,
    clippy::inconsistent_struct_constructor,
    clippy::manual_assert,
    clippy::manual_let_else,
    clippy::match_same_arms,
    clippy::needless_pass_by_value,
    clippy::semicolon_if_nothing_returned,
    clippy::uninlined_format_args,
    clippy::unnested_or_patterns
)]
#![allow(
    clippy::mod_module_files,
    clippy::self_named_module_files,
    clippy::similar_names,
    clippy::too_many_arguments,
    clippy::struct_excessive_bools,
    clippy::fn_params_excessive_bools,
    clippy::type_complexity,
    clippy::must_use_candidate,
    clippy::assertions_on_constants,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_lossless,
    clippy::panic_in_result_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::items_after_statements
)]

// =============================================================================
// Modules
// =============================================================================

pub mod channel;
pub mod completion;
pub mod config;
pub mod constants;
pub mod device;
pub mod dma;
pub mod driver;
pub mod error;
pub mod interrupt;
pub mod register;
pub mod request;
pub mod supervisor;
pub mod sync;
pub mod worker;

// Test utilities (only available during testing)
#[cfg(test)]
pub mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use channel::{ChannelKey, ChannelSnapshot, Direction, TxnState};
pub use completion::{Completion, CompletionQueue, CompletionSink, Status};
pub use config::{EngineConfig, FpgaDescriptor};
pub use device::{FpgaDevice, StatsSnapshot};
pub use dma::{CommonBuffer, DmaAllocator, DmaBuffer, PhysSegment};
pub use driver::{Driver, FpgaInfo};
pub use error::{
    ConfigError, ConfigResult, Error, RequestError, Result, TransferError, TransferResult,
};
pub use register::{DeviceInfo, MmioRegisters, RegisterBank};
pub use request::{Request, Ticket};
pub use worker::Worker;
