//! Error types for the RIFFA DMA engine
//!
//! Errors are organized by domain for better diagnostics:
//! - [`ConfigError`]: Initialization and configuration failures
//! - [`RequestError`]: Requests rejected by validation before any hardware access
//! - [`TransferError`]: Transaction-scoped failures
//!
//! The unified [`Error`] enum wraps all domain errors and is returned
//! by most engine methods.

// =============================================================================
// Configuration Errors
// =============================================================================

/// Configuration and initialization errors
///
/// These errors occur while bringing a device up: decoding the info word,
/// validating limits, or allocating common buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Invalid configuration parameter
    InvalidConfig,
    /// Device reports zero channels, or more than the engine supports
    InvalidChannelCount,
    /// Bus width parameter in the info word is zero or unsupported
    UnsupportedBusWidth,
    /// Descriptor budget does not fit the descriptor buffer
    DescriptorBudgetTooLarge,
    /// FPGA name longer than the supported maximum
    NameTooLong,
    /// Driver already holds the maximum number of FPGAs
    TooManyFpgas,
    /// An FPGA with the same id is already registered
    DuplicateFpga,
    /// Common buffer allocation failed
    AllocationFailed,
    /// Worker thread could not be spawned
    WorkerSpawnFailed,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConfigError {
    /// Returns a human-readable description of the error
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConfigError::InvalidConfig => "invalid configuration",
            ConfigError::InvalidChannelCount => "invalid channel count",
            ConfigError::UnsupportedBusWidth => "unsupported bus width",
            ConfigError::DescriptorBudgetTooLarge => "descriptor budget exceeds buffer",
            ConfigError::NameTooLong => "FPGA name too long",
            ConfigError::TooManyFpgas => "too many FPGAs",
            ConfigError::DuplicateFpga => "duplicate FPGA id",
            ConfigError::AllocationFailed => "common buffer allocation failed",
            ConfigError::WorkerSpawnFailed => "worker thread spawn failed",
        }
    }
}

// =============================================================================
// Request Errors
// =============================================================================

/// Request validation errors
///
/// A request failing validation is never accepted: no ticket is issued,
/// no register is written and no completion will be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestError {
    /// Channel index outside the device's channel count
    InvalidChannel,
    /// Zero length, or longer than the supplied buffer
    InvalidLength,
    /// Offset does not fit in 31 bits
    InvalidOffset,
    /// Buffer segments are not word aligned
    MisalignedBuffer,
    /// No FPGA with the requested id
    UnknownFpga,
}

impl core::fmt::Display for RequestError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RequestError {
    /// Returns a human-readable description of the error
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RequestError::InvalidChannel => "invalid channel",
            RequestError::InvalidLength => "invalid length",
            RequestError::InvalidOffset => "invalid offset",
            RequestError::MisalignedBuffer => "buffer not word aligned",
            RequestError::UnknownFpga => "unknown FPGA",
        }
    }
}

// =============================================================================
// Transfer Errors
// =============================================================================

/// Transaction-scoped errors
///
/// None of these wedge a channel: the channel-direction returns to idle
/// and accepts the next request. `CapacityExceeded` is raised at submission
/// and never reaches the hardware; the rest arrive through a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferError {
    /// Descriptor list or length exceeds the channel's budget
    CapacityExceeded,
    /// Hardware event order or descriptor length violated the handshake
    ProtocolError,
    /// Transferred length differs from the expected length
    LengthMismatch,
    /// Timeout elapsed before the hardware finished
    TimedOut,
    /// Queued request withdrawn before it reached the hardware
    Cancelled,
}

impl core::fmt::Display for TransferError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TransferError {
    /// Returns a human-readable description of the error
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransferError::CapacityExceeded => "descriptor capacity exceeded",
            TransferError::ProtocolError => "hardware protocol error",
            TransferError::LengthMismatch => "transfer length mismatch",
            TransferError::TimedOut => "transfer timed out",
            TransferError::Cancelled => "request cancelled",
        }
    }
}

// =============================================================================
// Unified Error Type
// =============================================================================

/// This enum wraps all domain-specific errors for unified error handling.
///
/// Match on the inner domain error for specific handling:
/// ```ignore
/// match device.submit(request) {
///     Err(Error::Transfer(TransferError::CapacityExceeded)) => { /* split it */ }
///     Err(Error::Request(RequestError::InvalidChannel)) => { /* ... */ }
///     _ => {}
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Configuration error
    Config(ConfigError),
    /// Request validation error
    Request(RequestError),
    /// Transfer error
    Transfer(TransferError),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Config(e) => write!(f, "config: {}", e.as_str()),
            Error::Request(e) => write!(f, "request: {}", e.as_str()),
            Error::Transfer(e) => write!(f, "transfer: {}", e.as_str()),
        }
    }
}

impl std::error::Error for Error {}

// From impls for automatic conversion
impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<RequestError> for Error {
    fn from(e: RequestError) -> Self {
        Error::Request(e)
    }
}

impl From<TransferError> for Error {
    fn from(e: TransferError) -> Self {
        Error::Transfer(e)
    }
}

/// Result type alias for engine operations
pub type Result<T> = core::result::Result<T, Error>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = core::result::Result<T, ConfigError>;

/// Result type alias for transfer outcomes
pub type TransferResult<T> = core::result::Result<T, TransferError>;

// =============================================================================
// Unit Tests
// =============================================================================
