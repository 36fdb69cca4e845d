//! Transfer requests
//!
//! A [`Request`] carries everything the engine needs to run one transaction:
//! target channel and direction, the locked buffer, length, offset, last
//! flag and timeout. Accepted requests are identified by a [`Ticket`].

use core::time::Duration;

use crate::channel::Direction;
use crate::dma::DmaBuffer;

/// Handle identifying an accepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ticket {
    /// FPGA the request was submitted to
    pub fpga_id: u64,
    /// Per-FPGA sequence number
    pub seq: u64,
}

impl core::fmt::Display for Ticket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.fpga_id, self.seq)
    }
}

/// A send or receive on one channel
///
/// # Example
///
/// ```ignore
/// let request = Request::send(0, buffer)
///     .with_offset(16)
///     .with_last(true)
///     .with_timeout(Duration::from_millis(500));
/// let ticket = device.submit(request)?;
/// ```
pub struct Request {
    /// Channel index
    pub channel: usize,
    /// Transfer direction
    pub direction: Direction,
    /// Locked destination or source buffer
    pub buffer: Box<dyn DmaBuffer>,
    /// Requested length in bytes
    pub len: usize,
    /// Offset in words, sent to the FPGA with a send
    pub offset: u32,
    /// Marks the final chunk of a message (send)
    pub last: bool,
    /// Timeout budget; `None` waits forever
    pub timeout: Option<Duration>,
}

impl Request {
    /// Send the whole of `buffer` on `channel`
    pub fn send(channel: usize, buffer: Box<dyn DmaBuffer>) -> Self {
        Self::new(channel, Direction::Send, buffer)
    }

    /// Receive into the whole of `buffer` on `channel`
    pub fn receive(channel: usize, buffer: Box<dyn DmaBuffer>) -> Self {
        Self::new(channel, Direction::Receive, buffer)
    }

    fn new(channel: usize, direction: Direction, buffer: Box<dyn DmaBuffer>) -> Self {
        Self {
            channel,
            direction,
            len: buffer.len(),
            buffer,
            offset: 0,
            last: true,
            timeout: None,
        }
    }

    // =========================================================================
    // Builder Methods
    // =========================================================================

    /// Transfer only the first `len` bytes of the buffer
    #[must_use]
    pub fn with_len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// Set the word offset
    #[must_use]
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Set the last flag
    #[must_use]
    pub fn with_last(mut self, last: bool) -> Self {
        self.last = last;
        self
    }

    /// Set the timeout budget
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl core::fmt::Debug for Request {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Request")
            .field("channel", &self.channel)
            .field("direction", &self.direction)
            .field("len", &self.len)
            .field("offset", &self.offset)
            .field("last", &self.last)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
