//! Channels and their two transfer directions
//!
//! Every channel carries two independent channel-directions. Each one is a
//! [`ChannelDirState`](state::ChannelDirState) behind its own lock, addressed
//! by a stable [`ChannelKey`].

pub mod state;

use core::time::Duration;

pub use state::ChannelDirState;

/// Transfer direction, named from the host's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Host to FPGA (the FPGA's RX bank)
    Send = 0,
    /// FPGA to host (the FPGA's TX bank)
    Receive = 1,
}

impl Direction {
    /// Both directions, in dispatch order
    pub const ALL: [Direction; 2] = [Direction::Send, Direction::Receive];

    /// Slot index within a channel
    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Returns a short lowercase name
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Send => "send",
            Direction::Receive => "recv",
        }
    }
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of one channel-direction within a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelKey {
    /// Channel index
    pub channel: usize,
    /// Direction
    pub direction: Direction,
}

impl ChannelKey {
    /// Create a key
    pub const fn new(channel: usize, direction: Direction) -> Self {
        Self { channel, direction }
    }

    /// Dense index into a device's channel-direction table
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.channel * 2 + self.direction.index()
    }

    /// Inverse of [`Self::index`]
    pub const fn from_index(index: usize) -> Self {
        let direction = if index % 2 == 0 {
            Direction::Send
        } else {
            Direction::Receive
        };
        Self::new(index / 2, direction)
    }
}

impl core::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "chnl {} {}", self.channel, self.direction)
    }
}

/// Transaction phase of a channel-direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxnState {
    /// Ready for the next request
    #[default]
    Idle,
    /// Descriptor list written, registers being programmed
    Arming,
    /// Waiting for the FPGA to finish reading the descriptor list
    AwaitingDescriptorRead,
    /// Data phase in progress
    Transferring,
    /// Done observed, tearing down
    Completing,
}

impl TxnState {
    /// Whether a transaction holds the channel-direction
    pub const fn in_use(self) -> bool {
        !matches!(self, TxnState::Idle)
    }
}

/// Point-in-time copy of a channel-direction's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    /// Channel and direction
    pub key: ChannelKey,
    /// Transaction phase
    pub state: TxnState,
    /// Ready for a new transaction (exclusive with `in_use`)
    pub ready: bool,
    /// A transaction holds the channel-direction
    pub in_use: bool,
    /// The most recent transaction has completed
    pub request_done: bool,
    /// Requested length in bytes
    pub length: usize,
    /// Offset in words
    pub offset: u32,
    /// Last chunk of a message
    pub last: bool,
    /// Timeout budget
    pub timeout: Option<Duration>,
    /// Descriptor element budget
    pub capacity: usize,
    /// Bytes the hardware claimed are available
    pub provided: usize,
    /// `provided` of the previous transaction
    pub provided_prev: usize,
    /// Bytes actually moved
    pub confirmed: usize,
    /// `confirmed` of the previous transaction
    pub confirmed_prev: usize,
    /// Byte offset from which data lands in the spill buffer
    pub spill_after: Option<usize>,
    /// Transaction generation
    pub generation: u64,
    /// Requests waiting behind the active one
    pub queued: usize,
    /// An FPGA announcement is held for the next receive
    pub announced: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_index_is_dense_and_invertible() {
        for index in 0..24 {
            assert_eq!(ChannelKey::from_index(index).index(), index);
        }
        assert_eq!(ChannelKey::new(2, Direction::Receive).index(), 5);
        assert_eq!(ChannelKey::new(0, Direction::Send).index(), 0);
    }

    #[test]
    fn key_display() {
        let key = ChannelKey::new(3, Direction::Receive);
        assert_eq!(format!("{key}"), "chnl 3 recv");
    }

    #[test]
    fn only_idle_is_ready() {
        assert!(!TxnState::Idle.in_use());
        assert!(TxnState::Arming.in_use());
        assert!(TxnState::Completing.in_use());
    }
}
