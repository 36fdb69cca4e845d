//! Interrupt decoding and the ISR-to-worker event ring.
//!
//! The FPGA reports per-channel conditions in two read-to-clear status
//! registers. [`InterruptVector`] decodes one of them; the device's interrupt
//! handler turns the set bits into [`ChannelEvent`]s (reading each event's
//! payload registers while still in interrupt context) and queues them on an
//! [`EventRing`] for the deferred worker.
//!
//! # Bit layout
//!
//! Channel slot `i` of a vector owns bits `5*i .. 5*i+5`:
//!
//! | Bit | Condition                      |
//! |-----|--------------------------------|
//! | +0  | receive: new transaction       |
//! | +1  | receive: descriptor list read  |
//! | +2  | receive: done                  |
//! | +3  | send: descriptor list read     |
//! | +4  | send: done                     |

use crate::channel::{ChannelKey, Direction};
use crate::constants::{CHANNELS_PER_VECTOR, IRQ_BITS_PER_CHANNEL, IRQ_RESERVED_MASK};
use crate::sync::CriticalSectionCell;

// =============================================================================
// Bit Definitions
// =============================================================================

/// Receive: FPGA announced a new transaction
pub const IRQ_RECV_NEW_TXN: u32 = 1 << 0;
/// Receive: descriptor list read
pub const IRQ_RECV_SG_READ: u32 = 1 << 1;
/// Receive: transfer done
pub const IRQ_RECV_DONE: u32 = 1 << 2;
/// Send: descriptor list read
pub const IRQ_SEND_SG_READ: u32 = 1 << 3;
/// Send: transfer done
pub const IRQ_SEND_DONE: u32 = 1 << 4;
/// All bits of one channel slot
pub const IRQ_CHANNEL_MASK: u32 = (1 << IRQ_BITS_PER_CHANNEL) - 1;

// =============================================================================
// Interrupt Vector
// =============================================================================

/// Conditions raised for one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelBits {
    /// Receive: new transaction announced
    pub recv_new_txn: bool,
    /// Receive: descriptor list read
    pub recv_sg_read: bool,
    /// Receive: transfer done
    pub recv_done: bool,
    /// Send: descriptor list read
    pub send_sg_read: bool,
    /// Send: transfer done
    pub send_done: bool,
}

impl ChannelBits {
    /// Create from a channel's five-bit slot
    #[inline]
    pub fn from_raw(bits: u32) -> Self {
        Self {
            recv_new_txn: (bits & IRQ_RECV_NEW_TXN) != 0,
            recv_sg_read: (bits & IRQ_RECV_SG_READ) != 0,
            recv_done: (bits & IRQ_RECV_DONE) != 0,
            send_sg_read: (bits & IRQ_SEND_SG_READ) != 0,
            send_done: (bits & IRQ_SEND_DONE) != 0,
        }
    }

    /// Check if any condition is raised
    #[inline]
    pub fn any(&self) -> bool {
        self.recv_new_txn || self.recv_sg_read || self.recv_done || self.send_sg_read || self.send_done
    }

    /// Raised conditions in dispatch order.
    ///
    /// Send before receive; within a direction, announcement before
    /// descriptor read before done. A transaction's descriptor read therefore
    /// always reaches the state machine ahead of its done, whatever else is
    /// set in the same word.
    pub fn in_dispatch_order(&self) -> impl Iterator<Item = (Direction, Signal)> {
        [
            (self.send_sg_read, Direction::Send, Signal::SgRead),
            (self.send_done, Direction::Send, Signal::Done),
            (self.recv_new_txn, Direction::Receive, Signal::NewTxn),
            (self.recv_sg_read, Direction::Receive, Signal::SgRead),
            (self.recv_done, Direction::Receive, Signal::Done),
        ]
        .into_iter()
        .filter_map(|(set, dir, signal)| set.then_some((dir, signal)))
    }
}

/// Condition kind before its payload registers are read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Signal {
    /// New transaction announced
    NewTxn,
    /// Descriptor list read
    SgRead,
    /// Transfer done
    Done,
}

/// One decoded interrupt status register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterruptVector {
    /// Vector number (0 or 1)
    pub index: usize,
    /// Raw register value
    pub raw: u32,
}

impl InterruptVector {
    /// Create from the raw status register value
    #[inline]
    pub fn from_raw(index: usize, raw: u32) -> Self {
        Self { index, raw }
    }

    /// Healthy hardware never sets the top two bits; an all-ones read
    /// means the device has dropped off the bus.
    #[inline]
    pub fn is_valid(&self) -> bool {
        (self.raw & IRQ_RESERVED_MASK) == 0
    }

    /// Check if any channel bit is set
    #[inline]
    pub fn any(&self) -> bool {
        self.raw != 0
    }

    /// First channel this vector reports on
    #[inline]
    pub fn base_channel(&self) -> usize {
        self.index * CHANNELS_PER_VECTOR
    }

    /// Raised channels in ascending channel order
    pub fn channels(&self) -> impl Iterator<Item = (usize, ChannelBits)> + '_ {
        (0..CHANNELS_PER_VECTOR).filter_map(move |slot| {
            let bits = (self.raw >> (slot * IRQ_BITS_PER_CHANNEL)) & IRQ_CHANNEL_MASK;
            (bits != 0).then(|| (self.base_channel() + slot, ChannelBits::from_raw(bits)))
        })
    }
}

// =============================================================================
// Events
// =============================================================================

/// Decoded event with the payload read in interrupt context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventKind {
    /// FPGA announced its next send (receive direction only)
    NewTxn {
        /// Announced length in words
        len_words: u32,
        /// Announced offset
        offset: u32,
        /// Last chunk of a message
        last: bool,
    },
    /// Descriptor list consumed
    SgRead {
        /// SG_LEN register read back at the interrupt
        sg_len: u32,
    },
    /// Data phase finished
    Done {
        /// Words moved
        words: u32,
    },
}

/// An event routed to one channel-direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelEvent {
    /// Target channel-direction
    pub key: ChannelKey,
    /// What happened
    pub kind: EventKind,
}

// =============================================================================
// Event Ring
// =============================================================================

struct RingState {
    slots: Box<[Option<ChannelEvent>]>,
    head: usize,
    len: usize,
}

/// Bounded FIFO between the interrupt handler and the worker.
///
/// Storage is allocated once at construction; pushing never allocates.
pub struct EventRing {
    state: CriticalSectionCell<RingState>,
    capacity: usize,
}

impl EventRing {
    /// Create a ring holding up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            state: CriticalSectionCell::new(RingState {
                slots: vec![None; capacity].into_boxed_slice(),
                head: 0,
                len: 0,
            }),
            capacity,
        }
    }

    /// Maximum number of queued events
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.state.with(|s| s.len)
    }

    /// Check if the ring is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue an event. Returns `false` (event dropped) if the ring is full.
    pub fn push(&self, event: ChannelEvent) -> bool {
        self.state.with(|s| {
            if s.len == s.slots.len() {
                return false;
            }
            let tail = (s.head + s.len) % s.slots.len();
            s.slots[tail] = Some(event);
            s.len += 1;
            true
        })
    }

    /// Dequeue the oldest event
    pub fn pop(&self) -> Option<ChannelEvent> {
        self.state.with(|s| {
            if s.len == 0 {
                return None;
            }
            let event = s.slots[s.head].take();
            s.head = (s.head + 1) % s.slots.len();
            s.len -= 1;
            event
        })
    }

    /// Move every queued event into `out`, oldest first
    pub fn drain_into(&self, out: &mut Vec<ChannelEvent>) {
        while let Some(event) = self.pop() {
            out.push(event);
        }
    }

    /// Discard every queued event, returning how many were dropped
    pub fn clear(&self) -> usize {
        self.state.with(|s| {
            let dropped = s.len;
            s.slots.iter_mut().for_each(|slot| *slot = None);
            s.head = 0;
            s.len = 0;
            dropped
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
