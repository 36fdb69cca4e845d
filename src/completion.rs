//! Completions
//!
//! Every accepted request ends in exactly one [`Completion`], handed to the
//! device's [`CompletionSink`] from the deferred context after all engine
//! locks are released. [`CompletionQueue`] is the stock sink: a FIFO that
//! callers can poll or block on per ticket.

use core::time::Duration;
use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::channel::Direction;
use crate::dma::DmaBuffer;
use crate::error::{TransferError, TransferResult};
use crate::request::Ticket;

/// Terminal result of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// Transferred the expected length
    Success,
    /// Timed out or was cancelled while in flight
    TimedOut,
    /// Hardware moved a different length than expected
    LengthMismatch,
    /// Hardware events arrived out of order or inconsistent
    ProtocolError,
    /// Withdrawn while still queued
    Cancelled,
}

impl Status {
    /// Map to the transfer error taxonomy
    pub const fn into_result(self) -> TransferResult<()> {
        match self {
            Status::Success => Ok(()),
            Status::TimedOut => Err(TransferError::TimedOut),
            Status::LengthMismatch => Err(TransferError::LengthMismatch),
            Status::ProtocolError => Err(TransferError::ProtocolError),
            Status::Cancelled => Err(TransferError::Cancelled),
        }
    }

    /// Returns a human-readable description
    pub const fn as_str(self) -> &'static str {
        match self.into_result() {
            Ok(()) => "success",
            Err(e) => e.as_str(),
        }
    }
}

impl core::fmt::Display for Status {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one accepted request
pub struct Completion {
    /// Request handle
    pub ticket: Ticket,
    /// Channel index
    pub channel: usize,
    /// Direction
    pub direction: Direction,
    /// Terminal result
    pub status: Status,
    /// Bytes confirmed moved
    pub transferred: usize,
    /// Offset (announced by the FPGA for a receive)
    pub offset: u32,
    /// Last flag (announced by the FPGA for a receive)
    pub last: bool,
    /// The request's buffer, handed back
    pub buffer: Box<dyn DmaBuffer>,
}

impl Completion {
    /// Bytes transferred, or the failure
    pub fn result(&self) -> TransferResult<usize> {
        self.status.into_result().map(|()| self.transferred)
    }
}

impl core::fmt::Debug for Completion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Completion")
            .field("ticket", &self.ticket)
            .field("channel", &self.channel)
            .field("direction", &self.direction)
            .field("status", &self.status)
            .field("transferred", &self.transferred)
            .field("offset", &self.offset)
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

/// Receiver of completions
pub trait CompletionSink: Send + Sync {
    /// Take ownership of a finished request's outcome
    fn complete(&self, completion: Completion);
}

/// FIFO of completions with per-ticket blocking waits
#[derive(Default)]
pub struct CompletionQueue {
    queue: Mutex<VecDeque<Completion>>,
    ready: Condvar,
}

impl CompletionQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completions not yet taken
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Take the oldest completion
    pub fn pop(&self) -> Option<Completion> {
        self.queue.lock().pop_front()
    }

    /// Take the completion for `ticket` if it has arrived
    pub fn try_take(&self, ticket: Ticket) -> Option<Completion> {
        let mut queue = self.queue.lock();
        take_ticket(&mut queue, ticket)
    }

    /// Block until the completion for `ticket` arrives.
    ///
    /// `None` waits forever. Returns `None` if `timeout` elapses first.
    pub fn wait(&self, ticket: Ticket, timeout: Option<Duration>) -> Option<Completion> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut queue = self.queue.lock();
        loop {
            if let Some(completion) = take_ticket(&mut queue, ticket) {
                return Some(completion);
            }
            match deadline {
                Some(at) => {
                    if self.ready.wait_until(&mut queue, at).timed_out() {
                        return take_ticket(&mut queue, ticket);
                    }
                }
                None => self.ready.wait(&mut queue),
            }
        }
    }
}

fn take_ticket(queue: &mut VecDeque<Completion>, ticket: Ticket) -> Option<Completion> {
    let index = queue.iter().position(|c| c.ticket == ticket)?;
    queue.remove(index)
}

impl CompletionSink for CompletionQueue {
    fn complete(&self, completion: Completion) {
        self.queue.lock().push_back(completion);
        self.ready.notify_all();
    }
}
