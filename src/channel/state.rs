//! Channel-direction state machine
//!
//! ```text
//!   Idle ──arm──▶ Arming ──program──▶ AwaitingDescriptorRead ──SgRead──▶ Transferring
//!    ▲                                        │                               │
//!    │                                  Done: ProtocolError                 Done
//!    │                                        ▼                               ▼
//!    └──────────────────────────────────── finish ◀─────────────────── Completing
//! ```
//!
//! Every exit from a busy phase goes through `finish`, which takes the
//! transaction out of the state, disarms its deadline and frees its spill
//! claim. The transaction's data lives only inside the busy phase, so a
//! second completion for the same transaction has nothing to act on.
//!
//! All methods expect the caller to hold this channel-direction's lock. Lock
//! order is channel-direction, then supervisor or spill.

use core::mem;
use core::time::Duration;
use std::collections::VecDeque;
use std::time::Instant;

use log::{debug, error, warn};
use parking_lot::Mutex;

use super::{ChannelKey, ChannelSnapshot, Direction, TxnState};
use crate::completion::{Completion, Status};
use crate::constants::WORD_SIZE;
use crate::dma::{CommonBuffer, SgList, SpillBuffer};
use crate::error::{Result, TransferError};
use crate::interrupt::EventKind;
use crate::register::{ChannelRegs, RegisterBank};
use crate::request::{Request, Ticket};
use crate::supervisor::Supervisor;

/// Device resources a channel-direction drives
pub struct ChannelContext<'a> {
    /// Register bank
    pub regs: &'a dyn RegisterBank,
    /// Device spill buffer
    pub spill: &'a Mutex<SpillBuffer>,
    /// Device deadline table
    pub supervisor: &'a Supervisor,
}

/// Length, offset and last flag the FPGA announced for its next send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Announcement {
    /// Length in words
    pub len_words: u32,
    /// Offset
    pub offset: u32,
    /// Last chunk of a message
    pub last: bool,
}

/// What an event did to the channel-direction
#[derive(Debug)]
pub enum EventOutcome {
    /// State advanced (or the event was held for later)
    Applied,
    /// The transaction finished
    Completed(Completion),
    /// Nothing was waiting for the event; it was discarded
    Spurious,
}

struct Queued {
    ticket: Ticket,
    request: Request,
    sg: SgList,
    spill_after: Option<usize>,
}

struct ActiveTransfer {
    ticket: Ticket,
    stage: TxnState,
    offset: u32,
    last: bool,
    announced: bool,
    sg_words: u32,
    provided: usize,
    confirmed: usize,
    spill_after: Option<usize>,
    request: Request,
}

impl ActiveTransfer {
    fn announce(&mut self, ann: Announcement) {
        self.provided = self.provided.min(ann.len_words as usize * WORD_SIZE);
        self.offset = ann.offset;
        self.last = ann.last;
        self.announced = true;
    }
}

enum Phase {
    Idle,
    Busy(Box<ActiveTransfer>),
}

/// State of one channel-direction
pub struct ChannelDirState {
    key: ChannelKey,
    capacity: usize,
    descriptors: Box<dyn CommonBuffer>,
    phase: Phase,
    queue: VecDeque<Queued>,
    announcement: Option<Announcement>,
    generation: u64,
    request_done: bool,
    provided_prev: usize,
    confirmed_prev: usize,
}

impl ChannelDirState {
    /// Create an idle channel-direction with its own descriptor buffer
    pub fn new(key: ChannelKey, descriptors: Box<dyn CommonBuffer>, capacity: usize) -> Self {
        Self {
            key,
            capacity,
            descriptors,
            phase: Phase::Idle,
            queue: VecDeque::new(),
            announcement: None,
            generation: 0,
            request_done: false,
            provided_prev: 0,
            confirmed_prev: 0,
        }
    }

    /// Channel and direction
    pub fn key(&self) -> ChannelKey {
        self.key
    }

    /// Check if no transaction holds the channel-direction
    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    /// Generation of the current (or most recent) transaction
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Requests waiting to be armed
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Ticket of the transaction in flight
    pub fn active_ticket(&self) -> Option<Ticket> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Busy(active) => Some(active.ticket),
        }
    }

    /// Queue a validated request behind any others.
    ///
    /// Fails with `CapacityExceeded` if the list could never fit this
    /// channel-direction's descriptor buffer.
    pub fn enqueue(
        &mut self,
        ticket: Ticket,
        request: Request,
        sg: SgList,
        spill_after: Option<usize>,
    ) -> Result<()> {
        if sg.len() > self.capacity || sg.byte_size() > self.descriptors.len() {
            return Err(TransferError::CapacityExceeded.into());
        }
        debug!("{}: queued {} ({} bytes)", self.key, ticket, request.len);
        self.queue.push_back(Queued {
            ticket,
            request,
            sg,
            spill_after,
        });
        Ok(())
    }

    /// Arm the oldest queued request if the channel-direction is idle.
    ///
    /// A receive that needs the spill buffer stays queued while another
    /// transaction holds it. A request whose descriptor list cannot be
    /// written completes as `ProtocolError` into `out` and the next one is
    /// tried. Returns whether a transaction was armed.
    pub fn start_next(
        &mut self,
        ctx: &ChannelContext<'_>,
        now: Instant,
        out: &mut Vec<Completion>,
    ) -> bool {
        while self.is_idle() {
            let Some(next) = self.queue.front() else {
                return false;
            };
            let excess = self.announced_excess(next);
            if (next.spill_after.is_some() || excess > 0) && !ctx.spill.lock().claim(self.key) {
                debug!("{}: spill buffer busy, {} waits", self.key, next.ticket);
                return false;
            }
            let Some(queued) = self.queue.pop_front() else {
                return false;
            };
            match self.arm(queued, excess, ctx, now) {
                Some(failed) => out.push(failed),
                None => return true,
            }
        }
        false
    }

    /// Bytes a held announcement would send past the end of `next`'s list
    fn announced_excess(&self, next: &Queued) -> usize {
        match self.announcement {
            Some(ann) if self.key.direction == Direction::Receive => {
                (ann.len_words as usize * WORD_SIZE).saturating_sub(next.sg.covered())
            }
            _ => 0,
        }
    }

    fn arm(
        &mut self,
        queued: Queued,
        excess: usize,
        ctx: &ChannelContext<'_>,
        now: Instant,
    ) -> Option<Completion> {
        let Queued {
            ticket,
            request,
            mut sg,
            mut spill_after,
        } = queued;

        if excess > 0 {
            // Word 0 of the spill buffer may hold an unaligned tail
            let spill = ctx.spill.lock();
            let left = sg.push_drain(
                spill.phys_addr() + WORD_SIZE as u64,
                spill.len().saturating_sub(WORD_SIZE),
                excess,
                self.capacity,
            );
            drop(spill);
            if left > 0 {
                warn!("{}: {} announced bytes have no descriptor", self.key, left);
            }
            spill_after.get_or_insert(request.len);
        }

        self.generation = self.generation.wrapping_add(1);
        self.request_done = false;

        let mut active = Box::new(ActiveTransfer {
            ticket,
            stage: TxnState::Arming,
            offset: request.offset,
            last: request.last,
            announced: false,
            sg_words: sg.list_words(),
            provided: request.len,
            confirmed: 0,
            spill_after,
            request,
        });
        if self.key.direction == Direction::Receive
            && let Some(ann) = self.announcement.take()
        {
            active.announce(ann);
        }

        if let Err(e) = sg.write_to(self.descriptors.as_mut()) {
            error!("{}: descriptor list write failed: {}", self.key, e);
            self.phase = Phase::Busy(active);
            return match self.finish(Status::ProtocolError, ctx) {
                EventOutcome::Completed(c) => Some(c),
                _ => None,
            };
        }

        // A deadline past the end of the clock is no deadline
        ctx.supervisor.arm(
            self.key.index(),
            self.generation,
            active.request.timeout.and_then(|t| now.checked_add(t)),
        );

        let regs = ChannelRegs::new(ctx.regs, self.key.channel);
        if self.key.direction == Direction::Send {
            let words = active.request.len.div_ceil(WORD_SIZE) as u32;
            regs.program_send(words, active.offset, active.last);
        }
        regs.program_sg(self.key.direction, self.descriptors.phys_addr(), active.sg_words);
        active.stage = TxnState::AwaitingDescriptorRead;

        debug!(
            "{}: armed {} gen {} len {} elements {}",
            self.key,
            active.ticket,
            self.generation,
            active.request.len,
            sg.len()
        );
        self.phase = Phase::Busy(active);
        None
    }

    /// Apply a hardware event
    pub fn on_event(&mut self, kind: EventKind, ctx: &ChannelContext<'_>) -> EventOutcome {
        match kind {
            EventKind::NewTxn {
                len_words,
                offset,
                last,
            } => self.on_new_txn(Announcement {
                len_words,
                offset,
                last,
            }),
            EventKind::SgRead { sg_len } => self.on_sg_read(sg_len, ctx),
            EventKind::Done { words } => self.on_done(words, ctx),
        }
    }

    fn on_new_txn(&mut self, ann: Announcement) -> EventOutcome {
        if self.key.direction != Direction::Receive {
            warn!("{}: announcement on send direction discarded", self.key);
            return EventOutcome::Spurious;
        }
        if let Phase::Busy(active) = &mut self.phase
            && !active.announced
        {
            active.announce(ann);
            debug!(
                "{}: announced {} words, provided {}",
                self.key, ann.len_words, active.provided
            );
            return EventOutcome::Applied;
        }
        if self.announcement.replace(ann).is_some() {
            warn!("{}: unconsumed announcement replaced", self.key);
        }
        debug!("{}: announcement held for next receive", self.key);
        EventOutcome::Applied
    }

    fn on_sg_read(&mut self, sg_len: u32, ctx: &ChannelContext<'_>) -> EventOutcome {
        let Phase::Busy(active) = &mut self.phase else {
            warn!("{}: descriptor read while idle discarded", self.key);
            return EventOutcome::Spurious;
        };
        if active.stage != TxnState::AwaitingDescriptorRead {
            error!("{}: duplicate descriptor read in {:?}", self.key, active.stage);
            return self.finish(Status::ProtocolError, ctx);
        }
        if sg_len != active.sg_words {
            error!(
                "{}: descriptor length read back {} expected {}",
                self.key, sg_len, active.sg_words
            );
            return self.finish(Status::ProtocolError, ctx);
        }
        active.stage = TxnState::Transferring;
        debug!("{}: descriptors read, transferring", self.key);
        EventOutcome::Applied
    }

    fn on_done(&mut self, words: u32, ctx: &ChannelContext<'_>) -> EventOutcome {
        let Phase::Busy(active) = &mut self.phase else {
            warn!("{}: done while idle discarded", self.key);
            return EventOutcome::Spurious;
        };
        if active.stage != TxnState::Transferring {
            error!("{}: done before descriptor read", self.key);
            return self.finish(Status::ProtocolError, ctx);
        }
        active.stage = TxnState::Completing;

        let expected = active.provided.div_ceil(WORD_SIZE);
        active.confirmed = (words as usize * WORD_SIZE).min(active.provided);

        if let Some(after) = active.spill_after
            && active.confirmed > after
        {
            let tail = active.confirmed - after;
            let copied = ctx
                .spill
                .lock()
                .copy_tail(active.request.buffer.as_mut(), after, tail);
            debug!("{}: copied {} of {} spilled bytes", self.key, copied, tail);
        }

        let status = if words as usize == expected {
            Status::Success
        } else {
            warn!(
                "{}: transferred {} words, expected {}",
                self.key, words, expected
            );
            Status::LengthMismatch
        };
        self.finish(status, ctx)
    }

    /// End the transaction of `generation` as timed out.
    ///
    /// A stale generation (the transaction already finished) is a no-op.
    pub fn force_timeout(&mut self, generation: u64, ctx: &ChannelContext<'_>) -> Option<Completion> {
        if self.is_idle() || self.generation != generation {
            return None;
        }
        warn!("{}: gen {} timed out", self.key, generation);
        match self.finish(Status::TimedOut, ctx) {
            EventOutcome::Completed(c) => Some(c),
            _ => None,
        }
    }

    /// Withdraw `ticket`: a queued request is cancelled, an in-flight one
    /// is ended early as timed out.
    pub fn cancel(&mut self, ticket: Ticket, ctx: &ChannelContext<'_>) -> Option<Completion> {
        if let Some(pos) = self.queue.iter().position(|q| q.ticket == ticket) {
            let queued = self.queue.remove(pos)?;
            debug!("{}: cancelled queued {}", self.key, ticket);
            return Some(self.cancelled(queued));
        }
        if self.active_ticket() == Some(ticket) {
            return self.force_timeout(self.generation, ctx);
        }
        None
    }

    /// Return to idle: the in-flight transaction times out, queued requests
    /// are cancelled and a held announcement is dropped.
    pub fn reset(&mut self, ctx: &ChannelContext<'_>, out: &mut Vec<Completion>) {
        if let Some(c) = self.force_timeout(self.generation, ctx) {
            out.push(c);
        }
        while let Some(queued) = self.queue.pop_front() {
            out.push(self.cancelled(queued));
        }
        self.announcement = None;
    }

    fn cancelled(&self, queued: Queued) -> Completion {
        Completion {
            ticket: queued.ticket,
            channel: self.key.channel,
            direction: self.key.direction,
            status: Status::Cancelled,
            transferred: 0,
            offset: queued.request.offset,
            last: queued.request.last,
            buffer: queued.request.buffer,
        }
    }

    fn finish(&mut self, status: Status, ctx: &ChannelContext<'_>) -> EventOutcome {
        let Phase::Busy(active) = mem::replace(&mut self.phase, Phase::Idle) else {
            return EventOutcome::Spurious;
        };
        let active = *active;

        ctx.supervisor.cancel(self.key.index(), self.generation);
        if active.spill_after.is_some() {
            ctx.spill.lock().release(self.key);
        }

        debug_assert!(active.confirmed <= active.provided);
        debug_assert!(active.provided <= active.request.len);
        self.provided_prev = active.provided;
        self.confirmed_prev = active.confirmed;
        self.request_done = true;

        debug!(
            "{}: {} finished: {} ({} bytes)",
            self.key, active.ticket, status, active.confirmed
        );
        EventOutcome::Completed(Completion {
            ticket: active.ticket,
            channel: self.key.channel,
            direction: self.key.direction,
            status,
            transferred: active.confirmed,
            offset: active.offset,
            last: active.last,
            buffer: active.request.buffer,
        })
    }

    /// Copy out the observable state
    pub fn snapshot(&self) -> ChannelSnapshot {
        let mut snap = ChannelSnapshot {
            key: self.key,
            state: TxnState::Idle,
            ready: true,
            in_use: false,
            request_done: self.request_done,
            length: 0,
            offset: 0,
            last: false,
            timeout: None::<Duration>,
            capacity: self.capacity,
            provided: 0,
            provided_prev: self.provided_prev,
            confirmed: 0,
            confirmed_prev: self.confirmed_prev,
            spill_after: None,
            generation: self.generation,
            queued: self.queue.len(),
            announced: self.announcement.is_some(),
        };
        if let Phase::Busy(active) = &self.phase {
            snap.state = active.stage;
            snap.ready = false;
            snap.in_use = true;
            snap.length = active.request.len;
            snap.offset = active.offset;
            snap.last = active.last;
            snap.timeout = active.request.timeout;
            snap.provided = active.provided;
            snap.confirmed = active.confirmed;
            snap.spill_after = active.spill_after;
            snap.announced = active.announced;
        }
        snap
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
