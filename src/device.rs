//! One FPGA's DMA engine
//!
//! [`FpgaDevice`] owns a channel-direction table sized from the enumerated
//! channel count, the device's spill buffer, its deadline table and the
//! event ring between interrupt and deferred context.
//!
//! # Contexts
//!
//! - **Interrupt**: [`FpgaDevice::handle_interrupt`] reads and clears the
//!   status vectors, reads each event's payload registers and queues the
//!   events. It takes no engine lock and never allocates.
//! - **Deferred**: [`FpgaDevice::service`] and
//!   [`FpgaDevice::expire_timeouts`] drive the state machines. They are
//!   serialized with each other and with submission, cancellation and reset.
//!   Expiry drains queued events first, so a completion the hardware already
//!   reported always wins over a deadline that passed in the meantime.
//!
//! Completions are handed to the sink after every engine lock is released.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::channel::state::{ChannelContext, EventOutcome};
use crate::channel::{ChannelDirState, ChannelKey, ChannelSnapshot, Direction};
use crate::completion::{Completion, CompletionSink};
use crate::config::{EngineConfig, FpgaDescriptor};
use crate::constants::{
    CHANNELS_PER_VECTOR, EVENTS_PER_DIRECTION, MAX_OFFSET, MAX_TRANSFER_WORDS, SG_ELEMENT_SIZE,
    WORD_SIZE,
};
use crate::dma::{DmaAllocator, SgList, SpillBuffer};
use crate::error::{ConfigError, RequestError, Result, TransferError};
use crate::interrupt::{ChannelEvent, EventKind, EventRing, InterruptVector, Signal};
use crate::register::{ChannelRegs, DeviceInfo, RegisterBank, SharedRegs};
use crate::request::{Request, Ticket};
use crate::supervisor::Supervisor;
use crate::sync::WorkerWaker;

// =============================================================================
// Statistics
// =============================================================================

#[derive(Default)]
struct DeviceStats {
    interrupts: AtomicU64,
    events: AtomicU64,
    dropped_events: AtomicU64,
    spurious_events: AtomicU64,
    invalid_vectors: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Device counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatsSnapshot {
    /// Interrupts handled
    pub interrupts: u64,
    /// Events queued for the deferred context
    pub events: u64,
    /// Events lost because the event ring was full
    pub dropped_events: u64,
    /// Events for a channel-direction with nothing in flight
    pub spurious_events: u64,
    /// Status words discarded as invalid
    pub invalid_vectors: u64,
}

// =============================================================================
// Device
// =============================================================================

/// DMA engine for one FPGA
pub struct FpgaDevice {
    descriptor: FpgaDescriptor,
    info: DeviceInfo,
    num_channels: usize,
    max_sg_elements: usize,
    regs: Arc<dyn RegisterBank>,
    slots: Vec<Mutex<ChannelDirState>>,
    spill: Mutex<SpillBuffer>,
    spill_addr: u64,
    spill_len: usize,
    supervisor: Supervisor,
    events: EventRing,
    waker: WorkerWaker,
    deferred: Mutex<()>,
    sink: Arc<dyn CompletionSink>,
    next_seq: AtomicU64,
    stats: DeviceStats,
}

impl FpgaDevice {
    /// Bring up the engine for one FPGA.
    ///
    /// Reads and validates the info word, sizes the descriptor budget,
    /// allocates one descriptor buffer per channel-direction plus the spill
    /// buffer, and clears any latched interrupt bits.
    pub fn new(
        descriptor: FpgaDescriptor,
        regs: Arc<dyn RegisterBank>,
        allocator: &dyn DmaAllocator,
        config: &EngineConfig,
        sink: Arc<dyn CompletionSink>,
    ) -> Result<Self> {
        descriptor.validate()?;
        config.validate()?;

        let info = DeviceInfo::from_raw(SharedRegs::new(&*regs).info());
        info.validate()?;
        if info.num_channels != descriptor.num_channels {
            warn!(
                "{}: info reports {} channels, enumeration {}; using {}",
                descriptor.name, info.num_channels, descriptor.num_channels, descriptor.num_channels
            );
        }
        let num_channels = descriptor.num_channels;

        let sg_buf_size = info.sg_buf_size();
        let hw_budget = info.max_sg_elements().min(sg_buf_size / SG_ELEMENT_SIZE);
        let max_sg_elements = match config.max_sg_elements {
            Some(max) if max > hw_budget => {
                return Err(ConfigError::DescriptorBudgetTooLarge.into());
            }
            Some(max) => max,
            None => hw_budget,
        };

        let mut slots = Vec::with_capacity(num_channels * 2);
        for index in 0..num_channels * 2 {
            let buffer = allocator.alloc_common(sg_buf_size)?;
            let key = ChannelKey::from_index(index);
            slots.push(Mutex::new(ChannelDirState::new(key, buffer, max_sg_elements)));
        }
        let spill = SpillBuffer::new(allocator.alloc_common(config.spill_buffer_size)?);
        let events =
            EventRing::new(num_channels * 2 * EVENTS_PER_DIRECTION * config.event_queue_depth);

        let spill_addr = spill.phys_addr();
        let spill_len = spill.len();

        let device = Self {
            descriptor,
            info,
            num_channels,
            max_sg_elements,
            regs,
            slots,
            spill: Mutex::new(spill),
            spill_addr,
            spill_len,
            supervisor: Supervisor::new(num_channels * 2),
            events,
            waker: WorkerWaker::new(),
            deferred: Mutex::new(()),
            sink,
            next_seq: AtomicU64::new(0),
            stats: DeviceStats::default(),
        };
        device.clear_vectors();

        info!(
            "{}: {} channels, {}-bit bus, x{} link, {} descriptor elements",
            device.descriptor.name,
            num_channels,
            info.bus_width_bits(),
            info.link_width,
            max_sg_elements
        );
        Ok(device)
    }

    /// FPGA id
    pub fn id(&self) -> u64 {
        self.descriptor.id
    }

    /// Enumeration facts
    pub fn descriptor(&self) -> &FpgaDescriptor {
        &self.descriptor
    }

    /// Decoded info word
    pub fn info(&self) -> DeviceInfo {
        self.info
    }

    /// Channels in use
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Descriptor element budget per transaction
    pub fn max_sg_elements(&self) -> usize {
        self.max_sg_elements
    }

    /// Handle the deferred worker registers with
    pub fn waker(&self) -> &WorkerWaker {
        &self.waker
    }

    /// Copy of the device counters
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            interrupts: self.stats.interrupts.load(Ordering::Relaxed),
            events: self.stats.events.load(Ordering::Relaxed),
            dropped_events: self.stats.dropped_events.load(Ordering::Relaxed),
            spurious_events: self.stats.spurious_events.load(Ordering::Relaxed),
            invalid_vectors: self.stats.invalid_vectors.load(Ordering::Relaxed),
        }
    }

    /// Events queued for the deferred context
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    fn ctx(&self) -> ChannelContext<'_> {
        ChannelContext {
            regs: &*self.regs,
            spill: &self.spill,
            supervisor: &self.supervisor,
        }
    }

    fn vector_count(&self) -> usize {
        self.num_channels.div_ceil(CHANNELS_PER_VECTOR)
    }

    fn clear_vectors(&self) {
        let shared = SharedRegs::new(&*self.regs);
        for index in 0..self.vector_count() {
            let raw = shared.take_vector(index);
            if raw != 0 {
                debug!("{}: cleared vector {} = {:#010x}", self.descriptor.name, index, raw);
            }
        }
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Validate `request` and build its descriptor list.
    ///
    /// Nothing is queued and no register is touched on failure.
    fn prepare(&self, request: &Request) -> Result<(SgList, Option<usize>)> {
        if request.channel >= self.num_channels {
            return Err(RequestError::InvalidChannel.into());
        }
        if request.len == 0 || request.len > request.buffer.len() {
            return Err(RequestError::InvalidLength.into());
        }
        if request.offset > MAX_OFFSET {
            return Err(RequestError::InvalidOffset.into());
        }
        if request.len.div_ceil(WORD_SIZE) as u64 > MAX_TRANSFER_WORDS {
            return Err(TransferError::CapacityExceeded.into());
        }

        let segments = request.buffer.segments();
        let tail = request.len % WORD_SIZE;
        if request.direction == Direction::Send || tail == 0 {
            let sg = SgList::build(segments, request.len, self.max_sg_elements)?;
            return Ok((sg, None));
        }

        // Whole words go straight to the buffer, the rest to the spill buffer
        let aligned = request.len - tail;
        let mut sg = if aligned == 0 {
            SgList::new()
        } else {
            SgList::build(segments, aligned, self.max_sg_elements)?
        };
        sg.push_spill(self.spill_addr, self.spill_len, self.max_sg_elements)?;
        Ok((sg, Some(aligned)))
    }

    /// Accept a request.
    ///
    /// The request is armed at once if its channel-direction is idle and
    /// queued in FIFO order otherwise. Validation failures, including
    /// `CapacityExceeded`, are returned here; everything after acceptance
    /// is reported by exactly one completion.
    pub fn submit(&self, request: Request) -> Result<Ticket> {
        let (sg, spill_after) = self.prepare(&request)?;
        let key = ChannelKey::new(request.channel, request.direction);
        let slot = self
            .slots
            .get(key.index())
            .ok_or(RequestError::InvalidChannel)?;

        let ticket = Ticket {
            fpga_id: self.id(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };

        let mut failed = Vec::new();
        {
            let _deferred = self.deferred.lock();
            let mut state = slot.lock();
            state.enqueue(ticket, request, sg, spill_after)?;
            state.start_next(&self.ctx(), Instant::now(), &mut failed);
        }
        self.deliver(failed);
        // The worker may be parked without a deadline
        self.waker.wake();
        Ok(ticket)
    }

    /// Withdraw a request.
    ///
    /// A queued request completes as `Cancelled`; one in flight is ended
    /// early as `TimedOut`. Returns `false` if the ticket is unknown or
    /// already complete.
    pub fn cancel(&self, ticket: Ticket) -> bool {
        if ticket.fpga_id != self.id() {
            return false;
        }
        let mut done = Vec::new();
        let mut found = false;
        {
            let _deferred = self.deferred.lock();
            self.service_locked(&mut done);
            let ctx = self.ctx();
            for slot in &self.slots {
                if let Some(c) = slot.lock().cancel(ticket, &ctx) {
                    done.push(c);
                    found = true;
                    break;
                }
            }
            self.pump_all(&mut done);
        }
        self.deliver(done);
        if found {
            self.waker.wake();
        }
        found
    }

    // =========================================================================
    // Interrupt Context
    // =========================================================================

    /// Interrupt entry point: read and clear both status vectors and queue
    /// the decoded events.
    ///
    /// The second vector is only read when the device has more than six
    /// channels.
    pub fn handle_interrupt(&self) {
        bump(&self.stats.interrupts);
        let shared = SharedRegs::new(&*self.regs);
        for index in 0..self.vector_count() {
            let raw = shared.take_vector(index);
            self.handle_vector(index, raw);
        }
    }

    /// Decode one status vector already read from the hardware.
    ///
    /// Channels are visited in ascending order; within a channel, send
    /// before receive, and descriptor read before done.
    pub fn handle_vector(&self, index: usize, raw: u32) {
        let vector = InterruptVector::from_raw(index, raw);
        if !vector.any() {
            return;
        }
        if !vector.is_valid() {
            bump(&self.stats.invalid_vectors);
            warn!(
                "{}: invalid interrupt vector {} = {:#010x} discarded",
                self.descriptor.name, index, raw
            );
            return;
        }

        let mut queued = false;
        for (channel, bits) in vector.channels() {
            if channel >= self.num_channels {
                bump(&self.stats.spurious_events);
                warn!("{}: interrupt for absent channel {}", self.descriptor.name, channel);
                continue;
            }
            let regs = ChannelRegs::new(&*self.regs, channel);
            for (direction, signal) in bits.in_dispatch_order() {
                let kind = match signal {
                    Signal::NewTxn => {
                        let (len_words, offset, last) = regs.announcement();
                        EventKind::NewTxn {
                            len_words,
                            offset,
                            last,
                        }
                    }
                    Signal::SgRead => EventKind::SgRead {
                        sg_len: regs.sg_len(direction),
                    },
                    Signal::Done => EventKind::Done {
                        words: regs.transferred_words(direction),
                    },
                };
                let event = ChannelEvent {
                    key: ChannelKey::new(channel, direction),
                    kind,
                };
                bump(&self.stats.events);
                if self.events.push(event) {
                    queued = true;
                } else {
                    bump(&self.stats.dropped_events);
                    error!(
                        "{}: event ring full, dropped {:?} for {}",
                        self.descriptor.name, kind, event.key
                    );
                }
            }
        }
        if queued {
            self.waker.wake();
        }
    }

    // =========================================================================
    // Deferred Context
    // =========================================================================

    /// Apply queued events, arm waiting requests and deliver completions.
    ///
    /// Returns the number of completions delivered.
    pub fn service(&self) -> usize {
        let mut done = Vec::new();
        {
            let _deferred = self.deferred.lock();
            self.service_locked(&mut done);
        }
        self.deliver(done)
    }

    /// Time out every transaction whose deadline is at or before `now`.
    ///
    /// Queued events are applied first. Returns the number of completions
    /// delivered, including those from the drained events.
    pub fn expire_timeouts(&self, now: Instant) -> usize {
        let mut done = Vec::new();
        {
            let _deferred = self.deferred.lock();
            self.service_locked(&mut done);
            let ctx = self.ctx();
            for (index, generation) in self.supervisor.take_expired(now) {
                let Some(slot) = self.slots.get(index) else {
                    continue;
                };
                if let Some(c) = slot.lock().force_timeout(generation, &ctx) {
                    done.push(c);
                }
            }
            self.pump_all(&mut done);
        }
        self.deliver(done)
    }

    /// Earliest armed deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.supervisor.next_deadline()
    }

    fn service_locked(&self, done: &mut Vec<Completion>) {
        let mut events = Vec::with_capacity(self.events.len());
        self.events.drain_into(&mut events);
        let ctx = self.ctx();
        for event in events {
            let Some(slot) = self.slots.get(event.key.index()) else {
                continue;
            };
            match slot.lock().on_event(event.kind, &ctx) {
                EventOutcome::Applied => {}
                EventOutcome::Completed(c) => done.push(c),
                EventOutcome::Spurious => bump(&self.stats.spurious_events),
            }
        }
        self.pump_all(done);
    }

    /// Arm the next request on every idle channel-direction. Also retries
    /// receives that were waiting for the spill buffer.
    fn pump_all(&self, done: &mut Vec<Completion>) {
        let ctx = self.ctx();
        let now = Instant::now();
        for slot in &self.slots {
            slot.lock().start_next(&ctx, now, done);
        }
    }

    fn deliver(&self, done: Vec<Completion>) -> usize {
        let count = done.len();
        for completion in done {
            self.sink.complete(completion);
        }
        count
    }

    // =========================================================================
    // Management
    // =========================================================================

    /// Return every channel to idle.
    ///
    /// In-flight transactions complete as `TimedOut`, queued requests as
    /// `Cancelled`. Held announcements and queued events are dropped and
    /// the status vectors are read to clear latched bits.
    pub fn reset(&self) {
        info!("{}: reset", self.descriptor.name);
        let mut done = Vec::new();
        {
            let _deferred = self.deferred.lock();
            self.clear_vectors();
            let dropped = self.events.clear();
            if dropped > 0 {
                debug!("{}: reset dropped {} events", self.descriptor.name, dropped);
            }
            let ctx = self.ctx();
            for slot in &self.slots {
                slot.lock().reset(&ctx, &mut done);
            }
            self.supervisor.clear();
            self.spill.lock().release_all();
        }
        self.deliver(done);
    }

    /// State of one channel-direction
    pub fn snapshot(&self, channel: usize, direction: Direction) -> Result<ChannelSnapshot> {
        if channel >= self.num_channels {
            return Err(RequestError::InvalidChannel.into());
        }
        let slot = self
            .slots
            .get(ChannelKey::new(channel, direction).index())
            .ok_or(RequestError::InvalidChannel)?;
        Ok(slot.lock().snapshot())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
