//! Transaction timeouts
//!
//! One deadline slot per channel-direction, tagged with the generation of the
//! transaction that armed it. A completion cancels its own generation only;
//! an expiry is acted on only if the channel-direction is still running that
//! same generation. Whichever path reaches the channel-direction's lock first
//! tears the transaction down, and the other finds a generation mismatch.

use std::time::Instant;

use parking_lot::Mutex;

/// Armed deadline of one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// Generation of the transaction that armed it
    pub generation: u64,
    /// Expiry instant
    pub at: Instant,
}

/// Deadline table for one device
pub struct Supervisor {
    slots: Mutex<Vec<Option<Deadline>>>,
}

impl Supervisor {
    /// Create a table with `slots` channel-direction entries
    pub fn new(slots: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; slots]),
        }
    }

    /// Arm `slot` for `generation`. `None` waits forever and just clears
    /// any older deadline.
    pub fn arm(&self, slot: usize, generation: u64, at: Option<Instant>) {
        let mut slots = self.slots.lock();
        if let Some(entry) = slots.get_mut(slot) {
            *entry = at.map(|at| Deadline { generation, at });
        }
    }

    /// Disarm `slot` if it is still armed for `generation`.
    ///
    /// Returns `false` when there was nothing to cancel.
    pub fn cancel(&self, slot: usize, generation: u64) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(slot) {
            Some(entry) if entry.as_ref().is_some_and(|d| d.generation == generation) => {
                *entry = None;
                true
            }
            _ => false,
        }
    }

    /// Disarm every slot
    pub fn clear(&self) {
        self.slots.lock().iter_mut().for_each(|entry| *entry = None);
    }

    /// Deadline armed on `slot`, if any
    pub fn deadline(&self, slot: usize) -> Option<Deadline> {
        self.slots.lock().get(slot).copied().flatten()
    }

    /// Earliest armed deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.lock().iter().flatten().map(|d| d.at).min()
    }

    /// Disarm and return every `(slot, generation)` due at `now`
    pub fn take_expired(&self, now: Instant) -> Vec<(usize, u64)> {
        let mut slots = self.slots.lock();
        slots
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, entry)| match *entry {
                Some(d) if d.at <= now => {
                    *entry = None;
                    Some((slot, d.generation))
                }
                _ => None,
            })
            .collect()
    }
}
