//! Device slot allocation for volume attachments.
//!
//! The target instance exposes a fixed ordered set of attachment device
//! paths (`/dev/sde` through `/dev/sdz`). Every concurrent export job
//! competes for a slot through one shared allocator; the slot set is the
//! only state mutated by more than one job.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Device letters available for attachment, scanned in order.
const DEVICE_LETTERS: &str = "efghijklmnopqrstuvwxyz";

/// A reserved attachment device on the target instance.
///
/// A slot is held by exactly one export job between
/// [`DeviceAllocator::acquire`] and [`DeviceAllocator::release`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct DeviceSlot {
    letter: char,
}

impl DeviceSlot {
    /// Returns the device path used for the provider attach call.
    #[must_use]
    pub fn path(self) -> String {
        format!("/dev/sd{}", self.letter)
    }
}

/// Hands out and reclaims device slots under mutual exclusion.
///
/// Cloning the allocator clones a handle to the same slot set; every job must
/// reach the set through the same shared lock for acquisition to be atomic.
/// The lock is held only for the scan-and-mark step, never across an attach
/// call.
#[derive(Clone, Debug)]
pub struct DeviceAllocator {
    allocated: Arc<Mutex<BTreeSet<char>>>,
    letters: Arc<Vec<char>>,
}

impl DeviceAllocator {
    /// Creates an allocator over the full `/dev/sde..=/dev/sdz` slot space.
    #[must_use]
    pub fn new() -> Self {
        Self::with_letters(DEVICE_LETTERS.chars())
    }

    /// Creates an allocator over a custom slot space. Used to model
    /// instances with fewer free slots.
    #[must_use]
    pub fn with_letters(letters: impl IntoIterator<Item = char>) -> Self {
        Self {
            allocated: Arc::new(Mutex::new(BTreeSet::new())),
            letters: Arc::new(letters.into_iter().collect()),
        }
    }

    /// Reserves the first free slot in order, or returns `None` when every
    /// slot is allocated. Exhaustion is a recoverable per-job condition, not
    /// a program error.
    #[must_use]
    pub fn acquire(&self) -> Option<DeviceSlot> {
        let mut allocated = self
            .allocated
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let letter = self
            .letters
            .iter()
            .copied()
            .find(|candidate| !allocated.contains(candidate))?;
        allocated.insert(letter);
        Some(DeviceSlot { letter })
    }

    /// Returns a slot to the free set. Releasing an already-free slot is a
    /// no-op.
    pub fn release(&self, slot: DeviceSlot) {
        let mut allocated = self
            .allocated
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        allocated.remove(&slot.letter);
    }

    /// Number of slots currently allocated.
    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.allocated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Total number of slots in the slot space.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.letters.len()
    }
}

impl Default for DeviceAllocator {
    fn default() -> Self {
        Self::new()
    }
}
