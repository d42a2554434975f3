//! Fixed-capacity slot allocator.
//!
//! The pool only tracks which slots are in use. Callers keep the slot
//! contents in their own arrays indexed by [`SlotId::index`]. Every slot
//! carries a generation counter that advances on free, so a stale id is
//! rejected instead of aliasing whatever reuses the slot.

use crate::error::SchedError;

/// Generation-tagged reference to a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u16,
    generation: u32,
}

impl SlotId {
    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.index)
    }

    #[must_use]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Debug)]
pub struct SlotPool {
    used: Box<[bool]>,
    generations: Box<[u32]>,
}

impl SlotPool {
    /// Create a pool with `capacity` slots, all free.
    pub fn new(capacity: usize) -> Result<Self, SchedError> {
        if capacity == 0 || capacity > usize::from(u16::MAX) {
            return Err(SchedError::InvalidConfig(
                format!("slot pool capacity {capacity} out of range").into(),
            ));
        }
        Ok(Self {
            used: vec![false; capacity].into_boxed_slice(),
            generations: vec![0; capacity].into_boxed_slice(),
        })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.used.len()
    }

    #[must_use]
    pub fn in_use(&self) -> usize {
        self.used.iter().filter(|used| **used).count()
    }

    /// Claim the first free slot.
    pub fn allocate(&mut self) -> Result<SlotId, SchedError> {
        let index = self
            .used
            .iter()
            .position(|used| !*used)
            .ok_or(SchedError::ResourceExhausted)?;
        self.used[index] = true;
        Ok(SlotId {
            // capacity is bounded by u16::MAX in `new`
            index: u16::try_from(index).map_err(|_| SchedError::ResourceExhausted)?,
            generation: self.generations[index],
        })
    }

    /// Return a slot to the pool.
    pub fn free(&mut self, id: SlotId) -> Result<(), SchedError> {
        if !self.is_live(id) {
            return Err(SchedError::InvalidHandle);
        }
        let index = id.index();
        self.used[index] = false;
        self.generations[index] = self.generations[index].wrapping_add(1);
        Ok(())
    }

    /// Whether `id` refers to a slot that is currently allocated.
    #[must_use]
    pub fn is_live(&self, id: SlotId) -> bool {
        let index = id.index();
        index < self.used.len() && self.used[index] && self.generations[index] == id.generation
    }

    /// Current id of an allocated slot index.
    #[must_use]
    pub fn live_id(&self, index: usize) -> Option<SlotId> {
        if !*self.used.get(index)? {
            return None;
        }
        Some(SlotId {
            index: u16::try_from(index).ok()?,
            generation: self.generations[index],
        })
    }
}
