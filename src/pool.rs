//! Fixed-capacity object pools.
//!
//! Every playable object kind is backed by a pool sized once at engine
//! construction. A pool hands out index-plus-generation handles; destroying
//! an object bumps the slot's generation so stale handles are rejected with
//! a typed error instead of reaching freed state. Pools live on the control
//! path behind a mutex and are never touched by the render tick.

use crate::error::{EngineError, Result};

/// A slot arena with generation-checked access.
pub(crate) struct SlotPool<T> {
    slots: Vec<Option<T>>,
    generations: Vec<u32>,
}

impl<T> SlotPool<T> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            generations: vec![0; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Claim a free slot for `value`. Fails with [`EngineError::PoolExhausted`]
    /// when every slot is in use.
    pub fn acquire(&mut self, value: T) -> Result<(usize, u32)> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(value);
                return Ok((index, self.generations[index]));
            }
        }
        Err(EngineError::PoolExhausted)
    }

    /// Release the slot, invalidating the handle. Subsequent access with the
    /// old generation fails with [`EngineError::StaleHandle`].
    pub fn release(&mut self, index: usize, generation: u32) -> Result<T> {
        let value = self.check(index, generation).and_then(|_| {
            self.slots[index]
                .take()
                .ok_or(EngineError::StaleHandle)
        })?;
        self.generations[index] = self.generations[index].wrapping_add(1);
        Ok(value)
    }

    pub fn get(&self, index: usize, generation: u32) -> Result<&T> {
        self.check(index, generation)?;
        self.slots[index].as_ref().ok_or(EngineError::StaleHandle)
    }

    pub fn get_mut(&mut self, index: usize, generation: u32) -> Result<&mut T> {
        self.check(index, generation)?;
        self.slots[index].as_mut().ok_or(EngineError::StaleHandle)
    }

    fn check(&self, index: usize, generation: u32) -> Result<()> {
        if index >= self.slots.len() {
            return Err(EngineError::StaleHandle);
        }
        if self.generations[index] != generation || self.slots[index].is_none() {
            return Err(EngineError::StaleHandle);
        }
        Ok(())
    }
}
