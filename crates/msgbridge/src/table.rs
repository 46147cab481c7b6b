//! Generation-tagged handle table
//!
//! The engine calls back with a bare `u64`. That token is a slot index in
//! the low half and the slot's generation in the high half, so a token
//! that outlived its handle never resolves to whatever reused the slot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Opaque handle token passed through the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Token {
    index: u32,
    generation: u32,
}

impl Token {
    pub(crate) fn into_raw(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub(crate) fn from_raw(raw: u64) -> Self {
        Token {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<Arc<T>>,
    reserved: bool,
}

struct Slots<T> {
    entries: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

pub(crate) struct HandleTable<T> {
    slots: Mutex<Slots<T>>,
}

impl<T> HandleTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a slot. It resolves to nothing until [`fill`](Self::fill).
    pub(crate) fn reserve(&self) -> Token {
        let mut s = self.lock();
        s.live += 1;
        if let Some(index) = s.free.pop() {
            let slot = &mut s.entries[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.reserved = true;
            return Token {
                index,
                generation: slot.generation,
            };
        }
        let index = s.entries.len() as u32;
        s.entries.push(Slot {
            generation: 1,
            value: None,
            reserved: true,
        });
        Token {
            index,
            generation: 1,
        }
    }

    /// Publish `value` under a reserved token. No effect on a stale token.
    pub(crate) fn fill(&self, token: Token, value: Arc<T>) {
        let mut s = self.lock();
        if let Some(slot) = s.entries.get_mut(token.index as usize) {
            if slot.reserved && slot.generation == token.generation {
                slot.value = Some(value);
            }
        }
    }

    pub(crate) fn get(&self, token: Token) -> Option<Arc<T>> {
        let s = self.lock();
        let slot = s.entries.get(token.index as usize)?;
        if slot.generation != token.generation {
            return None;
        }
        slot.value.clone()
    }

    /// Retire a token, filled or not. Returns the value it held.
    pub(crate) fn remove(&self, token: Token) -> Option<Arc<T>> {
        let mut s = self.lock();
        let slot = s.entries.get_mut(token.index as usize)?;
        if slot.generation != token.generation || !slot.reserved {
            return None;
        }
        slot.reserved = false;
        let value = slot.value.take();
        s.free.push(token.index);
        s.live -= 1;
        value
    }

    /// Tokens currently reserved or filled
    pub(crate) fn len(&self) -> usize {
        self.lock().live
    }
}
