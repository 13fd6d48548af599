//! Key → timer bookkeeping for a store.
//!
//! Every key with a pending expiration owns one slot in a generational arena
//! (`slotmap`).  The index maps the key to its slot while the key is counting
//! down.  Retiring a key drops the index entry at once, so nothing can arm or
//! expire it any more, but the slot itself is only reclaimed later on the
//! owning context by [`TimerRegistry::dispose`].  Slot keys carry a
//! generation, so a stale slot key can never resolve to a newer timer.
//!
//! The registry is plain data: it is guarded by the store's lock together
//! with the value map and is never locked on its own.

use std::hash::Hash;

use ahash::AHashMap;
use slotmap::SlotMap;

use crate::scheduler::TimerId;

slotmap::new_key_type! {
    /// Locates a timer slot in the registry's arena.
    pub(crate) struct SlotKey;
}

struct TimerSlot<K> {
    key: K,
    /// Bumped on every (re)arm.  A firing from an older arm is stale.
    generation: u64,
    /// Timer currently scheduled on the context, if the slot was started.
    armed: Option<TimerId>,
    /// Set once the key no longer owns this slot.  Awaiting disposal.
    retired: bool,
}

pub(crate) struct TimerRegistry<K> {
    slots: SlotMap<SlotKey, TimerSlot<K>>,
    index: AHashMap<K, SlotKey>,
}

impl<K: Hash + Eq + Clone> TimerRegistry<K> {
    pub fn new() -> Self {
        TimerRegistry {
            slots: SlotMap::with_key(),
            index: AHashMap::new(),
        }
    }

    /// Returns the slot for `key`, creating an unstarted one if the key has
    /// none.
    pub fn register(&mut self, key: &K) -> SlotKey {
        if let Some(&slot) = self.index.get(key) {
            return slot;
        }
        let slot = self.slots.insert(TimerSlot {
            key: key.clone(),
            generation: 0,
            armed: None,
            retired: false,
        });
        self.index.insert(key.clone(), slot);
        slot
    }

    /// Starts a new arm generation for `slot`.
    ///
    /// Returns `None` if the slot was retired or reclaimed in the meantime.
    pub fn begin_arm(&mut self, slot: SlotKey) -> Option<u64> {
        let entry = self.slots.get_mut(slot).filter(|s| !s.retired)?;
        entry.generation += 1;
        Some(entry.generation)
    }

    /// Records `timer` as the slot's scheduled timer and returns the timer it
    /// replaces, which the caller must cancel.
    pub fn set_armed(&mut self, slot: SlotKey, timer: TimerId) -> Option<TimerId> {
        self.slots
            .get_mut(slot)
            .and_then(|s| s.armed.replace(timer))
    }

    /// Returns `true` if a firing for `(slot, generation)` is still the
    /// slot's current countdown.
    pub fn is_current(&self, slot: SlotKey, generation: u64) -> bool {
        matches!(
            self.slots.get(slot),
            Some(s) if !s.retired && s.generation == generation
        )
    }

    /// Consumes the slot of a countdown that just elapsed.
    ///
    /// Returns the slot's key, or `None` if the firing is stale.  The slot is
    /// reclaimed inline: the caller is the owning context and the timer has
    /// already fired.
    pub fn expire(&mut self, slot: SlotKey, generation: u64) -> Option<K> {
        if !self.is_current(slot, generation) {
            return None;
        }
        let entry = self.slots.remove(slot)?;
        if self.index.get(&entry.key) == Some(&slot) {
            self.index.remove(&entry.key);
        }
        Some(entry.key)
    }

    /// Detaches `key` from its slot and marks the slot for disposal.
    pub fn retire(&mut self, key: &K) -> Option<SlotKey> {
        let slot = self.index.remove(key)?;
        if let Some(entry) = self.slots.get_mut(slot) {
            entry.retired = true;
        }
        Some(slot)
    }

    /// Retires every registered key.
    pub fn retire_all(&mut self) -> Vec<SlotKey> {
        let retired: Vec<SlotKey> = self.index.drain().map(|(_, slot)| slot).collect();
        for &slot in &retired {
            if let Some(entry) = self.slots.get_mut(slot) {
                entry.retired = true;
            }
        }
        retired
    }

    /// Reclaims a retired slot, returning the timer that must be cancelled.
    ///
    /// Only called on the owning context.  Live slots are left alone.
    pub fn dispose(&mut self, slot: SlotKey) -> Option<TimerId> {
        if !matches!(self.slots.get(slot), Some(s) if s.retired) {
            return None;
        }
        self.slots.remove(slot).and_then(|s| s.armed)
    }

    /// Drops `slot` at once, detaching its key if the key still owns it.
    ///
    /// Used when the owning context refused a request, so there is nothing
    /// left to dispose of later.
    pub fn abandon(&mut self, slot: SlotKey) -> Option<TimerId> {
        let entry = self.slots.remove(slot)?;
        if self.index.get(&entry.key) == Some(&slot) {
            self.index.remove(&entry.key);
        }
        entry.armed
    }

    /// Returns `true` if `key` is currently counting down.
    #[cfg(test)]
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Number of keys currently counting down.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Number of slots held by the arena, including retired slots not yet
    /// disposed.
    pub fn allocated(&self) -> usize {
        self.slots.len()
    }
}
