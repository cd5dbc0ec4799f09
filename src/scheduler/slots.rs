/*!
 * Slot Allocator
 *
 * Sparse array mapping slot index -> entry with O(1) add and remove. Removal
 * swaps the tail-most live entry into the vacated slot, so the live window
 * `[0, pointer)` is dense after every completed `remove` and the tick loop
 * only ever scans that prefix.
 *
 * Entries carry their own back-reference (the slot they occupy in this
 * allocator's context), which the allocator keeps in sync on every move.
 */

use crate::core::types::{Context, Slot};
use crate::process::HandleCore;
use std::sync::Arc;

/// An entry that records its own slot address per context
pub trait Slotted {
    /// Address recorded for `context`, if any
    fn slot(&self, context: Context) -> Option<Slot>;

    /// Record (or clear) the address for `context`
    fn set_slot(&self, context: Context, slot: Option<Slot>);

    /// Identity comparison
    fn same(&self, other: &Self) -> bool;
}

impl Slotted for Arc<HandleCore> {
    #[inline(always)]
    fn slot(&self, context: Context) -> Option<Slot> {
        self.raw_address(context)
    }

    #[inline(always)]
    fn set_slot(&self, context: Context, slot: Option<Slot>) {
        self.set_raw_address(context, slot);
    }

    #[inline(always)]
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

/// Fixed-capacity slot array owned by a single execution unit
///
/// # Invariants
/// - `count <= pointer <= capacity`
/// - every slot at or beyond `pointer` is empty
/// - every live slot's entry records that slot as its address
#[derive(Debug)]
pub struct SlotAllocator<T: Slotted> {
    context: Context,
    slots: Vec<Option<T>>,
    count: usize,
    pointer: usize,
}

impl<T: Slotted> SlotAllocator<T> {
    pub fn new(context: Context, capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            context,
            slots,
            count: 0,
            pointer: 0,
        }
    }

    #[inline(always)]
    pub fn context(&self) -> Context {
        self.context
    }

    #[inline(always)]
    pub fn count(&self) -> usize {
        self.count
    }

    /// End of the live window
    #[inline(always)]
    pub fn pointer(&self) -> usize {
        self.pointer
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.count >= self.capacity()
    }

    #[inline(always)]
    pub fn get(&self, slot: Slot) -> Option<&T> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Whether `entry` currently occupies the slot it records
    pub fn contains(&self, entry: &T) -> bool {
        entry
            .slot(self.context)
            .and_then(|slot| self.get(slot))
            .is_some_and(|held| held.same(entry))
    }

    /// Live entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots[..self.pointer].iter().flatten()
    }

    /// Place `entry` at the end of the live window
    ///
    /// Hands the entry back when the allocator is full.
    pub fn add(&mut self, entry: T) -> Result<Slot, T> {
        if self.count >= self.capacity() {
            return Err(entry);
        }
        let slot = self.pointer;
        entry.set_slot(self.context, Some(slot));
        self.slots[slot] = Some(entry);
        self.count += 1;
        self.pointer = (self.pointer + 1).min(self.capacity());
        Ok(slot)
    }

    /// Take `entry` out, swapping the tail into its slot
    ///
    /// Returns the stored entry, or `None` when it was not present (no-op).
    pub fn remove(&mut self, entry: &T) -> Option<T> {
        let addr = entry.slot(self.context)?;
        let held = self.slots.get(addr)?.as_ref()?;
        if !held.same(entry) {
            // Address is stale: the slot belongs to someone else now
            return None;
        }

        let removed = self.slots[addr].take()?;
        removed.set_slot(self.context, None);
        self.count -= 1;

        if self.count == 0 {
            self.pointer = 0;
            return Some(removed);
        }

        self.collapse_tail();
        if addr >= self.pointer {
            return Some(removed);
        }

        if let Some(moved) = self.slots[self.pointer - 1].take() {
            moved.set_slot(self.context, Some(addr));
            self.slots[addr] = Some(moved);
            self.collapse_tail();
        }
        Some(removed)
    }

    /// Drain every entry, clearing their addresses
    pub fn clear(&mut self) -> Vec<T> {
        let context = self.context;
        let drained: Vec<T> = self.slots[..self.pointer]
            .iter_mut()
            .filter_map(Option::take)
            .inspect(|entry| entry.set_slot(context, None))
            .collect();
        self.count = 0;
        self.pointer = 0;
        drained
    }

    #[inline]
    fn collapse_tail(&mut self) {
        while self.pointer > 0 && self.slots[self.pointer - 1].is_none() {
            self.pointer -= 1;
        }
    }
}
