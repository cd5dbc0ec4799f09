/*!
 * Slot Allocator Property Tests
 * Window density and address bookkeeping under arbitrary add/remove sequences
 */

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::cell::Cell;
use std::rc::Rc;
use tickflow::scheduler::{SlotAllocator, Slotted};
use tickflow::{Context, Slot};

const CONTEXT: Context = Context::Update;

#[derive(Debug, Clone)]
struct Entry(Rc<Cell<Option<Slot>>>);

impl Entry {
    fn new() -> Self {
        Entry(Rc::new(Cell::new(None)))
    }
}

impl Slotted for Entry {
    fn slot(&self, _context: Context) -> Option<Slot> {
        self.0.get()
    }

    fn set_slot(&self, _context: Context, slot: Option<Slot>) {
        self.0.set(slot);
    }

    fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Add(usize),
    Remove(usize),
    RemoveTwice(usize),
}

fn op(entries: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..entries).prop_map(Op::Add),
        (0..entries).prop_map(Op::Remove),
        (0..entries).prop_map(Op::RemoveTwice),
    ]
}

fn check_invariants(allocator: &SlotAllocator<Entry>, entries: &[Entry], present: &[bool]) {
    let count = allocator.count();
    let pointer = allocator.pointer();

    // Capacity
    assert!(count <= pointer, "count {} > pointer {}", count, pointer);
    assert!(pointer <= allocator.capacity());

    // Dense window
    assert_eq!(count, pointer, "hole inside the live window");
    for slot in 0..pointer {
        let entry = allocator.get(slot).expect("empty slot inside window");
        // Address consistency
        assert_eq!(entry.slot(CONTEXT), Some(slot));
    }
    for slot in pointer..allocator.capacity() {
        assert!(allocator.get(slot).is_none());
    }

    for (entry, &live) in entries.iter().zip(present) {
        assert_eq!(allocator.contains(entry), live);
        if !live {
            assert_eq!(entry.slot(CONTEXT), None);
        }
    }
}

proptest! {
    #[test]
    fn prop_window_stays_dense(
        capacity in 1usize..16,
        ops in prop::collection::vec(op(24), 0..200),
    ) {
        let entries: Vec<Entry> = (0..24).map(|_| Entry::new()).collect();
        let mut present = vec![false; entries.len()];
        let mut allocator = SlotAllocator::new(CONTEXT, capacity);

        for op in ops {
            match op {
                Op::Add(i) if !present[i] => {
                    let full = allocator.is_full();
                    match allocator.add(entries[i].clone()) {
                        Ok(slot) => {
                            prop_assert!(!full);
                            prop_assert_eq!(entries[i].slot(CONTEXT), Some(slot));
                            present[i] = true;
                        }
                        Err(rejected) => {
                            prop_assert!(full);
                            prop_assert!(rejected.same(&entries[i]));
                            prop_assert_eq!(entries[i].slot(CONTEXT), None);
                        }
                    }
                }
                Op::Add(_) => {}
                Op::Remove(i) => {
                    let removed = allocator.remove(&entries[i]);
                    prop_assert_eq!(removed.is_some(), present[i]);
                    present[i] = false;
                }
                Op::RemoveTwice(i) => {
                    allocator.remove(&entries[i]);
                    present[i] = false;
                    let after_first = allocator.count();
                    prop_assert!(allocator.remove(&entries[i]).is_none());
                    prop_assert_eq!(allocator.count(), after_first);
                }
            }
            check_invariants(&allocator, &entries, &present);
        }
    }

    #[test]
    fn prop_clear_releases_every_address(adds in 0usize..32) {
        let entries: Vec<Entry> = (0..adds).map(|_| Entry::new()).collect();
        let mut allocator = SlotAllocator::new(CONTEXT, 32);
        for entry in &entries {
            allocator.add(entry.clone()).unwrap();
        }

        let drained = allocator.clear();

        prop_assert_eq!(drained.len(), adds);
        prop_assert!(allocator.is_empty());
        prop_assert_eq!(allocator.pointer(), 0);
        prop_assert!(entries.iter().all(|e| e.slot(CONTEXT).is_none()));
    }
}

#[test]
fn test_tail_swap_scenario() {
    let mut allocator = SlotAllocator::new(CONTEXT, 4);
    let [a, b, c, d] = [Entry::new(), Entry::new(), Entry::new(), Entry::new()];

    assert_eq!(allocator.add(a.clone()).unwrap(), 0);
    assert_eq!(allocator.add(b.clone()).unwrap(), 1);
    assert_eq!(allocator.add(c.clone()).unwrap(), 2);
    assert_eq!((allocator.count(), allocator.pointer()), (3, 3));

    assert!(allocator.remove(&b).is_some());
    assert_eq!(b.slot(CONTEXT), None);
    assert_eq!(c.slot(CONTEXT), Some(1));
    assert!(allocator.get(2).is_none());
    assert_eq!((allocator.count(), allocator.pointer()), (2, 2));

    assert_eq!(allocator.add(d.clone()).unwrap(), 2);
    assert_eq!(a.slot(CONTEXT), Some(0));
}

#[test]
fn test_removing_last_entry_resets_window() {
    let mut allocator = SlotAllocator::new(CONTEXT, 2);
    let only = Entry::new();
    allocator.add(only.clone()).unwrap();

    assert!(allocator.remove(&only).is_some());
    assert!(allocator.is_empty());
    assert_eq!(allocator.pointer(), 0);
    assert!(allocator.remove(&only).is_none());
}

#[test]
fn test_stale_address_is_ignored() {
    let mut allocator = SlotAllocator::new(CONTEXT, 2);
    let held = Entry::new();
    let impostor = Entry::new();
    allocator.add(held.clone()).unwrap();
    impostor.set_slot(CONTEXT, Some(0));

    assert!(allocator.remove(&impostor).is_none());
    assert_eq!(allocator.count(), 1);
    assert_eq!(held.slot(CONTEXT), Some(0));
}
