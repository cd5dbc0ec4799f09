/*!
 * Core Types
 * Execution contexts and the context bitset shared by handles and units
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Number of distinct execution contexts
pub const CONTEXT_COUNT: usize = 6;

/// Slot index inside an execution unit's live array
pub type Slot = usize;

/// Execution loop a process can run in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Context {
    /// Per-frame update loop
    Update = 0,
    /// Per-frame loop that runs after every update
    LateUpdate = 1,
    /// Fixed-rate simulation step
    FixedUpdate = 2,
    /// Dedicated worker thread (self-driven)
    Thread = 3,
    /// Time-sliced variant of the frame loop
    Async = 4,
    /// Editor-side host loop
    Editor = 5,
}

impl Context {
    pub const ALL: [Context; CONTEXT_COUNT] = [
        Context::Update,
        Context::LateUpdate,
        Context::FixedUpdate,
        Context::Thread,
        Context::Async,
        Context::Editor,
    ];

    /// Contexts ticked by the host rather than by a worker thread
    pub const HOST: [Context; CONTEXT_COUNT - 1] = [
        Context::Update,
        Context::LateUpdate,
        Context::FixedUpdate,
        Context::Async,
        Context::Editor,
    ];

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline(always)]
    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Thread units drive themselves; every other context waits for the host
    #[inline]
    pub const fn is_host_driven(self) -> bool {
        !matches!(self, Context::Thread)
    }

    /// Async units stop polling once their per-tick budget is spent
    #[inline]
    pub const fn is_time_sliced(self) -> bool {
        matches!(self, Context::Async)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Context::Update => "update",
            Context::LateUpdate => "late_update",
            Context::FixedUpdate => "fixed_update",
            Context::Thread => "thread",
            Context::Async => "async",
            Context::Editor => "editor",
        }
    }

    pub fn from_index(index: usize) -> Option<Context> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of contexts a process is eligible for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextMask(u8);

impl ContextMask {
    pub const EMPTY: ContextMask = ContextMask(0);
    pub const ALL: ContextMask = ContextMask((1 << CONTEXT_COUNT as u8) - 1);

    #[inline]
    pub const fn single(context: Context) -> Self {
        ContextMask(context.bit())
    }

    #[inline]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        ContextMask(bits & Self::ALL.0)
    }

    #[inline(always)]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline(always)]
    pub const fn contains(self, context: Context) -> bool {
        self.0 & context.bit() != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    #[inline]
    #[must_use]
    pub const fn with(self, context: Context) -> Self {
        ContextMask(self.0 | context.bit())
    }

    #[inline]
    #[must_use]
    pub const fn without(self, context: Context) -> Self {
        ContextMask(self.0 & !context.bit())
    }

    #[inline]
    pub fn insert(&mut self, context: Context) {
        self.0 |= context.bit();
    }

    #[inline]
    pub fn remove(&mut self, context: Context) {
        self.0 &= !context.bit();
    }

    pub fn iter(self) -> impl Iterator<Item = Context> {
        Context::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl From<Context> for ContextMask {
    fn from(context: Context) -> Self {
        ContextMask::single(context)
    }
}

impl BitOr for ContextMask {
    type Output = ContextMask;

    fn bitor(self, rhs: ContextMask) -> ContextMask {
        ContextMask(self.0 | rhs.0)
    }
}

impl BitOr<Context> for ContextMask {
    type Output = ContextMask;

    fn bitor(self, rhs: Context) -> ContextMask {
        self.with(rhs)
    }
}

impl BitOr for Context {
    type Output = ContextMask;

    fn bitor(self, rhs: Context) -> ContextMask {
        ContextMask::single(self).with(rhs)
    }
}

impl BitOrAssign<Context> for ContextMask {
    fn bitor_assign(&mut self, rhs: Context) {
        self.insert(rhs);
    }
}

impl FromIterator<Context> for ContextMask {
    fn from_iter<I: IntoIterator<Item = Context>>(iter: I) -> Self {
        iter.into_iter().fold(ContextMask::EMPTY, ContextMask::with)
    }
}

impl fmt::Display for ContextMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for context in self.iter() {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(context.name())?;
            first = false;
        }
        Ok(())
    }
}
