/*!
 * Handle Registry
 *
 * Every submitted handle, by id, until its last unit evicts it. Evicted
 * records nobody else references are scrubbed and pooled so the next
 * facade-created process reuses the allocation.
 */

use crate::core::id::ProcessId;
use crate::core::types::Context;
use crate::process::HandleCore;
use ahash::RandomState;
use crossbeam_queue::ArrayQueue;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

pub(crate) struct Registry {
    handles: DashMap<ProcessId, Arc<HandleCore>, RandomState>,
    pool: ArrayQueue<Arc<HandleCore>>,
}

impl Registry {
    pub fn new(pool_capacity: usize) -> Self {
        Self {
            handles: DashMap::with_hasher(RandomState::new()),
            pool: ArrayQueue::new(pool_capacity.max(1)),
        }
    }

    /// A pooled record, or a fresh one when the pool is empty
    pub fn acquire(&self) -> Arc<HandleCore> {
        self.pool
            .pop()
            .unwrap_or_else(|| Arc::new(HandleCore::new()))
    }

    pub fn insert(&self, handle: &Arc<HandleCore>) {
        self.handles.insert(handle.id(), Arc::clone(handle));
    }

    pub fn get(&self, id: ProcessId) -> Option<Arc<HandleCore>> {
        self.handles.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: ProcessId) -> bool {
        self.handles.contains_key(&id)
    }

    /// First handle with this name, optionally restricted to one context
    pub fn find(&self, name: &str, context: Option<Context>) -> Option<Arc<HandleCore>> {
        self.handles
            .iter()
            .find(|entry| matches(entry.value(), Some(name), context))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Registered handles, optionally restricted to one context
    pub fn collect(&self, context: Option<Context>) -> Vec<Arc<HandleCore>> {
        let mut handles: Vec<Arc<HandleCore>> = self
            .handles
            .iter()
            .filter(|entry| matches(entry.value(), None, context))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        handles.sort_by_key(|handle| handle.id());
        handles
    }

    /// Drop an evicted handle from the registry, pooling it if unreferenced
    ///
    /// A handle restarted by its own stop hook stays registered.
    pub fn release(&self, handle: Arc<HandleCore>) {
        let id = handle.id();
        self.handles.remove_if(&id, |_, registered| {
            Arc::ptr_eq(registered, &handle) && !registered.state().is_scheduled()
        });

        // Only our reference left: no caller, unit or queued request holds it
        if Arc::strong_count(&handle) == 1 {
            handle.scrub();
            if self.pool.push(handle).is_ok() {
                trace!(%id, "Handle recycled into pool");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn pooled(&self) -> usize {
        self.pool.len()
    }
}

fn matches(handle: &HandleCore, name: Option<&str>, context: Option<Context>) -> bool {
    name.map_or(true, |name| handle.name_matches(name))
        && context.map_or(true, |context| handle.is_joined(context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ContextMask;
    use crate::process::{Poll, ProcessBuilder, StopReason};

    fn registered(registry: &Registry, name: &str, context: Context) -> Arc<HandleCore> {
        let core = registry.acquire();
        core.install(ProcessBuilder::new().name(name).callback(|_| Poll::Done));
        core.begin_submission(ContextMask::single(context)).unwrap();
        registry.insert(&core);
        core
    }

    #[test]
    fn test_find_by_name_and_context() {
        let registry = Registry::new(4);
        let a = registered(&registry, "spinner", Context::Update);
        let b = registered(&registry, "spinner", Context::Thread);

        let found = registry.find("spinner", Some(Context::Thread)).unwrap();
        assert!(Arc::ptr_eq(&found, &b));
        assert!(registry.find("spinner", Some(Context::Editor)).is_none());
        assert!(registry.find("missing", None).is_none());

        let all = registry.collect(None);
        assert_eq!(all.len(), 2);
        assert!(Arc::ptr_eq(&all[0], &a));
        assert_eq!(registry.collect(Some(Context::Update)).len(), 1);
    }

    #[test]
    fn test_release_recycles_unreferenced() {
        let registry = Registry::new(4);
        let core = registered(&registry, "once", Context::Update);
        let old_id = core.id();
        core.record_stop(StopReason::Completed);
        core.leave(Context::Update);

        registry.release(core);
        assert!(!registry.contains(old_id));
        assert_eq!(registry.pooled(), 1);

        let reused = registry.acquire();
        assert_ne!(reused.id(), old_id);
        assert_eq!(registry.pooled(), 0);
    }

    #[test]
    fn test_release_keeps_referenced_out_of_pool() {
        let registry = Registry::new(4);
        let core = registered(&registry, "held", Context::Update);
        let caller = Arc::clone(&core);
        core.record_stop(StopReason::Completed);
        core.leave(Context::Update);

        registry.release(core);
        assert!(!registry.contains(caller.id()));
        assert_eq!(registry.pooled(), 0);
        assert_eq!(caller.stop_reason(), Some(StopReason::Completed));
    }

    #[test]
    fn test_release_keeps_restarted_handle() {
        let registry = Registry::new(4);
        let core = registered(&registry, "again", Context::Update);
        let caller = Arc::clone(&core);
        core.record_stop(StopReason::Completed);
        core.leave(Context::Update);

        // Resubmitted before the evicting unit got to release it
        assert!(core.rewind());
        core.begin_submission(ContextMask::single(Context::Update)).unwrap();
        registry.release(core);

        assert!(registry.contains(caller.id()));
        assert_eq!(registry.pooled(), 0);
    }
}
