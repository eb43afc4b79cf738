//! Per-thread resource tracking
//!
//! Anything a thread can hold across calls (a transaction lock, a pooled
//! connection) registers itself here. When the thread ends, its remaining
//! registrations are cleaned up: transactions are rolled back, locks and
//! connections released, and the problems found are logged.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::thread::{self, ThreadId};

use crate::error::ExceptionSink;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique resource id
pub fn next_resource_id() -> u64 {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A resource that must be released if a thread ends while holding it.
pub trait ThreadResource: Send + Sync {
    /// Release whatever `thread` still holds, recording problems in `sink`.
    fn cleanup(&self, thread: ThreadId, sink: &mut ExceptionSink);

    /// Human-readable description for logs
    fn resource_name(&self) -> String;
}

/// Resources registered by one thread, in registration order.
#[derive(Default)]
pub struct ThreadResourceList {
    entries: Vec<(u64, Weak<dyn ThreadResource>)>,
}

impl ThreadResourceList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource; returns false if `id` was already registered
    pub fn register(&mut self, id: u64, resource: Weak<dyn ThreadResource>) -> bool {
        if self.contains(id) {
            return false;
        }
        self.entries.push((id, resource));
        true
    }

    /// Remove a registration; returns false if `id` was not registered
    pub fn unregister(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(rid, _)| *rid != id);
        self.entries.len() != before
    }

    /// True if `id` is registered
    pub fn contains(&self, id: u64) -> bool {
        self.entries.iter().any(|(rid, _)| *rid == id)
    }

    /// Number of registrations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clean up every live resource in reverse registration order.
    /// Returns the number of resources cleaned up.
    pub fn purge(self, thread: ThreadId, sink: &mut ExceptionSink) -> usize {
        let mut cleaned = 0;
        for (id, weak) in self.entries.into_iter().rev() {
            if let Some(resource) = weak.upgrade() {
                tracing::debug!(resource = %resource.resource_name(), id, ?thread, "cleaning up thread resource");
                resource.cleanup(thread, sink);
                cleaned += 1;
            }
        }
        cleaned
    }
}

struct ThreadResourceGuard {
    thread: ThreadId,
    list: RefCell<ThreadResourceList>,
}

impl Drop for ThreadResourceGuard {
    fn drop(&mut self) {
        let list = std::mem::take(self.list.get_mut());
        if list.is_empty() {
            return;
        }
        let mut sink = ExceptionSink::new();
        list.purge(self.thread, &mut sink);
        for err in sink.take_all() {
            tracing::warn!(thread = ?self.thread, code = err.code(), error = %err, "thread exited holding resources");
        }
    }
}

thread_local! {
    static THREAD_RESOURCES: ThreadResourceGuard = ThreadResourceGuard {
        thread: thread::current().id(),
        list: RefCell::new(ThreadResourceList::new()),
    };
}

/// Register a resource for the calling thread.
///
/// Returns false if it was already registered or the thread is shutting down.
pub fn register(id: u64, resource: Weak<dyn ThreadResource>) -> bool {
    THREAD_RESOURCES
        .try_with(|g| g.list.borrow_mut().register(id, resource))
        .unwrap_or(false)
}

/// Remove a registration of the calling thread
pub fn unregister(id: u64) -> bool {
    THREAD_RESOURCES
        .try_with(|g| g.list.borrow_mut().unregister(id))
        .unwrap_or(false)
}

/// True if the calling thread has `id` registered
pub fn is_registered(id: u64) -> bool {
    THREAD_RESOURCES
        .try_with(|g| g.list.borrow().contains(id))
        .unwrap_or(false)
}

/// Number of resources registered by the calling thread
pub fn registered_count() -> usize {
    THREAD_RESOURCES.try_with(|g| g.list.borrow().len()).unwrap_or(0)
}

/// Clean up everything the calling thread still holds, as if it had ended.
///
/// Used by embedders that recycle threads between scripts.
pub fn purge_current(sink: &mut ExceptionSink) -> usize {
    let taken = THREAD_RESOURCES.try_with(|g| (g.thread, std::mem::take(&mut *g.list.borrow_mut())));
    match taken {
        Ok((thread, list)) => list.purge(thread, sink),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::*;

    #[derive(Default)]
    struct Tracked {
        cleanups: AtomicUsize,
    }

    impl ThreadResource for Tracked {
        fn cleanup(&self, _thread: ThreadId, _sink: &mut ExceptionSink) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }

        fn resource_name(&self) -> String {
            "tracked".to_string()
        }
    }

    #[test]
    fn test_register_unregister() {
        let res: Arc<dyn ThreadResource> = Arc::new(Tracked::default());
        let id = next_resource_id();
        assert!(register(id, Arc::downgrade(&res)));
        assert!(!register(id, Arc::downgrade(&res)));
        assert!(is_registered(id));
        assert!(unregister(id));
        assert!(!is_registered(id));
    }

    #[test]
    fn test_thread_exit_runs_cleanup() {
        let res = Arc::new(Tracked::default());
        let weak: Weak<dyn ThreadResource> = {
            let as_dyn: Arc<dyn ThreadResource> = res.clone();
            Arc::downgrade(&as_dyn)
        };
        thread::spawn(move || {
            register(next_resource_id(), weak);
        })
        .join()
        .unwrap();
        assert_eq!(res.cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_purge_current_skips_dropped_resources() {
        let live = Arc::new(Tracked::default());
        let live_dyn: Arc<dyn ThreadResource> = live.clone();
        let gone: Arc<dyn ThreadResource> = Arc::new(Tracked::default());
        register(next_resource_id(), Arc::downgrade(&live_dyn));
        register(next_resource_id(), Arc::downgrade(&gone));
        drop(gone);
        let mut sink = ExceptionSink::new();
        assert_eq!(purge_current(&mut sink), 1);
        assert_eq!(live.cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(registered_count(), 0);
    }
}
