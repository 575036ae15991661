//! Listener slots and the execution facility used to run them.
//!
//! A channel has one read, one write and one close listener slot. Each slot is
//! an independently replaceable cell: installing a listener atomically returns
//! the previous one, and readers always see either the old or the new listener,
//! never a torn value.
//!
//! Listeners never run on the thread that holds the channel lock. The channel
//! hands them to an [`Executor`] supplied by the caller, so a listener that calls
//! back into the channel cannot deadlock on its own lock.

use arc_swap::ArcSwapOption;
use std::fmt;
use std::sync::Arc;

/// Unit of work submitted to an [`Executor`]
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs submitted tasks.
///
/// Implementations must not run the task inline on the submitting thread; the
/// channel may be holding its lock when it submits.
pub trait Executor: Send + Sync + 'static {
    /// Submit a task for execution
    fn execute(&self, task: Task);
}

impl<F> Executor for F
where
    F: Fn(Task) + Send + Sync + 'static,
{
    fn execute(&self, task: Task) {
        self(task);
    }
}

/// Event callback for a channel of type `C`.
pub struct ChannelListener<C: ?Sized> {
    callback: Box<dyn Fn(&C) + Send + Sync>,
}

impl<C: ?Sized> ChannelListener<C> {
    /// Wrap a callback
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&C) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Invoke the callback
    pub fn handle_event(&self, channel: &C) {
        (self.callback)(channel);
    }
}

impl<C: ?Sized> fmt::Debug for ChannelListener<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelListener").finish_non_exhaustive()
    }
}

/// Replaceable listener cell.
pub struct ListenerSlot<C: ?Sized> {
    current: ArcSwapOption<ChannelListener<C>>,
}

impl<C: ?Sized> ListenerSlot<C> {
    /// Create an empty slot
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
        }
    }

    /// Install a listener (or clear the slot), returning the previous one
    pub fn set(
        &self,
        listener: Option<Arc<ChannelListener<C>>>,
    ) -> Option<Arc<ChannelListener<C>>> {
        self.current.swap(listener)
    }

    /// Install a callback, returning the previous listener
    pub fn set_fn<F>(&self, callback: F) -> Option<Arc<ChannelListener<C>>>
    where
        F: Fn(&C) + Send + Sync + 'static,
    {
        self.set(Some(Arc::new(ChannelListener::new(callback))))
    }

    /// Clear the slot, returning the previous listener
    pub fn clear(&self) -> Option<Arc<ChannelListener<C>>> {
        self.set(None)
    }

    /// Current listener
    #[must_use]
    pub fn get(&self) -> Option<Arc<ChannelListener<C>>> {
        self.current.load_full()
    }

    /// Invoke the current listener, if any. Returns whether one ran.
    pub fn invoke(&self, channel: &C) -> bool {
        match self.get() {
            Some(listener) => {
                listener.handle_event(channel);
                true
            }
            None => false,
        }
    }
}

impl<C: ?Sized> Default for ListenerSlot<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized> fmt::Debug for ListenerSlot<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSlot")
            .field("installed", &self.current.load().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_empty_slot_invokes_nothing() {
        let slot: ListenerSlot<u32> = ListenerSlot::new();
        assert!(slot.get().is_none());
        assert!(!slot.invoke(&7));
    }

    #[test]
    fn test_set_returns_previous() {
        let slot: ListenerSlot<u32> = ListenerSlot::new();
        assert!(slot.set_fn(|_| {}).is_none());

        let first = slot.get().unwrap();
        let previous = slot.set_fn(|_| {}).unwrap();
        assert!(Arc::ptr_eq(&first, &previous));

        assert!(slot.clear().is_some());
        assert!(slot.get().is_none());
    }

    #[test]
    fn test_invoke_passes_channel() {
        let seen = Arc::new(AtomicUsize::new(0));
        let slot: ListenerSlot<usize> = ListenerSlot::new();
        let counter = Arc::clone(&seen);
        slot.set_fn(move |value| {
            counter.fetch_add(*value, Ordering::SeqCst);
        });

        assert!(slot.invoke(&3));
        assert!(slot.invoke(&4));
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_closure_executor() {
        let queue = Arc::new(parking_lot::Mutex::new(Vec::<Task>::new()));
        let sink = Arc::clone(&queue);
        let executor = move |task: Task| sink.lock().push(task);

        let ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran);
        executor.execute(Box::new(move || {
            flag.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 0, "closure executor queued the task");

        for task in queue.lock().drain(..) {
            task();
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
