use std::{
    cell::UnsafeCell,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::{lock_api::RawMutex as _, RawMutex as Lock};

use super::thread::ThreadPauseState;

/// Set of registered mutators.
///
/// The lock is a raw mutex because a pause holds it from `begin_pause` until
/// `end_pause`, across calls, so no guard can express its extent.
pub struct Threads {
    lock: Lock,
    threads: UnsafeCell<Vec<Arc<ThreadPauseState>>>,
    /// Mirror of `threads.len()`, written under the lock and read without it.
    count: AtomicUsize,
    next_id: AtomicUsize,
}

unsafe impl Sync for Threads {}
unsafe impl Send for Threads {}

impl Threads {
    pub fn new() -> Self {
        Self {
            lock: Lock::INIT,
            threads: UnsafeCell::new(vec![]),
            count: AtomicUsize::new(0),
            next_id: AtomicUsize::new(0),
        }
    }

    fn with_lock<R>(&self, f: impl FnOnce(&mut Vec<Arc<ThreadPauseState>>) -> R) -> R {
        self.lock.lock();
        let result = f(unsafe { &mut *self.threads.get() });
        unsafe {
            self.lock.unlock();
        }
        result
    }

    /// Blocks while a pause is in progress.
    pub(crate) fn add(&self, name: Option<String>) -> Arc<ThreadPauseState> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = Arc::new(ThreadPauseState::new(id, name));
        self.with_lock(|threads| {
            threads.push(record.clone());
            self.count.store(threads.len(), Ordering::Release);
        });
        record
    }

    /// Blocks while a pause is in progress.
    pub(crate) fn remove(&self, record: &Arc<ThreadPauseState>) -> bool {
        self.with_lock(|threads| {
            let before = threads.len();
            threads.retain(|thread| !Arc::ptr_eq(thread, record));
            self.count.store(threads.len(), Ordering::Release);
            before != threads.len()
        })
    }

    /// Number of registered mutators. Never blocks, even during a pause.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks while a pause is in progress. Mutators go through
    /// [`Mutator::registered_threads`](super::Mutator::registered_threads).
    pub(crate) fn snapshot(&self) -> Vec<Arc<ThreadPauseState>> {
        self.with_lock(|threads| threads.clone())
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Takes the registration lock for the duration of a pause.
    ///
    /// # Safety
    ///
    /// Must be paired with [`Threads::unlock_after_pause`] on the same thread
    /// of control.
    pub(crate) unsafe fn lock_for_pause(&self) -> &[Arc<ThreadPauseState>] {
        self.lock.lock();
        &*self.threads.get()
    }

    /// The registered set while a pause holds the lock.
    ///
    /// # Safety
    ///
    /// The caller must own the pause lock taken by [`Threads::lock_for_pause`].
    pub(crate) unsafe fn locked(&self) -> &[Arc<ThreadPauseState>] {
        debug_assert!(self.lock.is_locked());
        &*self.threads.get()
    }

    /// # Safety
    ///
    /// The caller must own the pause lock, and no slice returned by
    /// [`Threads::locked`] may be used afterwards.
    pub(crate) unsafe fn unlock_after_pause(&self) {
        self.lock.unlock();
    }
}

impl Default for Threads {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Threads;

    #[test]
    fn test_add_remove() {
        let threads = Threads::new();
        let a = threads.add(Some("a".to_string()));
        let b = threads.add(None);

        assert_ne!(a.id(), b.id());
        assert_eq!(threads.len(), 2);
        assert!(threads.remove(&a));
        assert!(!threads.remove(&a));
        assert_eq!(threads.snapshot().len(), 1);
        assert_eq!(threads.snapshot()[0].id(), b.id());
    }

    #[test]
    fn test_len_does_not_wait_for_pause() {
        let threads = Threads::new();
        threads.add(None);
        let _ = unsafe { threads.lock_for_pause() };

        std::thread::scope(|s| {
            let handle = s.spawn(|| (threads.len(), threads.is_empty()));
            assert_eq!(handle.join().unwrap(), (1, false));
        });

        unsafe {
            threads.unlock_after_pause();
        }
    }

    #[test]
    fn test_registration_waits_for_pause() {
        let threads = Threads::new();
        let _ = unsafe { threads.lock_for_pause() };

        std::thread::scope(|s| {
            let handle = s.spawn(|| threads.add(None));
            std::thread::sleep(std::time::Duration::from_millis(20));
            assert!(!handle.is_finished());
            assert!(threads.is_locked());

            unsafe {
                threads.unlock_after_pause();
            }
            handle.join().unwrap();
        });

        assert_eq!(threads.len(), 1);
    }
}
