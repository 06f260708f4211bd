use std::{
    ops::{Deref, DerefMut},
    time::Duration,
};

use parking_lot::{Condvar, Mutex, MutexGuard, WaitTimeoutResult};

/// Mutex and condition variable pair. State that waiters test lives inside
/// the mutex so a notification can never slip between test and wait.
pub struct Monitor<T> {
    lock: Mutex<T>,
    condvar: Condvar,
}

impl<T> Monitor<T> {
    pub fn new(val: T) -> Self {
        Self {
            lock: Mutex::new(val),
            condvar: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MonitorLock<'_, T> {
        MonitorLock {
            lock: self.lock.lock(),
            condvar: &self.condvar,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    pub fn notify(&self) -> bool {
        self.condvar.notify_one()
    }

    pub fn notify_all(&self) -> usize {
        self.condvar.notify_all()
    }
}

pub struct MonitorLock<'a, T> {
    lock: MutexGuard<'a, T>,
    condvar: &'a Condvar,
}

impl<'a, T> MonitorLock<'a, T> {
    pub fn wait(&mut self) {
        self.condvar.wait(&mut self.lock);
    }

    pub fn wait_timeout(&mut self, timeout: Duration) -> WaitTimeoutResult {
        self.condvar.wait_for(&mut self.lock, timeout)
    }

    pub fn wait_while(&mut self, mut condition: impl FnMut(&mut T) -> bool) {
        while condition(&mut self.lock) {
            self.condvar.wait(&mut self.lock);
        }
    }

    pub fn notify_one(&self) -> bool {
        self.condvar.notify_one()
    }

    pub fn notify_all(&self) -> usize {
        self.condvar.notify_all()
    }
}

impl<'a, T> Deref for MonitorLock<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.lock
    }
}

impl<'a, T> DerefMut for MonitorLock<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.lock
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::Monitor;

    #[test]
    fn test_wait_while_sees_update() {
        let monitor = Arc::new(Monitor::new(false));
        let other = monitor.clone();

        let handle = std::thread::spawn(move || {
            let mut ml = other.lock();
            ml.wait_while(|ready| !*ready);
            assert!(*ml);
        });

        {
            let mut ml = monitor.lock();
            *ml = true;
            ml.notify_all();
        }

        handle.join().unwrap();
    }
}
