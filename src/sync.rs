//! Lock helpers that recover the guard from a poisoned lock.
//!
//! A panic inside a user callback must not turn every later read of a
//! store into a panic as well. Also home of the re-entrant lock that
//! serializes store assembly.

use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, ThreadId};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Owner {
    thread: Option<ThreadId>,
    depth: usize,
}

/// A lock its owning thread may take again. Other threads wait until every
/// guard of the owner is dropped.
#[derive(Default)]
pub(crate) struct ReentrantLock {
    owner: Mutex<Owner>,
    released: Condvar,
}

impl ReentrantLock {
    pub(crate) fn acquire(&self) -> ReentrantGuard<'_> {
        let me = thread::current().id();
        let mut owner = lock(&self.owner);
        while owner.thread.is_some_and(|thread| thread != me) {
            owner = self.released.wait(owner).unwrap_or_else(PoisonError::into_inner);
        }
        owner.thread = Some(me);
        owner.depth += 1;
        ReentrantGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }
}

pub(crate) struct ReentrantGuard<'a> {
    lock: &'a ReentrantLock,
    // Released on the thread that acquired it
    _not_send: PhantomData<*const ()>,
}

impl Drop for ReentrantGuard<'_> {
    fn drop(&mut self) {
        let mut owner = lock(&self.lock.owner);
        owner.depth -= 1;
        if owner.depth == 0 {
            owner.thread = None;
            self.lock.released.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn owner_can_reenter() {
        let gate = ReentrantLock::default();
        let outer = gate.acquire();
        let inner = gate.acquire();
        drop(inner);
        drop(outer);
        assert!(lock(&gate.owner).thread.is_none());
    }

    #[test]
    fn other_threads_wait_for_the_outermost_guard() {
        let gate = Arc::new(ReentrantLock::default());
        let outer = gate.acquire();
        let inner = gate.acquire();

        let (tx, rx) = mpsc::channel();
        let waiter = thread::spawn({
            let gate = Arc::clone(&gate);
            move || {
                let _guard = gate.acquire();
                tx.send(()).unwrap();
            }
        });

        drop(inner);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(outer);
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        waiter.join().unwrap();
    }
}
