//! Checked mutex and condition variable.
//!
//! Both primitives have the usual blocking semantics, but every misuse that
//! pthreads leaves undefined is a checked [`SyncError`] here:
//!
//! | Misuse | Error |
//! |--------|-------|
//! | `unlock()` on a mutex the caller does not hold | `UnlockNotHeld` |
//! | `lock()` on a mutex the caller already holds | `Relock` |
//! | `wait_while()` without holding the paired mutex | `WaitNotHeld` |
//!
//! Ownership is tracked by thread id. The mutex is a logical lock built on an
//! inner std (or loom) mutex that only guards the owner slot, which is what
//! lets a condition variable release and re-acquire it atomically.
//!
//! Under `--cfg loom` the inner primitives come from `loom::sync`, so the
//! same code is model-checked.

#[cfg(loom)]
use loom::sync::{Condvar, Mutex, MutexGuard};
#[cfg(loom)]
use loom::thread::{self, ThreadId};
#[cfg(not(loom))]
use std::sync::{Condvar, Mutex, MutexGuard};
#[cfg(not(loom))]
use std::thread::{self, ThreadId};

use std::marker::PhantomData;
use std::sync::PoisonError;

use thiserror::Error;

/// Misuse of a primitive. Always fatal to the scenario.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("unlock of mutex '{lock}' by a thread that does not hold it")]
    UnlockNotHeld { lock: String },

    #[error("mutex '{lock}' locked again by the thread that already holds it")]
    Relock { lock: String },

    #[error("wait on condvar '{condvar}' without holding mutex '{lock}'")]
    WaitNotHeld { condvar: String, lock: String },
}

/// Binary lock with owner tracking. No fairness.
pub struct CheckedMutex {
    name: String,
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

impl CheckedMutex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: Mutex::new(None),
            released: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn owner_slot(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the mutex is free, then take it.
    pub fn lock(&self) -> Result<(), SyncError> {
        let me = thread::current().id();
        let mut owner = self.owner_slot();
        if *owner == Some(me) {
            return Err(SyncError::Relock {
                lock: self.name.clone(),
            });
        }
        while owner.is_some() {
            owner = self
                .released
                .wait(owner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *owner = Some(me);
        Ok(())
    }

    /// Take the mutex if it is free. Never blocks.
    pub fn try_lock(&self) -> Result<bool, SyncError> {
        let me = thread::current().id();
        let mut owner = self.owner_slot();
        match *owner {
            Some(holder) if holder == me => Err(SyncError::Relock {
                lock: self.name.clone(),
            }),
            Some(_) => Ok(false),
            None => {
                *owner = Some(me);
                Ok(true)
            }
        }
    }

    /// Release the mutex. The caller must hold it.
    pub fn unlock(&self) -> Result<(), SyncError> {
        let me = thread::current().id();
        let mut owner = self.owner_slot();
        if *owner != Some(me) {
            return Err(SyncError::UnlockNotHeld {
                lock: self.name.clone(),
            });
        }
        *owner = None;
        drop(owner);
        self.released.notify_one();
        Ok(())
    }

    /// Whether the calling thread holds the mutex.
    pub fn is_held_by_current(&self) -> bool {
        *self.owner_slot() == Some(thread::current().id())
    }

    pub fn is_locked(&self) -> bool {
        self.owner_slot().is_some()
    }

    /// Lock and return a guard that unlocks on drop.
    pub fn acquire(&self) -> Result<LockGuard<'_>, SyncError> {
        self.lock()?;
        Ok(LockGuard {
            mutex: self,
            _not_send: PhantomData,
        })
    }
}

/// Holds a [`CheckedMutex`] until dropped. Not `Send`: the unlock must happen
/// on the thread that locked.
pub struct LockGuard<'a> {
    mutex: &'a CheckedMutex,
    _not_send: PhantomData<*const ()>,
}

impl LockGuard<'_> {
    pub fn mutex(&self) -> &CheckedMutex {
        self.mutex
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let released = self.mutex.unlock();
        debug_assert!(released.is_ok(), "guard released a mutex it did not hold");
    }
}

/// Condition variable, paired with a [`CheckedMutex`] at wait time.
///
/// A given condvar must always be waited on with the same mutex.
pub struct CheckedCondvar {
    name: String,
    cv: Condvar,
}

impl CheckedCondvar {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cv: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait while `keep_waiting` returns true.
    ///
    /// The caller must hold `mutex`. Each wait atomically releases it, blocks
    /// until signaled, re-acquires it and re-checks the predicate, so
    /// spurious wakeups are harmless. Returns the number of wakeups.
    pub fn wait_while<F>(&self, mutex: &CheckedMutex, mut keep_waiting: F) -> Result<u64, SyncError>
    where
        F: FnMut() -> bool,
    {
        let me = thread::current().id();
        let mut owner = mutex.owner_slot();
        if *owner != Some(me) {
            return Err(SyncError::WaitNotHeld {
                condvar: self.name.clone(),
                lock: mutex.name.clone(),
            });
        }

        let mut wakeups = 0u64;
        while keep_waiting() {
            *owner = None;
            mutex.released.notify_one();

            owner = self.cv.wait(owner).unwrap_or_else(PoisonError::into_inner);
            wakeups += 1;

            while owner.is_some() {
                owner = mutex
                    .released
                    .wait(owner)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            *owner = Some(me);
        }

        Ok(wakeups)
    }

    /// Wake at least one waiter.
    pub fn signal(&self) {
        self.cv.notify_one();
    }

    /// Wake every waiter.
    pub fn broadcast(&self) {
        self.cv.notify_all();
    }
}
