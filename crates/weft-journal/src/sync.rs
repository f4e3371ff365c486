//! Synchronization primitives shared by the engine and by task bodies.

use crate::error::{JournalError, Result};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, ThreadId};
use tracing::error;

/// Extension trait for locks that ignores lock poisoning.
///
/// A poisoned lock means a task panicked while holding it. The worker already
/// reports that panic as a task failure, so the poison flag itself carries no
/// extra information.
pub trait IgnoreLock<T> {
    /// Lock the mutex, ignoring any poison error.
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T>;
}

impl<T> IgnoreLock<T> for Mutex<T> {
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T> {
        match self.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Poison-tolerant access for reader/writer locks.
pub trait IgnoreRwLock<T> {
    /// Acquire a shared guard, ignoring any poison error.
    fn read_ignore_poison(&self) -> RwLockReadGuard<'_, T>;
    /// Acquire an exclusive guard, ignoring any poison error.
    fn write_ignore_poison(&self) -> RwLockWriteGuard<'_, T>;
}

impl<T> IgnoreRwLock<T> for RwLock<T> {
    fn read_ignore_poison(&self) -> RwLockReadGuard<'_, T> {
        match self.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_ignore_poison(&self) -> RwLockWriteGuard<'_, T> {
        match self.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Debug, Default)]
struct Ownership {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Reentrant mutual-exclusion lock with explicit acquire/release.
///
/// The owning thread may call [`EngineMutex::acquire`] again without blocking;
/// ownership passes to another thread only once every acquire has been matched
/// by a release. Prefer [`EngineMutex::scope`], which releases on every exit
/// path.
#[derive(Debug, Default)]
pub struct EngineMutex {
    state: Mutex<Ownership>,
    available: Condvar,
}

impl EngineMutex {
    /// Create an unlocked mutex.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the calling thread owns the lock.
    pub fn acquire(&self) {
        let current = thread::current().id();
        let mut state = self.state.lock_ignore_poison();
        loop {
            let owner = state.owner;
            match owner {
                None => {
                    state.owner = Some(current);
                    state.depth = 1;
                    return;
                }
                Some(holder) if holder == current => {
                    state.depth += 1;
                    return;
                }
                Some(_) => {
                    state = match self.available.wait(state) {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                }
            }
        }
    }

    /// Acquire the lock without blocking.
    ///
    /// Returns `false` if another thread owns it.
    pub fn try_acquire(&self) -> bool {
        let current = thread::current().id();
        let mut state = self.state.lock_ignore_poison();
        let owner = state.owner;
        match owner {
            None => {
                state.owner = Some(current);
                state.depth = 1;
                true
            }
            Some(holder) if holder == current => {
                state.depth += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Release one level of ownership.
    ///
    /// # Errors
    /// Returns [`JournalError::UnbalancedRelease`] if the calling thread does not
    /// hold the lock. The lock state is left untouched in that case.
    pub fn release(&self) -> Result<()> {
        let current = thread::current().id();
        let mut state = self.state.lock_ignore_poison();
        if state.owner != Some(current) || state.depth == 0 {
            error!(thread = ?current, "EngineMutex released without matching acquire");
            return Err(JournalError::UnbalancedRelease);
        }

        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.available.notify_one();
        }
        Ok(())
    }

    /// Acquire the lock for the lifetime of the returned guard.
    pub fn scope(&self) -> MutexScope<'_> {
        self.acquire();
        MutexScope { mutex: self }
    }

    /// Whether the calling thread currently owns the lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.state.lock_ignore_poison().owner == Some(thread::current().id())
    }

    /// Current reentrancy depth (0 when unlocked).
    pub fn depth(&self) -> usize {
        self.state.lock_ignore_poison().depth
    }
}

/// RAII guard for [`EngineMutex`] - released on drop
#[must_use = "the lock is released as soon as the scope guard is dropped"]
pub struct MutexScope<'mutex> {
    mutex: &'mutex EngineMutex,
}

impl Drop for MutexScope<'_> {
    fn drop(&mut self) {
        // Guard construction acquired the lock on this thread, so release cannot be unbalanced.
        if let Err(error) = self.mutex.release() {
            error!("scope guard release failed: {error}");
        }
    }
}

/// Mutex-guarded accumulator shared between tasks.
///
/// Cloning the buffer clones the handle, not the contents.
#[derive(Debug)]
pub struct SharedBuffer<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for SharedBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Default for SharedBuffer<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T> SharedBuffer<T> {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item.
    pub fn push(&self, item: T) {
        self.items.lock_ignore_poison().push(item);
    }

    /// Run `action` with exclusive access to the contents.
    pub fn with<R>(&self, action: impl FnOnce(&mut Vec<T>) -> R) -> R {
        let mut items = self.items.lock_ignore_poison();
        action(&mut items)
    }

    /// Number of items collected so far.
    pub fn len(&self) -> usize {
        self.items.lock_ignore_poison().len()
    }

    /// Whether nothing has been collected yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the contents if this is the last handle, otherwise `None`.
    pub fn into_inner(self) -> Option<Vec<T>> {
        Arc::try_unwrap(self.items).ok().map(|mutex| match mutex.into_inner() {
            Ok(items) => items,
            Err(poisoned) => poisoned.into_inner(),
        })
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items.lock_ignore_poison().clone()
    }
}
