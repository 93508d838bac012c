//! # Shared Lock
//!
//! `RecursiveSharedMutex` is a reader/writer lock whose ownership is tracked
//! per thread, which makes both modes reentrant:
//!
//! - `lock` / `unlock`: exclusive, reentrant up to a recursion limit.
//! - `lock_shared` / `unlock_shared`: shared, reentrant through a per-thread
//!   count.
//! - `try_lock` / `try_lock_shared`: non-blocking variants.
//!
//! ## Upgrading
//!
//! A thread holding shared acquisitions may call `lock`. Its shared
//! acquisitions are parked (released and remembered as "auto locks"), the
//! exclusive acquisition waits like any other writer, and when the last
//! matching `unlock` runs the parked acquisitions are handed back to the same
//! thread. The caller never re-requests them.
//!
//! Raw `unlock_shared` calls made while the exclusive slot is held release
//! an exclusive level, so they must unwind in reverse order. The RAII guards
//! track which mode they took and may be dropped in any order.
//!
//! ## Gates
//!
//! Two condition variables coordinate waiters:
//!
//! - `read_gate`: signalled when the exclusive slot frees up. New readers and
//!   writers competing for the slot wait here.
//! - `write_gate`: signalled when a reader leaves. The thread that owns the
//!   exclusive slot waits here for existing readers to drain.
//!
//! Once a writer owns the slot, new readers queue behind it. A thread that
//! already holds shared acquisitions may still re-enter shared mode, otherwise
//! it would deadlock against the writer waiting for it.
//!
//! ## Misuse
//!
//! Unlocking a mode the calling thread does not hold, or exceeding the
//! recursion limit, panics. Both indicate a broken invariant in the caller.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

/// Default bound on nested acquisitions by a single thread.
pub const DEFAULT_RECURSION_LIMIT: u64 = 1000;

#[derive(Debug, Default)]
struct LockState {
    /// Thread that owns the exclusive slot, if any.
    write_owner: Option<ThreadId>,
    /// Nesting depth of the owner. Shared acquisitions taken by the owner
    /// while it holds the slot count here too.
    write_counter: u64,
    /// Shared acquisitions per thread.
    read_owners: HashMap<ThreadId, u64>,
    /// Shared acquisitions parked while their thread holds the slot.
    auto_locks: HashMap<ThreadId, u64>,
}

/// Reentrant shared/exclusive lock keyed by thread identity.
#[derive(Debug)]
pub struct RecursiveSharedMutex {
    state: Mutex<LockState>,
    read_gate: Condvar,
    write_gate: Condvar,
    recursion_limit: u64,
}

impl Default for RecursiveSharedMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl RecursiveSharedMutex {
    pub fn new() -> Self {
        Self::with_recursion_limit(DEFAULT_RECURSION_LIMIT)
    }

    /// Create a lock with a custom recursion limit.
    pub fn with_recursion_limit(recursion_limit: u64) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            read_gate: Condvar::new(),
            write_gate: Condvar::new(),
            recursion_limit: recursion_limit.max(1),
        }
    }

    pub fn recursion_limit(&self) -> u64 {
        self.recursion_limit
    }

    /// Acquire exclusive ownership, blocking until it is available.
    pub fn lock(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.write_owner == Some(me) {
            self.bump_write_counter(&mut state);
            return;
        }

        self.park_shared(&mut state, me);

        while state.write_owner.is_some() {
            self.read_gate.wait(&mut state);
        }
        state.write_owner = Some(me);
        state.write_counter = 1;

        while !state.read_owners.is_empty() {
            self.write_gate.wait(&mut state);
        }
    }

    /// Try to acquire exclusive ownership without blocking.
    ///
    /// Succeeds when the calling thread already owns the slot, or when no
    /// writer is active and no other thread holds a shared acquisition.
    pub fn try_lock(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.write_owner == Some(me) {
            self.bump_write_counter(&mut state);
            return true;
        }
        if state.write_owner.is_some() || state.read_owners.keys().any(|id| *id != me) {
            return false;
        }

        self.park_shared(&mut state, me);
        state.write_owner = Some(me);
        state.write_counter = 1;
        true
    }

    /// Release one exclusive acquisition.
    ///
    /// The final release restores any shared acquisitions parked by `lock`.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not own the exclusive slot.
    pub fn unlock(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        assert!(
            state.write_owner == Some(me),
            "unlock called by a thread that does not hold the exclusive lock"
        );
        self.release_write(&mut state, me);
    }

    /// Acquire a shared acquisition, blocking while another thread writes.
    pub fn lock_shared(&self) {
        self.acquire_shared();
    }

    /// Returns `true` when the acquisition was folded into the calling
    /// thread's exclusive slot.
    fn acquire_shared(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.write_owner == Some(me) {
            self.bump_write_counter(&mut state);
            return true;
        }

        if let Some(count) = state.read_owners.get_mut(&me) {
            *count += 1;
            assert!(
                *count <= self.recursion_limit,
                "shared lock recursion limit of {} exceeded",
                self.recursion_limit
            );
            return false;
        }

        while state.write_owner.is_some() {
            self.read_gate.wait(&mut state);
        }
        state.read_owners.insert(me, 1);
        false
    }

    /// Try to acquire a shared acquisition without blocking.
    pub fn try_lock_shared(&self) -> bool {
        self.try_acquire_shared().is_some()
    }

    /// Like [`Self::acquire_shared`], `None` if it would block.
    fn try_acquire_shared(&self) -> Option<bool> {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.write_owner == Some(me) {
            self.bump_write_counter(&mut state);
            return Some(true);
        }
        if let Some(count) = state.read_owners.get_mut(&me) {
            if *count >= self.recursion_limit {
                return None;
            }
            *count += 1;
            return Some(false);
        }
        if state.write_owner.is_some() {
            return None;
        }
        state.read_owners.insert(me, 1);
        Some(false)
    }

    /// Release one shared acquisition.
    ///
    /// While the calling thread owns the exclusive slot this releases one
    /// exclusive level, so raw calls must unwind in the reverse order of
    /// acquisition. The guards returned by [`Self::read`] and [`Self::write`]
    /// may be dropped in any order.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread holds neither a shared acquisition nor
    /// the exclusive slot.
    pub fn unlock_shared(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.write_owner == Some(me) {
            self.release_write(&mut state, me);
            return;
        }
        self.release_reader(&mut state, me);
    }

    /// Release a shared acquisition taken outside exclusive mode. If the
    /// thread has upgraded since, the acquisition is parked and only the
    /// parked count drops.
    fn release_outer_shared(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.write_owner == Some(me) {
            if let Some(count) = state.auto_locks.get_mut(&me) {
                *count -= 1;
                if *count == 0 {
                    state.auto_locks.remove(&me);
                }
                return;
            }
        }
        self.release_reader(&mut state, me);
    }

    fn release_reader(&self, state: &mut LockState, me: ThreadId) {
        let remaining = match state.read_owners.get_mut(&me) {
            Some(count) => {
                *count -= 1;
                *count
            }
            None => panic!("unlock_shared called by a thread that holds no shared lock"),
        };
        if remaining == 0 {
            state.read_owners.remove(&me);
            self.write_gate.notify_all();
        }
    }

    /// Acquire exclusively and return a guard that unlocks on drop.
    pub fn write(&self) -> ExclusiveGuard<'_> {
        self.lock();
        ExclusiveGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    pub fn try_write(&self) -> Option<ExclusiveGuard<'_>> {
        self.try_lock().then(|| ExclusiveGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Acquire shared and return a guard that unlocks on drop.
    ///
    /// The guard remembers whether it was taken inside an exclusive
    /// acquisition, so it releases the right mode even if an exclusive guard
    /// taken later is still alive.
    pub fn read(&self) -> SharedGuard<'_> {
        let nested = self.acquire_shared();
        SharedGuard {
            lock: self,
            nested,
            _not_send: PhantomData,
        }
    }

    pub fn try_read(&self) -> Option<SharedGuard<'_>> {
        self.try_acquire_shared().map(|nested| SharedGuard {
            lock: self,
            nested,
            _not_send: PhantomData,
        })
    }

    /// Whether the calling thread owns the exclusive slot.
    pub fn held_exclusive(&self) -> bool {
        self.state.lock().write_owner == Some(thread::current().id())
    }

    /// Whether the calling thread holds the lock in either mode.
    pub fn held_by_current_thread(&self) -> bool {
        let me = thread::current().id();
        let state = self.state.lock();
        state.write_owner == Some(me) || state.read_owners.contains_key(&me)
    }

    /// Shared acquisitions currently held by the calling thread, excluding
    /// parked ones.
    pub fn shared_count(&self) -> u64 {
        let me = thread::current().id();
        self.state.lock().read_owners.get(&me).copied().unwrap_or(0)
    }

    /// Shared acquisitions of the calling thread parked behind its
    /// exclusive acquisition.
    pub fn parked_count(&self) -> u64 {
        let me = thread::current().id();
        self.state.lock().auto_locks.get(&me).copied().unwrap_or(0)
    }

    /// Number of distinct threads holding shared acquisitions.
    pub fn reader_count(&self) -> usize {
        self.state.lock().read_owners.len()
    }

    fn bump_write_counter(&self, state: &mut LockState) {
        state.write_counter += 1;
        assert!(
            state.write_counter <= self.recursion_limit,
            "exclusive lock recursion limit of {} exceeded",
            self.recursion_limit
        );
    }

    fn park_shared(&self, state: &mut LockState, me: ThreadId) {
        if let Some(count) = state.read_owners.remove(&me) {
            trace!(parked = count, "parking shared acquisitions for exclusive upgrade");
            state.auto_locks.insert(me, count);
            self.write_gate.notify_all();
        }
    }

    fn release_write(&self, state: &mut LockState, me: ThreadId) {
        state.write_counter -= 1;
        if state.write_counter > 0 {
            return;
        }

        state.write_owner = None;
        if let Some(count) = state.auto_locks.remove(&me) {
            trace!(restored = count, "restoring parked shared acquisitions");
            state.read_owners.insert(me, count);
        }
        self.read_gate.notify_all();
        self.write_gate.notify_all();
    }
}

/// RAII exclusive acquisition. Must be dropped on the thread that took it.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ExclusiveGuard<'a> {
    lock: &'a RecursiveSharedMutex,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// RAII shared acquisition. Must be dropped on the thread that took it.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SharedGuard<'a> {
    lock: &'a RecursiveSharedMutex,
    /// Taken while the thread owned the exclusive slot.
    nested: bool,
    _not_send: PhantomData<*const ()>,
}

impl Drop for SharedGuard<'_> {
    fn drop(&mut self) {
        if self.nested {
            self.lock.unlock_shared();
        } else {
            self.lock.release_outer_shared();
        }
    }
}
