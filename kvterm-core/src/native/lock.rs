use std::{
    sync::{Arc, Condvar, Mutex},
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use crate::{native::NativeEnv, status::Status};

/// The environment wide write lock, reentrant for the thread holding it.
#[derive(Default)]
pub(crate) struct Lock {
    state: Mutex<LockState>,
    released: Condvar,
}

#[derive(Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

impl Lock {
    /// Waits for the lock, at most `timeout` if given.
    ///
    /// A request that is not granted in time is reported as a deadlock, the caller is
    /// expected to give up its transaction.
    pub(crate) fn acquire(&self, timeout: Option<Duration>) -> Result<(), Status> {
        let me = thread::current().id();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock().unwrap();

        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    return Ok(());
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    return Ok(());
                }
                Some(_) => {}
            }

            state = match deadline {
                None => self.released.wait(state).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::debug!(?timeout, "lock request timed out");
                        return Err(Status::LOCK_DEADLOCK);
                    }
                    self.released.wait_timeout(state, deadline - now).unwrap().0
                }
            };
        }
    }

    pub(crate) fn release(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert_eq!(state.owner, Some(thread::current().id()));

        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            self.released.notify_all();
        }
    }
}

/// A granted write lock, released on drop.
pub(crate) struct LockGuard {
    env: Arc<NativeEnv>,
}

impl LockGuard {
    #[inline]
    pub(crate) fn acquire(env: &Arc<NativeEnv>) -> Result<Self, Status> {
        env.lock.acquire(env.lock_timeout)?;
        Ok(Self { env: env.clone() })
    }
}

impl Drop for LockGuard {
    #[inline]
    fn drop(&mut self) {
        self.env.lock.release();
    }
}
