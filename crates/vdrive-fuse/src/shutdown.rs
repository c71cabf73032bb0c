//! Explicit shutdown plumbing for a mount.
//!
//! The mount routine blocks on a [`ShutdownSignal`]; whoever owns the process
//! (CLI signal handler, test, embedding host) triggers it. [`Unmounter`] runs
//! its unmount action at most once no matter how many paths request it.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// One-shot, cloneable shutdown flag.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Further calls are no-ops.
    pub fn trigger(&self) {
        let (flag, cvar) = &*self.inner;
        let mut triggered = lock(flag);
        if !*triggered {
            *triggered = true;
            cvar.notify_all();
        }
    }

    pub fn is_triggered(&self) -> bool {
        *lock(&self.inner.0)
    }

    /// Block until triggered.
    pub fn wait(&self) {
        let (flag, cvar) = &*self.inner;
        let mut triggered = lock(flag);
        while !*triggered {
            triggered = cvar.wait(triggered).unwrap_or_else(|p| p.into_inner());
        }
    }

    /// Block until triggered or `timeout` elapses. Returns whether triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = lock(flag);
        let (triggered, _) = cvar
            .wait_timeout_while(guard, timeout, |t| !*t)
            .unwrap_or_else(|p| p.into_inner());
        *triggered
    }
}

impl fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

type UnmountAction = Box<dyn FnOnce() + Send>;

/// Idempotent unmount.
pub struct Unmounter {
    action: Mutex<Option<UnmountAction>>,
}

impl Unmounter {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    /// Run the unmount action if it has not run yet. Returns whether this
    /// call performed it.
    pub fn unmount(&self) -> bool {
        let action = lock(&self.action).take();
        match action {
            Some(action) => {
                action();
                true
            }
            None => false,
        }
    }

    pub fn is_unmounted(&self) -> bool {
        lock(&self.action).is_none()
    }
}
