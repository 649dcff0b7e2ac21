//! Coordination between the control and presentation contexts.
//!
//! [`Lockout`] parks the presentation worker while program storage is being
//! rewritten: the worker may be running code that lives in the region being
//! erased. The worker cooperates by calling [`LockoutVictim::checkpoint`] at
//! safe points. [`StartSignal`] is the one-shot rendezvous the worker waits
//! on before entering its loop.

use crate::logging::{log, LogCategory, LogLevel};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Flags {
    victim: bool,
    /// Registered but not yet running its loop
    dormant: bool,
    requested: bool,
    parked: bool,
}

#[derive(Debug, Default)]
struct LockoutState {
    flags: Mutex<Flags>,
    changed: Condvar,
}

impl LockoutState {
    fn lock(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait<'a>(&self, flags: MutexGuard<'a, Flags>) -> MutexGuard<'a, Flags> {
        self.changed.wait(flags).unwrap_or_else(|e| e.into_inner())
    }
}

/// Control-side handle of the lockout
#[derive(Debug, Clone, Default)]
pub struct Lockout {
    state: Arc<LockoutState>,
}

impl Lockout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the worker that must park during a lockout. The victim starts
    /// dormant and counts as parked until [`LockoutVictim::resume`] is called.
    /// Only one victim exists at a time; dropping the handle unregisters it.
    pub fn register_victim(&self) -> LockoutVictim {
        let mut flags = self.state.lock();
        flags.victim = true;
        flags.dormant = true;
        flags.parked = false;
        self.state.changed.notify_all();
        LockoutVictim {
            state: Arc::clone(&self.state),
        }
    }

    pub fn has_victim(&self) -> bool {
        self.state.lock().victim
    }

    /// Whether the worker is parked at a checkpoint or has not started yet
    pub fn is_parked(&self) -> bool {
        let flags = self.state.lock();
        flags.parked || (flags.victim && flags.dormant)
    }

    /// Request a lockout and wait until the worker has parked. Returns at once
    /// when no worker is registered or it has not started running. The lockout
    /// lasts until the guard drops.
    pub fn start_blocking(&self) -> LockoutGuard<'_> {
        let mut flags = self.state.lock();
        flags.requested = true;
        self.state.changed.notify_all();
        while flags.victim && !flags.dormant && !flags.parked {
            flags = self.state.wait(flags);
        }
        drop(flags);
        log(LogCategory::Flash, LogLevel::Debug, || {
            "lockout started".to_string()
        });
        LockoutGuard { lockout: self }
    }
}

/// Active lockout; dropping it resumes the worker and waits for it to leave
/// its parked state.
#[must_use = "the lockout ends when the guard is dropped"]
pub struct LockoutGuard<'a> {
    lockout: &'a Lockout,
}

impl Drop for LockoutGuard<'_> {
    fn drop(&mut self) {
        let state = &self.lockout.state;
        let mut flags = state.lock();
        flags.requested = false;
        state.changed.notify_all();
        while flags.victim && flags.parked {
            flags = state.wait(flags);
        }
        drop(flags);
        log(LogCategory::Flash, LogLevel::Debug, || "lockout ended".to_string());
    }
}

/// Worker-side handle of the lockout
#[derive(Debug)]
pub struct LockoutVictim {
    state: Arc<LockoutState>,
}

impl LockoutVictim {
    /// Leave the dormant state, first waiting out any lockout in progress
    pub fn resume(&self) {
        let mut flags = self.state.lock();
        while flags.requested {
            flags = self.state.wait(flags);
        }
        flags.dormant = false;
        self.state.changed.notify_all();
    }

    /// Park here while a lockout is requested. Returns true if it parked.
    pub fn checkpoint(&self) -> bool {
        let mut flags = self.state.lock();
        if !flags.requested {
            return false;
        }
        flags.parked = true;
        self.state.changed.notify_all();
        while flags.requested {
            flags = self.state.wait(flags);
        }
        flags.parked = false;
        self.state.changed.notify_all();
        true
    }
}

impl Drop for LockoutVictim {
    fn drop(&mut self) {
        let mut flags = self.state.lock();
        flags.victim = false;
        flags.dormant = false;
        flags.parked = false;
        self.state.changed.notify_all();
    }
}

/// One-shot startup rendezvous between the two contexts
#[derive(Debug, Clone, Default)]
pub struct StartSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StartSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner()) = true;
        cvar.notify_all();
    }

    pub fn acquire_blocking(&self) {
        let (lock, cvar) = &*self.inner;
        let mut released = lock.lock().unwrap_or_else(|e| e.into_inner());
        while !*released {
            released = cvar.wait(released).unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn is_released(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}
