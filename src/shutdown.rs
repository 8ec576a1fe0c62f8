//! Two-stage interrupt handling for a trace session.
//!
//! The first SIGINT is forwarded to the traced program, which is expected to wind down and
//! send the terminate sentinel. A second SIGINT stops the receive loop unconditionally.
//! The handler only forwards the signal and moves the state; the receive loop reports it.

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;
use tracing::warn;

use crate::error::Result;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum State {
    Running = 0,
    Stopping = 1,
    Stopped = 2,
}

/// Side effect requested by an interrupt transition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    /// Forward the interrupt to the traced program.
    Forward,

    /// Stop the receive loop without waiting for the terminate sentinel.
    Force,

    Ignore,
}

impl State {
    /// Transition taken when an interrupt arrives in this state.
    pub fn on_interrupt(self) -> (State, Action) {
        match self {
            State::Running => (State::Stopping, Action::Forward),
            State::Stopping => (State::Stopped, Action::Force),
            State::Stopped => (State::Stopped, Action::Ignore),
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => State::Running,
            1 => State::Stopping,
            _ => State::Stopped,
        }
    }
}

/// Shutdown state shared between a receive loop and the interrupt handler.
///
/// Only atomics are touched, so [`Shutdown::interrupt`] is safe to call from a signal handler.
#[derive(Debug)]
pub struct Shutdown {
    state: AtomicU8,
    child: AtomicI32,
}

impl Shutdown {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(State::Running as u8),
            child: AtomicI32::new(0),
        }
    }

    /// Return to `Running`, with no child to forward interrupts to.
    pub fn reset(&self) {
        self.child.store(0, Ordering::SeqCst);
        self.state.store(State::Running as u8, Ordering::SeqCst);
    }

    pub fn state(&self) -> State {
        State::from_raw(self.state.load(Ordering::SeqCst))
    }

    /// False once the receive loop must stop.
    pub fn should_continue(&self) -> bool {
        self.state() != State::Stopped
    }

    pub fn set_child(&self, pid: Option<Pid>) {
        let raw = pid.map(Pid::as_raw).unwrap_or(0);
        self.child.store(raw, Ordering::SeqCst);
    }

    pub fn child(&self) -> Option<Pid> {
        match self.child.load(Ordering::SeqCst) {
            raw if raw > 0 => Some(Pid::from_raw(raw)),
            _ => None,
        }
    }

    /// Apply one interrupt and perform its side effect.
    pub fn interrupt(&self) -> Action {
        let mut current = self.state();

        loop {
            let (next, action) = current.on_interrupt();

            if next == current {
                return action;
            }

            match self.state.compare_exchange(current as u8, next as u8, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => {
                    if action == Action::Forward {
                        self.forward();
                    }
                    return action;
                },
                Err(raw) => current = State::from_raw(raw),
            }
        }
    }

    fn forward(&self) {
        // A zero pid would signal our whole process group.
        if let Some(pid) = self.child() {
            let _ = signal::kill(pid, Signal::SIGINT);
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

static SESSION: Shutdown = Shutdown::new();

/// Process-wide state driven by the installed SIGINT handler.
pub fn session() -> &'static Shutdown {
    &SESSION
}

extern "C" fn on_sigint(_: libc::c_int) {
    SESSION.interrupt();
}

/// Restores the previous SIGINT disposition when dropped.
pub struct InterruptGuard {
    previous: SigAction,
}

/// Route SIGINT to [`session()`].
///
/// Installed without `SA_RESTART`: a receive blocked in the kernel must return `EINTR` so
/// the loop can observe a forced stop.
pub fn install() -> Result<InterruptGuard> {
    let action = SigAction::new(SigHandler::Handler(on_sigint), SaFlags::empty(), SigSet::empty());
    let previous = unsafe { signal::sigaction(Signal::SIGINT, &action) }?;

    Ok(InterruptGuard { previous })
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if let Err(errno) = unsafe { signal::sigaction(Signal::SIGINT, &self.previous) } {
            warn!(%errno, "unable to restore SIGINT handler");
        }
    }
}
