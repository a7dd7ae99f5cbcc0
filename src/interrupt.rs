//! Emergency teardown on operator interrupt.
//!
//! The receiver owns the rendezvous objects; if it is killed with `SIGINT`
//! or `SIGTERM` mid-transfer it must still remove them, or the next session
//! on the same key would inherit a stale segment and queue. The peer is not
//! notified: a sender blocked in `msgrcv(2)` fails with `EIDRM` once the
//! queue is gone.

use crate::error::{Error, Result};
use crate::session::{Session, Teardown};
use std::io;
use std::ptr;
use std::sync::{Arc, OnceLock};

/// The single process-wide interrupt target.
///
/// Set once by [`install`] and only read afterwards, so the handler can
/// reach it with a plain atomic load.
static TARGET: OnceLock<Arc<Teardown>> = OnceLock::new();

/// Signals that trigger the emergency teardown.
pub const SIGNALS: [libc::c_int; 2] = [libc::SIGINT, libc::SIGTERM];

fn signal_set() -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        for signo in SIGNALS {
            libc::sigaddset(&mut set, signo);
        }
        set
    }
}

/// Keeps [`SIGNALS`] blocked on the current thread until dropped.
///
/// Signals that arrive meanwhile stay pending and are delivered when the
/// previous mask is restored.
#[must_use]
pub struct SignalGuard {
    previous: libc::sigset_t,
}

/// Blocks [`SIGNALS`] on the calling thread.
pub fn block_signals() -> io::Result<SignalGuard> {
    let set = signal_set();
    let mut previous: libc::sigset_t = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, &mut previous) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(SignalGuard { previous })
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        unsafe { libc::pthread_sigmask(libc::SIG_SETMASK, &self.previous, ptr::null_mut()) };
    }
}

/// Registers `session` as the interrupt target and installs the handler.
///
/// Only one session per process can be registered. The handler destroys
/// the session's segment and queue (guarded by the same one-shot progress
/// as [`Session::release`]), prints a one-line diagnostic and exits with
/// `128 + signo`. While it runs, both signals are blocked, so a second
/// signal cannot cut a teardown short.
pub fn install(session: &Session) -> Result<()> {
    TARGET
        .set(session.teardown().clone())
        .map_err(|_| Error::ResourceUnavailable {
            op: "sigaction",
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                "an interrupt handler is already installed",
            ),
        })?;

    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = on_interrupt as extern "C" fn(libc::c_int) as libc::sighandler_t;
    action.sa_mask = signal_set();
    action.sa_flags = 0;
    for signo in SIGNALS {
        if unsafe { libc::sigaction(signo, &action, ptr::null_mut()) } == -1 {
            return Err(Error::ResourceUnavailable {
                op: "sigaction",
                source: io::Error::last_os_error(),
            });
        }
    }
    Ok(())
}

/// Returns `true` once [`install`] has succeeded in this process.
pub fn is_installed() -> bool {
    TARGET.get().is_some()
}

/// Finishes whatever part of `teardown` is still pending and reports
/// whether the segment and queue are gone.
fn emergency_teardown(teardown: &Teardown) -> bool {
    teardown.run_unmasked(true).is_ok() && teardown.is_removed()
}

extern "C" fn on_interrupt(signo: libc::c_int) {
    // Async-signal-safe only: syscalls, no allocation, no logging.
    let removed = match TARGET.get() {
        Some(teardown) => emergency_teardown(teardown),
        None => true,
    };
    let msg: &[u8] = if removed {
        b"interrupted: shared memory and message queue removed\n"
    } else {
        b"interrupted: teardown of shared memory or message queue failed\n"
    };
    unsafe {
        libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len());
        libc::_exit(128 + signo);
    }
}
