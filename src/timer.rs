//! CPU-time interval timer driving the sampler
//!
//! [`ItimerSource`] programs `ITIMER_VIRTUAL`, which counts user CPU time
//! consumed by the process and delivers `SIGVTALRM` when it expires. The timer
//! is armed one-shot (`it_interval` = 0) and re-armed by the signal handler
//! after each firing callback returns, so two firings can never overlap.
//!
//! There is one such timer per process. Its state lives in statics guarded by
//! a claim flag, and only the main thread may arm it.
//!
//! Everything reachable from `handle_sampling_signal` must be
//! async-signal-safe: atomics and raw syscalls only, no allocation, locks or
//! logging.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::unistd::{getpid, gettid};
use tracing::{debug, warn};

use crate::error::{Result, SamplerError};

/// Signal delivered when the CPU-time budget expires
pub const SAMPLING_SIGNAL: Signal = Signal::SIGVTALRM;

/// A one-shot interrupt source that fires a callback after an interval of
/// CPU time and keeps firing while re-armed
pub trait TimerSource {
    /// Schedule `on_fire` to run once after `interval` of CPU time
    fn arm(&mut self, interval: Duration, on_fire: fn()) -> Result<()>;

    /// Schedule the next firing; called after each firing callback
    fn rearm(&self, interval: Duration) -> Result<()>;

    /// Cancel any pending firing. Idempotent.
    fn disarm(&mut self);

    fn is_armed(&self) -> bool;

    /// Report, and clear, a re-arm failure that happened inside a firing
    fn take_fault(&mut self) -> Option<Errno> {
        None
    }
}

/// Process slot: set while some `ItimerSource` owns the timer
static SLOT_CLAIMED: AtomicBool = AtomicBool::new(false);
/// Whether the handler should sample and re-arm
static ARMED: AtomicBool = AtomicBool::new(false);
static INTERVAL_US: AtomicU64 = AtomicU64::new(0);
/// Firing callback as a raw `fn()` address, 0 when unset
static ON_FIRE: AtomicUsize = AtomicUsize::new(0);
/// errno of the last failed re-arm inside the handler, 0 when none
static FAULT: AtomicI32 = AtomicI32::new(0);
/// Firings that landed on a thread other than the main thread
static FOREIGN_FIRINGS: AtomicU64 = AtomicU64::new(0);

/// `ITIMER_VIRTUAL` + `SIGVTALRM` timer source
#[derive(Debug, Default)]
pub struct ItimerSource {
    holds_slot: bool,
}

impl ItimerSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Firings delivered to non-main threads since process start
    pub fn foreign_firings() -> u64 {
        FOREIGN_FIRINGS.load(Ordering::Relaxed)
    }
}

impl TimerSource for ItimerSource {
    fn arm(&mut self, interval: Duration, on_fire: fn()) -> Result<()> {
        if !is_primary_context() {
            return Err(SamplerError::UnsupportedContext);
        }
        if !self.holds_slot {
            SLOT_CLAIMED
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .map_err(|_| SamplerError::TimerInUse)?;
            self.holds_slot = true;
        }

        if let Err(errno) = install_handler() {
            self.release();
            return Err(errno.into());
        }

        INTERVAL_US.store(micros(interval), Ordering::Relaxed);
        ON_FIRE.store(on_fire as usize, Ordering::Release);
        FAULT.store(0, Ordering::Relaxed);
        ARMED.store(true, Ordering::Release);

        if let Err(errno) = program_timer(interval) {
            ARMED.store(false, Ordering::Release);
            self.release();
            return Err(errno.into());
        }

        debug!(interval_us = micros(interval), "armed ITIMER_VIRTUAL");
        Ok(())
    }

    fn rearm(&self, interval: Duration) -> Result<()> {
        if !self.holds_slot {
            return Ok(());
        }
        INTERVAL_US.store(micros(interval), Ordering::Relaxed);
        program_timer(interval)?;
        Ok(())
    }

    fn disarm(&mut self) {
        if !self.holds_slot {
            return;
        }
        ARMED.store(false, Ordering::Release);
        if let Err(errno) = program_timer(Duration::ZERO) {
            warn!(%errno, "failed to clear ITIMER_VIRTUAL");
        }
        ON_FIRE.store(0, Ordering::Release);
        self.release();
        debug!("disarmed ITIMER_VIRTUAL");
    }

    fn is_armed(&self) -> bool {
        self.holds_slot && ARMED.load(Ordering::Acquire)
    }

    fn take_fault(&mut self) -> Option<Errno> {
        if !self.holds_slot {
            return None;
        }
        match FAULT.swap(0, Ordering::AcqRel) {
            0 => None,
            raw => Some(Errno::from_raw(raw)),
        }
    }
}

impl ItimerSource {
    fn release(&mut self) {
        if self.holds_slot {
            SLOT_CLAIMED.store(false, Ordering::Release);
            self.holds_slot = false;
        }
    }
}

impl Drop for ItimerSource {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// True on the process main thread
///
/// Async-signal-safe: both calls are plain syscalls.
pub fn is_primary_context() -> bool {
    gettid() == getpid()
}

/// Register a process exit hook that disarms the timer
///
/// Registered at most once per process; later calls return the first outcome.
pub fn register_exit_hook() -> Result<()> {
    static REGISTERED: OnceLock<bool> = OnceLock::new();

    let ok = *REGISTERED.get_or_init(|| {
        // SAFETY: `disarm_at_exit` is an `extern "C" fn()` that only touches
        // atomics and calls setitimer.
        unsafe { libc::atexit(disarm_at_exit) == 0 }
    });
    if ok {
        Ok(())
    } else {
        Err(SamplerError::ExitHook)
    }
}

extern "C" fn disarm_at_exit() {
    ARMED.store(false, Ordering::Release);
    let _ = program_timer(Duration::ZERO);
}

/// Blocks the sampling signal on the current thread until dropped
///
/// Used while reading or clearing the stack table so the handler never
/// interleaves with a half-finished drain on the same thread.
pub(crate) struct SignalBlock {
    previous: SigSet,
}

impl SignalBlock {
    pub(crate) fn new() -> Result<Self> {
        let mut set = SigSet::empty();
        set.add(SAMPLING_SIGNAL);
        let previous = set.thread_swap_mask(SigmaskHow::SIG_BLOCK)?;
        Ok(Self { previous })
    }
}

impl Drop for SignalBlock {
    fn drop(&mut self) {
        if let Err(errno) = self.previous.thread_set_mask() {
            warn!(%errno, "failed to restore signal mask");
        }
    }
}

/// Installed once and left in place: a no-op while disarmed, which keeps a
/// late `SIGVTALRM` from hitting the default (terminating) disposition.
fn install_handler() -> std::result::Result<(), Errno> {
    let action = SigAction::new(
        SigHandler::Handler(handle_sampling_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handler only uses async-signal-safe operations.
    unsafe { sigaction(SAMPLING_SIGNAL, &action) }?;
    Ok(())
}

extern "C" fn handle_sampling_signal(_signum: libc::c_int) {
    let saved_errno = Errno::last_raw();

    if ARMED.load(Ordering::Acquire) {
        if is_primary_context() {
            let raw = ON_FIRE.load(Ordering::Acquire);
            if raw != 0 {
                // SAFETY: ON_FIRE only ever holds a value produced by
                // `on_fire as usize` for an `fn()`.
                let on_fire: fn() = unsafe { std::mem::transmute::<usize, fn()>(raw) };
                on_fire();
            }
        } else {
            FOREIGN_FIRINGS.fetch_add(1, Ordering::Relaxed);
        }

        // Stopped from inside the callback: do not re-arm
        if ARMED.load(Ordering::Acquire) {
            let interval = Duration::from_micros(INTERVAL_US.load(Ordering::Relaxed));
            if let Err(errno) = program_timer(interval) {
                FAULT.store(errno as i32, Ordering::Release);
                ARMED.store(false, Ordering::Release);
            }
        }
    }

    Errno::set_raw(saved_errno);
}

/// One-shot setitimer. A zero interval disarms.
fn program_timer(interval: Duration) -> std::result::Result<(), Errno> {
    let value = libc::itimerval {
        it_interval: libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
        it_value: libc::timeval {
            tv_sec: interval.as_secs() as libc::time_t,
            tv_usec: interval.subsec_micros() as libc::suseconds_t,
        },
    };
    // SAFETY: `value` is a valid itimerval and the old-value pointer may be null.
    let rc = unsafe { libc::setitimer(libc::ITIMER_VIRTUAL, &value, std::ptr::null_mut()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(Errno::last())
    }
}

fn micros(interval: Duration) -> u64 {
    u64::try_from(interval.as_micros()).unwrap_or(u64::MAX)
}
