//! Stack capture and counting inside the sampling signal handler
//!
//! The handler side (`sample_current_stack`) walks the interrupted thread with
//! `backtrace::trace_unsynchronized` into a stack-allocated [`RawStack`] and
//! counts it in a preallocated open-addressing table keyed by a hash of the
//! instruction pointers. A distinct stack claims a slot the first time it is
//! seen; later firings only bump that slot's atomic count. Nothing on this
//! path allocates, locks or logs. A firing whose stack finds no free slot is
//! counted as overflowed, so the capacity bounds distinct stacks, never the
//! number of samples.
//!
//! The aggregator side takes the accumulated counts with the sampling signal
//! blocked, see [`drain_pending`].
//!
//! The table is process-wide, like the timer feeding it. Only the main
//! thread's handler writes to it.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

use tracing::debug;

use crate::config::SamplerConfig;
use crate::error::Result;
use crate::frame::{RawStack, CAPTURE_HEADROOM, RAW_CAPACITY};
use crate::timer::SignalBlock;

static TABLE: OnceLock<StackTable> = OnceLock::new();
/// Raw frames walked per firing, headroom included
static CAPTURE_LIMIT: AtomicUsize = AtomicUsize::new(RAW_CAPACITY);
static FIRINGS: AtomicU64 = AtomicU64::new(0);
static OVERFLOWED: AtomicU64 = AtomicU64::new(0);
static TRUNCATED: AtomicU64 = AtomicU64::new(0);

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// Handler-side counters since the session began
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureCounters {
    /// Calls to the firing callback
    pub firings: u64,
    /// Firings lost because every slot held another stack
    pub overflowed: u64,
    /// Firings whose stack was cut short at the capture limit
    pub truncated: u64,
}

/// One distinct stack and how often it was seen since the last drain
struct StackSlot {
    /// 0 while free. Published after `depth` and `ips` are written.
    hash: AtomicU64,
    depth: AtomicUsize,
    ips: [AtomicUsize; RAW_CAPACITY],
    count: AtomicU64,
}

impl StackSlot {
    fn new() -> Self {
        Self {
            hash: AtomicU64::new(0),
            depth: AtomicUsize::new(0),
            ips: std::array::from_fn(|_| AtomicUsize::new(0)),
            count: AtomicU64::new(0),
        }
    }

    fn holds(&self, raw: &RawStack) -> bool {
        self.depth.load(Ordering::Relaxed) == raw.depth()
            && self
                .ips
                .iter()
                .zip(raw.ips())
                .all(|(cell, ip)| cell.load(Ordering::Relaxed) == *ip)
    }

    fn fill(&self, raw: &RawStack, hash: u64) {
        self.depth.store(raw.depth(), Ordering::Relaxed);
        for (cell, ip) in self.ips.iter().zip(raw.ips()) {
            cell.store(*ip, Ordering::Relaxed);
        }
        self.hash.store(hash, Ordering::Release);
    }

    fn load(&self) -> RawStack {
        let mut raw = RawStack::new();
        let depth = self.depth.load(Ordering::Relaxed).min(RAW_CAPACITY);
        for cell in &self.ips[..depth] {
            raw.push(cell.load(Ordering::Relaxed));
        }
        raw
    }
}

/// Fixed-capacity map from raw stack to count, linear probing
struct StackTable {
    slots: Box<[StackSlot]>,
}

impl StackTable {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity.max(1)).map(|_| StackSlot::new()).collect(),
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Count one occurrence of `raw`. Returns `false` when no slot is free.
    ///
    /// Single writer only: slots are claimed without a CAS.
    fn record(&self, raw: &RawStack) -> bool {
        let hash = stack_hash(raw);
        let len = self.slots.len();
        let mut idx = (hash as usize) % len;

        for _ in 0..len {
            let slot = &self.slots[idx];
            let stored = slot.hash.load(Ordering::Acquire);
            if stored == 0 {
                slot.fill(raw, hash);
                slot.count.fetch_add(1, Ordering::AcqRel);
                return true;
            }
            if stored == hash && slot.holds(raw) {
                slot.count.fetch_add(1, Ordering::AcqRel);
                return true;
            }
            idx = (idx + 1) % len;
        }
        false
    }

    /// Hand each stack seen since the last drain to `sink` with its count
    ///
    /// Slots stay claimed so recurring stacks keep their place.
    fn drain(&self, mut sink: impl FnMut(RawStack, u64)) {
        for slot in self.slots.iter() {
            if slot.hash.load(Ordering::Acquire) == 0 {
                continue;
            }
            let count = slot.count.swap(0, Ordering::AcqRel);
            if count > 0 {
                sink(slot.load(), count);
            }
        }
    }

    fn clear(&self) {
        for slot in self.slots.iter() {
            slot.hash.store(0, Ordering::Release);
            slot.count.store(0, Ordering::Relaxed);
        }
    }
}

/// FNV-1a over the instruction pointers; never 0, which marks a free slot
fn stack_hash(raw: &RawStack) -> u64 {
    let mut hash = FNV_OFFSET;
    for &ip in raw.ips() {
        hash ^= ip as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash ^= raw.depth() as u64;
    hash = hash.wrapping_mul(FNV_PRIME);
    if hash == 0 {
        1
    } else {
        hash
    }
}

/// Allocate the stack table on first use
///
/// Later calls keep the existing table. Touches nothing a running session
/// depends on, so it is safe before the timer is claimed.
pub fn allocate(capacity: usize) {
    let table = TABLE.get_or_init(|| StackTable::with_capacity(capacity));
    if table.capacity() != capacity {
        debug!(
            requested = capacity,
            actual = table.capacity(),
            "stack table already allocated, keeping existing capacity"
        );
    }
}

/// Start a fresh capture session for the timer holder
///
/// Applies the depth limit and clears counts and counters. Call only after
/// the timer has been armed for this session.
pub fn begin_session(config: &SamplerConfig) -> Result<()> {
    allocate(config.stack_capacity);
    let _block = SignalBlock::new()?;

    CAPTURE_LIMIT.store(capture_limit_for(config.max_depth), Ordering::Relaxed);
    if let Some(table) = TABLE.get() {
        table.clear();
    }
    FIRINGS.store(0, Ordering::Relaxed);
    OVERFLOWED.store(0, Ordering::Relaxed);
    TRUNCATED.store(0, Ordering::Relaxed);
    Ok(())
}

fn capture_limit_for(max_depth: usize) -> usize {
    max_depth.saturating_add(CAPTURE_HEADROOM).min(RAW_CAPACITY)
}

/// Raw frames the handler walks per firing in the current session
pub fn capture_limit() -> usize {
    CAPTURE_LIMIT.load(Ordering::Relaxed)
}

/// Firing callback: capture the current stack and count it
pub fn sample_current_stack() {
    FIRINGS.fetch_add(1, Ordering::Relaxed);
    let Some(table) = TABLE.get() else {
        OVERFLOWED.fetch_add(1, Ordering::Relaxed);
        return;
    };

    let limit = CAPTURE_LIMIT.load(Ordering::Relaxed);
    let mut raw = RawStack::new();

    // SAFETY: only the main thread runs this (enforced by the timer) and the
    // sampling signal is blocked while the handler executes, so no other
    // unsynchronized trace can be in progress on this thread.
    unsafe {
        backtrace::trace_unsynchronized(|frame| {
            if raw.depth() >= limit {
                raw.mark_truncated();
                return false;
            }
            raw.push(frame.ip() as usize)
        });
    }

    if raw.is_truncated() {
        TRUNCATED.fetch_add(1, Ordering::Relaxed);
    }
    if !table.record(&raw) {
        OVERFLOWED.fetch_add(1, Ordering::Relaxed);
    }
}

/// Hand every stack counted since the last drain to `sink`
///
/// Returns the counters as of the drain. Both are read with the sampling
/// signal blocked, so they agree with each other.
pub fn drain_pending(sink: impl FnMut(RawStack, u64)) -> Result<CaptureCounters> {
    let _block = SignalBlock::new()?;
    if let Some(table) = TABLE.get() {
        table.drain(sink);
    }
    Ok(counters())
}

pub fn counters() -> CaptureCounters {
    CaptureCounters {
        firings: FIRINGS.load(Ordering::Relaxed),
        overflowed: OVERFLOWED.load(Ordering::Relaxed),
        truncated: TRUNCATED.load(Ordering::Relaxed),
    }
}
