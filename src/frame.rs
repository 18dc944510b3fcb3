//! Call stack data model
//!
//! A [`RawStack`] is what the signal handler captures: bare instruction
//! pointers in a fixed-size buffer, leaf first. It is resolved outside the
//! handler into a [`Sample`] of symbolic [`Frame`]s, root first.

use std::fmt;

/// Deepest stack, in resolved frames, that a sample keeps
pub const MAX_DEPTH: usize = 128;

/// Extra raw frames captured for the unwinder, the firing callback, the
/// signal handler and the kernel trampoline, all trimmed before encoding
pub const CAPTURE_HEADROOM: usize = 24;

/// Instruction pointers a [`RawStack`] can hold
pub const RAW_CAPACITY: usize = MAX_DEPTH + CAPTURE_HEADROOM;

/// One level of a call stack
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "fuzz", derive(arbitrary::Arbitrary))]
pub struct Frame {
    /// Containing module (Rust path without the function segment)
    pub module: String,
    /// Source file basename
    pub file: String,
    /// Line number, 0 when unknown
    pub line: u32,
    /// Function name
    pub function: String,
}

impl Frame {
    pub fn new(
        module: impl Into<String>,
        file: impl Into<String>,
        line: u32,
        function: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            file: file.into(),
            line,
            function: function.into(),
        }
    }
}

/// A captured call stack, ordered root (outermost) to leaf (innermost)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "fuzz", derive(arbitrary::Arbitrary))]
pub struct Sample {
    frames: Vec<Frame>,
}

impl Sample {
    /// Build a sample from frames already in root-to-leaf order
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    /// Build a sample from frames in the order an unwinder yields them
    pub fn from_leaf_first(mut frames: Vec<Frame>) -> Self {
        frames.reverse();
        Self { frames }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The innermost frame, if any
    pub fn leaf(&self) -> Option<&Frame> {
        self.frames.last()
    }
}

impl FromIterator<Frame> for Sample {
    fn from_iter<I: IntoIterator<Item = Frame>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Instruction pointers captured at one interrupt, leaf first
///
/// Lives on the signal handler's stack and is copied into a preallocated
/// slot table, so it never touches the heap.
#[derive(Clone, Copy)]
pub struct RawStack {
    ips: [usize; RAW_CAPACITY],
    depth: usize,
    truncated: bool,
}

impl RawStack {
    pub const fn new() -> Self {
        Self {
            ips: [0; RAW_CAPACITY],
            depth: 0,
            truncated: false,
        }
    }

    /// Append an instruction pointer. Returns `false` once the buffer is full.
    pub fn push(&mut self, ip: usize) -> bool {
        if self.depth == RAW_CAPACITY {
            self.truncated = true;
            return false;
        }
        self.ips[self.depth] = ip;
        self.depth += 1;
        true
    }

    /// Mark that the unwinder had more frames than were kept
    pub fn mark_truncated(&mut self) {
        self.truncated = true;
    }

    pub fn ips(&self) -> &[usize] {
        &self.ips[..self.depth]
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl Default for RawStack {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RawStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawStack")
            .field("ips", &self.ips())
            .field("truncated", &self.truncated)
            .finish()
    }
}
