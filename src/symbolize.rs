//! Resolve raw instruction pointers into symbolic frames
//!
//! Runs on the aggregating thread, never in the signal handler: symbol
//! lookup allocates and takes locks inside `backtrace`.

use std::collections::HashMap;
use std::ffi::c_void;

use crate::frame::{Frame, RawStack, Sample, MAX_DEPTH};

/// Placeholder for fields the debug info cannot provide
pub const UNKNOWN: &str = "??";

/// Leaf-side frames that belong to the unwinder or the sampling signal path
const INTERNAL_MODULES: &[&str] = &[
    "backtrace",
    concat!(env!("CARGO_CRATE_NAME"), "::capture"),
    concat!(env!("CARGO_CRATE_NAME"), "::timer"),
];

/// Kernel signal return trampoline (glibc/musl on Linux)
const SIGNAL_TRAMPOLINE: &str = "__restore_rt";

/// Caching address-to-frame resolver
#[derive(Debug)]
pub struct Symbolizer {
    cache: HashMap<usize, Vec<Frame>>,
    max_depth: usize,
}

impl Default for Symbolizer {
    fn default() -> Self {
        Self::with_max_depth(MAX_DEPTH)
    }
}

impl Symbolizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver that keeps at most `max_depth` frames per sample
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            cache: HashMap::new(),
            max_depth,
        }
    }

    /// Resolve a raw stack into a root-first sample
    ///
    /// Inlined calls expand into several frames. Frames of the profiler's own
    /// capture path at the leaf end are dropped, then the sample is cut to the
    /// leaf-most `max_depth` frames.
    pub fn resolve(&mut self, raw: &RawStack) -> Sample {
        let mut leaf_first = Vec::with_capacity(raw.depth());
        for &ip in raw.ips() {
            leaf_first.extend_from_slice(self.frames_for(ip));
        }

        let internal = internal_prefix_len(&leaf_first);
        leaf_first.drain(..internal);
        leaf_first.truncate(self.max_depth);
        Sample::from_leaf_first(leaf_first)
    }

    /// Distinct addresses resolved so far
    pub fn cached_addresses(&self) -> usize {
        self.cache.len()
    }

    fn frames_for(&mut self, ip: usize) -> &[Frame] {
        self.cache.entry(ip).or_insert_with(|| resolve_address(ip))
    }
}

fn resolve_address(ip: usize) -> Vec<Frame> {
    // Captured addresses are return addresses; step back into the call
    // instruction so the line belongs to the caller.
    let lookup = ip.saturating_sub(1);
    let mut frames = Vec::new();

    backtrace::resolve(lookup as *mut c_void, |symbol| {
        let qualified = symbol
            .name()
            .map(|name| format!("{:#}", name))
            .unwrap_or_else(|| format!("{:#x}", ip));
        let (module, function) = split_qualified(&qualified);
        let file = symbol
            .filename()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| UNKNOWN.to_string());
        let line = symbol.lineno().unwrap_or(0);

        frames.push(Frame::new(
            sanitize(module),
            sanitize(&file),
            line,
            sanitize(function),
        ));
    });

    if frames.is_empty() {
        frames.push(Frame::new(UNKNOWN, UNKNOWN, 0, format!("{:#x}", ip)));
    }
    frames
}

/// Split `a::b::c` into (`a::b`, `c`), ignoring `::` inside `<...>`
///
/// Names without a path get the [`UNKNOWN`] module.
pub fn split_qualified(name: &str) -> (&str, &str) {
    let bytes = name.as_bytes();
    let mut depth = 0usize;
    let mut split_at = None;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'<' => depth += 1,
            b'>' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                split_at = Some(i);
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }

    match split_at {
        Some(at) => (&name[..at], &name[at + 2..]),
        None => (UNKNOWN, name),
    }
}

/// Keep resolved names from breaking the collapsed-stack format
fn sanitize(field: &str) -> String {
    field
        .chars()
        .map(|c| match c {
            ';' => ',',
            '\n' | '\r' => ' ',
            other => other,
        })
        .collect()
}

fn is_internal(frame: &Frame) -> bool {
    if frame.function.starts_with("_Unwind_") {
        return true;
    }
    INTERNAL_MODULES.iter().any(|prefix| {
        frame.module == *prefix
            || frame
                .module
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with("::"))
    })
}

/// Number of leaf-side frames belonging to the capture path
fn internal_prefix_len(leaf_first: &[Frame]) -> usize {
    if let Some(pos) = leaf_first
        .iter()
        .position(|f| f.function == SIGNAL_TRAMPOLINE)
    {
        return pos + 1;
    }
    // Closure shims between unwinder frames are only trimmed when an
    // internal frame follows them.
    leaf_first
        .iter()
        .take_while(|f| is_internal(f) || f.module.starts_with("core::ops::function"))
        .enumerate()
        .filter(|(_, f)| is_internal(f))
        .last()
        .map_or(0, |(pos, _)| pos + 1)
}
