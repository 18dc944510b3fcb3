//! Sampling profiler lifecycle
//!
//! A [`Sampler`] arms a [`TimerSource`] whose firing callback captures the
//! interrupted stack and counts it in the process stack table. Counted stacks
//! are resolved, encoded and merged into the sampler's frequency table when
//! it is flushed, which `report` and `snapshot` do implicitly.
//!
//! ```text
//! NotStarted --start--> Running --stop--> Stopped --start--> Running
//!                        |  ^
//!                        reset
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use stacksampler::sampler::Sampler;
//!
//! let mut sampler = Sampler::new();
//! sampler.start()?;
//! // ... workload ...
//! let text = sampler.report(Some(Path::new("profile.stacks")))?;
//! sampler.stop();
//! # Ok::<(), stacksampler::error::SamplerError>(())
//! ```

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::capture::{self, CaptureCounters};
use crate::config::SamplerConfig;
use crate::encoder::{StackEncoder, StackKey};
use crate::error::{Result, SamplerError};
use crate::frame::Sample;
use crate::frequency::FrequencyTable;
use crate::report::ReportFormatter;
use crate::symbolize::Symbolizer;
use crate::timer::{self, ItimerSource, TimerSource};

/// Lifecycle state of a [`Sampler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    NotStarted,
    Running,
    Stopped,
}

/// Point-in-time view of collected samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSnapshot {
    /// Stacks sorted by count, highest first
    pub entries: Vec<(StackKey, u64)>,
    /// Wall-clock time since start or the last reset
    pub elapsed: Duration,
    /// Samples counted in `entries`
    pub total_samples: u64,
    /// Samples lost to a full stack table or failed encoding
    pub dropped_samples: u64,
    /// Firing callbacks run since start or the last reset, plus samples
    /// passed to [`Sampler::ingest`]
    ///
    /// Always `total_samples + dropped_samples`.
    pub firings: u64,
}

impl ProfileSnapshot {
    /// Collapsed-stack text, one `<stack> <count>` line per entry
    pub fn render(&self) -> String {
        ReportFormatter::render(&self.entries)
    }
}

/// Statistical CPU profiler for the main thread
pub struct Sampler<T: TimerSource = ItimerSource> {
    config: SamplerConfig,
    timer: T,
    state: SamplerState,
    started: Option<Instant>,
    table: FrequencyTable,
    symbolizer: Symbolizer,
    dropped: u64,
    /// Samples passed to `ingest` directly
    ingested: u64,
    /// Handler counters as of the last flush
    counters: CaptureCounters,
}

impl Sampler<ItimerSource> {
    /// Sampler with the default 5 ms CPU-time interval
    pub fn new() -> Self {
        Self::build(SamplerConfig::default(), ItimerSource::new())
    }

    pub fn with_config(config: SamplerConfig) -> Result<Self> {
        Self::with_timer(config, ItimerSource::new())
    }
}

impl Default for Sampler<ItimerSource> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimerSource> Sampler<T> {
    /// Sampler driven by a custom timer source
    pub fn with_timer(config: SamplerConfig, timer: T) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, timer))
    }

    fn build(config: SamplerConfig, timer: T) -> Self {
        Self {
            symbolizer: Symbolizer::with_max_depth(config.max_depth),
            config,
            timer,
            state: SamplerState::NotStarted,
            started: None,
            table: FrequencyTable::new(),
            dropped: 0,
            ingested: 0,
            counters: CaptureCounters::default(),
        }
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SamplerState::Running
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// Wall-clock time since the session started or was last reset
    pub fn elapsed(&self) -> Option<Duration> {
        self.started.map(|started| started.elapsed())
    }

    /// Begin sampling
    ///
    /// # Errors
    ///
    /// - [`SamplerError::AlreadyRunning`] if called while running
    /// - [`SamplerError::UnsupportedContext`] off the main thread
    /// - [`SamplerError::TimerInUse`] if another sampler owns the timer
    ///
    /// On error the sampler is left exactly as it was.
    pub fn start(&mut self) -> Result<()> {
        if self.state == SamplerState::Running {
            return Err(SamplerError::AlreadyRunning);
        }

        // Before arming, so a failed registration leaves nothing armed
        timer::register_exit_hook()?;
        capture::allocate(self.config.stack_capacity);

        self.timer
            .arm(self.config.interval(), capture::sample_current_stack)?;

        // Session settings are process-wide; only applied once the timer is ours
        if let Err(err) = capture::begin_session(&self.config) {
            self.timer.disarm();
            return Err(err);
        }

        self.table.clear();
        self.dropped = 0;
        self.ingested = 0;
        self.counters = CaptureCounters::default();
        self.started = Some(Instant::now());
        self.state = SamplerState::Running;

        info!(
            interval_us = self.config.interval_us,
            max_depth = self.config.max_depth,
            "sampler started"
        );
        Ok(())
    }

    /// Begin sampling and return a guard that stops the sampler when dropped
    pub fn start_scoped(&mut self) -> Result<SamplingGuard<'_, T>> {
        self.start()?;
        Ok(SamplingGuard { sampler: self })
    }

    /// Stop sampling and discard everything collected
    ///
    /// No-op when never started. On a sampler already stopped by a timer
    /// fault this discards the samples it kept.
    pub fn stop(&mut self) {
        match self.state {
            SamplerState::NotStarted => return,
            SamplerState::Running => self.timer.disarm(),
            SamplerState::Stopped if self.started.is_none() => return,
            SamplerState::Stopped => {}
        }

        let collected = self.table.total();
        self.table.clear();
        self.dropped = 0;
        self.ingested = 0;
        self.counters = CaptureCounters::default();
        self.started = None;
        self.state = SamplerState::Stopped;

        info!(discarded_samples = collected, "sampler stopped");
    }

    /// Discard collected samples and restart the elapsed-time baseline
    ///
    /// Valid in any state; does not change the state.
    pub fn reset(&mut self) {
        // The stack table belongs to whoever holds the timer
        if self.state == SamplerState::Running {
            if let Err(err) = capture::begin_session(&self.config) {
                warn!(%err, "failed to clear the stack table");
            }
        }

        self.table.clear();
        self.dropped = 0;
        self.ingested = 0;
        self.counters = CaptureCounters::default();
        self.started = Some(Instant::now());

        debug!(state = ?self.state, "sampler reset");
    }

    /// Record one already-resolved sample
    ///
    /// This is the aggregation half of a firing. Samples that cannot be
    /// encoded, and empty samples, are counted as dropped.
    pub fn ingest(&mut self, sample: &Sample) {
        if self.state != SamplerState::Running {
            debug!("ignoring sample while not running");
            return;
        }
        self.ingested += 1;
        self.record_sample(sample, 1);
    }

    fn record_sample(&mut self, sample: &Sample, count: u64) {
        match StackEncoder::encode(sample) {
            Ok(key) if key.is_empty() => {
                self.dropped += count;
            }
            Ok(key) => self.table.record_many(key, count),
            Err(err) => {
                self.dropped += count;
                debug!(%err, count, "dropping samples");
            }
        }
    }

    /// Merge the stacks counted by the signal handler into the frequency table
    ///
    /// Returns the number of samples merged.
    pub fn flush(&mut self) -> Result<u64> {
        if self.state != SamplerState::Running {
            return Ok(0);
        }

        let mut resolved = Vec::new();
        self.counters = capture::drain_pending(|raw, count| {
            resolved.push((self.symbolizer.resolve(&raw), count));
        })?;
        let merged: u64 = resolved.iter().map(|(_, count)| count).sum();
        for (sample, count) in &resolved {
            self.record_sample(sample, *count);
        }
        self.check_timer_fault();

        if merged > 0 {
            debug!(
                merged,
                distinct_stacks = self.table.len(),
                cached_addresses = self.symbolizer.cached_addresses(),
                "flushed samples"
            );
        }
        Ok(merged)
    }

    /// Flush and return the current profile, or `None` if no session exists
    pub fn snapshot(&mut self) -> Result<Option<ProfileSnapshot>> {
        if self.started.is_none() {
            return Ok(None);
        }
        self.flush()?;

        let elapsed = self.elapsed().unwrap_or_default();
        let total_samples = self.table.total();
        let dropped_samples = self.dropped + self.counters.overflowed;
        Ok(Some(ProfileSnapshot {
            entries: self.table.export_sorted(),
            elapsed,
            total_samples,
            dropped_samples,
            firings: self.counters.firings + self.ingested,
        }))
    }

    /// Render the profile as collapsed stacks, optionally writing it to
    /// `destination`
    ///
    /// Returns an empty string if sampling never started (or was stopped).
    /// A write failure is returned as [`SamplerError::WriteFailure`] and does
    /// not affect the collected samples.
    pub fn report(&mut self, destination: Option<&Path>) -> Result<String> {
        let Some(snapshot) = self.snapshot()? else {
            return Ok(String::new());
        };
        let text = snapshot.render();

        if let Some(path) = destination {
            ReportFormatter::write_to(path, &text)?;
            info!(
                path = %path.display(),
                stacks = snapshot.entries.len(),
                samples = snapshot.total_samples,
                dropped = snapshot.dropped_samples,
                elapsed_ms = snapshot.elapsed.as_millis() as u64,
                "report written"
            );
        }
        Ok(text)
    }

    /// A re-arm failure inside the handler ends the session; samples
    /// collected so far stay available.
    fn check_timer_fault(&mut self) {
        if let Some(errno) = self.timer.take_fault() {
            error!(%errno, "sampling timer could not be re-armed, sampling stopped");
            self.timer.disarm();
            if self.state == SamplerState::Running {
                self.state = SamplerState::Stopped;
            }
        }
    }
}

impl<T: TimerSource> Drop for Sampler<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Running sampler that is stopped when the guard goes out of scope
pub struct SamplingGuard<'a, T: TimerSource = ItimerSource> {
    sampler: &'a mut Sampler<T>,
}

impl<T: TimerSource> SamplingGuard<'_, T> {
    /// Produce the report, then stop
    pub fn finish(self, destination: Option<&Path>) -> Result<String> {
        self.sampler.report(destination)
    }
}

impl<T: TimerSource> Deref for SamplingGuard<'_, T> {
    type Target = Sampler<T>;

    fn deref(&self) -> &Self::Target {
        self.sampler
    }
}

impl<T: TimerSource> DerefMut for SamplingGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.sampler
    }
}

impl<T: TimerSource> Drop for SamplingGuard<'_, T> {
    fn drop(&mut self) {
        self.sampler.stop();
    }
}
