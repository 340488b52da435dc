//! Per-batch progress accounting.
//!
//! [`SchedulerState`] is the plain bookkeeping for one scheduler run; it is
//! created when a batch starts and dropped when it returns. [`BatchProgress`]
//! wraps it in a mutex for the worker tasks and forwards reports to the log
//! and, when visible, to an `indicatif` bar.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use super::constants::PROGRESS_REPORT_INTERVAL;
use super::transport::TransferEvent;

/// Mutable state of one scheduler run.
#[derive(Debug, Clone)]
pub struct SchedulerState {
    nesting_level: usize,
    peak_nesting: usize,
    max_nesting_reached: bool,
    bytes_max_total: u64,
    bytes_transferred_total: u64,
    known_file_size_count: usize,
    completed_count: usize,
    total_count: usize,
    last_reported_percent: u8,
    last_report_at: Instant,
}

impl SchedulerState {
    /// Fresh state for a batch of `total_count` requests.
    #[must_use]
    pub fn new(total_count: usize, now: Instant) -> Self {
        Self {
            nesting_level: 0,
            peak_nesting: 0,
            max_nesting_reached: false,
            bytes_max_total: 0,
            bytes_transferred_total: 0,
            known_file_size_count: 0,
            completed_count: 0,
            total_count,
            last_reported_percent: 0,
            last_report_at: now,
        }
    }

    /// Raises the request total; requests appended mid-batch only ever grow it.
    pub fn grow_total(&mut self, total_count: usize) {
        self.total_count = self.total_count.max(total_count);
    }

    /// Records a handler starting and returns the new nesting level.
    pub fn enter(&mut self) -> usize {
        self.nesting_level += 1;
        self.peak_nesting = self.peak_nesting.max(self.nesting_level);
        self.nesting_level
    }

    /// Records a handler finishing.
    pub fn leave(&mut self) {
        self.nesting_level = self.nesting_level.saturating_sub(1);
    }

    /// Notes that a request had to wait because the cap was reached.
    pub fn mark_max_nesting_reached(&mut self) {
        self.max_nesting_reached = true;
    }

    /// Applies a transfer event; returns a percentage when one should be reported.
    pub fn record_event(&mut self, event: TransferEvent, now: Instant) -> Option<u8> {
        match event {
            TransferEvent::FileSize(size) => {
                self.known_file_size_count += 1;
                self.bytes_max_total = self.bytes_max_total.saturating_add(size);
                None
            }
            TransferEvent::Progress { delta, .. } => {
                self.bytes_transferred_total = self.bytes_transferred_total.saturating_add(delta);
                self.next_report(now)
            }
        }
    }

    /// Records a finished request; returns a percentage when one should be reported.
    pub fn record_completion(&mut self, now: Instant) -> Option<u8> {
        self.completed_count += 1;
        self.next_report(now)
    }

    /// Current percentage, never below the last reported one and never above 100.
    ///
    /// `max(known sizes, completed) / total * 100 * transferred / bytes_max`,
    /// floored.
    #[must_use]
    pub fn percent(&self) -> u8 {
        if self.total_count == 0 || self.bytes_max_total == 0 {
            return self.last_reported_percent;
        }
        let files = self
            .known_file_size_count
            .max(self.completed_count)
            .min(self.total_count) as u128;
        let numerator = files * 100 * u128::from(self.bytes_transferred_total);
        let denominator = self.total_count as u128 * u128::from(self.bytes_max_total);
        let raw = u8::try_from((numerator / denominator).min(100)).unwrap_or(100);
        raw.max(self.last_reported_percent)
    }

    fn next_report(&mut self, now: Instant) -> Option<u8> {
        let percent = self.percent();
        let grew = percent > self.last_reported_percent;
        let stale = now.duration_since(self.last_report_at) >= PROGRESS_REPORT_INTERVAL;
        if !grew && !stale {
            return None;
        }
        self.last_reported_percent = percent;
        self.last_report_at = now;
        Some(percent)
    }

    /// Handlers currently running.
    #[must_use]
    pub fn nesting_level(&self) -> usize {
        self.nesting_level
    }

    /// Highest nesting level seen in this run.
    #[must_use]
    pub fn peak_nesting(&self) -> usize {
        self.peak_nesting
    }

    /// Whether any request had to wait for a free slot.
    #[must_use]
    pub fn max_nesting_reached(&self) -> bool {
        self.max_nesting_reached
    }

    /// Sum of announced transfer sizes.
    #[must_use]
    pub fn bytes_max_total(&self) -> u64 {
        self.bytes_max_total
    }

    /// Bytes received across all transfers.
    #[must_use]
    pub fn bytes_transferred_total(&self) -> u64 {
        self.bytes_transferred_total
    }

    /// Transfers whose size was announced.
    #[must_use]
    pub fn known_file_size_count(&self) -> usize {
        self.known_file_size_count
    }

    /// Requests finished (successfully or not).
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.completed_count
    }

    /// Requests seen by this run so far.
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.total_count
    }

    /// Last percentage handed out for reporting.
    #[must_use]
    pub fn last_reported_percent(&self) -> u8 {
        self.last_reported_percent
    }
}

/// Shared progress accumulator for the worker tasks of one batch.
pub(crate) struct BatchProgress {
    state: Mutex<SchedulerState>,
    bar: Option<ProgressBar>,
}

impl std::fmt::Debug for BatchProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProgress")
            .field("state", &self.state)
            .field("visible", &self.bar.is_some())
            .finish()
    }
}

impl BatchProgress {
    pub(crate) fn new(total_count: usize, visible: bool) -> Self {
        let bar = visible.then(|| {
            let bar = ProgressBar::new(100);
            bar.set_style(
                ProgressStyle::with_template("{bar:40} {pos:>3}%")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        });
        Self {
            state: Mutex::new(SchedulerState::new(total_count, Instant::now())),
            bar,
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut SchedulerState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub(crate) fn observe(&self, event: TransferEvent) {
        if let Some(percent) = self.update(|state| state.record_event(event, Instant::now())) {
            self.report(percent);
        }
    }

    pub(crate) fn item_finished(&self) {
        if let Some(percent) = self.update(|state| state.record_completion(Instant::now())) {
            self.report(percent);
        }
    }

    pub(crate) fn grow_total(&self, total_count: usize) {
        self.update(|state| state.grow_total(total_count));
    }

    pub(crate) fn mark_max_nesting_reached(&self) {
        self.update(SchedulerState::mark_max_nesting_reached);
    }

    /// Enters one nesting level until the returned guard is dropped.
    pub(crate) fn enter(self: &Arc<Self>) -> NestingGuard {
        let level = self.update(SchedulerState::enter);
        debug!(nesting_level = level, "handler started");
        NestingGuard {
            progress: Arc::clone(self),
        }
    }

    pub(crate) fn snapshot(&self) -> SchedulerState {
        self.update(|state| state.clone())
    }

    pub(crate) fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.set_position(100);
            bar.finish_and_clear();
        }
    }

    fn report(&self, percent: u8) {
        debug!(percent, "({percent}%)");
        if let Some(bar) = &self.bar {
            bar.set_position(u64::from(percent));
        }
    }
}

/// Leaves the nesting level on drop, including when the handler panics.
#[derive(Debug)]
pub(crate) struct NestingGuard {
    progress: Arc<BatchProgress>,
}

impl Drop for NestingGuard {
    fn drop(&mut self) {
        self.progress.update(SchedulerState::leave);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn progress(delta: u64) -> TransferEvent {
        TransferEvent::Progress {
            delta,
            transferred: delta,
        }
    }

    #[test]
    fn test_percent_uses_known_or_completed_fraction() {
        let now = Instant::now();
        let mut state = SchedulerState::new(4, now);
        state.record_event(TransferEvent::FileSize(100), now);
        state.record_event(TransferEvent::FileSize(100), now);
        // 2 of 4 files sized, 100 of 200 bytes received
        assert_eq!(state.record_event(progress(100), now), Some(25));
        assert_eq!(state.known_file_size_count(), 2);
        assert_eq!(state.bytes_max_total(), 200);
    }

    #[test]
    fn test_percent_without_sizes_stays_put() {
        let now = Instant::now();
        let mut state = SchedulerState::new(3, now);
        assert_eq!(state.record_event(progress(512), now), None);
        assert_eq!(state.percent(), 0);
    }

    #[test]
    fn test_percent_is_clamped_and_monotonic() {
        let now = Instant::now();
        let mut state = SchedulerState::new(2, now);
        state.record_event(TransferEvent::FileSize(10), now);
        state.record_event(TransferEvent::FileSize(10), now);
        assert_eq!(state.record_event(progress(20), now), Some(100));
        // unsized transfer pushes bytes past the announced total
        assert_eq!(state.record_event(progress(500), now), None);
        assert_eq!(state.percent(), 100);

        // a later-announced size shrinks the raw ratio, the reported value does not drop
        state.record_event(TransferEvent::FileSize(10_000), now);
        assert_eq!(state.percent(), 100);
    }

    #[test]
    fn test_small_steps_are_throttled_until_interval_passes() {
        let start = Instant::now();
        let mut state = SchedulerState::new(1, start);
        state.record_event(TransferEvent::FileSize(1000), start);
        assert_eq!(state.record_event(progress(5), start), None);
        assert_eq!(state.record_event(progress(5), start), Some(1));
        assert_eq!(state.record_event(progress(1), start), None);

        let later = start + Duration::from_millis(1100);
        assert_eq!(state.record_event(progress(1), later), Some(1));
    }

    #[test]
    fn test_completion_counts_toward_fraction() {
        let now = Instant::now();
        let mut state = SchedulerState::new(2, now);
        state.record_event(TransferEvent::FileSize(100), now);
        state.record_event(progress(100), now);
        assert_eq!(state.percent(), 50);
        state.record_completion(now);
        state.record_completion(now);
        assert_eq!(state.completed_count(), 2);
        assert_eq!(state.percent(), 100);
    }

    #[test]
    fn test_nesting_tracks_peak() {
        let mut state = SchedulerState::new(0, Instant::now());
        assert_eq!(state.enter(), 1);
        assert_eq!(state.enter(), 2);
        state.leave();
        assert_eq!(state.enter(), 2);
        state.leave();
        state.leave();
        state.leave();
        assert_eq!(state.nesting_level(), 0);
        assert_eq!(state.peak_nesting(), 2);
    }

    #[test]
    fn test_grow_total_never_shrinks() {
        let mut state = SchedulerState::new(5, Instant::now());
        state.grow_total(3);
        assert_eq!(state.total_count(), 5);
        state.grow_total(8);
        assert_eq!(state.total_count(), 8);
    }

    #[test]
    fn test_nesting_guard_unwinds_on_panic() {
        let progress = Arc::new(BatchProgress::new(1, false));
        let cloned = Arc::clone(&progress);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = cloned.enter();
            panic!("handler blew up");
        }));
        assert!(outcome.is_err());
        let state = progress.snapshot();
        assert_eq!(state.nesting_level(), 0);
        assert_eq!(state.peak_nesting(), 1);
    }
}
