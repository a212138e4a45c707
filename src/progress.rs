//! Progress reporting and cancellation support.
//!
//! This module provides [`ProgressCallback`] for monitoring an export,
//! [`CancellationToken`] for cooperative cancellation, and [`ProgressInfo`]
//! snapshots. Cancellation is only observed between frames; a frame that has
//! started is always finished.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use czm_export::{ErrorPolicy, ExportOptions, ProgressCallback, ProgressInfo};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         if let Some(pct) = info.percentage {
//!             println!("{pct:.1}% of frames exported");
//!         }
//!     }
//! }
//!
//! let options = ExportOptions::new(ErrorPolicy::Continue)
//!     .with_progress(Arc::new(PrintProgress));
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

/// A snapshot of export progress.
///
/// Delivered to [`ProgressCallback::on_progress`] at a cadence controlled
/// by [`ExportOptions::with_batch_size`](crate::ExportOptions::with_batch_size).
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// How many frames have been processed so far (successfully or not).
    pub current: u64,
    /// Total frames in the dataset.
    pub total: Option<u64>,
    /// Completion percentage (0.0 – 100.0), if `total` is known.
    pub percentage: Option<f32>,
    /// Wall-clock time elapsed since the export started.
    pub elapsed: Duration,
    /// Estimated time remaining, based on current throughput.
    pub estimated_remaining: Option<Duration>,
    /// Index of the frame that was just processed.
    pub current_frame: Option<usize>,
}

/// Trait for receiving progress updates during an export.
///
/// Implementations must be [`Send`] and [`Sync`] because callbacks may be
/// invoked from rayon worker threads.
pub trait ProgressCallback: Send + Sync {
    /// Called after frames complete.
    fn on_progress(&self, info: &ProgressInfo);
}

/// Discards all progress notifications.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clone this token and share it between threads; call
/// [`cancel`](CancellationToken::cancel) from any thread to stop the export
/// before its next frame.
///
/// # Example
///
/// ```
/// use czm_export::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation.
    ///
    /// All clones of this token will observe the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks timing and emits callbacks every `batch_size` frames.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    total: Option<u64>,
    current: u64,
    batch_size: u64,
    start_time: Instant,
    since_last_report: u64,
}

impl ProgressTracker {
    pub(crate) fn new(callback: Arc<dyn ProgressCallback>, total: Option<u64>, batch_size: u64) -> Self {
        Self {
            callback,
            total,
            current: 0,
            batch_size: batch_size.max(1),
            start_time: Instant::now(),
            since_last_report: 0,
        }
    }

    /// Record one processed frame.
    pub(crate) fn advance(&mut self, frame_index: Option<usize>) {
        self.current += 1;
        self.since_last_report += 1;

        if self.since_last_report >= self.batch_size {
            self.report(frame_index);
            self.since_last_report = 0;
        }
    }

    /// Emit a final report if the last batch was not reported yet.
    pub(crate) fn finish(&mut self) {
        if self.since_last_report > 0 {
            self.report(None);
            self.since_last_report = 0;
        }
    }

    fn report(&self, frame_index: Option<usize>) {
        let elapsed = self.start_time.elapsed();

        let percentage = self
            .total
            .filter(|&total| total > 0)
            .map(|total| (self.current as f32 / total as f32) * 100.0);

        let estimated_remaining = if self.current > 0 {
            self.total.map(|total| {
                let remaining = total.saturating_sub(self.current);
                elapsed.mul_f64(remaining as f64 / self.current as f64)
            })
        } else {
            None
        };

        self.callback.on_progress(&ProgressInfo {
            current: self.current,
            total: self.total,
            percentage,
            elapsed,
            estimated_remaining,
            current_frame: frame_index,
        });
    }
}
