//! Parallel frame export.
//!
//! Frames are independent, so a multi-frame dataset can be spread across
//! rayon worker threads. Every frame writes its own `NNN.jp2`, so workers
//! share nothing but the codec, the options and the progress tracker.
//!
//! The public switch is
//! [`ExportOptions::with_parallel`](crate::ExportOptions::with_parallel);
//! this module contains only the internal implementation.

use std::{
    borrow::Cow,
    sync::{Mutex, PoisonError},
};

use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::{
    codec::ImageCodec,
    error::CzmError,
    layout::OutputLayout,
    pipeline::{Exporter, FrameOutcome, Stage},
    progress::ProgressTracker,
};

/// Export frames on rayon threads and return the outcomes in frame order.
///
/// Cancellation is checked before each frame; frames that had not started
/// come back as [`CzmError::Cancelled`].
pub(crate) fn export_frames_parallel<C: ImageCodec>(
    exporter: &Exporter<C>,
    frames: Vec<(usize, Cow<'_, [u8]>)>,
    layout: &OutputLayout,
    stage: Stage,
    tracker: ProgressTracker,
) -> Vec<(usize, Result<FrameOutcome, CzmError>)> {
    let options = exporter.options();
    let tracker = Mutex::new(tracker);

    let mut outcomes: Vec<(usize, Result<FrameOutcome, CzmError>)> = frames
        .into_par_iter()
        .map(|(index, bytes)| {
            if options.is_cancelled() {
                return (index, Err(CzmError::Cancelled));
            }
            let target = layout.indexed(index, options.output_format());
            let outcome = exporter.process_frame(&bytes, &target, stage);
            tracker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .advance(Some(index));
            (index, outcome)
        })
        .collect();

    tracker
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
        .finish();

    outcomes.sort_by_key(|(index, _)| *index);
    outcomes
}
