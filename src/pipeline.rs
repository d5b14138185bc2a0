//! Two-phase batch publish: upload everything, then poll all transcodes
//! together.
//!
//! The service transcodes uploads concurrently on its side, so waiting for
//! each file in turn would serialize work that is actually parallel. Phase 1
//! issues every upload in input order; phase 2 polls the whole pending set
//! each round until it drains, the batch budget runs out, or the job is
//! cancelled.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::api::CardService;
use crate::card::Track;
use crate::config::Limits;
use crate::transcode::sleep_cancellable;
use crate::upload::upload_file;

/// One input file with its display label (typically "Title - Artist").
#[derive(Debug, Clone)]
pub struct BatchFile {
    pub path: PathBuf,
    pub label: String,
}

/// Budgets for one batch run.
#[derive(Debug, Clone)]
pub struct BatchBudgets {
    pub poll_interval: Duration,
    pub batch_wait: Duration,
}

impl BatchBudgets {
    pub fn from_limits(limits: &Limits) -> Self {
        Self {
            poll_interval: limits.poll_interval(),
            batch_wait: limits.batch_wait(),
        }
    }
}

/// Which phase a progress report refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Uploading,
    Transcoding,
}

struct PendingUpload {
    index: usize,
    upload_id: String,
    label: String,
}

/// Upload and transcode a batch of files.
///
/// Returns the successfully transcoded tracks in input order plus the
/// accumulated per-file error strings. A single file's failure never aborts
/// the batch. Cancellation is observed before each upload, after each poll
/// round, and at sub-second granularity inside sleeps; whatever finished
/// before the cancellation point is returned, not discarded.
pub fn run_batch(
    service: &dyn CardService,
    files: &[BatchFile],
    budgets: &BatchBudgets,
    cancel: &dyn Fn() -> bool,
    on_progress: &mut dyn FnMut(BatchPhase, usize, usize, Option<&str>),
) -> (Vec<Track>, Vec<String>) {
    let mut errors = Vec::new();
    let mut pending: Vec<PendingUpload> = Vec::new();
    // Tracks land in their input slot no matter which transcode finishes
    // first; order is fixed before polling begins.
    let mut slots: Vec<Option<Track>> = vec![None; files.len()];

    // Phase 1: issue every upload
    for (index, file) in files.iter().enumerate() {
        if cancel() {
            tracing::info!("cancel requested, not starting further uploads");
            break;
        }
        on_progress(
            BatchPhase::Uploading,
            index + 1,
            files.len(),
            Some(&file.label),
        );
        match upload_file(service, &file.path) {
            Ok(upload_id) => pending.push(PendingUpload {
                index,
                upload_id,
                label: file.label.clone(),
            }),
            Err(err) => errors.push(format!("{}: {err}", file.label)),
        }
    }

    if pending.is_empty() {
        return (Vec::new(), errors);
    }

    // Phase 2: poll every pending upload each round
    let total = pending.len();
    on_progress(BatchPhase::Transcoding, 0, total, None);
    let start = Instant::now();

    loop {
        let mut still_pending = Vec::with_capacity(pending.len());
        for upload in pending {
            match service.transcode_status(&upload.upload_id) {
                Ok(Some(result)) => {
                    tracing::debug!(label = %upload.label, "transcode complete");
                    slots[upload.index] = Some(Track::from_transcode(upload.label, result));
                }
                Ok(None) => still_pending.push(upload),
                Err(err) => {
                    errors.push(format!("{}: transcode check failed: {err:#}", upload.label));
                }
            }
        }
        pending = still_pending;

        on_progress(
            BatchPhase::Transcoding,
            total - pending.len(),
            total,
            None,
        );

        if pending.is_empty() {
            break;
        }
        if cancel() {
            tracing::info!(
                done = total - pending.len(),
                total,
                "cancel requested, returning completed tracks"
            );
            return (collect_tracks(slots), errors);
        }
        if start.elapsed() >= budgets.batch_wait {
            for upload in &pending {
                errors.push(format!(
                    "{}: transcoding timed out after {}s",
                    upload.label,
                    budgets.batch_wait.as_secs()
                ));
            }
            break;
        }
        if sleep_cancellable(budgets.poll_interval, cancel) {
            return (collect_tracks(slots), errors);
        }
    }

    (collect_tracks(slots), errors)
}

fn collect_tracks(slots: Vec<Option<Track>>) -> Vec<Track> {
    slots.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedService;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn fast_budgets() -> BatchBudgets {
        BatchBudgets {
            poll_interval: Duration::from_millis(5),
            batch_wait: Duration::from_secs(10),
        }
    }

    fn write_files(tmp: &TempDir, count: usize) -> Vec<BatchFile> {
        (0..count)
            .map(|i| {
                let path = tmp.path().join(format!("track-{i}.mp3"));
                fs::write(&path, format!("audio bytes {i}")).unwrap();
                BatchFile {
                    path,
                    label: format!("Song {i} - Artist"),
                }
            })
            .collect()
    }

    fn no_progress() -> impl FnMut(BatchPhase, usize, usize, Option<&str>) {
        |_, _, _, _| {}
    }

    #[test]
    fn all_files_become_tracks_in_order() {
        let tmp = TempDir::new().unwrap();
        let files = write_files(&tmp, 3);
        let service = ScriptedService::new();

        let (tracks, errors) =
            run_batch(&service, &files, &fast_budgets(), &|| false, &mut no_progress());

        assert!(errors.is_empty());
        let titles: Vec<&str> = tracks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(
            titles,
            ["Song 0 - Artist", "Song 1 - Artist", "Song 2 - Artist"]
        );
    }

    #[test]
    fn track_order_is_input_order_not_completion_order() {
        let tmp = TempDir::new().unwrap();
        let files = write_files(&tmp, 3);
        let mut service = ScriptedService::new();
        // First file finishes last, last file finishes first
        service.script.ready_after_polls.insert(0, 5);
        service.script.ready_after_polls.insert(1, 3);
        service.script.ready_after_polls.insert(2, 1);

        let (tracks, errors) =
            run_batch(&service, &files, &fast_budgets(), &|| false, &mut no_progress());

        assert!(errors.is_empty());
        let titles: Vec<&str> = tracks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(
            titles,
            ["Song 0 - Artist", "Song 1 - Artist", "Song 2 - Artist"]
        );
    }

    #[test]
    fn transfer_failure_skips_file_and_continues() {
        let tmp = TempDir::new().unwrap();
        let files = write_files(&tmp, 3);
        let mut service = ScriptedService::new();
        service.script.failing_transfers.insert(1);

        let (tracks, errors) =
            run_batch(&service, &files, &fast_budgets(), &|| false, &mut no_progress());

        assert_eq!(tracks.len(), 2);
        let titles: Vec<&str> = tracks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["Song 0 - Artist", "Song 2 - Artist"]);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Song 1 - Artist"));
        assert!(errors[0].contains("upload failed"));
    }

    #[test]
    fn cancel_after_some_completions_keeps_finished_tracks() {
        let tmp = TempDir::new().unwrap();
        let files = write_files(&tmp, 3);
        let mut service = ScriptedService::new();
        service.script.ready_after_polls.insert(0, 1);
        service.script.ready_after_polls.insert(1, 1);
        service.script.never_ready.insert(2);

        // Flip the flag once two tracks have transcoded
        let cancelled = AtomicBool::new(false);
        let (tracks, errors) = {
            let cancel = || cancelled.load(Ordering::SeqCst);
            let mut progress = |phase, done, _total, _label: Option<&str>| {
                if phase == BatchPhase::Transcoding && done == 2 {
                    cancelled.store(true, Ordering::SeqCst);
                }
            };
            run_batch(&service, &files, &fast_budgets(), &cancel, &mut progress)
        };

        assert_eq!(tracks.len(), 2);
        let titles: Vec<&str> = tracks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["Song 0 - Artist", "Song 1 - Artist"]);
        // The third file is simply not attempted further: no phantom outcomes
        assert!(errors.is_empty());
    }

    #[test]
    fn cancel_before_later_uploads_still_finishes_uploaded_files() {
        let tmp = TempDir::new().unwrap();
        let files = write_files(&tmp, 3);
        let service = ScriptedService::new();

        // Cancel as soon as the first upload has been issued
        let cancel = || service.upload_request_count() >= 1;
        let (tracks, errors) =
            run_batch(&service, &files, &fast_budgets(), &cancel, &mut no_progress());

        // Files 2 and 3 were never uploaded; file 1 still transcoded
        assert_eq!(service.upload_request_count(), 1);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "Song 0 - Artist");
        assert!(errors.is_empty());
    }

    #[test]
    fn batch_deadline_records_timeouts_for_stragglers() {
        let tmp = TempDir::new().unwrap();
        let files = write_files(&tmp, 2);
        let mut service = ScriptedService::new();
        service.script.ready_after_polls.insert(0, 1);
        service.script.never_ready.insert(1);

        let budgets = BatchBudgets {
            poll_interval: Duration::from_millis(5),
            batch_wait: Duration::ZERO,
        };
        let (tracks, errors) =
            run_batch(&service, &files, &budgets, &|| false, &mut no_progress());

        assert_eq!(tracks.len(), 1);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Song 1 - Artist"));
        assert!(errors[0].contains("timed out"));
    }

    #[test]
    fn poll_errors_drop_the_file_but_not_the_batch() {
        let tmp = TempDir::new().unwrap();
        let files = write_files(&tmp, 2);
        let mut service = ScriptedService::new();
        service.script.failing_status.insert(0);

        let (tracks, errors) =
            run_batch(&service, &files, &fast_budgets(), &|| false, &mut no_progress());

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "Song 1 - Artist");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("transcode check failed"));
    }

    #[test]
    fn nothing_uploaded_returns_errors_without_polling() {
        let tmp = TempDir::new().unwrap();
        let files = write_files(&tmp, 2);
        let mut service = ScriptedService::new();
        service.script.failing_transfers.insert(0);
        service.script.failing_transfers.insert(1);

        let (tracks, errors) =
            run_batch(&service, &files, &fast_budgets(), &|| false, &mut no_progress());

        assert!(tracks.is_empty());
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn progress_reports_both_phases() {
        let tmp = TempDir::new().unwrap();
        let files = write_files(&tmp, 2);
        let service = ScriptedService::new();

        let mut seen: Vec<(BatchPhase, usize, usize)> = Vec::new();
        run_batch(&service, &files, &fast_budgets(), &|| false, &mut |phase,
                                                                     done,
                                                                     total,
                                                                     _| {
            seen.push((phase, done, total));
        });

        assert_eq!(seen[0], (BatchPhase::Uploading, 1, 2));
        assert_eq!(seen[1], (BatchPhase::Uploading, 2, 2));
        assert_eq!(seen[2], (BatchPhase::Transcoding, 0, 2));
        assert_eq!(*seen.last().unwrap(), (BatchPhase::Transcoding, 2, 2));
    }
}
