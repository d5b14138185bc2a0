//! Publish orchestration: the worker body for one publish job.

use serde::Serialize;
use std::sync::Arc;

use crate::api::CardService;
use crate::card::{build_document, check_capacity};
use crate::error::PublishError;
use crate::jobs::{JobHandle, JobId, JobRegistry};
use crate::pipeline::{BatchBudgets, BatchFile, BatchPhase, run_batch};

/// One accepted publish request: a titled, ordered set of local audio files,
/// optionally targeting an existing card.
#[derive(Debug)]
pub struct PublishRequest {
    pub title: String,
    pub files: Vec<BatchFile>,
    /// Opaque icon reference for a new card; ignored when appending to an
    /// existing card, whose own icon is kept.
    pub icon: Option<String>,
    /// Append to this card instead of creating a new one.
    pub existing_card: Option<String>,
}

/// Terminal result of a publish job: what succeeded and what failed, never a
/// bare boolean.
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub card_id: String,
    pub title: String,
    /// Number of tracks added by this job
    pub track_count: usize,
    pub errors: Vec<String>,
}

/// Run one publish job to completion. Per-file failures accumulate and never
/// abort the batch; only a missing credential, a capacity violation, or a
/// failed card submission ends the job as an error. A cancelled job still
/// submits whatever tracks finished before the cancellation point.
pub fn run_publish(
    service: &dyn CardService,
    budgets: &BatchBudgets,
    request: PublishRequest,
    handle: &JobHandle,
) -> Result<PublishOutcome, PublishError> {
    if !service.ensure_authenticated() {
        return Err(PublishError::Auth);
    }

    // Load the append target up front so capacity is checked before any
    // upload or submission happens.
    let existing = match &request.existing_card {
        Some(card_id) => {
            let card = service.fetch_card(card_id)?;
            check_capacity(card.tracks.len(), request.files.len())?;
            Some(card)
        }
        None => None,
    };

    let cancel = || handle.is_cancelled();
    let mut on_progress = |phase: BatchPhase, done: usize, total: usize, label: Option<&str>| {
        let label = match phase {
            BatchPhase::Uploading => label.unwrap_or(""),
            BatchPhase::Transcoding => "waiting for transcoding",
        };
        handle.set_progress(done, total, label);
    };

    let (tracks, errors) = run_batch(service, &request.files, budgets, &cancel, &mut on_progress);
    for error in &errors {
        handle.push_error(error.clone());
    }

    if tracks.is_empty() {
        return Err(PublishError::Publish(
            "no tracks were successfully prepared".to_string(),
        ));
    }

    let document = match &existing {
        Some(card) => {
            let mut merged = card.tracks.clone();
            merged.extend(tracks.iter().cloned());
            // Appended tracks should visually match the card they join, so
            // the existing icon wins over a freshly supplied one.
            let icon = card.icon.as_deref().or(request.icon.as_deref());
            let card_id = card.id.as_deref().or(request.existing_card.as_deref());
            build_document(card_id, &request.title, &merged, icon)
        }
        None => build_document(None, &request.title, &tracks, request.icon.as_deref()),
    };

    let card_id = service
        .submit_card(&document)
        .map_err(|err| PublishError::Publish(format!("{err:#}")))?;

    tracing::info!(
        card_id = %card_id,
        tracks = tracks.len(),
        errors = errors.len(),
        "card published"
    );

    Ok(PublishOutcome {
        card_id,
        title: request.title,
        track_count: tracks.len(),
        errors,
    })
}

/// Start a publish job on the registry. Returns the job id immediately; the
/// caller polls the registry for progress and the terminal result.
pub fn submit_publish(
    registry: &Arc<JobRegistry>,
    service: Arc<dyn CardService>,
    budgets: BatchBudgets,
    request: PublishRequest,
) -> JobId {
    let total = request.files.len();
    registry.submit(total, move |handle| {
        run_publish(service.as_ref(), &budgets, request, handle)
    })
}
