//! Scripted in-memory card service for unit tests.

use anyhow::{Result, anyhow, bail};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::api::{CardService, TranscodeResult, UploadTarget};
use crate::card::{Card, CardDocument, CardSummary};

/// Per-test behavior knobs, keyed by upload order (0-based).
#[derive(Debug, Default)]
pub struct ServiceScript {
    pub unauthenticated: bool,
    /// Uploads whose fingerprint the service pretends to already hold
    pub dedup_uploads: HashSet<usize>,
    /// Uploads whose byte transfer fails
    pub failing_transfers: HashSet<usize>,
    /// Uploads whose status poll errors
    pub failing_status: HashSet<usize>,
    /// Uploads that never leave the pending state
    pub never_ready: HashSet<usize>,
    /// Polls needed before an upload reports ready (default 1)
    pub ready_after_polls: HashMap<usize, u32>,
    /// Card returned by fetch_card
    pub existing_card: Option<Card>,
    pub submit_fails: bool,
}

#[derive(Debug, Default)]
struct ScriptState {
    fingerprints: Vec<String>,
    seen_fingerprints: HashSet<String>,
    upload_requests: usize,
    transfers: Vec<String>,
    polls: HashMap<String, u32>,
    submitted: Vec<CardDocument>,
    fetches: usize,
}

pub struct ScriptedService {
    pub script: ServiceScript,
    state: Mutex<ScriptState>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self {
            script: ServiceScript::default(),
            state: Mutex::new(ScriptState::default()),
        }
    }

    /// Register an upload without going through `request_upload`, for tests
    /// that exercise polling directly. Returns the upload id.
    pub fn seed_upload(&self, fingerprint: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let index = state.fingerprints.len();
        state.fingerprints.push(fingerprint.to_string());
        format!("up-{index}")
    }

    pub fn upload_request_count(&self) -> usize {
        self.state.lock().unwrap().upload_requests
    }

    pub fn transfer_count(&self) -> usize {
        self.state.lock().unwrap().transfers.len()
    }

    pub fn transferred_filenames(&self) -> Vec<String> {
        self.state.lock().unwrap().transfers.clone()
    }

    pub fn poll_count(&self, upload_id: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .polls
            .get(upload_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn submit_count(&self) -> usize {
        self.state.lock().unwrap().submitted.len()
    }

    pub fn submitted_documents(&self) -> Vec<CardDocument> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.state.lock().unwrap().fetches
    }

    fn index_of(upload_id: &str) -> Result<usize> {
        upload_id
            .strip_prefix("up-")
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| anyhow!("unknown upload id: {upload_id}"))
    }
}

impl CardService for ScriptedService {
    fn ensure_authenticated(&self) -> bool {
        !self.script.unauthenticated
    }

    fn request_upload(&self, sha256: &str) -> Result<UploadTarget> {
        let mut state = self.state.lock().unwrap();
        state.upload_requests += 1;
        let index = state.fingerprints.len();
        state.fingerprints.push(sha256.to_string());

        // Content-addressed: a fingerprint the service has seen (or is
        // scripted to claim) needs no transfer.
        let already_held = !state.seen_fingerprints.insert(sha256.to_string())
            || self.script.dedup_uploads.contains(&index);
        let upload_url = (!already_held).then(|| format!("https://transfer.example/{index}"));
        Ok(UploadTarget {
            upload_id: format!("up-{index}"),
            upload_url,
        })
    }

    fn transfer(
        &self,
        upload_url: &str,
        _body: &[u8],
        _content_type: &str,
        filename: &str,
    ) -> Result<()> {
        let index: usize = upload_url
            .rsplit('/')
            .next()
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| anyhow!("unexpected transfer url: {upload_url}"))?;
        if self.script.failing_transfers.contains(&index) {
            bail!("simulated transfer failure");
        }
        self.state
            .lock()
            .unwrap()
            .transfers
            .push(filename.to_string());
        Ok(())
    }

    fn transcode_status(&self, upload_id: &str) -> Result<Option<TranscodeResult>> {
        let index = Self::index_of(upload_id)?;
        if self.script.failing_status.contains(&index) {
            bail!("simulated status failure");
        }
        let mut state = self.state.lock().unwrap();
        let polls = state.polls.entry(upload_id.to_string()).or_insert(0);
        *polls += 1;
        let polls = *polls;

        if self.script.never_ready.contains(&index) {
            return Ok(None);
        }
        let needed = self
            .script
            .ready_after_polls
            .get(&index)
            .copied()
            .unwrap_or(1);
        if polls < needed {
            return Ok(None);
        }

        let fingerprint = state
            .fingerprints
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("unknown upload id: {upload_id}"))?;
        Ok(Some(TranscodeResult {
            // Derived from content, so identical bytes always resolve to
            // the same reference.
            transcoded_sha256: format!("t-{fingerprint}"),
            duration: 10 * (index as u32 + 1),
            file_size: 1000 * (index as u64 + 1),
            channels: "stereo".to_string(),
            format: "aac".to_string(),
        }))
    }

    fn submit_card(&self, document: &CardDocument) -> Result<String> {
        if self.script.submit_fails {
            bail!("simulated submission failure");
        }
        let mut state = self.state.lock().unwrap();
        state.submitted.push(document.clone());
        Ok(document
            .card_id
            .clone()
            .unwrap_or_else(|| "card-new".to_string()))
    }

    fn fetch_card(&self, card_id: &str) -> Result<Card> {
        self.state.lock().unwrap().fetches += 1;
        self.script
            .existing_card
            .clone()
            .ok_or_else(|| anyhow!("card not found: {card_id}"))
    }

    fn list_cards(&self) -> Result<Vec<CardSummary>> {
        Ok(self
            .script
            .existing_card
            .iter()
            .map(|card| CardSummary {
                id: card.id.clone().unwrap_or_default(),
                title: card.title.clone(),
            })
            .collect())
    }
}
