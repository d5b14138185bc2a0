//! Card service boundary: the `CardService` trait and its HTTP implementation.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::sync::Mutex;
use std::time::Duration;

use crate::auth::{Authenticator, HttpTokenExchange};
use crate::card::{Card, CardDocument, CardSummary, card_from_document};
use crate::config::Config;

/// Destination for one file's bytes. A missing `upload_url` means the service
/// already holds content with that fingerprint and no transfer is needed.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadTarget {
    #[serde(rename = "uploadId")]
    pub upload_id: String,
    #[serde(rename = "uploadUrl", default)]
    pub upload_url: Option<String>,
}

/// Metadata of a finished server-side transcode. `transcoded_sha256` is the
/// content-addressed reference embedded in card documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeResult {
    pub transcoded_sha256: String,
    pub duration: u32,
    pub file_size: u64,
    pub channels: String,
    pub format: String,
}

/// Everything the publish orchestrator needs from the remote service.
/// Implemented over HTTP in production and by in-memory doubles in tests.
pub trait CardService: Send + Sync {
    /// True once a usable bearer credential is held (refreshing if needed).
    fn ensure_authenticated(&self) -> bool;

    /// Ask for an upload target for a content fingerprint.
    fn request_upload(&self, sha256: &str) -> Result<UploadTarget>;

    /// Stream file bytes to a transfer URL.
    fn transfer(&self, upload_url: &str, body: &[u8], content_type: &str, filename: &str)
    -> Result<()>;

    /// One transcode status poll; `None` while still pending.
    fn transcode_status(&self, upload_id: &str) -> Result<Option<TranscodeResult>>;

    /// Create or update a card; the document carries the id for updates.
    /// Returns the card id.
    fn submit_card(&self, document: &CardDocument) -> Result<String>;

    /// Fetch an existing card with its tracks and icon reference.
    fn fetch_card(&self, card_id: &str) -> Result<Card>;

    /// List the user's cards.
    fn list_cards(&self) -> Result<Vec<CardSummary>>;
}

// ---- Wire envelopes -----------------------------------------------------

#[derive(Debug, Deserialize)]
struct UploadEnvelope {
    upload: UploadTarget,
}

#[derive(Debug, Default, Deserialize)]
struct TranscodeEnvelope {
    #[serde(default)]
    transcode: TranscodeBody,
}

#[derive(Debug, Default, Deserialize)]
struct TranscodeBody {
    #[serde(rename = "transcodedSha256", default)]
    transcoded_sha256: Option<String>,
    #[serde(rename = "transcodedInfo", default)]
    transcoded_info: TranscodeInfo,
}

#[derive(Debug, Default, Deserialize)]
struct TranscodeInfo {
    #[serde(default)]
    duration: u32,
    #[serde(rename = "fileSize", default)]
    file_size: u64,
    #[serde(default)]
    channels: Option<String>,
    #[serde(default)]
    format: Option<String>,
}

impl TranscodeEnvelope {
    /// A transcode is complete once its content hash is populated.
    fn into_result(self) -> Option<TranscodeResult> {
        let hash = self.transcode.transcoded_sha256.filter(|h| !h.is_empty())?;
        let info = self.transcode.transcoded_info;
        Some(TranscodeResult {
            transcoded_sha256: hash,
            duration: info.duration,
            file_size: info.file_size,
            channels: info.channels.unwrap_or_else(|| "stereo".to_string()),
            format: info.format.unwrap_or_else(|| "aac".to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CardListEnvelope {
    #[serde(default)]
    cards: Vec<CardSummary>,
}

/// The submit/fetch endpoints wrap the card in a `card` key in most, but not
/// all, responses.
fn unwrap_card(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(mut map) => map
            .remove("card")
            .unwrap_or(serde_json::Value::Object(map)),
        other => other,
    }
}

fn extract_card_id(value: &serde_json::Value) -> Option<String> {
    for key in ["cardId", "_id"] {
        if let Some(id) = value.get(key).and_then(|v| v.as_str()) {
            return Some(id.to_string());
        }
    }
    None
}

fn api_error(what: &str, err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            anyhow!("{what}: status {code}: {body}")
        }
        other => anyhow::Error::new(other).context(what.to_string()),
    }
}

// ---- HTTP implementation ------------------------------------------------

/// ureq-backed [`CardService`]. Holds the authenticator so every call can
/// refresh the bearer token when it has expired.
pub struct HttpCardService {
    agent: ureq::Agent,
    api_url: String,
    transfer_timeout: Duration,
    auth: Mutex<Authenticator>,
}

impl HttpCardService {
    pub fn new(config: &Config) -> Result<Self> {
        let exchange = HttpTokenExchange::new(config)?;
        let auth = Authenticator::from_home(Box::new(exchange))?;
        Ok(Self::with_auth(config, auth))
    }

    pub fn with_auth(config: &Config, auth: Authenticator) -> Self {
        let agent = ureq::builder()
            .timeout(config.limits.http_timeout())
            .build();
        Self {
            agent,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            transfer_timeout: config.limits.transfer_timeout(),
            auth: Mutex::new(auth),
        }
    }

    fn bearer(&self) -> Result<String> {
        let mut auth = self.auth.lock().unwrap_or_else(|e| e.into_inner());
        if !auth.ensure_valid() {
            return Err(anyhow!("not authenticated with the card service"));
        }
        Ok(format!(
            "Bearer {}",
            auth.access_token().unwrap_or_default()
        ))
    }
}

impl CardService for HttpCardService {
    fn ensure_authenticated(&self) -> bool {
        self.auth
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .ensure_valid()
    }

    fn request_upload(&self, sha256: &str) -> Result<UploadTarget> {
        let bearer = self.bearer()?;
        let envelope: UploadEnvelope = self
            .agent
            .get(&format!("{}/media/transcode/audio/uploadUrl", self.api_url))
            .query("sha256", sha256)
            .set("Authorization", &bearer)
            .call()
            .map_err(|e| api_error("upload target request failed", e))?
            .into_json()
            .context("failed to parse upload target response")?;
        Ok(envelope.upload)
    }

    fn transfer(
        &self,
        upload_url: &str,
        body: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<()> {
        tracing::debug!(bytes = body.len(), filename, "transferring audio");
        // Signed destination URL; no bearer header here.
        self.agent
            .put(upload_url)
            .timeout(self.transfer_timeout)
            .set("Content-Type", content_type)
            .set(
                "Content-Disposition",
                &format!("attachment; filename=\"{filename}\""),
            )
            .send_bytes(body)
            .map_err(|e| api_error("audio transfer failed", e))?;
        Ok(())
    }

    fn transcode_status(&self, upload_id: &str) -> Result<Option<TranscodeResult>> {
        let bearer = self.bearer()?;
        let envelope: TranscodeEnvelope = self
            .agent
            .get(&format!(
                "{}/media/upload/{upload_id}/transcoded",
                self.api_url
            ))
            .query("loudnorm", "false")
            .set("Authorization", &bearer)
            .call()
            .map_err(|e| api_error("transcode status request failed", e))?
            .into_json()
            .context("failed to parse transcode status response")?;
        Ok(envelope.into_result())
    }

    fn submit_card(&self, document: &CardDocument) -> Result<String> {
        let bearer = self.bearer()?;
        let response: serde_json::Value = self
            .agent
            .post(&format!("{}/content", self.api_url))
            .set("Authorization", &bearer)
            .send_json(document)
            .map_err(|e| api_error("card submission failed", e))?
            .into_json()
            .context("failed to parse card submission response")?;
        let card = unwrap_card(response);
        extract_card_id(&card)
            .ok_or_else(|| anyhow!("card submission response did not include a card id"))
    }

    fn fetch_card(&self, card_id: &str) -> Result<Card> {
        let bearer = self.bearer()?;
        let response: serde_json::Value = self
            .agent
            .get(&format!("{}/content/{card_id}", self.api_url))
            .set("Authorization", &bearer)
            .call()
            .map_err(|e| api_error("card fetch failed", e))?
            .into_json()
            .context("failed to parse card fetch response")?;
        let document: CardDocument = serde_json::from_value(unwrap_card(response))
            .context("failed to parse card document")?;
        let mut card = card_from_document(document);
        if card.id.is_none() {
            card.id = Some(card_id.to_string());
        }
        Ok(card)
    }

    fn list_cards(&self) -> Result<Vec<CardSummary>> {
        let bearer = self.bearer()?;
        let envelope: CardListEnvelope = self
            .agent
            .get(&format!("{}/content", self.api_url))
            .query("type", "myo")
            .set("Authorization", &bearer)
            .call()
            .map_err(|e| api_error("card list request failed", e))?
            .into_json()
            .context("failed to parse card list response")?;
        Ok(envelope.cards)
    }
}
