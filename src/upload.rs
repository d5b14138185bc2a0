//! Content-addressed audio upload.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;

use crate::api::CardService;
use crate::error::PublishError;

/// Streaming SHA-256 hex digest of a file's bytes.
pub fn file_sha256(path: &Path) -> Result<String> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// MIME type hint for an audio file, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    match ext.as_deref() {
        Some("m4a") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("ogg") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        Some("opus") => "audio/opus",
        _ => "audio/mpeg",
    }
}

fn transfer_error(err: anyhow::Error) -> PublishError {
    PublishError::Transfer(format!("{err:#}"))
}

/// Upload one audio file and return its upload id. Any network or storage
/// failure surfaces as [`PublishError::Transfer`].
///
/// The service is asked for a target keyed by the file's content fingerprint;
/// when it already holds matching bytes it returns no transfer URL and the
/// transfer is skipped entirely.
pub fn upload_file(service: &dyn CardService, path: &Path) -> Result<String, PublishError> {
    let sha256 = file_sha256(path).map_err(transfer_error)?;
    let target = service.request_upload(&sha256).map_err(transfer_error)?;

    match &target.upload_url {
        Some(url) => {
            let bytes = fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))
                .map_err(transfer_error)?;
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("audio");
            service
                .transfer(url, &bytes, content_type_for(path), filename)
                .map_err(transfer_error)?;
        }
        None => {
            tracing::debug!(path = %path.display(), "content already on service, skipping transfer");
        }
    }

    Ok(target.upload_id)
}
