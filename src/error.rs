//! Error taxonomy for the publish orchestrator.

use thiserror::Error;

/// Errors that terminate (or are collected during) a publish job.
///
/// Per-file failures (`Transfer`, `TranscodeTimeout`) are recorded as strings
/// on the job and never abort a batch; only `Auth`, `Capacity` and `Publish`
/// end the job itself.
#[derive(Debug, Error)]
pub enum PublishError {
    /// No valid or refreshable credential. Recoverable by re-authorizing.
    #[error("not authenticated with the card service")]
    Auth,

    /// A single file's transfer failed.
    #[error("upload failed: {0}")]
    Transfer(String),

    /// Transcoding did not finish within its wait budget.
    #[error("transcoding timed out after {waited_secs}s")]
    TranscodeTimeout { waited_secs: u64 },

    /// An update would push the card past the maximum track count.
    #[error("card would exceed {max} tracks ({existing} existing + {added} new)")]
    Capacity {
        existing: usize,
        added: usize,
        max: usize,
    },

    /// The final card create/update call failed after tracks were ready.
    /// Uploaded content is still on the server; a retry dedups against it.
    #[error("card submission failed: {0}")]
    Publish(String),

    /// Cooperative cancellation observed mid-wait.
    #[error("cancelled")]
    Cancelled,

    /// Any other card service failure (network, malformed response).
    #[error(transparent)]
    Service(#[from] anyhow::Error),
}
