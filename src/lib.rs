//! Build and publish playlist cards to the Yoto card service from local
//! audio files.
//!
//! The core is the publish orchestrator: content-addressed upload, waiting
//! out server-side transcoding, batch coordination with progress and
//! cooperative cancellation, and idempotent card creation/update, all driven
//! through an in-process job registry.

pub mod api;
pub mod auth;
pub mod card;
pub mod config;
pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod publish;
pub mod transcode;
pub mod upload;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod testing;

pub use api::{CardService, HttpCardService, TranscodeResult, UploadTarget};
pub use auth::{Authenticator, HttpTokenExchange, TokenExchange, TokenSet};
pub use card::{Card, CardSummary, MAX_CARD_TRACKS, Track};
pub use config::{Config, Limits};
pub use error::PublishError;
pub use jobs::{JobId, JobRegistry, JobSnapshot, JobStatus};
pub use pipeline::{BatchBudgets, BatchFile};
pub use publish::{PublishOutcome, PublishRequest, run_publish, submit_publish};
