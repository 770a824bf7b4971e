use shared::error::InitializationError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MainError {
    #[error("failed to initialize network sync: {0}")]
    Initialization(#[from] InitializationError),
    #[error("failed to load facility boundaries: {0}")]
    Boundaries(#[from] BoundaryError),
    #[error("invalid traffic alert configuration: {0}")]
    Traffic(#[from] regex::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("boundary deserialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("facility {facility} has an invalid coordinate at index {index}, expected [lon, lat]")]
    InvalidCoordinate { facility: String, index: usize },
    #[error("facility {facility} has {count} vertices, a polygon needs at least 3")]
    TooFewVertices { facility: String, count: usize },
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected payload: {0}")]
    Payload(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no webhook configured for channel {0} and no default webhook")]
    WebhookNotConfigured(String),
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// A pass that could not start or could not complete its sweep.
#[derive(Debug, Error)]
pub enum PassError {
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("classification error: {0}")]
    Classify(#[from] ClassifyError),
}
