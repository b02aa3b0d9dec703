//! Signature Verifier
//!
//! Prediction service that compares a candidate signature image against a
//! reference image. Both uploads are staged on disk, handed to an external
//! classifier process, and the classifier's verdict is returned as JSON.
//!
//! ## Architecture
//!
//! ```text
//! POST /predict
//!      │
//!      ▼
//! ┌──────────────┐   two writes   ┌──────────────┐
//! │ Prediction   │───────────────▶│ Artifact     │◀──── Staging Sweeper
//! │ Endpoint     │◀───two deletes─│ Store        │
//! └──────────────┘                └──────────────┘
//!      │  ▲
//!      ▼  │ first stdout line
//! ┌──────────────┐                ┌──────────────┐
//! │ Classifier   │───────────────▶│ Result       │
//! │ Process      │                │ Parser       │
//! └──────────────┘                └──────────────┘
//! ```
//!
//! Staged files are owned by the request that wrote them and are removed on
//! every exit path, including cancelled requests.

pub mod api;
pub mod artifact_store;
pub mod classifier;
pub mod config;
pub mod error;
pub mod outcome;
pub mod sweeper;

pub use api::{create_router, start_api_server, AppState};
pub use artifact_store::{ArtifactField, ArtifactStore, StagedArtifact, SweepReport, UploadedArtifact};
pub use classifier::{Classifier, ProcessClassifier};
pub use config::{Config, ConfigError};
pub use error::PredictionError;
pub use outcome::ClassificationOutcome;
pub use sweeper::StagingSweeper;
