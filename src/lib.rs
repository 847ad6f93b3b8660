/*
 * This crate is the persistent storage-and-reconciliation layer for network
 * connection profiles. Profiles live as files spread across priority-ordered
 * directories; each UUID resolves to exactly one canonical profile, chosen
 * deterministically among all files currently providing it, with persisted
 * canonical-file markers, in-memory shadowing, and change events computed
 * against the previously exported state. The profile file format and the
 * change-event consumer are injected through the `ProfileModelOperations`
 * and `ChangeListener` traits.
 */
pub mod checksum_utils;
pub mod config;
pub mod engine;
pub mod hints;
pub mod models;
pub mod monitor;
pub mod profile_model;
pub mod registry;
pub mod scanner;

// Re-export configuration and classification
pub use config::{ClassificationError, StorageDirectories};

// Re-export the data model
pub use models::{CandidateFile, FileIdentity, ProfileHandle, StorageTier};

// Re-export the profile-model seam
pub use profile_model::{
    ConnectionProfile, CoreProfileModel, PROFILE_FILE_EXTENSION, ParseError,
    ProfileModelOperations, WriteError, sanitize_profile_id,
};

// Re-export the engine entry points
pub use engine::{
    ChangeListener, CommitOutcome, CommitReason, EngineError, ReconciliationEngine,
};

// Re-export the remaining collaborator-facing pieces
pub use hints::{HintStore, HintTarget};
pub use monitor::MonitorGlue;
pub use registry::{ProfileGroup, ProfileRegistry};
pub use scanner::DirectoryScanner;
