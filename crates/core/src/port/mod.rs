// Port Layer - Interfaces for external dependencies

pub mod artifact_lookup;
pub mod filter;
pub mod id_provider; // For deterministic testing
pub mod queue_store;
pub mod time_provider;

// Re-exports
pub use artifact_lookup::ArtifactLookup;
pub use filter::{Artifact, Content, Filter, Stage, StageError};
pub use id_provider::IdProvider;
pub use queue_store::{NewMessage, QueueStore, RecoveryReport, StoredMessage};
pub use time_provider::TimeProvider;
