//! watchpost-core — identity matching and people analytics.
//!
//! Matches face embeddings against a registry snapshot, suppresses repeat
//! sightings, counts line crossings, flags restricted-zone entries, unusual
//! movement and out-of-hours visits. Face detection and embedding are supplied
//! from outside through [`provider::EmbeddingProvider`].

pub mod behavior;
pub mod cooldown;
pub mod frame;
pub mod matcher;
pub mod pipeline;
pub mod provider;
pub mod registry;
pub mod schedule;
pub mod sink;
pub mod tracker;
pub mod types;
pub mod zones;

pub use frame::Frame;
pub use matcher::{IdentityMatcher, MatcherError};
pub use pipeline::{AlertEvent, FramePipeline, FrameResult, PipelineConfig, SessionStats};
pub use provider::{EmbeddingProvider, FaceEncoding, ProviderError};
pub use types::{BoundingBox, Category, Embedding, IdentityEntry, IdentityId, Recognition};
