//! watchpost-capture — Frame acquisition for the watchpost pipeline.
//!
//! Provides frame sources, a replay embedding provider fed from
//! precomputed detections, and the bounded drop-oldest queue that hands
//! frames from the producer thread to the engine.

pub mod queue;
pub mod replay;
pub mod source;

pub use queue::{spawn_producer, FrameQueue, ProducerOptions, ProducerReport, PushOutcome};
pub use replay::{ReplayError, ReplayProvider};
pub use source::{BlankSource, FrameSource, ImageDirSource, SourceError};
