//! Identity matcher over an atomically swappable registry snapshot.
//!
//! The matcher owns an `Arc<RegistrySnapshot>`. Every call clones the `Arc`
//! under a short read lock and works on that copy, so a concurrent
//! [`IdentityMatcher::load`] never exposes a half-built registry: it builds
//! the replacement off to the side and swaps the pointer.

use crate::types::{
    confidence_from_distance, Category, Embedding, EuclideanMatcher, IdentityEntry, IdentityId,
    Matcher, Recognition,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Strict verification tightens the tolerance by this factor.
const STRICT_TOLERANCE_FACTOR: f32 = 0.8;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatcherError {
    #[error("embedding dimension mismatch: registry uses {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("identity {0} is not in the loaded registry")]
    NotFound(IdentityId),
    #[error("invalid tolerance {0}: must be finite and non-negative")]
    InvalidTolerance(f32),
    #[error("embedding contains a non-finite value")]
    NonFiniteEmbedding,
}

/// Immutable set of active identities sharing one embedding dimension.
#[derive(Debug, Default, Serialize)]
pub struct RegistrySnapshot {
    entries: Vec<IdentityEntry>,
    dimension: Option<usize>,
}

impl RegistrySnapshot {
    /// Keep active entries only and check they agree on embedding dimension.
    pub fn build(entries: Vec<IdentityEntry>) -> Result<Self, MatcherError> {
        let entries: Vec<IdentityEntry> = entries.into_iter().filter(|e| e.active).collect();

        for entry in &entries {
            check_finite(&entry.embedding)?;
        }

        let dimension = entries.first().map(|e| e.embedding.dimension());
        if let Some(expected) = dimension {
            if let Some(bad) = entries
                .iter()
                .find(|e| e.embedding.dimension() != expected)
            {
                return Err(MatcherError::DimensionMismatch {
                    expected,
                    actual: bad.embedding.dimension(),
                });
            }
        }

        Ok(Self { entries, dimension })
    }

    pub fn entries(&self) -> &[IdentityEntry] {
        &self.entries
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get(&self, id: IdentityId) -> Option<&IdentityEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn check_dimension(&self, probe: &Embedding) -> Result<(), MatcherError> {
        match self.dimension {
            Some(expected) if expected != probe.dimension() => {
                Err(MatcherError::DimensionMismatch {
                    expected,
                    actual: probe.dimension(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// One row of a [`IdentityMatcher::find_similar`] ranking.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarIdentity {
    pub id: IdentityId,
    pub display_name: String,
    pub category: Category,
    pub distance: f32,
    pub confidence: f32,
}

/// Result of a one-to-one [`IdentityMatcher::verify`] check.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub verified: bool,
    pub id: IdentityId,
    pub display_name: String,
    pub distance: f32,
    pub confidence: f32,
    pub threshold: f32,
}

/// Registry overview for status output.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySummary {
    pub identities: usize,
    pub tolerance: f32,
    pub dimension: Option<usize>,
    pub per_category: BTreeMap<Category, usize>,
}

/// Matches probe embeddings against the currently loaded registry snapshot.
pub struct IdentityMatcher {
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    tolerance: RwLock<f32>,
}

impl IdentityMatcher {
    /// Create a matcher with an empty registry.
    pub fn new(tolerance: f32) -> Result<Self, MatcherError> {
        validate_tolerance(tolerance)?;
        Ok(Self {
            snapshot: RwLock::new(Arc::new(RegistrySnapshot::default())),
            tolerance: RwLock::new(tolerance),
        })
    }

    /// Replace the registry snapshot. On error the previous snapshot stays live.
    pub fn load(&self, entries: Vec<IdentityEntry>) -> Result<(), MatcherError> {
        let next = Arc::new(RegistrySnapshot::build(entries)?);
        let count = next.len();
        let dimension = next.dimension();

        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next;

        tracing::info!(identities = count, ?dimension, "registry snapshot loaded");
        Ok(())
    }

    /// The snapshot in effect right now. Stays valid across later reloads.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn tolerance(&self) -> f32 {
        *self.tolerance.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the tolerance for subsequent calls.
    pub fn update_tolerance(&self, tolerance: f32) -> Result<(), MatcherError> {
        validate_tolerance(tolerance)?;
        *self
            .tolerance
            .write()
            .unwrap_or_else(PoisonError::into_inner) = tolerance;
        tracing::info!(tolerance, "matcher tolerance updated");
        Ok(())
    }

    /// Identify the probe: closest registry entry within tolerance, or unknown.
    pub fn match_embedding(&self, probe: &Embedding) -> Result<Recognition, MatcherError> {
        check_finite(probe)?;
        let tolerance = self.tolerance();
        let snapshot = self.snapshot();

        if snapshot.is_empty() {
            return Ok(Recognition::unknown());
        }
        snapshot.check_dimension(probe)?;

        Ok(EuclideanMatcher.compare(probe, snapshot.entries(), tolerance))
    }

    /// The `k` closest identities regardless of tolerance, nearest first.
    ///
    /// For manual review only; never used to decide a match.
    pub fn find_similar(
        &self,
        probe: &Embedding,
        k: usize,
    ) -> Result<Vec<SimilarIdentity>, MatcherError> {
        check_finite(probe)?;
        let snapshot = self.snapshot();
        if snapshot.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        snapshot.check_dimension(probe)?;

        let mut ranked: Vec<SimilarIdentity> = snapshot
            .entries()
            .iter()
            .map(|e| {
                let distance = probe.euclidean_distance(&e.embedding);
                SimilarIdentity {
                    id: e.id,
                    display_name: e.display_name.clone(),
                    category: e.category,
                    distance,
                    confidence: confidence_from_distance(distance),
                }
            })
            .collect();

        ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        ranked.truncate(k);
        Ok(ranked)
    }

    /// Check the probe against one specific identity.
    pub fn verify(
        &self,
        probe: &Embedding,
        id: IdentityId,
        strict: bool,
    ) -> Result<Verification, MatcherError> {
        check_finite(probe)?;
        let tolerance = self.tolerance();
        let snapshot = self.snapshot();

        let entry = snapshot.get(id).ok_or(MatcherError::NotFound(id))?;
        snapshot.check_dimension(probe)?;

        let threshold = if strict {
            tolerance * STRICT_TOLERANCE_FACTOR
        } else {
            tolerance
        };
        let distance = probe.euclidean_distance(&entry.embedding);

        Ok(Verification {
            verified: distance <= threshold,
            id,
            display_name: entry.display_name.clone(),
            distance,
            confidence: confidence_from_distance(distance),
            threshold,
        })
    }

    pub fn summary(&self) -> RegistrySummary {
        let snapshot = self.snapshot();
        let mut per_category = BTreeMap::new();
        for entry in snapshot.entries() {
            *per_category.entry(entry.category).or_insert(0) += 1;
        }

        RegistrySummary {
            identities: snapshot.len(),
            tolerance: self.tolerance(),
            dimension: snapshot.dimension(),
            per_category,
        }
    }
}

fn validate_tolerance(tolerance: f32) -> Result<(), MatcherError> {
    if tolerance.is_finite() && tolerance >= 0.0 {
        Ok(())
    } else {
        Err(MatcherError::InvalidTolerance(tolerance))
    }
}

fn check_finite(embedding: &Embedding) -> Result<(), MatcherError> {
    if embedding.values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(MatcherError::NonFiniteEmbedding)
    }
}
