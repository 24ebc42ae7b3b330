//! Restricted zones: polygon containment plus per-zone authorization.

use crate::types::{BoundingBox, Category, IdentityId, Point};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

const EDGE_EPSILON: f32 = 1e-3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ZoneError {
    #[error("zone {name:?} needs at least 3 vertices, got {count}")]
    TooFewVertices { name: String, count: usize },
    #[error("zone {0:?} has a non-finite vertex")]
    NonFiniteVertex(String),
    #[error("zone name must not be empty")]
    EmptyName,
}

/// Zone definition as it appears in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    pub polygon: Vec<(f32, f32)>,
    #[serde(default)]
    pub authorized: Vec<Category>,
}

#[derive(Debug, Clone)]
pub struct Zone {
    name: String,
    polygon: Vec<Point>,
    authorized: HashSet<Category>,
}

impl Zone {
    pub fn new(
        name: impl Into<String>,
        polygon: Vec<Point>,
        authorized: impl IntoIterator<Item = Category>,
    ) -> Result<Self, ZoneError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ZoneError::EmptyName);
        }
        if polygon.len() < 3 {
            return Err(ZoneError::TooFewVertices {
                name,
                count: polygon.len(),
            });
        }
        if polygon.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(ZoneError::NonFiniteVertex(name));
        }
        Ok(Self {
            name,
            polygon,
            authorized: authorized.into_iter().collect(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn polygon(&self) -> &[Point] {
        &self.polygon
    }

    pub fn is_authorized(&self, category: Option<Category>) -> bool {
        category.is_some_and(|c| self.authorized.contains(&c))
    }

    /// Points on an edge or vertex count as inside.
    pub fn contains(&self, point: Point) -> bool {
        let n = self.polygon.len();
        if (0..n).any(|i| on_segment(point, self.polygon[i], self.polygon[(i + 1) % n])) {
            return true;
        }

        // Even-odd ray cast towards +x.
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (a, b) = (self.polygon[i], self.polygon[j]);
            if (a.y > point.y) != (b.y > point.y) {
                let x_cross = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
                if point.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

impl TryFrom<&ZoneConfig> for Zone {
    type Error = ZoneError;

    fn try_from(config: &ZoneConfig) -> Result<Self, Self::Error> {
        Zone::new(
            config.name.clone(),
            config.polygon.iter().copied().map(Point::from).collect(),
            config.authorized.iter().copied(),
        )
    }
}

fn on_segment(p: Point, a: Point, b: Point) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    let length = a.distance(&b).max(f32::EPSILON);
    if (cross / length).abs() > EDGE_EPSILON {
        return false;
    }
    p.x >= a.x.min(b.x) - EDGE_EPSILON
        && p.x <= a.x.max(b.x) + EDGE_EPSILON
        && p.y >= a.y.min(b.y) - EDGE_EPSILON
        && p.y <= a.y.max(b.y) + EDGE_EPSILON
}

/// A face to test against the zones.
#[derive(Debug, Clone)]
pub struct ZoneSubject {
    pub location: BoundingBox,
    pub identity_id: Option<IdentityId>,
    pub display_name: String,
    /// `None` for unrecognized faces, which no zone authorizes.
    pub category: Option<Category>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneViolation {
    /// Position of the offending subject in the checked slice.
    #[serde(skip)]
    pub subject_index: usize,
    pub zone_name: String,
    pub identity_id: Option<IdentityId>,
    pub display_name: String,
    pub category: Option<Category>,
    pub location: BoundingBox,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ZoneChecker {
    zones: Vec<Zone>,
    last_violations: Vec<ZoneViolation>,
}

impl ZoneChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(configs: &[ZoneConfig]) -> Result<Self, ZoneError> {
        let mut checker = Self::new();
        for config in configs {
            checker.insert(Zone::try_from(config)?);
        }
        Ok(checker)
    }

    /// Add a zone, replacing any existing zone with the same name.
    pub fn add_zone(
        &mut self,
        name: impl Into<String>,
        polygon: Vec<Point>,
        authorized: impl IntoIterator<Item = Category>,
    ) -> Result<(), ZoneError> {
        let zone = Zone::new(name, polygon, authorized)?;
        self.insert(zone);
        Ok(())
    }

    pub fn remove_zone(&mut self, name: &str) -> bool {
        let before = self.zones.len();
        self.zones.retain(|z| z.name != name);
        self.zones.len() != before
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn check_violations(&mut self, subjects: &[ZoneSubject]) -> Vec<ZoneViolation> {
        self.check_violations_at(subjects, Utc::now())
    }

    /// Recompute the full violation list for this set of faces.
    pub fn check_violations_at(
        &mut self,
        subjects: &[ZoneSubject],
        timestamp: DateTime<Utc>,
    ) -> Vec<ZoneViolation> {
        let mut violations = Vec::new();

        for (subject_index, subject) in subjects.iter().enumerate() {
            let center = subject.location.centroid();
            for zone in &self.zones {
                if zone.contains(center) && !zone.is_authorized(subject.category) {
                    tracing::debug!(
                        zone = %zone.name,
                        person = %subject.display_name,
                        "restricted zone violation"
                    );
                    violations.push(ZoneViolation {
                        subject_index,
                        zone_name: zone.name.clone(),
                        identity_id: subject.identity_id,
                        display_name: subject.display_name.clone(),
                        category: subject.category,
                        location: subject.location,
                        timestamp,
                    });
                }
            }
        }

        self.last_violations = violations.clone();
        violations
    }

    /// Violations from the most recent check.
    pub fn last_violations(&self) -> &[ZoneViolation] {
        &self.last_violations
    }

    fn insert(&mut self, zone: Zone) {
        match self.zones.iter_mut().find(|z| z.name == zone.name) {
            Some(existing) => {
                tracing::info!(zone = %zone.name, "replacing restricted zone");
                *existing = zone;
            }
            None => {
                tracing::info!(zone = %zone.name, vertices = zone.polygon.len(), "restricted zone added");
                self.zones.push(zone);
            }
        }
    }
}
