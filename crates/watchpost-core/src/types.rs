use serde::{Deserialize, Serialize};
use std::fmt;

/// Distance reported for an unknown face. A sentinel, not a real maximum.
pub const UNKNOWN_DISTANCE: f32 = 1.0;

/// Display name reported for faces that matched nobody.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Bounding box for a detected face, in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
        }
    }

    /// Build a box from its (left, top, right, bottom) edges.
    pub fn from_edges(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self::new(left, top, right - left, bottom - top)
    }

    /// Centre of the rectangle.
    pub fn centroid(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// A 2-D point in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

/// Face embedding vector (typically 128-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding, when the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Registry key of a known person.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct IdentityId(pub u64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of registered person. Unknown faces carry no category at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Resident,
    Employee,
    AuthorizedVisitor,
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::Resident,
        Category::Employee,
        Category::AuthorizedVisitor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resident => "resident",
            Self::Employee => "employee",
            Self::AuthorizedVisitor => "authorized_visitor",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered identity with its reference embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityEntry {
    pub id: IdentityId,
    pub display_name: String,
    pub category: Category,
    pub embedding: Embedding,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Outcome of matching one probe embedding against the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recognition {
    Known {
        id: IdentityId,
        display_name: String,
        category: Category,
        /// Raw Euclidean distance to the matched entry.
        distance: f32,
    },
    Unknown {
        distance: f32,
    },
}

impl Recognition {
    pub fn unknown() -> Self {
        Self::Unknown {
            distance: UNKNOWN_DISTANCE,
        }
    }

    pub fn identity_id(&self) -> Option<IdentityId> {
        match self {
            Self::Known { id, .. } => Some(*id),
            Self::Unknown { .. } => None,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Self::Known { display_name, .. } => display_name,
            Self::Unknown { .. } => UNKNOWN_NAME,
        }
    }

    pub fn category(&self) -> Option<Category> {
        match self {
            Self::Known { category, .. } => Some(*category),
            Self::Unknown { .. } => None,
        }
    }

    pub fn distance(&self) -> f32 {
        match self {
            Self::Known { distance, .. } | Self::Unknown { distance } => *distance,
        }
    }

    /// `1 - distance`, clamped to [0, 1]. Unknown faces always report 0.
    pub fn confidence(&self) -> f32 {
        match self {
            Self::Known { distance, .. } => confidence_from_distance(*distance),
            Self::Unknown { .. } => 0.0,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown { .. })
    }
}

pub fn confidence_from_distance(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Strategy for comparing a probe embedding against a gallery of known faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[IdentityEntry], tolerance: f32) -> Recognition;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// Every gallery entry within `tolerance` is a candidate; the closest candidate
/// wins and equal distances resolve to the lowest identity id.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[IdentityEntry], tolerance: f32) -> Recognition {
        let mut best: Option<(&IdentityEntry, f32)> = None;

        for entry in gallery {
            let distance = probe.euclidean_distance(&entry.embedding);
            if distance.is_nan() || distance > tolerance {
                continue;
            }
            let is_better = match best {
                None => true,
                Some((prev, prev_distance)) => {
                    distance < prev_distance || (distance == prev_distance && entry.id < prev.id)
                }
            };
            if is_better {
                best = Some((entry, distance));
            }
        }

        match best {
            Some((entry, distance)) => Recognition::Known {
                id: entry.id,
                display_name: entry.display_name.clone(),
                category: entry.category,
                distance,
            },
            None => Recognition::unknown(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, values: Vec<f32>) -> IdentityEntry {
        IdentityEntry {
            id: IdentityId(id),
            display_name: format!("person {id}"),
            category: Category::Resident,
            embedding: Embedding::new(values),
            active: true,
        }
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_bbox_centroid() {
        let b = BoundingBox::from_edges(100.0, 200.0, 140.0, 260.0);
        assert_eq!(b.centroid(), Point::new(120.0, 230.0));
    }

    #[test]
    fn test_matcher_picks_closest_candidate() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![entry(1, vec![0.5, 0.0]), entry(2, vec![0.2, 0.0])];
        let result = EuclideanMatcher.compare(&probe, &gallery, 0.6);
        assert_eq!(result.identity_id(), Some(IdentityId(2)));
        assert!((result.distance() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_tie_breaks_on_lowest_id() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![entry(7, vec![0.3, 0.0]), entry(3, vec![0.0, 0.3])];
        let result = EuclideanMatcher.compare(&probe, &gallery, 0.6);
        assert_eq!(result.identity_id(), Some(IdentityId(3)));
    }

    #[test]
    fn test_matcher_tolerance_is_hard_cutoff() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![entry(1, vec![0.7, 0.0])];
        let result = EuclideanMatcher.compare(&probe, &gallery, 0.6);
        assert!(result.is_unknown());
        assert_eq!(result.distance(), UNKNOWN_DISTANCE);
        assert_eq!(result.confidence(), 0.0);
    }

    #[test]
    fn test_matcher_nan_distance_never_matches() {
        let probe = Embedding::new(vec![f32::NAN, 0.0]);
        let gallery = vec![entry(5, vec![0.0, 0.0]), entry(9, vec![1.0, 1.0])];
        let result = EuclideanMatcher.compare(&probe, &gallery, 0.6);
        assert!(result.is_unknown());
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &[], 0.6);
        assert!(result.is_unknown());
        assert_eq!(result.display_name(), UNKNOWN_NAME);
        assert_eq!(result.category(), None);
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(confidence_from_distance(1.7), 0.0);
        assert!((confidence_from_distance(0.25) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_category_wire_format() {
        let json = serde_json::to_string(&Category::AuthorizedVisitor).unwrap();
        assert_eq!(json, "\"authorized_visitor\"");
        let entry: IdentityEntry = serde_json::from_str(
            r#"{"id": 4, "display_name": "Ana", "category": "employee",
                "embedding": {"values": [0.1, 0.2]}}"#,
        )
        .unwrap();
        assert!(entry.active);
        assert_eq!(entry.category, Category::Employee);
    }
}
