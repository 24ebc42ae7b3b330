//! Sliding-window movement classification per identity.
//!
//! Each identity keeps a bounded history of face centroids. Four independent
//! classifiers run over the tail of that history every time a new position
//! arrives. Tags are advisory: nothing here suppresses or debounces them.

use crate::types::{BoundingBox, IdentityId, Point};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorTag {
    Erratic,
    Loitering,
    Rapid,
    Pacing,
}

impl BehaviorTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Erratic => "erratic",
            Self::Loitering => "loitering",
            Self::Rapid => "rapid",
            Self::Pacing => "pacing",
        }
    }

    /// Operator-facing alert line.
    pub fn alert_text(&self) -> &'static str {
        match self {
            Self::Erratic => "Erratic movement detected",
            Self::Loitering => "Person loitering in the area",
            Self::Rapid => "Rapid movement detected",
            Self::Pacing => "Back-and-forth pacing detected",
        }
    }
}

impl fmt::Display for BehaviorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join alert texts for a set of tags, e.g. for a single overlay line.
pub fn alert_summary(tags: &[BehaviorTag]) -> String {
    tags.iter()
        .map(BehaviorTag::alert_text)
        .collect::<Vec<_>>()
        .join(" | ")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub enabled: bool,
    pub history_capacity: usize,
    /// Below this many points no classifier runs.
    pub min_history: usize,

    pub erratic_window: usize,
    /// A step counts as a move if |dx| or |dy| exceeds this.
    pub erratic_min_step: f32,
    /// Flag when direction changes exceed this count.
    pub erratic_max_changes: usize,

    pub loitering_window: usize,
    /// Flag when both x and y standard deviations are below this.
    pub loitering_max_spread: f32,

    pub rapid_window: usize,
    /// Flag when mean step length exceeds this (units per frame).
    pub rapid_min_speed: f32,

    pub pacing_window: usize,
    pub pacing_min_reversals: usize,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            history_capacity: 100,
            min_history: 10,
            erratic_window: 20,
            erratic_min_step: 5.0,
            erratic_max_changes: 8,
            loitering_window: 50,
            loitering_max_spread: 30.0,
            rapid_window: 5,
            rapid_min_speed: 50.0,
            pacing_window: 30,
            pacing_min_reversals: 4,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    center: Point,
    timestamp: DateTime<Utc>,
}

pub struct BehaviorAnalyzer {
    config: BehaviorConfig,
    histories: HashMap<IdentityId, VecDeque<Sample>>,
}

impl BehaviorAnalyzer {
    pub fn new(config: BehaviorConfig) -> Self {
        Self {
            config,
            histories: HashMap::new(),
        }
    }

    pub fn config(&self) -> &BehaviorConfig {
        &self.config
    }

    /// Record a sighting and classify the identity's recent movement.
    pub fn analyze(
        &mut self,
        id: IdentityId,
        location: &BoundingBox,
        timestamp: DateTime<Utc>,
    ) -> Vec<BehaviorTag> {
        let capacity = self.config.history_capacity.max(1);
        let history = self
            .histories
            .entry(id)
            .or_insert_with(|| VecDeque::with_capacity(capacity));

        history.push_back(Sample {
            center: location.centroid(),
            timestamp,
        });
        while history.len() > capacity {
            history.pop_front();
        }

        if history.len() < self.config.min_history {
            return Vec::new();
        }

        let points: Vec<Point> = history.iter().map(|s| s.center).collect();
        let c = &self.config;
        let mut tags = Vec::new();

        if is_erratic(&points, c.erratic_window, c.erratic_min_step, c.erratic_max_changes) {
            tags.push(BehaviorTag::Erratic);
        }
        if is_loitering(&points, c.loitering_window, c.loitering_max_spread) {
            tags.push(BehaviorTag::Loitering);
        }
        if is_rapid(&points, c.rapid_window, c.rapid_min_speed) {
            tags.push(BehaviorTag::Rapid);
        }
        if is_pacing(&points, c.pacing_window, c.pacing_min_reversals) {
            tags.push(BehaviorTag::Pacing);
        }

        if !tags.is_empty() {
            tracing::debug!(identity = %id, ?tags, "behavior flagged");
        }
        tags
    }

    pub fn history_len(&self, id: IdentityId) -> usize {
        self.histories.get(&id).map_or(0, VecDeque::len)
    }

    /// Timestamp of the most recent sighting of `id`.
    pub fn last_seen(&self, id: IdentityId) -> Option<DateTime<Utc>> {
        self.histories
            .get(&id)
            .and_then(|h| h.back())
            .map(|s| s.timestamp)
    }

    pub fn tracked_identities(&self) -> usize {
        self.histories.len()
    }

    pub fn forget(&mut self, id: IdentityId) {
        self.histories.remove(&id);
    }

    pub fn clear(&mut self) {
        self.histories.clear();
    }
}

fn tail(points: &[Point], window: usize) -> Option<&[Point]> {
    if window == 0 || points.len() < window {
        None
    } else {
        Some(&points[points.len() - window..])
    }
}

fn sign(v: f32) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

fn is_erratic(points: &[Point], window: usize, min_step: f32, max_changes: usize) -> bool {
    let Some(recent) = tail(points, window) else {
        return false;
    };

    let mut changes = 0usize;
    let mut prev_direction: Option<(i8, i8)> = None;
    for pair in recent.windows(2) {
        let dx = pair[1].x - pair[0].x;
        let dy = pair[1].y - pair[0].y;
        if dx.abs() <= min_step && dy.abs() <= min_step {
            continue;
        }
        let direction = (sign(dx), sign(dy));
        if prev_direction.is_some_and(|prev| prev != direction) {
            changes += 1;
        }
        prev_direction = Some(direction);
    }
    changes > max_changes
}

fn std_dev(values: impl Iterator<Item = f32> + Clone) -> f32 {
    let n = values.clone().count() as f32;
    if n == 0.0 {
        return 0.0;
    }
    let mean = values.clone().sum::<f32>() / n;
    (values.map(|v| (v - mean).powi(2)).sum::<f32>() / n).sqrt()
}

fn is_loitering(points: &[Point], window: usize, max_spread: f32) -> bool {
    let Some(recent) = tail(points, window) else {
        return false;
    };
    let x_std = std_dev(recent.iter().map(|p| p.x));
    let y_std = std_dev(recent.iter().map(|p| p.y));
    x_std < max_spread && y_std < max_spread
}

fn is_rapid(points: &[Point], window: usize, min_speed: f32) -> bool {
    let Some(recent) = tail(points, window) else {
        return false;
    };
    if recent.len() < 2 {
        return false;
    }
    let total: f32 = recent.windows(2).map(|p| p[0].distance(&p[1])).sum();
    total / (recent.len() - 1) as f32 > min_speed
}

fn is_pacing(points: &[Point], window: usize, min_reversals: usize) -> bool {
    let Some(recent) = tail(points, window) else {
        return false;
    };
    let reversals = recent
        .windows(3)
        .filter(|p| (p[2].x - p[1].x) * (p[1].x - p[0].x) < 0.0)
        .count();
    reversals >= min_reversals
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_at(cx: f32, cy: f32) -> BoundingBox {
        BoundingBox::new(cx - 20.0, cy - 20.0, 40.0, 40.0)
    }

    fn feed(analyzer: &mut BehaviorAnalyzer, id: IdentityId, points: &[(f32, f32)]) -> Vec<BehaviorTag> {
        let mut tags = Vec::new();
        for &(x, y) in points {
            tags = analyzer.analyze(id, &face_at(x, y), Utc::now());
        }
        tags
    }

    fn analyzer() -> BehaviorAnalyzer {
        BehaviorAnalyzer::new(BehaviorConfig::default())
    }

    #[test]
    fn test_short_history_yields_nothing() {
        let mut analyzer = analyzer();
        // Wild jumps, but only 9 points.
        let points: Vec<(f32, f32)> = (0..9).map(|i| ((i * 200) as f32, 0.0)).collect();
        assert!(feed(&mut analyzer, IdentityId(1), &points).is_empty());
    }

    #[test]
    fn test_rapid_movement() {
        let mut analyzer = analyzer();
        let points: Vec<(f32, f32)> = (0..10).map(|i| ((i * 60) as f32, 100.0)).collect();
        let tags = feed(&mut analyzer, IdentityId(1), &points);
        assert_eq!(tags, vec![BehaviorTag::Rapid]);
    }

    #[test]
    fn test_slow_walk_is_not_rapid() {
        let mut analyzer = analyzer();
        let points: Vec<(f32, f32)> = (0..10).map(|i| ((i * 10) as f32, 100.0)).collect();
        assert!(feed(&mut analyzer, IdentityId(1), &points).is_empty());
    }

    #[test]
    fn test_loitering() {
        let mut analyzer = analyzer();
        let points: Vec<(f32, f32)> = (0..50)
            .map(|i| (300.0 + (i % 3) as f32, 200.0 + (i % 2) as f32))
            .collect();
        let tags = feed(&mut analyzer, IdentityId(1), &points);
        assert!(tags.contains(&BehaviorTag::Loitering));
        assert!(!tags.contains(&BehaviorTag::Rapid));
    }

    #[test]
    fn test_loitering_needs_fifty_points() {
        let mut analyzer = analyzer();
        let points: Vec<(f32, f32)> = (0..49).map(|_| (300.0, 200.0)).collect();
        assert!(feed(&mut analyzer, IdentityId(1), &points).is_empty());
    }

    #[test]
    fn test_pacing() {
        let mut analyzer = analyzer();
        // Walk 10 steps right, 10 left, repeatedly: slow but reversing.
        let points: Vec<(f32, f32)> = (0..30)
            .map(|i| {
                let phase = i % 6;
                let x = if phase < 3 { phase * 8 } else { (6 - phase) * 8 };
                (200.0 + x as f32, 150.0)
            })
            .collect();
        let tags = feed(&mut analyzer, IdentityId(1), &points);
        assert!(tags.contains(&BehaviorTag::Pacing));
    }

    #[test]
    fn test_erratic_zigzag() {
        let mut analyzer = analyzer();
        // Alternate between two diagonal directions every step.
        let points: Vec<(f32, f32)> = (0..20)
            .map(|i| {
                let x = 100.0 + (i * 10) as f32;
                let y = if i % 2 == 0 { 100.0 } else { 120.0 };
                (x, y)
            })
            .collect();
        let tags = feed(&mut analyzer, IdentityId(1), &points);
        assert!(tags.contains(&BehaviorTag::Erratic));
    }

    #[test]
    fn test_small_jitter_is_not_erratic() {
        let mut analyzer = analyzer();
        let points: Vec<(f32, f32)> = (0..20)
            .map(|i| (100.0 + (i % 2) as f32 * 4.0, 100.0 + (i % 2) as f32 * 4.0))
            .collect();
        let tags = feed(&mut analyzer, IdentityId(1), &points);
        assert!(!tags.contains(&BehaviorTag::Erratic));
    }

    #[test]
    fn test_history_is_bounded_per_identity() {
        let mut analyzer = BehaviorAnalyzer::new(BehaviorConfig {
            history_capacity: 12,
            ..BehaviorConfig::default()
        });
        let points: Vec<(f32, f32)> = (0..40).map(|i| (i as f32, 0.0)).collect();
        feed(&mut analyzer, IdentityId(1), &points);
        feed(&mut analyzer, IdentityId(2), &points[..3]);

        assert_eq!(analyzer.history_len(IdentityId(1)), 12);
        assert_eq!(analyzer.history_len(IdentityId(2)), 3);
        assert_eq!(analyzer.tracked_identities(), 2);
        assert!(analyzer.last_seen(IdentityId(2)).is_some());

        analyzer.forget(IdentityId(1));
        assert_eq!(analyzer.history_len(IdentityId(1)), 0);
    }

    #[test]
    fn test_alert_summary() {
        assert_eq!(
            alert_summary(&[BehaviorTag::Rapid, BehaviorTag::Pacing]),
            "Rapid movement detected | Back-and-forth pacing detected"
        );
        assert_eq!(alert_summary(&[]), "");
    }
}
