//! Proximity tracker with a virtual counting line.
//!
//! Tracks are short-lived correspondences between consecutive frames, not
//! durable entities. Association is greedy nearest-neighbour on face
//! centroids; a track crossing the horizontal counting line downward counts
//! as an entry, upward as an exit.

use crate::types::{BoundingBox, Point};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("counting line position {0} is outside [0, 1]")]
    InvalidLinePosition(f32),
    #[error("history cap must keep at least one centroid")]
    InvalidHistoryCap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub enabled: bool,
    /// Counting line as a fraction of frame height.
    pub counting_line_position: f32,
    /// A centroid joins a track only if strictly closer than this.
    pub proximity_threshold: f32,
    /// Maximum centroids kept per track; at least 1. Crossings compare
    /// against the previous centroid before eviction, so 1 still counts.
    pub history_cap: usize,
    /// Consecutive updates a track may go unmatched before it is dropped.
    /// 0 drops on the first miss, including a face-free frame.
    pub grace_updates: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            counting_line_position: 0.5,
            proximity_threshold: 100.0,
            history_cap: 30,
            grace_updates: 0,
        }
    }
}

/// Counter state after one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterStats {
    pub current_count: usize,
    pub total_entries: u64,
    pub total_exits: u64,
    pub active_tracks: usize,
}

#[derive(Debug, Clone)]
struct Track {
    history: VecDeque<Point>,
    last_seen: u64,
}

impl Track {
    fn last(&self) -> Option<Point> {
        self.history.back().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Crossing {
    Entry,
    Exit,
}

pub struct PersonCounter {
    config: TrackerConfig,
    tracks: BTreeMap<u64, Track>,
    next_track_id: u64,
    generation: u64,
    counting_line_y: Option<f32>,
    total_entries: u64,
    total_exits: u64,
}

impl PersonCounter {
    pub fn new(config: TrackerConfig) -> Result<Self, TrackerError> {
        validate_position(config.counting_line_position)?;
        if config.history_cap == 0 {
            return Err(TrackerError::InvalidHistoryCap);
        }
        Ok(Self {
            config,
            tracks: BTreeMap::new(),
            next_track_id: 0,
            generation: 0,
            counting_line_y: None,
            total_entries: 0,
            total_exits: 0,
        })
    }

    /// Fix the counting line at `relative_position * frame_height`.
    pub fn set_counting_line(
        &mut self,
        frame_height: u32,
        relative_position: f32,
    ) -> Result<(), TrackerError> {
        validate_position(relative_position)?;
        let y = frame_height as f32 * relative_position;
        self.counting_line_y = Some(y);
        tracing::debug!(line_y = y, "counting line set");
        Ok(())
    }

    pub fn counting_line(&self) -> Option<f32> {
        self.counting_line_y
    }

    /// Associate this frame's faces with tracks and count line crossings.
    ///
    /// `frame_shape` is `(height, width)`.
    pub fn update(&mut self, faces: &[BoundingBox], frame_shape: (u32, u32)) -> CounterStats {
        let line_y = match self.counting_line_y {
            Some(y) => y,
            None => {
                let y = frame_shape.0 as f32 * self.config.counting_line_position;
                self.counting_line_y = Some(y);
                y
            }
        };

        self.generation += 1;
        let generation = self.generation;
        let mut matched: HashSet<u64> = HashSet::with_capacity(faces.len());

        for face in faces {
            let center = face.centroid();

            let mut best: Option<(u64, f32)> = None;
            for (&track_id, track) in &self.tracks {
                if matched.contains(&track_id) {
                    continue;
                }
                let Some(last) = track.last() else {
                    continue;
                };
                let distance = center.distance(&last);
                if distance >= self.config.proximity_threshold {
                    continue;
                }
                if best.map_or(true, |(_, d)| distance < d) {
                    best = Some((track_id, distance));
                }
            }

            match best {
                Some((track_id, _)) => {
                    matched.insert(track_id);
                    let crossing = self.extend_track(track_id, center, generation, line_y);
                    match crossing {
                        Some(Crossing::Entry) => {
                            self.total_entries += 1;
                            tracing::debug!(track_id, total = self.total_entries, "entry counted");
                        }
                        Some(Crossing::Exit) => {
                            self.total_exits += 1;
                            tracing::debug!(track_id, total = self.total_exits, "exit counted");
                        }
                        None => {}
                    }
                }
                None => {
                    let track_id = self.next_track_id;
                    self.next_track_id += 1;
                    self.tracks.insert(
                        track_id,
                        Track {
                            history: VecDeque::from([center]),
                            last_seen: generation,
                        },
                    );
                    matched.insert(track_id);
                }
            }
        }

        let grace = u64::from(self.config.grace_updates);
        self.tracks
            .retain(|_, track| generation - track.last_seen <= grace);

        CounterStats {
            current_count: faces.len(),
            total_entries: self.total_entries,
            total_exits: self.total_exits,
            active_tracks: self.tracks.len(),
        }
    }

    pub fn stats(&self) -> CounterStats {
        CounterStats {
            current_count: 0,
            total_entries: self.total_entries,
            total_exits: self.total_exits,
            active_tracks: self.tracks.len(),
        }
    }

    /// Centroid history of a live track, oldest first.
    pub fn track_history(&self, track_id: u64) -> Option<Vec<Point>> {
        self.tracks
            .get(&track_id)
            .map(|t| t.history.iter().copied().collect())
    }

    fn extend_track(
        &mut self,
        track_id: u64,
        center: Point,
        generation: u64,
        line_y: f32,
    ) -> Option<Crossing> {
        let cap = self.config.history_cap;
        let track = self.tracks.get_mut(&track_id)?;
        let prev = track.last();

        track.history.push_back(center);
        track.last_seen = generation;
        while track.history.len() > cap {
            track.history.pop_front();
        }

        let prev_y = prev?.y;
        let curr_y = center.y;
        if prev_y < line_y && line_y <= curr_y {
            Some(Crossing::Entry)
        } else if prev_y > line_y && line_y >= curr_y {
            Some(Crossing::Exit)
        } else {
            None
        }
    }
}

fn validate_position(position: f32) -> Result<(), TrackerError> {
    if (0.0..=1.0).contains(&position) {
        Ok(())
    } else {
        Err(TrackerError::InvalidLinePosition(position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPE: (u32, u32) = (480, 640);

    /// 40x40 face box centred on (cx, cy).
    fn face_at(cx: f32, cy: f32) -> BoundingBox {
        BoundingBox::new(cx - 20.0, cy - 20.0, 40.0, 40.0)
    }

    fn counter() -> PersonCounter {
        PersonCounter::new(TrackerConfig::default()).unwrap()
    }

    #[test]
    fn test_downward_crossing_counts_entry() {
        let mut counter = counter();
        counter.set_counting_line(480, 0.5).unwrap();
        assert_eq!(counter.counting_line(), Some(240.0));

        counter.update(&[face_at(300.0, 200.0)], SHAPE);
        let stats = counter.update(&[face_at(300.0, 260.0)], SHAPE);

        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.total_exits, 0);
        assert_eq!(stats.active_tracks, 1);
    }

    #[test]
    fn test_upward_crossing_counts_exit() {
        let mut counter = counter();
        counter.set_counting_line(480, 0.5).unwrap();

        counter.update(&[face_at(300.0, 280.0)], SHAPE);
        let stats = counter.update(&[face_at(300.0, 230.0)], SHAPE);

        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.total_exits, 1);
    }

    #[test]
    fn test_landing_on_line_counts() {
        let mut counter = counter();
        counter.set_counting_line(480, 0.5).unwrap();

        counter.update(&[face_at(300.0, 220.0)], SHAPE);
        let stats = counter.update(&[face_at(300.0, 240.0)], SHAPE);
        assert_eq!(stats.total_entries, 1);

        // Starting on the line is not strictly on one side.
        let stats = counter.update(&[face_at(300.0, 250.0)], SHAPE);
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn test_line_defaults_to_half_height() {
        let mut counter = counter();
        counter.update(&[], SHAPE);
        assert_eq!(counter.counting_line(), Some(240.0));
    }

    #[test]
    fn test_invalid_line_position() {
        let mut counter = counter();
        assert_eq!(
            counter.set_counting_line(480, 1.5),
            Err(TrackerError::InvalidLinePosition(1.5))
        );
        assert!(PersonCounter::new(TrackerConfig {
            counting_line_position: -0.1,
            ..TrackerConfig::default()
        })
        .is_err());
    }

    #[test]
    fn test_far_centroid_spawns_new_track() {
        let mut counter = counter();
        counter.set_counting_line(480, 0.5).unwrap();

        counter.update(&[face_at(100.0, 200.0)], SHAPE);
        // 150 units away: beyond the proximity threshold.
        let stats = counter.update(&[face_at(250.0, 260.0)], SHAPE);

        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.active_tracks, 1);
        assert_eq!(counter.track_history(1).map(|h| h.len()), Some(1));
    }

    #[test]
    fn test_greedy_association_in_detection_order() {
        let mut counter = counter();
        counter.set_counting_line(480, 0.9).unwrap();

        counter.update(&[face_at(100.0, 100.0), face_at(200.0, 100.0)], SHAPE);
        // First detection takes the nearest track (0); second falls back to 1.
        let stats = counter.update(&[face_at(140.0, 100.0), face_at(150.0, 100.0)], SHAPE);

        assert_eq!(stats.active_tracks, 2);
        assert_eq!(
            counter.track_history(0).unwrap().last(),
            Some(&Point::new(140.0, 100.0))
        );
        assert_eq!(
            counter.track_history(1).unwrap().last(),
            Some(&Point::new(150.0, 100.0))
        );
    }

    #[test]
    fn test_empty_frame_drops_tracks() {
        let mut counter = counter();
        counter.update(&[face_at(100.0, 100.0)], SHAPE);
        let stats = counter.update(&[], SHAPE);
        assert_eq!(stats.active_tracks, 0);
        assert_eq!(stats.current_count, 0);
    }

    #[test]
    fn test_grace_updates_keep_track_alive() {
        let mut counter = PersonCounter::new(TrackerConfig {
            grace_updates: 1,
            ..TrackerConfig::default()
        })
        .unwrap();
        counter.set_counting_line(480, 0.5).unwrap();

        counter.update(&[face_at(300.0, 200.0)], SHAPE);
        assert_eq!(counter.update(&[], SHAPE).active_tracks, 1);
        let stats = counter.update(&[face_at(300.0, 260.0)], SHAPE);
        assert_eq!(stats.total_entries, 1);

        counter.update(&[], SHAPE);
        assert_eq!(counter.update(&[], SHAPE).active_tracks, 0);
    }

    #[test]
    fn test_history_is_capped() {
        let mut counter = PersonCounter::new(TrackerConfig {
            history_cap: 5,
            ..TrackerConfig::default()
        })
        .unwrap();

        for i in 0..20 {
            counter.update(&[face_at(100.0 + i as f32, 100.0)], SHAPE);
        }
        let history = counter.track_history(0).unwrap();
        assert_eq!(history.len(), 5);
        assert_eq!(history[0], Point::new(115.0, 100.0));
    }

    #[test]
    fn test_single_point_history_still_counts() {
        let mut counter = PersonCounter::new(TrackerConfig {
            history_cap: 1,
            ..TrackerConfig::default()
        })
        .unwrap();
        counter.set_counting_line(480, 0.5).unwrap();

        counter.update(&[face_at(300.0, 200.0)], SHAPE);
        let stats = counter.update(&[face_at(300.0, 260.0)], SHAPE);

        assert_eq!(stats.total_entries, 1);
        assert_eq!(
            counter.track_history(0),
            Some(vec![Point::new(300.0, 260.0)])
        );
    }

    #[test]
    fn test_zero_history_cap_rejected() {
        assert_eq!(
            PersonCounter::new(TrackerConfig {
                history_cap: 0,
                ..TrackerConfig::default()
            })
            .err(),
            Some(TrackerError::InvalidHistoryCap)
        );
    }

    #[test]
    fn test_totals_never_decrease() {
        let mut counter = counter();
        counter.set_counting_line(480, 0.5).unwrap();
        let mut last = (0, 0);
        let ys = [200.0, 260.0, 220.0, 250.0, 230.0, 280.0];
        for y in ys {
            let stats = counter.update(&[face_at(300.0, y)], SHAPE);
            assert!(stats.total_entries >= last.0 && stats.total_exits >= last.1);
            last = (stats.total_entries, stats.total_exits);
        }
        assert_eq!(last, (3, 2));
    }
}
