//! Per-frame orchestration: recognize, deduplicate, analyse, report.
//!
//! [`FramePipeline::process_frame`] runs one frame to completion and returns a
//! [`FrameResult`]. It never persists anything itself; storage and alerting
//! consume the result through [`crate::sink::ResultSink`].

use crate::behavior::{BehaviorAnalyzer, BehaviorConfig, BehaviorTag};
use crate::cooldown::CooldownCache;
use crate::frame::Frame;
use crate::matcher::{IdentityMatcher, MatcherError, DEFAULT_TOLERANCE};
use crate::provider::EmbeddingProvider;
use crate::schedule::{AccessSchedule, ScheduleConfig};
use crate::tracker::{CounterStats, PersonCounter, TrackerConfig, TrackerError};
use crate::types::{BoundingBox, Category, IdentityId, Recognition};
use crate::zones::{ZoneChecker, ZoneConfig, ZoneError, ZoneSubject, ZoneViolation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("matcher: {0}")]
    Matcher(#[from] MatcherError),
    #[error("tracker: {0}")]
    Tracker(#[from] TrackerError),
    #[error("zone: {0}")]
    Zone(#[from] ZoneError),
}

/// Tunables for the recognition and analytics pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum embedding distance accepted as a match.
    pub tolerance: f32,
    pub cooldown_seconds: u64,
    /// Emit an `UnknownPerson` event for every fresh unknown face.
    pub alert_on_unknown: bool,
    pub tracker: TrackerConfig,
    pub zones: Vec<ZoneConfig>,
    pub behavior: BehaviorConfig,
    pub schedule: ScheduleConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            cooldown_seconds: 30,
            alert_on_unknown: true,
            tracker: TrackerConfig::default(),
            zones: Vec::new(),
            behavior: BehaviorConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Something an alerting or storage collaborator should act on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertEvent {
    UnknownPerson {
        location: BoundingBox,
    },
    ZoneViolation {
        zone_name: String,
        identity_id: Option<IdentityId>,
        display_name: String,
    },
    Behavior {
        identity_id: IdentityId,
        display_name: String,
        tags: Vec<BehaviorTag>,
    },
    UnusualHour {
        identity_id: IdentityId,
        display_name: String,
        category: Category,
    },
}

impl AlertEvent {
    pub fn severity(&self) -> Severity {
        match self {
            Self::UnknownPerson { .. } | Self::ZoneViolation { .. } => Severity::High,
            Self::Behavior { .. } => Severity::Medium,
            Self::UnusualHour { .. } => Severity::Low,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::UnknownPerson { .. } => "Unknown person detected".to_string(),
            Self::ZoneViolation {
                zone_name,
                display_name,
                ..
            } => format!("{display_name} entered restricted zone {zone_name}"),
            Self::Behavior {
                display_name, tags, ..
            } => format!(
                "{display_name}: {}",
                crate::behavior::alert_summary(tags)
            ),
            Self::UnusualHour {
                display_name,
                category,
                ..
            } => format!("{display_name} ({category}) seen outside normal hours"),
        }
    }
}

/// Per-face outcome within a frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceResult {
    pub identity_id: Option<IdentityId>,
    pub display_name: String,
    pub category: Option<Category>,
    pub confidence: f32,
    pub distance: f32,
    pub is_unknown: bool,
    pub location: BoundingBox,
    /// Suppressed by the cooldown: reported for display only, not persisted.
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_secs: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub behaviors: Vec<BehaviorTag>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub zone_violations: Vec<String>,
    pub unusual_hour: bool,
}

impl FaceResult {
    fn new(recognition: &Recognition, location: BoundingBox) -> Self {
        Self {
            identity_id: recognition.identity_id(),
            display_name: recognition.display_name().to_string(),
            category: recognition.category(),
            confidence: recognition.confidence(),
            distance: recognition.distance(),
            is_unknown: recognition.is_unknown(),
            location,
            cached: false,
            cooldown_remaining_secs: None,
            behaviors: Vec::new(),
            zone_violations: Vec::new(),
            unusual_hour: false,
        }
    }

    fn cached(recognition: &Recognition, location: BoundingBox, remaining: Duration) -> Self {
        Self {
            cached: true,
            cooldown_remaining_secs: Some(remaining.as_secs_f32()),
            ..Self::new(recognition, location)
        }
    }
}

/// Everything the pipeline learned from one frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameResult {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub camera_id: u32,
    pub sequence: u64,
    pub faces_detected: usize,
    pub faces: Vec<FaceResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counter: Option<CounterStats>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub zone_violations: Vec<ZoneViolation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<AlertEvent>,
    pub processing_ms: f64,
}

impl FrameResult {
    /// Faces that should be persisted (not suppressed by the cooldown).
    pub fn fresh_faces(&self) -> impl Iterator<Item = &FaceResult> {
        self.faces.iter().filter(|f| !f.cached)
    }
}

/// Counters accumulated since the last session reset.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub frames_processed: u64,
    pub faces_seen: u64,
    pub known_detected: u64,
    pub unknown_detected: u64,
    pub cached_detections: u64,
    pub events_created: u64,
    pub zone_violations: u64,
    pub behavior_alerts: u64,
    pub provider_failures: u64,
    pub rejected_faces: u64,
    pub elapsed_secs: f64,
    pub fps: f64,
    #[serde(skip)]
    started: Instant,
}

impl SessionStats {
    fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            frames_processed: 0,
            faces_seen: 0,
            known_detected: 0,
            unknown_detected: 0,
            cached_detections: 0,
            events_created: 0,
            zone_violations: 0,
            behavior_alerts: 0,
            provider_failures: 0,
            rejected_faces: 0,
            elapsed_secs: 0.0,
            fps: 0.0,
            started: Instant::now(),
        }
    }

    fn refreshed(&self) -> Self {
        let elapsed = self.started.elapsed().as_secs_f64();
        Self {
            elapsed_secs: elapsed,
            fps: if elapsed > 0.0 {
                self.frames_processed as f64 / elapsed
            } else {
                0.0
            },
            ..self.clone()
        }
    }
}

pub struct FramePipeline {
    camera_id: u32,
    alert_on_unknown: bool,
    matcher: Arc<IdentityMatcher>,
    cooldown: CooldownCache,
    counter: Option<PersonCounter>,
    zones: Option<ZoneChecker>,
    behavior: Option<BehaviorAnalyzer>,
    schedule: Option<AccessSchedule>,
    stats: SessionStats,
}

impl FramePipeline {
    pub fn new(
        config: &PipelineConfig,
        matcher: Arc<IdentityMatcher>,
        camera_id: u32,
    ) -> Result<Self, PipelineError> {
        let counter = if config.tracker.enabled {
            Some(PersonCounter::new(config.tracker.clone())?)
        } else {
            None
        };
        let zones = if config.zones.is_empty() {
            None
        } else {
            Some(ZoneChecker::from_config(&config.zones)?)
        };
        let behavior = config
            .behavior
            .enabled
            .then(|| BehaviorAnalyzer::new(config.behavior.clone()));
        let schedule = config
            .schedule
            .enabled
            .then(|| AccessSchedule::new(config.schedule.clone()));

        tracing::info!(
            camera_id,
            cooldown_secs = config.cooldown_seconds,
            tracker = counter.is_some(),
            zones = config.zones.len(),
            behavior = behavior.is_some(),
            schedule = schedule.is_some(),
            "frame pipeline configured"
        );

        Ok(Self {
            camera_id,
            alert_on_unknown: config.alert_on_unknown,
            matcher,
            cooldown: CooldownCache::new(Duration::from_secs(config.cooldown_seconds)),
            counter,
            zones,
            behavior,
            schedule,
            stats: SessionStats::new(),
        })
    }

    pub fn matcher(&self) -> &Arc<IdentityMatcher> {
        &self.matcher
    }

    pub fn counter(&self) -> Option<&PersonCounter> {
        self.counter.as_ref()
    }

    pub fn zones_mut(&mut self) -> &mut ZoneChecker {
        self.zones.get_or_insert_with(ZoneChecker::new)
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.refreshed()
    }

    /// Start a new session: zero the counters and forget cooldowns.
    pub fn reset_session(&mut self) -> SessionStats {
        let previous = self.stats();
        self.stats = SessionStats::new();
        self.cooldown.clear();
        tracing::info!(
            previous = %previous.session_id,
            session = %self.stats.session_id,
            "session reset"
        );
        previous
    }

    pub fn process_frame(
        &mut self,
        provider: &mut dyn EmbeddingProvider,
        frame: &Frame,
    ) -> FrameResult {
        self.process_frame_at(provider, frame, Utc::now())
    }

    /// Run one frame to completion. Cooldowns are measured on
    /// `frame.timestamp`; `now` stamps the result and the analytics.
    pub fn process_frame_at(
        &mut self,
        provider: &mut dyn EmbeddingProvider,
        frame: &Frame,
        now: DateTime<Utc>,
    ) -> FrameResult {
        let started = Instant::now();

        let detections = match provider.detect_and_encode(frame) {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!(sequence = frame.sequence, error = %e, "embedding provider failed; treating frame as empty");
                self.stats.provider_failures += 1;
                Vec::new()
            }
        };
        let faces_detected = detections.len();

        let mut faces = Vec::with_capacity(detections.len());
        let mut events = Vec::new();

        for detection in detections {
            let recognition = match self.matcher.match_embedding(&detection.embedding) {
                Ok(recognition) => recognition,
                Err(e) => {
                    tracing::warn!(sequence = frame.sequence, error = %e, "face rejected");
                    self.stats.rejected_faces += 1;
                    continue;
                }
            };
            self.stats.faces_seen += 1;

            let id = recognition.identity_id();
            if self.cooldown.should_process_at(id, frame.timestamp) {
                if recognition.is_unknown() {
                    self.stats.unknown_detected += 1;
                    if self.alert_on_unknown {
                        events.push(AlertEvent::UnknownPerson {
                            location: detection.region,
                        });
                    }
                } else {
                    self.stats.known_detected += 1;
                }
                faces.push(FaceResult::new(&recognition, detection.region));
            } else {
                self.stats.cached_detections += 1;
                let remaining = id
                    .map(|id| self.cooldown.time_until_next_at(id, frame.timestamp))
                    .unwrap_or_default();
                faces.push(FaceResult::cached(&recognition, detection.region, remaining));
            }
        }

        let counter = self.counter.as_mut().map(|counter| {
            let locations: Vec<BoundingBox> = faces.iter().map(|f| f.location).collect();
            counter.update(&locations, frame.shape())
        });

        let zone_violations = match self.zones.as_mut() {
            Some(zones) => {
                let subjects: Vec<ZoneSubject> = faces
                    .iter()
                    .map(|f| ZoneSubject {
                        location: f.location,
                        identity_id: f.identity_id,
                        display_name: f.display_name.clone(),
                        category: f.category,
                    })
                    .collect();
                zones.check_violations_at(&subjects, now)
            }
            None => Vec::new(),
        };
        for violation in &zone_violations {
            if let Some(face) = faces.get_mut(violation.subject_index) {
                face.zone_violations.push(violation.zone_name.clone());
            }
            events.push(AlertEvent::ZoneViolation {
                zone_name: violation.zone_name.clone(),
                identity_id: violation.identity_id,
                display_name: violation.display_name.clone(),
            });
        }
        self.stats.zone_violations += zone_violations.len() as u64;

        if let Some(behavior) = self.behavior.as_mut() {
            for face in faces.iter_mut() {
                let Some(id) = face.identity_id else {
                    continue;
                };
                face.behaviors = behavior.analyze(id, &face.location, now);
                if !face.behaviors.is_empty() {
                    self.stats.behavior_alerts += 1;
                    events.push(AlertEvent::Behavior {
                        identity_id: id,
                        display_name: face.display_name.clone(),
                        tags: face.behaviors.clone(),
                    });
                }
            }
        }

        if let Some(schedule) = self.schedule.as_ref() {
            for face in faces.iter_mut().filter(|f| !f.cached) {
                let (Some(id), Some(category)) = (face.identity_id, face.category) else {
                    continue;
                };
                if schedule.is_unusual(category, now) {
                    face.unusual_hour = true;
                    events.push(AlertEvent::UnusualHour {
                        identity_id: id,
                        display_name: face.display_name.clone(),
                        category,
                    });
                }
            }
        }

        self.stats.events_created += events.len() as u64;
        self.stats.frames_processed += 1;

        let result = FrameResult {
            session_id: self.stats.session_id,
            timestamp: now,
            camera_id: self.camera_id,
            sequence: frame.sequence,
            faces_detected,
            faces,
            counter,
            zone_violations,
            events,
            processing_ms: started.elapsed().as_secs_f64() * 1000.0,
        };

        tracing::debug!(
            sequence = result.sequence,
            faces = result.faces_detected,
            events = result.events.len(),
            ms = result.processing_ms,
            "frame processed"
        );
        result
    }
}
