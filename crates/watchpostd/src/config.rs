use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use watchpost_core::PipelineConfig;

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by
/// `WATCHPOST_CONFIG`, then `WATCHPOST_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera identifier stamped on every result.
    pub camera_id: u32,
    /// JSON identity registry.
    pub registry_path: PathBuf,
    /// Seconds between registry reloads; 0 disables reloading.
    pub reload_interval_secs: u64,
    /// Directory of images played as the camera feed.
    pub source_dir: PathBuf,
    /// Replay the source directory forever.
    pub loop_source: bool,
    /// Precomputed detections (JSON lines) consumed by the replay provider.
    pub detections_path: PathBuf,
    /// Where per-frame results are appended as JSON lines; unset logs only.
    pub results_path: Option<PathBuf>,
    /// Delay between frames read from the source.
    pub frame_interval_ms: u64,
    pub queue_capacity: usize,
    pub push_timeout_ms: u64,
    /// How long the engine waits for a frame before checking control messages.
    pub poll_interval_ms: u64,
    /// Skip frames that are almost entirely black before they reach the engine.
    pub skip_dark_frames: bool,
    pub pipeline: PipelineConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            camera_id: 0,
            registry_path: data_dir.join("registry.json"),
            reload_interval_secs: 60,
            source_dir: data_dir.join("frames"),
            loop_source: false,
            detections_path: data_dir.join("detections.jsonl"),
            results_path: None,
            frame_interval_ms: 0,
            queue_capacity: 2,
            push_timeout_ms: 50,
            poll_interval_ms: 100,
            skip_dark_frames: false,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("WATCHPOST_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `WATCHPOST_*` overrides for scalar settings.
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("WATCHPOST_REGISTRY") {
            self.registry_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("WATCHPOST_SOURCE_DIR") {
            self.source_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("WATCHPOST_DETECTIONS") {
            self.detections_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("WATCHPOST_RESULTS") {
            self.results_path = Some(PathBuf::from(path));
        }
        self.camera_id = env_u64("WATCHPOST_CAMERA_ID", self.camera_id.into())
            .try_into()
            .unwrap_or(self.camera_id);
        self.reload_interval_secs = env_u64("WATCHPOST_RELOAD_INTERVAL_SECS", self.reload_interval_secs);
        self.frame_interval_ms = env_u64("WATCHPOST_FRAME_INTERVAL_MS", self.frame_interval_ms);
        self.queue_capacity = env_usize("WATCHPOST_QUEUE_CAPACITY", self.queue_capacity);
        self.loop_source = env_bool("WATCHPOST_LOOP_SOURCE", self.loop_source);
        self.skip_dark_frames = env_bool("WATCHPOST_SKIP_DARK_FRAMES", self.skip_dark_frames);

        let pipeline = &mut self.pipeline;
        pipeline.tolerance = env_f32("WATCHPOST_TOLERANCE", pipeline.tolerance);
        pipeline.cooldown_seconds = env_u64("WATCHPOST_COOLDOWN_SECS", pipeline.cooldown_seconds);
        pipeline.alert_on_unknown = env_bool("WATCHPOST_ALERT_ON_UNKNOWN", pipeline.alert_on_unknown);
        pipeline.tracker.enabled = env_bool("WATCHPOST_TRACKER_ENABLED", pipeline.tracker.enabled);
        pipeline.behavior.enabled = env_bool("WATCHPOST_BEHAVIOR_ENABLED", pipeline.behavior.enabled);
        pipeline.schedule.enabled = env_bool("WATCHPOST_SCHEDULE_ENABLED", pipeline.schedule.enabled);
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("watchpost")
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchpost_core::Category;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.queue_capacity, 2);
        assert_eq!(config.push_timeout_ms, 50);
        assert_eq!(config.pipeline.cooldown_seconds, 30);
        assert!((config.pipeline.tolerance - 0.6).abs() < 1e-6);
        assert!(config.registry_path.ends_with("watchpost/registry.json"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
camera_id = 4
source_dir = "/srv/frames"

[pipeline]
tolerance = 0.5

[pipeline.tracker]
counting_line_position = 0.25

[[pipeline.zones]]
name = "server room"
polygon = [[0.0, 0.0], [100.0, 0.0], [100.0, 100.0]]
authorized = ["employee"]
"#,
        )
        .unwrap();

        assert_eq!(config.camera_id, 4);
        assert_eq!(config.source_dir, PathBuf::from("/srv/frames"));
        assert!((config.pipeline.tolerance - 0.5).abs() < 1e-6);
        assert_eq!(config.pipeline.cooldown_seconds, 30);
        assert!((config.pipeline.tracker.counting_line_position - 0.25).abs() < 1e-6);
        assert!(config.pipeline.tracker.enabled);
        assert_eq!(config.pipeline.zones.len(), 1);
        assert_eq!(config.pipeline.zones[0].authorized, vec![Category::Employee]);
        assert_eq!(config.queue_capacity, 2);
    }

    #[test]
    fn test_schedule_hours_from_toml() {
        let config = Config::from_toml(
            r#"
[pipeline.schedule]
utc_offset_minutes = 120
employee = { start = 6, end = 22 }
"#,
        )
        .unwrap();
        let schedule = &config.pipeline.schedule;
        assert_eq!(schedule.utc_offset_minutes, 120);
        assert_eq!((schedule.employee.start, schedule.employee.end), (6, 22));
        assert_eq!(schedule.resident.start, 6);
    }

    #[test]
    fn test_bad_toml_is_error() {
        assert!(Config::from_toml("camera_id = \"front door\"").is_err());
    }
}
