//! Embedding provider backed by precomputed detections.
//!
//! The detections file is JSON lines, one record per frame:
//!
//! ```text
//! {"sequence": 1, "faces": [{"region": {"x": 10, "y": 20, "width": 40, "height": 40},
//!                            "embedding": {"values": [0.1, 0.2]}}]}
//! {"sequence": 2, "error": "model timeout"}
//! ```
//!
//! Frames without a record have no faces.

use serde::Deserialize;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use watchpost_core::{EmbeddingProvider, FaceEncoding, Frame, ProviderError};

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct ReplayRecord {
    sequence: u64,
    #[serde(default)]
    faces: Vec<FaceEncoding>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
enum ReplayFrame {
    Faces(Vec<FaceEncoding>),
    Failure(String),
}

pub struct ReplayProvider {
    frames: HashMap<u64, ReplayFrame>,
    /// Wrap sequence numbers so a looping source replays the same detections.
    period: Option<u64>,
}

impl ReplayProvider {
    pub fn open(path: &Path) -> Result<Self, ReplayError> {
        let file = std::fs::File::open(path).map_err(|source| ReplayError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut frames = HashMap::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| ReplayError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ReplayRecord =
                serde_json::from_str(&line).map_err(|source| ReplayError::Parse {
                    path: path.to_path_buf(),
                    line: index + 1,
                    source,
                })?;
            let frame = match record.error {
                Some(reason) => ReplayFrame::Failure(reason),
                None => ReplayFrame::Faces(record.faces),
            };
            frames.insert(record.sequence, frame);
        }

        tracing::info!(path = %path.display(), frames = frames.len(), "loaded replay detections");
        Ok(Self {
            frames,
            period: None,
        })
    }

    /// Replay detections for sequence `((s - 1) % period) + 1`.
    pub fn with_period(mut self, period: u64) -> Self {
        self.period = (period > 0).then_some(period);
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn key(&self, sequence: u64) -> u64 {
        match self.period {
            Some(period) if sequence > 0 => (sequence - 1) % period + 1,
            _ => sequence,
        }
    }
}

impl EmbeddingProvider for ReplayProvider {
    fn detect_and_encode(&mut self, frame: &Frame) -> Result<Vec<FaceEncoding>, ProviderError> {
        match self.frames.get(&self.key(frame.sequence)) {
            Some(ReplayFrame::Faces(faces)) => Ok(faces.clone()),
            Some(ReplayFrame::Failure(reason)) => {
                Err(ProviderError::InferenceFailed(reason.clone()))
            }
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_lines(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    fn frame(sequence: u64) -> Frame {
        Frame::new(vec![128; 4], 2, 2, sequence)
    }

    #[test]
    fn test_replay_by_sequence() {
        let file = write_lines(&[
            r#"{"sequence": 1, "faces": [{"region": {"x": 10, "y": 20, "width": 40, "height": 40}, "embedding": {"values": [0.1, 0.2]}}]}"#,
            "",
            r#"{"sequence": 3, "error": "model timeout"}"#,
        ]);
        let mut provider = ReplayProvider::open(file.path()).unwrap();
        assert_eq!(provider.len(), 2);

        let faces = provider.detect_and_encode(&frame(1)).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].embedding.dimension(), 2);
        assert_eq!(faces[0].region.confidence, 1.0);

        assert!(provider.detect_and_encode(&frame(2)).unwrap().is_empty());
        assert!(matches!(
            provider.detect_and_encode(&frame(3)),
            Err(ProviderError::InferenceFailed(_))
        ));
    }

    #[test]
    fn test_replay_period_wraps() {
        let file = write_lines(&[
            r#"{"sequence": 2, "faces": [{"region": {"x": 0, "y": 0, "width": 4, "height": 4}, "embedding": {"values": [1.0]}}]}"#,
        ]);
        let mut provider = ReplayProvider::open(file.path()).unwrap().with_period(3);
        assert_eq!(provider.detect_and_encode(&frame(5)).unwrap().len(), 1);
        assert!(provider.detect_and_encode(&frame(4)).unwrap().is_empty());
    }

    #[test]
    fn test_parse_error_names_line() {
        let file = write_lines(&[r#"{"sequence": 1}"#, "not json"]);
        match ReplayProvider::open(file.path()) {
            Err(ReplayError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other.map(|p| p.len())),
        }
    }
}
