//! Bounded frame hand-off between the producer thread and the engine.
//!
//! The queue favours freshness: when full, the oldest frame is evicted so a
//! slow consumer always sees recent frames. Pushes never block longer than
//! the configured timeout.

use crate::source::FrameSource;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use watchpost_core::Frame;

pub const DEFAULT_CAPACITY: usize = 2;
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The oldest queued frame was evicted to make room.
    ReplacedOldest,
    /// The push timed out or the consumer is gone; the frame was discarded.
    Dropped,
}

#[derive(Clone)]
pub struct FrameQueue {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    push_timeout: Duration,
    dropped: Arc<AtomicU64>,
    evicted: Arc<AtomicU64>,
}

impl FrameQueue {
    pub fn new(capacity: usize, push_timeout: Duration) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        Self {
            tx,
            rx,
            push_timeout,
            dropped: Arc::new(AtomicU64::new(0)),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn push(&self, frame: Frame) -> PushOutcome {
        let frame = match self.tx.try_send(frame) {
            Ok(()) => return PushOutcome::Queued,
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return PushOutcome::Dropped;
            }
            Err(TrySendError::Full(frame)) => frame,
        };

        let evicted = self.rx.try_recv().is_ok();
        if evicted {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }

        match self.tx.send_timeout(frame, self.push_timeout) {
            Ok(()) if evicted => PushOutcome::ReplacedOldest,
            Ok(()) => PushOutcome::Queued,
            Err(SendTimeoutError::Timeout(f)) | Err(SendTimeoutError::Disconnected(f)) => {
                tracing::debug!(sequence = f.sequence, "frame dropped; queue full");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Dropped
            }
        }
    }

    /// Wait up to `timeout` for the next frame.
    pub fn pop(&self, timeout: Duration) -> Option<Frame> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_PUSH_TIMEOUT)
    }
}

/// What the producer thread did before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub frames_read: u64,
    pub dark_skipped: u64,
    pub read_errors: u64,
    /// The source ran out of frames (as opposed to being cancelled).
    pub exhausted: bool,
}

#[derive(Debug, Clone)]
pub struct ProducerOptions {
    pub skip_dark: bool,
    /// Delay between frames; zero reads as fast as the source allows.
    pub frame_interval: Duration,
    /// Consecutive read errors tolerated before the producer gives up.
    pub max_consecutive_errors: u32,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            skip_dark: false,
            frame_interval: Duration::ZERO,
            max_consecutive_errors: 5,
        }
    }
}

/// Read frames from `source` into `queue` on a dedicated thread until the
/// source is exhausted or `cancelled` is set. The source is released when
/// the thread ends.
pub fn spawn_producer(
    mut source: Box<dyn FrameSource>,
    queue: FrameQueue,
    cancelled: Arc<AtomicBool>,
    options: ProducerOptions,
) -> std::io::Result<JoinHandle<ProducerReport>> {
    std::thread::Builder::new()
        .name("watchpost-producer".into())
        .spawn(move || {
            let mut report = ProducerReport::default();
            let mut consecutive_errors = 0u32;

            while !cancelled.load(Ordering::Relaxed) {
                let frame = match source.next_frame() {
                    Ok(Some(frame)) => {
                        consecutive_errors = 0;
                        frame
                    }
                    Ok(None) => {
                        report.exhausted = true;
                        break;
                    }
                    Err(e) => {
                        report.read_errors += 1;
                        consecutive_errors += 1;
                        tracing::warn!(error = %e, consecutive_errors, "frame read failed");
                        if consecutive_errors >= options.max_consecutive_errors {
                            tracing::error!("too many consecutive read errors; producer stopping");
                            break;
                        }
                        continue;
                    }
                };
                report.frames_read += 1;

                if options.skip_dark && frame.is_dark {
                    report.dark_skipped += 1;
                    tracing::debug!(sequence = frame.sequence, "skipping dark frame");
                    continue;
                }

                queue.push(frame);

                if !options.frame_interval.is_zero() {
                    std::thread::sleep(options.frame_interval);
                }
            }

            tracing::info!(
                frames = report.frames_read,
                dark = report.dark_skipped,
                errors = report.read_errors,
                exhausted = report.exhausted,
                "producer stopped"
            );
            report
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{BlankSource, SourceError};

    fn frame(sequence: u64) -> Frame {
        Frame::new(vec![128; 4], 2, 2, sequence)
    }

    #[test]
    fn test_push_pop_in_order() {
        let queue = FrameQueue::default();
        assert_eq!(queue.push(frame(1)), PushOutcome::Queued);
        assert_eq!(queue.push(frame(2)), PushOutcome::Queued);
        assert_eq!(queue.pop(Duration::from_millis(10)).unwrap().sequence, 1);
        assert_eq!(queue.pop(Duration::from_millis(10)).unwrap().sequence, 2);
        assert!(queue.pop(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_full_queue_evicts_oldest() {
        let queue = FrameQueue::new(2, Duration::from_millis(10));
        queue.push(frame(1));
        queue.push(frame(2));
        assert_eq!(queue.push(frame(3)), PushOutcome::ReplacedOldest);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.evicted(), 1);

        let first = queue.pop(Duration::from_millis(10)).unwrap();
        assert_eq!(first.sequence, 2);
        assert_eq!(queue.pop(Duration::from_millis(10)).unwrap().sequence, 3);
        assert_eq!(queue.dropped(), 0);
    }

    #[test]
    fn test_producer_drains_source() {
        let queue = FrameQueue::new(16, DEFAULT_PUSH_TIMEOUT);
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = spawn_producer(
            Box::new(BlankSource::new(4, 4, 5)),
            queue.clone(),
            cancelled,
            ProducerOptions::default(),
        )
        .unwrap();

        let report = handle.join().unwrap();
        assert!(report.exhausted);
        assert_eq!(report.frames_read, 5);
        assert_eq!(queue.len(), 5);
    }

    #[test]
    fn test_producer_skips_dark_frames() {
        let queue = FrameQueue::new(16, DEFAULT_PUSH_TIMEOUT);
        let handle = spawn_producer(
            Box::new(BlankSource::new(4, 4, 3).brightness(0)),
            queue.clone(),
            Arc::new(AtomicBool::new(false)),
            ProducerOptions {
                skip_dark: true,
                ..ProducerOptions::default()
            },
        )
        .unwrap();

        let report = handle.join().unwrap();
        assert_eq!(report.dark_skipped, 3);
        assert!(queue.is_empty());
    }

    struct BrokenSource;

    impl FrameSource for BrokenSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
            Err(SourceError::NotFound("unplugged".into()))
        }
    }

    #[test]
    fn test_producer_gives_up_after_errors() {
        let queue = FrameQueue::default();
        let handle = spawn_producer(
            Box::new(BrokenSource),
            queue,
            Arc::new(AtomicBool::new(false)),
            ProducerOptions::default(),
        )
        .unwrap();
        let report = handle.join().unwrap();
        assert_eq!(report.read_errors, 5);
        assert!(!report.exhausted);
    }

    #[test]
    fn test_cancelled_producer_stops() {
        let queue = FrameQueue::default();
        let cancelled = Arc::new(AtomicBool::new(true));
        let handle = spawn_producer(
            Box::new(BlankSource::new(4, 4, 100)),
            queue.clone(),
            cancelled,
            ProducerOptions::default(),
        )
        .unwrap();
        let report = handle.join().unwrap();
        assert_eq!(report.frames_read, 0);
        assert!(queue.is_empty());
    }
}
