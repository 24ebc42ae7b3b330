use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use watchpost_capture::FrameQueue;
use watchpost_core::sink::{deliver_to_sinks, ResultSink};
use watchpost_core::{EmbeddingProvider, FramePipeline, SessionStats};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Control messages sent to the engine thread.
enum EngineRequest {
    Stats {
        reply: oneshot::Sender<SessionStats>,
    },
    Reset {
        reply: oneshot::Sender<SessionStats>,
    },
    Shutdown,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Current session statistics.
    pub async fn stats(&self) -> Result<SessionStats, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Stats { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Start a new session; returns the statistics of the one that ended.
    pub async fn reset_session(&self) -> Result<SessionStats, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Reset { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Ask the engine to stop after the frame in progress.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.tx
            .send(EngineRequest::Shutdown)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The engine pulls frames from `queue` one at a time, runs them through the
/// pipeline and hands each result to `sinks`. Between frames it services
/// control requests. The thread returns the final session statistics when
/// shut down or when every handle has been dropped.
pub fn spawn_engine(
    mut pipeline: FramePipeline,
    mut provider: Box<dyn EmbeddingProvider>,
    queue: FrameQueue,
    mut sinks: Vec<Box<dyn ResultSink>>,
    poll_interval: Duration,
) -> Result<(EngineHandle, JoinHandle<SessionStats>), EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    let thread = std::thread::Builder::new()
        .name("watchpost-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            'run: loop {
                loop {
                    match rx.try_recv() {
                        Ok(EngineRequest::Stats { reply }) => {
                            let _ = reply.send(pipeline.stats());
                        }
                        Ok(EngineRequest::Reset { reply }) => {
                            let _ = reply.send(pipeline.reset_session());
                        }
                        Ok(EngineRequest::Shutdown) | Err(TryRecvError::Disconnected) => {
                            break 'run;
                        }
                        Err(TryRecvError::Empty) => break,
                    }
                }

                let Some(frame) = queue.pop(poll_interval) else {
                    continue;
                };
                let result = pipeline.process_frame(provider.as_mut(), &frame);
                deliver_to_sinks(&mut sinks, &result);
            }

            let stats = pipeline.stats();
            tracing::info!(
                session = %stats.session_id,
                frames = stats.frames_processed,
                faces = stats.faces_seen,
                events = stats.events_created,
                dropped_frames = queue.dropped(),
                "engine thread exiting"
            );
            stats
        })?;

    Ok((EngineHandle { tx }, thread))
}
