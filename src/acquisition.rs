use crate::source::FrameSource;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Statistics reported by a finished acquisition task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionStats {
    pub channel: String,
    pub polls: u64,
    pub frames_acquired: u64,
}

/// Background polling of every open channel.
///
/// Each channel gets its own task that exclusively owns its [`FrameSource`],
/// so at most one acquisition per channel is ever in flight. The tasks run
/// until [`AcquisitionLoop::stop`] is called, independent of any recording
/// session.
pub struct AcquisitionLoop {
    cancellation_token: CancellationToken,
    tasks: Vec<JoinHandle<AcquisitionStats>>,
}

impl AcquisitionLoop {
    /// Spawn one polling task per source
    pub fn start(sources: Vec<FrameSource>, poll_interval: Duration) -> Self {
        let cancellation_token = CancellationToken::new();
        let poll_interval = poll_interval.max(Duration::from_millis(1));

        info!(
            "Starting acquisition for {} channel(s), polling every {:?}",
            sources.len(),
            poll_interval
        );

        let tasks = sources
            .into_iter()
            .map(|source| {
                let token = cancellation_token.clone();
                tokio::spawn(Self::run_channel(source, poll_interval, token))
            })
            .collect();

        Self {
            cancellation_token,
            tasks,
        }
    }

    /// Poll interval for a device refreshing at `fps`: twice per device frame
    pub fn poll_interval_for(fps: u32) -> Duration {
        Duration::from_secs_f64(1.0 / (fps.max(1) as f64 * 2.0))
    }

    async fn run_channel(
        mut source: FrameSource,
        poll_interval: Duration,
        token: CancellationToken,
    ) -> AcquisitionStats {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut polls = 0u64;

        debug!("Acquisition task for '{}' started", source.name());

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    polls += 1;
                    source.acquire_latest();
                }
            }
        }

        source.close();

        let stats = AcquisitionStats {
            channel: source.name().to_string(),
            polls,
            frames_acquired: source.frames_acquired(),
        };
        debug!("Acquisition task for '{}' stopped: {:?}", stats.channel, stats);
        stats
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }

    /// Stop every task and close its channel
    pub async fn stop(self) -> Vec<AcquisitionStats> {
        info!("Stopping acquisition");
        self.cancellation_token.cancel();

        let mut stats = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            match tokio::time::timeout(Duration::from_secs(3), task).await {
                Ok(Ok(channel_stats)) => stats.push(channel_stats),
                Ok(Err(e)) => error!("Acquisition task failed: {}", e),
                Err(_) => warn!("Acquisition task did not stop within timeout"),
            }
        }

        info!("Acquisition stopped");
        stats
    }
}
