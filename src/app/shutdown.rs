use super::{ComponentState, DepthcamOrchestrator};
use crate::error::Result;
use crate::events::DepthcamEvent;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

impl DepthcamOrchestrator {
    /// Stop every component; an active session is finalized first so its
    /// manifest is written before the channels close
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");
        let mut exit_code = 0;

        if self.keyboard_enabled {
            if let Some(keyboard_handler) = &self.keyboard_handler {
                self.set_component_state("keyboard", ComponentState::Stopping)
                    .await;
                if let Err(e) = keyboard_handler.stop().await {
                    error!("Error stopping keyboard: {}", e);
                    exit_code = 1;
                }
                self.set_component_state("keyboard", ComponentState::Stopped)
                    .await;
            }
        }

        // Command sources go first so nothing restarts the recorder
        self.cancellation_token.cancel();
        for task in self.background_tasks.drain(..) {
            if timeout(Duration::from_secs(3), task).await.is_err() {
                warn!("Background task did not stop within timeout");
            }
        }

        self.set_component_state("recorder", ComponentState::Stopping)
            .await;
        let manifest = self.recorder.lock().await.stop().await;
        if let Some(manifest) = manifest {
            let _ = self
                .event_bus
                .publish(DepthcamEvent::RecordingStopped {
                    session_id: manifest.session_id,
                    frame_count: manifest.frame_count,
                    elapsed_seconds: manifest.elapsed_seconds,
                })
                .await;
            if manifest.sinks.iter().any(|s| !s.finished_cleanly) {
                exit_code = 1;
            }
        }
        self.set_component_state("recorder", ComponentState::Stopped)
            .await;

        if let Some(acquisition) = self.acquisition.take() {
            self.set_component_state("acquisition", ComponentState::Stopping)
                .await;
            let stats = acquisition.stop().await;
            for channel in &stats {
                info!(
                    "Channel '{}': {} frames acquired over {} polls",
                    channel.channel, channel.frames_acquired, channel.polls
                );
            }
            self.set_component_state("acquisition", ComponentState::Stopped)
                .await;
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }
}
