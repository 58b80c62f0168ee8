use super::commands::spawn_command_loop;
use super::status::spawn_status_line;
use super::{ComponentState, DepthcamOrchestrator, ShutdownReason};
use crate::acquisition::AcquisitionLoop;
use crate::error::{DepthcamError, Result};
use crate::events::DepthcamEvent;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};

impl DepthcamOrchestrator {
    /// Register the components that will be started
    pub async fn initialize(&mut self) -> Result<()> {
        let mut states = self.component_states.lock().await;
        states.insert("acquisition".to_string(), ComponentState::Stopped);
        states.insert("recorder".to_string(), ComponentState::Stopped);
        if self.keyboard_enabled {
            states.insert("keyboard".to_string(), ComponentState::Stopped);
        }
        Ok(())
    }

    /// Start acquisition, the command loop and the optional command sources
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting depthcam");

        let sources = self
            .sources
            .take()
            .ok_or_else(|| DepthcamError::system("Sensor channels already started"))?;

        self.set_component_state("acquisition", ComponentState::Starting)
            .await;
        self.acquisition = Some(AcquisitionLoop::start(
            sources,
            AcquisitionLoop::poll_interval_for(self.config.sensor.fps),
        ));
        self.set_component_state("acquisition", ComponentState::Running)
            .await;

        self.background_tasks.push(spawn_command_loop(
            Arc::clone(&self.recorder),
            Arc::clone(&self.event_bus),
            Arc::clone(&self.shutdown_sender),
            self.cancellation_token.clone(),
        ));
        self.background_tasks.push(spawn_status_line(
            Arc::clone(&self.recorder),
            Duration::from_secs(self.config.system.status_interval_seconds),
            self.cancellation_token.clone(),
        ));
        self.set_component_state("recorder", ComponentState::Running)
            .await;

        if self.keyboard_enabled {
            if let Some(keyboard_handler) = &self.keyboard_handler {
                self.set_component_state("keyboard", ComponentState::Starting)
                    .await;
                keyboard_handler.start().await.map_err(|e| {
                    error!("Failed to start keyboard handler: {}", e);
                    e
                })?;
                self.set_component_state("keyboard", ComponentState::Running)
                    .await;
            }
        }

        if let Some(duration) = self.record_duration {
            self.start_timed_recording(duration);
        }

        info!("Depthcam started");
        Ok(())
    }

    fn start_timed_recording(&mut self, duration: Duration) {
        let event_bus = Arc::clone(&self.event_bus);
        let shutdown_sender = Arc::clone(&self.shutdown_sender);
        let token = self.cancellation_token.clone();

        info!("Recording for {:?}, then shutting down", duration);

        self.background_tasks.push(tokio::spawn(async move {
            if let Err(e) = event_bus
                .publish(DepthcamEvent::StartRecording {
                    timestamp: SystemTime::now(),
                })
                .await
            {
                warn!("Failed to request recording start: {}", e);
            }

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(duration) => {}
            }

            if let Some(sender) = shutdown_sender.lock().await.take() {
                let _ = sender.send(ShutdownReason::RecordingComplete);
            }
        }));
    }
}
