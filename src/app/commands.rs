use super::ShutdownReason;
use crate::events::{DepthcamEvent, EventBus, EventFilter, EventReceiver};
use crate::error::EventBusError;
use crate::session::Recorder;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(super) type ShutdownSender = Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

/// Apply one command to the recorder and announce the outcome.
///
/// Returns a shutdown reason when the event asks the application to exit;
/// the active session is left for the shutdown sequence to stop.
pub async fn handle_command(
    recorder: &Mutex<Recorder>,
    event_bus: &EventBus,
    event: DepthcamEvent,
) -> Option<ShutdownReason> {
    match event {
        DepthcamEvent::ToggleRecording { .. } => {
            let active = recorder.lock().await.is_active();
            if active {
                stop_recording(recorder, event_bus).await;
            } else {
                start_recording(recorder, event_bus).await;
            }
            None
        }
        DepthcamEvent::StartRecording { .. } => {
            start_recording(recorder, event_bus).await;
            None
        }
        DepthcamEvent::StopRecording { .. } => {
            stop_recording(recorder, event_bus).await;
            None
        }
        DepthcamEvent::ShutdownRequested { reason, .. } => Some(ShutdownReason::UserRequest(reason)),
        _ => None,
    }
}

async fn start_recording(recorder: &Mutex<Recorder>, event_bus: &EventBus) {
    let result = recorder.lock().await.start().await;
    let event = match result {
        Ok(info) => DepthcamEvent::RecordingStarted {
            session_id: info.session_id,
            output_dir: info.output_dir,
        },
        Err(e) => DepthcamEvent::RecordingFailed {
            reason: e.to_string(),
        },
    };
    announce(event_bus, event).await;
}

async fn stop_recording(recorder: &Mutex<Recorder>, event_bus: &EventBus) {
    let Some(manifest) = recorder.lock().await.stop().await else {
        debug!("Stop requested while no session is active");
        return;
    };
    announce(
        event_bus,
        DepthcamEvent::RecordingStopped {
            session_id: manifest.session_id,
            frame_count: manifest.frame_count,
            elapsed_seconds: manifest.elapsed_seconds,
        },
    )
    .await;
}

async fn announce(event_bus: &EventBus, event: DepthcamEvent) {
    if let Err(e) = event_bus.publish(event).await {
        debug!("Notification not delivered: {}", e);
    }
}

/// Route bus commands to the recorder until cancelled
pub(super) fn spawn_command_loop(
    recorder: Arc<Mutex<Recorder>>,
    event_bus: Arc<EventBus>,
    shutdown_sender: ShutdownSender,
    cancellation_token: CancellationToken,
) -> JoinHandle<()> {
    let mut commands = EventReceiver::new(event_bus.subscribe(), EventFilter::Commands, "commands");

    tokio::spawn(async move {
        debug!("Command loop started");
        loop {
            let event = tokio::select! {
                _ = cancellation_token.cancelled() => break,
                event = commands.recv() => event,
            };

            let event = match event {
                Ok(event) => event,
                Err(EventBusError::Lagged(_)) => continue,
                Err(e) => {
                    warn!("Command loop stopping: {}", e);
                    break;
                }
            };

            if let Some(reason) = handle_command(&recorder, &event_bus, event).await {
                info!("Shutdown requested: {:?}", reason);
                if let Some(sender) = shutdown_sender.lock().await.take() {
                    let _ = sender.send(reason);
                }
            }
        }
        debug!("Command loop stopped");
    })
}
