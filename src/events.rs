use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Commands and notifications exchanged between the depthcam components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DepthcamEvent {
    /// Start a session if idle, stop it if active
    ToggleRecording { timestamp: SystemTime },
    StartRecording { timestamp: SystemTime },
    StopRecording { timestamp: SystemTime },
    /// A recording session has started
    RecordingStarted {
        session_id: Uuid,
        output_dir: PathBuf,
    },
    /// A recording session has stopped and its manifest was written
    RecordingStopped {
        session_id: Uuid,
        frame_count: u64,
        elapsed_seconds: f64,
    },
    /// A start request was rejected
    RecordingFailed { reason: String },
    /// Keyboard, signal or timer asked the process to exit
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl DepthcamEvent {
    pub fn toggle_recording() -> Self {
        Self::ToggleRecording {
            timestamp: SystemTime::now(),
        }
    }

    pub fn shutdown(reason: impl Into<String>) -> Self {
        Self::ShutdownRequested {
            timestamp: SystemTime::now(),
            reason: reason.into(),
        }
    }

    /// One-line text for logs
    pub fn description(&self) -> String {
        match self {
            DepthcamEvent::ToggleRecording { .. } => "Recording toggle requested".to_string(),
            DepthcamEvent::StartRecording { .. } => "Recording start requested".to_string(),
            DepthcamEvent::StopRecording { .. } => "Recording stop requested".to_string(),
            DepthcamEvent::RecordingStarted {
                session_id,
                output_dir,
            } => {
                format!(
                    "Recording {} started in {}",
                    session_id,
                    output_dir.display()
                )
            }
            DepthcamEvent::RecordingStopped {
                session_id,
                frame_count,
                elapsed_seconds,
            } => {
                format!(
                    "Recording {} stopped: {} frames in {:.2}s",
                    session_id, frame_count, elapsed_seconds
                )
            }
            DepthcamEvent::RecordingFailed { reason } => {
                format!("Recording failed: {}", reason)
            }
            DepthcamEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Stable name used by `EventFilter::EventTypes`
    pub fn event_type(&self) -> &'static str {
        match self {
            DepthcamEvent::ToggleRecording { .. } => "toggle_recording",
            DepthcamEvent::StartRecording { .. } => "start_recording",
            DepthcamEvent::StopRecording { .. } => "stop_recording",
            DepthcamEvent::RecordingStarted { .. } => "recording_started",
            DepthcamEvent::RecordingStopped { .. } => "recording_stopped",
            DepthcamEvent::RecordingFailed { .. } => "recording_failed",
            DepthcamEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }

    /// Whether this event asks the recorder to do something
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            DepthcamEvent::ToggleRecording { .. }
                | DepthcamEvent::StartRecording { .. }
                | DepthcamEvent::StopRecording { .. }
                | DepthcamEvent::ShutdownRequested { .. }
        )
    }
}

/// Broadcast bus shared by the keyboard, signal handlers and the recorder loop
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DepthcamEvent>,
}

impl EventBus {
    /// Bus holding up to `capacity` undelivered events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DepthcamEvent> {
        self.sender.subscribe()
    }

    /// Broadcast `event`; returns the number of subscribers it reached
    pub async fn publish(&self, event: DepthcamEvent) -> Result<usize, EventBusError> {
        match &event {
            DepthcamEvent::RecordingStarted { .. } | DepthcamEvent::RecordingStopped { .. } => {
                info!("{}", event.description());
            }
            DepthcamEvent::RecordingFailed { reason } => {
                error!("Recording failed: {}", reason);
            }
            DepthcamEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => debug!("Event: {}", event.description()),
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Which events an `EventReceiver` yields
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Everything
    All,
    /// Events whose `event_type` is listed
    EventTypes(Vec<&'static str>),
    /// Only events `is_command` accepts
    Commands,
}

impl EventFilter {
    /// Whether `event` is let through
    pub fn matches(&self, event: &DepthcamEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Commands => event.is_command(),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<DepthcamEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<DepthcamEvent>,
        filter: EventFilter,
        name: impl Into<String>,
    ) -> Self {
        Self {
            receiver,
            filter,
            name: name.into(),
        }
    }

    /// Next event accepted by the filter; lag is reported, not skipped
    pub async fn recv(&mut self) -> Result<DepthcamEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "{} <- {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("{} missed {} events", self.name, n);
                    return Err(EventBusError::Lagged(n));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("{}: event bus closed", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
