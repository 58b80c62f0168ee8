use super::commands::ShutdownSender;
use super::types::{ComponentState, ShutdownReason};
use crate::acquisition::AcquisitionLoop;
use crate::config::DepthcamConfig;
use crate::events::EventBus;
use crate::keyboard_input::KeyboardInputHandler;
use crate::registry::FrameRegistry;
use crate::session::{Recorder, RecordingOptions};
use crate::source::{FrameSource, SensorChannel, SyntheticSensor, COLOR_CHANNEL, DEPTH_CHANNEL};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Main application coordinator: sensor channels, acquisition, recorder and
/// the command sources that drive it
pub struct DepthcamOrchestrator {
    pub(super) config: DepthcamConfig,
    pub(super) event_bus: Arc<EventBus>,
    pub(super) registry: Arc<FrameRegistry>,
    pub(super) recorder: Arc<Mutex<Recorder>>,

    // Components
    pub(super) sources: Option<Vec<FrameSource>>,
    pub(super) acquisition: Option<AcquisitionLoop>,
    pub(super) keyboard_handler: Option<KeyboardInputHandler>,
    pub(super) keyboard_enabled: bool,
    pub(super) record_duration: Option<Duration>,
    pub(super) background_tasks: Vec<JoinHandle<()>>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: ShutdownSender,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl DepthcamOrchestrator {
    /// Create an orchestrator backed by the synthetic sensor
    pub fn new(config: DepthcamConfig) -> Self {
        let (cw, ch) = config.sensor.color_resolution;
        let (dw, dh) = config.sensor.depth_resolution;
        let fps = config.sensor.fps;
        Self::with_sensors(
            config,
            Box::new(SyntheticSensor::color(cw, ch, fps)),
            Box::new(SyntheticSensor::depth(dw, dh, fps)),
        )
    }

    /// Create an orchestrator over the given color and depth readers
    pub fn with_sensors(
        config: DepthcamConfig,
        color: Box<dyn SensorChannel>,
        depth: Box<dyn SensorChannel>,
    ) -> Self {
        let event_bus = Arc::new(EventBus::new(config.system.event_bus_capacity));

        // The registry is built before the sources so they can publish into it
        let registry = Arc::new(FrameRegistry::new([
            crate::registry::ChannelInfo {
                name: COLOR_CHANNEL.to_string(),
                description: FrameSource::output_description(
                    crate::source::ChannelKind::Color,
                    color.description(),
                ),
            },
            crate::registry::ChannelInfo {
                name: DEPTH_CHANNEL.to_string(),
                description: FrameSource::output_description(
                    crate::source::ChannelKind::Depth,
                    depth.description(),
                ),
            },
        ]));

        let sources = vec![
            FrameSource::color(COLOR_CHANNEL, color, Arc::clone(&registry)),
            FrameSource::depth(DEPTH_CHANNEL, depth, Arc::clone(&registry)),
        ];

        let recorder = Recorder::new(Arc::clone(&registry), RecordingOptions::from_config(&config));
        let keyboard_handler = Some(KeyboardInputHandler::new(Arc::clone(&event_bus)));
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        info!(
            "Depthcam configured: {} channel(s), recording at {}fps to {}",
            sources.len(),
            config.recording.frame_rate,
            config.recording.output_path
        );

        Self {
            config,
            event_bus,
            registry,
            recorder: Arc::new(Mutex::new(recorder)),
            sources: Some(sources),
            acquisition: None,
            keyboard_handler,
            keyboard_enabled: false,
            record_duration: None,
            background_tasks: Vec::new(),
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Enable or disable the keyboard input handler
    pub fn set_keyboard_enabled(&mut self, enabled: bool) {
        self.keyboard_enabled = enabled;
    }

    /// Record immediately on start and shut down after `duration`
    pub fn set_record_duration(&mut self, duration: Option<Duration>) {
        self.record_duration = duration;
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn registry(&self) -> Arc<FrameRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn recorder(&self) -> Arc<Mutex<Recorder>> {
        Arc::clone(&self.recorder)
    }

    pub fn config(&self) -> &DepthcamConfig {
        &self.config
    }
}
