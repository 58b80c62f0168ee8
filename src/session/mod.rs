//! Recording sessions: sink lifecycle, the paced fan-out loop and the
//! manifest written when a session ends.

mod factory;
mod manifest;


pub use factory::{SinkFactory, SinkRequest, SinkRole, StandardSinkFactory};
pub use manifest::{
    effective_rate, SessionManifest, SinkReport, LUT_DUMP_FILE, MANIFEST_JSON_FILE,
    MANIFEST_LOG_FILE,
};

use crate::config::{ContainerFormat, DepthcamConfig, MAX_FRAME_RATE};
use crate::error::SessionError;
use crate::lut::DepthColorLut;
use crate::registry::{ChannelInfo, FrameRegistry};
use crate::sink::{Sink, Tick};
use chrono::{DateTime, Local};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Destination of the per-channel UDP sinks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkTarget {
    pub address: SocketAddr,
    pub send_timeout: Duration,
}

/// Destination of the aggregate HTTP sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateTarget {
    pub url: String,
    pub request_timeout: Duration,
    pub max_in_flight: usize,
}

/// Everything a session needs besides the registry
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingOptions {
    pub output_root: PathBuf,
    pub frame_rate: u32,
    pub container: ContainerFormat,
    /// `None` disables the UDP sinks
    pub network: Option<NetworkTarget>,
    /// `None` disables the aggregate sink
    pub aggregate: Option<AggregateTarget>,
}

impl RecordingOptions {
    /// File sinks only, raw container
    pub fn new(output_root: impl Into<PathBuf>, frame_rate: u32) -> Self {
        Self {
            output_root: output_root.into(),
            frame_rate,
            container: ContainerFormat::Raw,
            network: None,
            aggregate: None,
        }
    }

    pub fn from_config(config: &DepthcamConfig) -> Self {
        let network = if config.network.enabled {
            match config.network.socket_addr() {
                Some(address) => Some(NetworkTarget {
                    address,
                    send_timeout: Duration::from_millis(config.network.send_timeout_ms),
                }),
                None => {
                    warn!(
                        "Network sink disabled: '{}' is not a valid IP address",
                        config.network.ip
                    );
                    None
                }
            }
        } else {
            None
        };

        let aggregate = config.aggregate.enabled.then(|| AggregateTarget {
            url: config.aggregate.url(),
            request_timeout: Duration::from_millis(config.aggregate.timeout_ms),
            max_in_flight: config.aggregate.max_in_flight,
        });

        Self {
            output_root: config.recording.output_root(),
            frame_rate: config.recording.frame_rate,
            container: config.recording.container,
            network,
            aggregate,
        }
    }

    /// Sinks to open, in dispatch order: per channel file then network,
    /// then the aggregate sink
    fn sink_plan<'a>(&self, channels: &'a [ChannelInfo]) -> Vec<(SinkRole, Option<&'a ChannelInfo>)> {
        let mut plan = Vec::with_capacity(channels.len() * 2 + 1);
        for channel in channels {
            plan.push((SinkRole::File, Some(channel)));
            if self.network.is_some() {
                plan.push((SinkRole::Network, Some(channel)));
            }
        }
        if self.aggregate.is_some() {
            plan.push((SinkRole::Aggregate, None));
        }
        plan
    }
}

/// Returned by a successful start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub output_dir: PathBuf,
    pub sink_count: usize,
}

/// A sink plus the errors the pacing loop has seen from it
struct SinkSlot {
    sink: Box<dyn Sink>,
    dispatch_errors: u64,
}

impl SinkSlot {
    fn new(sink: Box<dyn Sink>) -> Self {
        Self {
            sink,
            dispatch_errors: 0,
        }
    }

    async fn dispatch(&mut self, tick: &Tick) {
        if let Err(e) = self.sink.write(tick).await {
            self.dispatch_errors += 1;
            if self.dispatch_errors == 1 {
                warn!(
                    "Sink '{}' failed on tick {}: {} (further failures logged at debug)",
                    self.sink.name(),
                    tick.index,
                    e
                );
            } else {
                debug!(
                    "Sink '{}' failure #{} on tick {}: {}",
                    self.sink.name(),
                    self.dispatch_errors,
                    tick.index,
                    e
                );
            }
        }
    }

    async fn finish(mut self) -> SinkReport {
        let finished_cleanly = match self.sink.finish().await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to finish sink '{}': {}", self.sink.name(), e);
                false
            }
        };
        SinkReport {
            name: self.sink.name().to_string(),
            dispatch_errors: self.dispatch_errors,
            finished_cleanly,
            stats: self.sink.stats(),
        }
    }
}

struct ActiveSession {
    id: Uuid,
    output_dir: PathBuf,
    start_time: DateTime<Local>,
    started: Instant,
    frame_rate: u32,
    frame_count: Arc<AtomicU64>,
    cancellation_token: CancellationToken,
    /// Locked by the pacing task for the length of one tick
    slots: Arc<Mutex<Vec<SinkSlot>>>,
    pacing_task: JoinHandle<()>,
}

/// Owns at most one recording session at a time.
///
/// `start` opens every sink for the registry's channels and spawns the
/// pacing task; `stop` cancels it, lets the tick in progress finish,
/// finalizes every sink and writes the manifest.
pub struct Recorder {
    registry: Arc<FrameRegistry>,
    options: RecordingOptions,
    factory: Arc<dyn SinkFactory>,
    lut: &'static DepthColorLut,
    active: Option<ActiveSession>,
}

impl Recorder {
    pub fn new(registry: Arc<FrameRegistry>, options: RecordingOptions) -> Self {
        Self::with_factory(registry, options, Arc::new(StandardSinkFactory))
    }

    pub fn with_factory(
        registry: Arc<FrameRegistry>,
        options: RecordingOptions,
        factory: Arc<dyn SinkFactory>,
    ) -> Self {
        Self {
            registry,
            options,
            factory,
            lut: DepthColorLut::global(),
            active: None,
        }
    }

    pub fn options(&self) -> &RecordingOptions {
        &self.options
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Ticks dispatched by the active session; 0 when idle
    pub fn frame_count(&self) -> u64 {
        self.active
            .as_ref()
            .map(|s| s.frame_count.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Time since the active session started
    pub fn elapsed(&self) -> Option<Duration> {
        self.active.as_ref().map(|s| s.started.elapsed())
    }

    pub fn session_dir(&self) -> Option<&Path> {
        self.active.as_ref().map(|s| s.output_dir.as_path())
    }

    /// Start a session.
    ///
    /// On error nothing is left running: every sink opened so far has been
    /// finished, the new session directory has been removed and the
    /// recorder is still idle.
    pub async fn start(&mut self) -> Result<SessionInfo, SessionError> {
        if self.active.is_some() {
            return Err(SessionError::AlreadyActive);
        }
        let frame_rate = self.options.frame_rate;
        if frame_rate == 0 || frame_rate > MAX_FRAME_RATE {
            return Err(SessionError::InvalidFrameRate(frame_rate as f64));
        }

        let channels = self.registry.channels();
        if channels.is_empty() {
            return Err(SessionError::NoChannels);
        }

        let start_time = Local::now();
        let output_dir = create_session_dir(&self.options.output_root, &start_time).await?;

        let mut slots: Vec<SinkSlot> = Vec::new();
        for (role, channel) in self.options.sink_plan(&channels) {
            let request = SinkRequest {
                role,
                channel,
                session_dir: &output_dir,
                options: &self.options,
            };

            match self.factory.open(request).await {
                Ok(sink) => slots.push(SinkSlot::new(sink)),
                Err(source) => {
                    let sink = match channel {
                        Some(channel) => format!("{:?}:{}", role, channel.name),
                        None => format!("{:?}", role),
                    };
                    error!("Failed to open sink '{}': {}", sink, source);

                    for slot in slots {
                        slot.finish().await;
                    }
                    if let Err(e) = tokio::fs::remove_dir_all(&output_dir).await {
                        warn!(
                            "Failed to remove session directory {}: {}",
                            output_dir.display(),
                            e
                        );
                    }
                    return Err(SessionError::SinkOpen { sink, source });
                }
            }
        }

        let id = Uuid::new_v4();
        let frame_count = Arc::new(AtomicU64::new(0));
        let cancellation_token = CancellationToken::new();
        let sink_count = slots.len();
        let slots = Arc::new(Mutex::new(slots));

        let started = Instant::now();
        let pacing_task = tokio::spawn(run_pacing(
            Arc::clone(&self.registry),
            Arc::clone(&slots),
            frame_rate,
            Arc::clone(&frame_count),
            cancellation_token.clone(),
        ));

        info!(
            "Recording session {} started at {}fps with {} sink(s) in {}",
            id,
            frame_rate,
            sink_count,
            output_dir.display()
        );

        self.active = Some(ActiveSession {
            id,
            output_dir: output_dir.clone(),
            start_time,
            started,
            frame_rate,
            frame_count,
            cancellation_token,
            slots,
            pacing_task,
        });

        Ok(SessionInfo {
            session_id: id,
            output_dir,
            sink_count,
        })
    }

    /// Stop the active session and return its manifest; `None` when idle.
    ///
    /// Finalize and manifest failures are logged; the recorder is idle
    /// afterwards in every case.
    pub async fn stop(&mut self) -> Option<SessionManifest> {
        let session = self.active.take()?;

        info!("Stopping recording session {}", session.id);
        session.cancellation_token.cancel();

        if let Err(e) = session.pacing_task.await {
            // Sinks outlive the task, so they are still finalized below
            error!("Pacing task for session {} failed: {}", session.id, e);
        }
        let slots = std::mem::take(&mut *session.slots.lock().await);

        // Counter and clock are read once the last tick has completed
        let frame_count = session.frame_count.load(Ordering::Acquire);
        let elapsed_seconds = session.started.elapsed().as_secs_f64();
        let end_time = Local::now();

        let mut sinks = Vec::with_capacity(slots.len());
        for slot in slots {
            sinks.push(slot.finish().await);
        }

        let manifest = SessionManifest {
            session_id: session.id,
            output_dir: session.output_dir.clone(),
            start_time: session.start_time,
            end_time,
            elapsed_seconds,
            frame_count,
            target_frame_rate: session.frame_rate,
            effective_frame_rate: effective_rate(frame_count, elapsed_seconds),
            lut: self.lut.descriptor(),
            sinks,
        };

        if let Err(e) = manifest.write_to(&session.output_dir, self.lut).await {
            error!(
                "Failed to write manifest to {}: {}",
                session.output_dir.display(),
                e
            );
        }

        info!(
            "Recording session {} stopped: {} frames in {:.2}s ({:.2} fps effective)",
            manifest.session_id,
            manifest.frame_count,
            manifest.elapsed_seconds,
            manifest.effective_frame_rate
        );

        Some(manifest)
    }
}

/// Session directory name, e.g. `2024-3-05--14-07-09`
pub fn session_dir_name(start_time: &DateTime<Local>) -> String {
    start_time.format("%Y-%-m-%d--%H-%M-%S").to_string()
}

/// Create `<root>/<timestamp>`; a numeric suffix keeps sessions started in
/// the same second apart
async fn create_session_dir(
    root: &Path,
    start_time: &DateTime<Local>,
) -> Result<PathBuf, SessionError> {
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|source| SessionError::OutputDirectory {
            path: root.to_path_buf(),
            source,
        })?;

    let base = session_dir_name(start_time);
    let mut suffix = 1u32;
    loop {
        let name = if suffix == 1 {
            base.clone()
        } else {
            format!("{}-{}", base, suffix)
        };
        let path = root.join(name);
        match tokio::fs::create_dir(&path).await {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && suffix < 1000 => {
                suffix += 1;
            }
            Err(source) => return Err(SessionError::OutputDirectory { path, source }),
        }
    }
}

/// Fixed-rate fan-out of the registry's snapshots to every sink.
///
/// Cancellation is only observed between ticks. The counter advances once
/// per tick whatever the sinks return. The sinks stay in the shared set so
/// `stop` can finalize them even if this task panics.
async fn run_pacing(
    registry: Arc<FrameRegistry>,
    slots: Arc<Mutex<Vec<SinkSlot>>>,
    frame_rate: u32,
    frame_count: Arc<AtomicU64>,
    token: CancellationToken,
) {
    let period = Duration::from_secs_f64(1.0 / frame_rate as f64);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!("Pacing loop started with period {:?}", period);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let tick = Tick::new(frame_count.load(Ordering::Acquire), registry.snapshot_all());
        {
            let mut slots = slots.lock().await;
            for slot in slots.iter_mut() {
                slot.dispatch(&tick).await;
            }
        }
        frame_count.fetch_add(1, Ordering::AcqRel);
    }

    debug!(
        "Pacing loop stopped after {} ticks",
        frame_count.load(Ordering::Acquire)
    );
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(session) = &self.active {
            warn!(
                "Recorder dropped with session {} still active; sinks will not be finalized",
                session.id
            );
            session.cancellation_token.cancel();
        }
    }
}
