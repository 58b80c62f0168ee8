pub mod acquisition;
pub mod app;
pub mod config;
pub mod encoder;
pub mod error;
pub mod events;
pub mod frame;
pub mod keyboard_input;
pub mod lut;
pub mod registry;
pub mod session;
pub mod sink;
pub mod source;

pub use acquisition::{AcquisitionLoop, AcquisitionStats};
pub use app::{ComponentState, DepthcamOrchestrator, ShutdownReason};
pub use config::{ContainerFormat, DepthcamConfig};
pub use error::{ContainerError, DepthcamError, Result, SessionError, SinkError};
pub use events::{DepthcamEvent, EventBus, EventFilter, EventReceiver};
pub use frame::{FrameDescription, FrameSnapshot, PixelFormat, RawFrame};
pub use lut::{DepthColorLut, Rgba, MAX_LUT_DEPTH, MIN_LUT_DEPTH};
pub use registry::{ChannelInfo, FrameRegistry};
pub use session::{Recorder, RecordingOptions, SessionInfo, SessionManifest};
pub use sink::{AggregateSink, FileEncodeSink, NetworkSink, Sink, SinkStats, Tick};
pub use source::{FrameSource, SensorChannel, SyntheticSensor, COLOR_CHANNEL, DEPTH_CHANNEL};
