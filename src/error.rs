use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DepthcamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl DepthcamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Failures that prevent a recording session from starting.
///
/// Whenever one of these is returned, every sink opened for the failed
/// attempt has already been disposed and the recorder is still idle.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("a recording session is already active")]
    AlreadyActive,

    #[error("invalid frame rate: {0}")]
    InvalidFrameRate(f64),

    #[error("no channels to record")]
    NoChannels,

    #[error("failed to create output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sink '{sink}' failed to open: {source}")]
    SinkOpen {
        sink: String,
        #[source]
        source: SinkError,
    },
}

/// Errors raised by a single sink during open, dispatch or disposal.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("container error: {0}")]
    Container(#[from] ContainerError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("channel '{0}' not present in tick")]
    MissingChannel(String),

    #[error("sink already disposed")]
    Disposed,

    #[error("{0}")]
    Custom(String),
}

impl SinkError {
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport(reason.into())
    }

    pub fn custom(reason: impl Into<String>) -> Self {
        Self::Custom(reason.into())
    }
}

/// Errors from the video container collaborator.
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("unsupported dimensions {width}x{height}: {reason}")]
    UnsupportedDimensions {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("frame size mismatch: expected {expected} bytes, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    #[error("container I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("container {path} is unusable after a failed write")]
    Poisoned { path: PathBuf },

    #[error("encoder backend error: {0}")]
    Backend(String),

    #[error("container backend '{0}' is not available in this build")]
    Unavailable(String),
}

impl ContainerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from the in-process event bus
#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("receiver lagged behind by {0} events")]
    Lagged(u64),

    #[error("event bus closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, DepthcamError>;
