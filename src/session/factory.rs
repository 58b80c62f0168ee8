use super::RecordingOptions;
use crate::error::SinkError;
use crate::registry::ChannelInfo;
use crate::sink::{AggregateSink, FileEncodeSink, NetworkSink, Sink};
use async_trait::async_trait;
use std::path::Path;

/// Which sink a session needs next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkRole {
    File,
    Network,
    Aggregate,
}

/// One sink to open for a starting session
#[derive(Debug, Clone, Copy)]
pub struct SinkRequest<'a> {
    pub role: SinkRole,
    /// Channel for per-channel roles; `None` for the aggregate sink
    pub channel: Option<&'a ChannelInfo>,
    pub session_dir: &'a Path,
    pub options: &'a RecordingOptions,
}

impl SinkRequest<'_> {
    fn require_channel(&self) -> Result<&ChannelInfo, SinkError> {
        self.channel
            .ok_or_else(|| SinkError::custom(format!("{:?} sink requires a channel", self.role)))
    }
}

/// Creates the sinks of a session, one request at a time
#[async_trait]
pub trait SinkFactory: Send + Sync {
    async fn open(&self, request: SinkRequest<'_>) -> Result<Box<dyn Sink>, SinkError>;
}

/// Builds the file, UDP and HTTP sinks from [`RecordingOptions`]
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardSinkFactory;

#[async_trait]
impl SinkFactory for StandardSinkFactory {
    async fn open(&self, request: SinkRequest<'_>) -> Result<Box<dyn Sink>, SinkError> {
        let options = request.options;
        match request.role {
            SinkRole::File => {
                let channel = request.require_channel()?;
                let sink = FileEncodeSink::open(
                    request.session_dir,
                    &channel.name,
                    channel.description,
                    options.frame_rate,
                    options.container,
                )
                .await?;
                Ok(Box::new(sink))
            }
            SinkRole::Network => {
                let channel = request.require_channel()?;
                let target = options
                    .network
                    .as_ref()
                    .ok_or_else(|| SinkError::custom("network sink is not configured"))?;
                let sink =
                    NetworkSink::bind(&channel.name, target.address, target.send_timeout).await?;
                Ok(Box::new(sink))
            }
            SinkRole::Aggregate => {
                let target = options
                    .aggregate
                    .as_ref()
                    .ok_or_else(|| SinkError::custom("aggregate sink is not configured"))?;
                let sink = AggregateSink::new(
                    target.url.clone(),
                    target.request_timeout,
                    target.max_in_flight,
                )?;
                Ok(Box::new(sink))
            }
        }
    }
}
