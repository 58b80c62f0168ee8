use super::{Sink, SinkStats, Tick};
use crate::config::ContainerFormat;
use crate::encoder::{container_path, open_container, ContainerSpec, VideoContainer};
use crate::error::SinkError;
use crate::frame::FrameDescription;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Encodes one channel into `<session_dir>/<channel>.<ext>`.
///
/// The container is opened for the channel's geometry and the session's
/// target rate when the sink is created, so a failing encoder aborts the
/// session start instead of surfacing on the first tick.
pub struct FileEncodeSink {
    name: String,
    channel: String,
    path: PathBuf,
    container: Option<Box<dyn VideoContainer>>,
    stats: SinkStats,
}

impl FileEncodeSink {
    pub async fn open(
        session_dir: &Path,
        channel: &str,
        description: FrameDescription,
        frame_rate: u32,
        format: ContainerFormat,
    ) -> Result<Self, SinkError> {
        let path = container_path(session_dir, channel, format);
        let spec = ContainerSpec::new(description, frame_rate);
        let container = open_container(format, &path, &spec).await?;

        info!(
            "Opened file sink for '{}' at {} ({:?})",
            channel,
            path.display(),
            format
        );

        Ok(Self {
            name: format!("file:{}", channel),
            channel: channel.to_string(),
            path,
            container: Some(container),
            stats: SinkStats::default(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sink for FileEncodeSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, tick: &Tick) -> Result<(), SinkError> {
        let container = self.container.as_mut().ok_or(SinkError::Disposed)?;
        let frame = tick.require(&self.channel)?;

        match container.append_frame(&frame.data).await {
            Ok(()) => {
                self.stats.delivered += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.failed += 1;
                Err(e.into())
            }
        }
    }

    async fn finish(&mut self) -> Result<(), SinkError> {
        let Some(container) = self.container.take() else {
            debug!("File sink '{}' already finished", self.channel);
            return Ok(());
        };

        let frames = container.finalize().await?;
        info!(
            "File sink for '{}' finalized {} with {} frames",
            self.channel,
            self.path.display(),
            frames
        );
        Ok(())
    }

    fn stats(&self) -> SinkStats {
        self.stats
    }
}
