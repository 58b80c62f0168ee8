//! Video container backends used by the file sinks.
//!
//! A container is opened once for a fixed geometry and rate, receives frames
//! in presentation order and is finalized exactly once.

#[cfg(all(target_os = "linux", feature = "video_encoding"))]
mod mp4;
mod raw;

#[cfg(all(target_os = "linux", feature = "video_encoding"))]
pub use mp4::GstreamerContainer;
pub use raw::{FrameFile, RawContainerHeader, RawFrameContainer, RawFrameReader};

use crate::config::ContainerFormat;
use crate::error::ContainerError;
use crate::frame::FrameDescription;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Encoder tuning passed through to backends that compress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecParams {
    pub preset: String,
    pub crf: u32,
}

impl Default for CodecParams {
    fn default() -> Self {
        Self {
            preset: "fast".to_string(),
            crf: 17,
        }
    }
}

/// Everything a backend needs to open a container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub description: FrameDescription,
    pub frame_rate: u32,
    pub codec: CodecParams,
}

impl ContainerSpec {
    pub fn new(description: FrameDescription, frame_rate: u32) -> Self {
        Self {
            description,
            frame_rate,
            codec: CodecParams::default(),
        }
    }
}

#[async_trait]
pub trait VideoContainer: Send {
    /// Output file
    fn path(&self) -> &Path;

    /// Number of frames appended so far
    fn frames_written(&self) -> u64;

    /// Append one frame; call order is presentation order
    async fn append_frame(&mut self, frame: &[u8]) -> Result<(), ContainerError>;

    /// Flush and close the file; returns the final frame count
    async fn finalize(self: Box<Self>) -> Result<u64, ContainerError>;
}

/// File extension used by a backend
pub fn file_extension(format: ContainerFormat) -> &'static str {
    match format {
        ContainerFormat::Raw => "frames",
        ContainerFormat::Mp4 => "mp4",
    }
}

/// Output path for a channel inside a session directory
pub fn container_path(dir: &Path, channel: &str, format: ContainerFormat) -> PathBuf {
    dir.join(format!("{}.{}", channel, file_extension(format)))
}

/// Open a container with the requested backend
pub async fn open_container(
    format: ContainerFormat,
    path: &Path,
    spec: &ContainerSpec,
) -> Result<Box<dyn VideoContainer>, ContainerError> {
    match format {
        ContainerFormat::Raw => Ok(Box::new(RawFrameContainer::create(path, spec).await?)),
        ContainerFormat::Mp4 => open_mp4(path, spec).await,
    }
}

#[cfg(all(target_os = "linux", feature = "video_encoding"))]
async fn open_mp4(
    path: &Path,
    spec: &ContainerSpec,
) -> Result<Box<dyn VideoContainer>, ContainerError> {
    Ok(Box::new(GstreamerContainer::create(path, spec)?))
}

#[cfg(not(all(target_os = "linux", feature = "video_encoding")))]
async fn open_mp4(
    _path: &Path,
    _spec: &ContainerSpec,
) -> Result<Box<dyn VideoContainer>, ContainerError> {
    Err(ContainerError::Unavailable("mp4".to_string()))
}
