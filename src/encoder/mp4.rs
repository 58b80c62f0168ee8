use super::{ContainerSpec, VideoContainer};
use crate::error::ContainerError;
use crate::frame::PixelFormat;
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSrc;
use gstreamer_video::{VideoFormat, VideoInfo};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// H.264 in an MP4 container, encoded through a GStreamer appsrc pipeline
pub struct GstreamerContainer {
    pipeline: Pipeline,
    appsrc: AppSrc,
    path: PathBuf,
    frame_size: usize,
    frame_duration_ns: u64,
    frame_count: u64,
}

fn video_format(format: PixelFormat) -> VideoFormat {
    match format {
        PixelFormat::Rgba32 => VideoFormat::Rgba,
        PixelFormat::Bgra32 => VideoFormat::Bgra,
        PixelFormat::Depth16 => VideoFormat::Gray16Le,
    }
}

fn backend(context: &str, e: impl std::fmt::Display) -> ContainerError {
    ContainerError::Backend(format!("{}: {}", context, e))
}

impl GstreamerContainer {
    pub fn create(path: &Path, spec: &ContainerSpec) -> Result<Self, ContainerError> {
        let desc = spec.description;
        if desc.width == 0 || desc.height == 0 || desc.width % 2 != 0 || desc.height % 2 != 0 {
            return Err(ContainerError::UnsupportedDimensions {
                width: desc.width,
                height: desc.height,
                reason: "H.264 4:2:0 encoding needs non-zero even dimensions".to_string(),
            });
        }
        if spec.frame_rate == 0 {
            return Err(ContainerError::Backend(
                "frame rate must be greater than 0".to_string(),
            ));
        }

        gstreamer::init().map_err(|e| backend("Failed to initialize GStreamer", e))?;

        let pipeline_desc = format!(
            "appsrc name=src format=time is-live=false ! \
             videoconvert ! video/x-raw,format=I420 ! \
             x264enc speed-preset={} pass=qual quantizer={} ! \
             h264parse ! \
             mp4mux faststart=true ! \
             filesink location={}",
            spec.codec.preset,
            spec.codec.crf,
            path.to_string_lossy()
        );
        debug!("Pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| backend("Failed to create pipeline", e))?
            .downcast::<Pipeline>()
            .map_err(|_| ContainerError::Backend("Failed to downcast to Pipeline".to_string()))?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| ContainerError::Backend("Failed to get appsrc element".to_string()))?
            .downcast::<AppSrc>()
            .map_err(|_| ContainerError::Backend("Failed to downcast to AppSrc".to_string()))?;

        let caps = VideoInfo::builder(video_format(desc.format), desc.width, desc.height)
            .fps(gstreamer::Fraction::new(spec.frame_rate as i32, 1))
            .build()
            .map_err(|e| backend("Invalid video info", e))?
            .to_caps()
            .map_err(|e| backend("Failed to build caps", e))?;
        appsrc.set_caps(Some(&caps));
        appsrc.set_property("format", gstreamer::Format::Time);

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| backend("Failed to start pipeline", e))?;

        info!(
            "Started H.264 encoding pipeline for {} ({} @ {}fps, preset {}, quality {})",
            path.display(),
            desc,
            spec.frame_rate,
            spec.codec.preset,
            spec.codec.crf
        );

        Ok(Self {
            pipeline,
            appsrc,
            path: path.to_path_buf(),
            frame_size: desc.frame_size(),
            frame_duration_ns: 1_000_000_000 / spec.frame_rate as u64,
            frame_count: 0,
        })
    }
}

#[async_trait]
impl VideoContainer for GstreamerContainer {
    fn path(&self) -> &Path {
        &self.path
    }

    fn frames_written(&self) -> u64 {
        self.frame_count
    }

    async fn append_frame(&mut self, frame: &[u8]) -> Result<(), ContainerError> {
        if frame.len() != self.frame_size {
            return Err(ContainerError::FrameSize {
                expected: self.frame_size,
                actual: frame.len(),
            });
        }

        let mut buffer = gstreamer::Buffer::from_mut_slice(frame.to_vec());
        {
            let buffer_ref = buffer
                .get_mut()
                .ok_or_else(|| ContainerError::Backend("Buffer is not writable".to_string()))?;
            // Presentation time follows call order, not wall clock
            buffer_ref.set_pts(gstreamer::ClockTime::from_nseconds(
                self.frame_count * self.frame_duration_ns,
            ));
            buffer_ref.set_duration(gstreamer::ClockTime::from_nseconds(self.frame_duration_ns));
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| ContainerError::Backend(format!("Failed to push buffer: {:?}", e)))?;

        self.frame_count += 1;
        if self.frame_count % 300 == 0 {
            debug!("Encoded {} frames into {}", self.frame_count, self.path.display());
        }
        Ok(())
    }

    async fn finalize(self: Box<Self>) -> Result<u64, ContainerError> {
        let GstreamerContainer {
            pipeline,
            appsrc,
            path,
            frame_count,
            ..
        } = *self;

        appsrc
            .end_of_stream()
            .map_err(|e| ContainerError::Backend(format!("Failed to signal EOS: {:?}", e)))?;

        let display = path.display().to_string();
        tokio::task::spawn_blocking(move || {
            let bus = pipeline
                .bus()
                .ok_or_else(|| ContainerError::Backend("Pipeline has no bus".to_string()))?;

            let mut result = Ok(());
            let mut saw_eos = false;
            for msg in bus.iter_timed(gstreamer::ClockTime::from_seconds(30)) {
                match msg.view() {
                    gstreamer::MessageView::Eos(..) => {
                        saw_eos = true;
                        break;
                    }
                    gstreamer::MessageView::Error(err) => {
                        result = Err(ContainerError::Backend(format!(
                            "Video encoding error: {} ({})",
                            err.error(),
                            err.debug().unwrap_or_default()
                        )));
                        break;
                    }
                    _ => {}
                }
            }
            if !saw_eos && result.is_ok() {
                warn!("Timed out waiting for EOS on {}", display);
            }

            pipeline
                .set_state(gstreamer::State::Null)
                .map_err(|e| backend("Failed to stop pipeline", e))?;
            result
        })
        .await
        .map_err(|e| backend("Encoder finalize task failed", e))??;

        info!(
            "Finalized MP4 container {} ({} frames)",
            path.display(),
            frame_count
        );
        Ok(frame_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameDescription;

    #[test]
    fn test_odd_dimensions_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ContainerSpec::new(FrameDescription::new(5, 4, PixelFormat::Rgba32), 30);
        let result = GstreamerContainer::create(&dir.path().join("odd.mp4"), &spec);
        assert!(matches!(
            result,
            Err(ContainerError::UnsupportedDimensions { .. })
        ));
    }

    #[test]
    fn test_video_format_mapping() {
        assert_eq!(video_format(PixelFormat::Rgba32), VideoFormat::Rgba);
        assert_eq!(video_format(PixelFormat::Depth16), VideoFormat::Gray16Le);
    }
}
