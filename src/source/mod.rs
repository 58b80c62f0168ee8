mod synthetic;

pub use synthetic::SyntheticSensor;

use crate::frame::{FrameDescription, PixelFormat, RawFrame};
use crate::lut::DepthColorLut;
use crate::registry::{ChannelInfo, FrameRegistry};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Default channel names, as they appear in output file names and payloads
pub const COLOR_CHANNEL: &str = "ColorStream";
pub const DEPTH_CHANNEL: &str = "DepthStream";

/// One stream of the sensor device.
///
/// Implementations wrap the device driver's reader for a single channel.
/// `try_acquire_latest` must not block: it returns the newest frame if the
/// device has one ready and `None` otherwise.
pub trait SensorChannel: Send {
    /// Geometry and format of the frames this channel delivers
    fn description(&self) -> FrameDescription;

    /// Newest frame, if one is ready
    fn try_acquire_latest(&mut self) -> Option<RawFrame>;

    /// Release the underlying reader
    fn close(&mut self);
}

/// How a channel's device frames become its published buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Device delivers RGBA; copied as-is
    Color,
    /// Device delivers 16-bit depth; colorized through the LUT into RGBA
    Depth,
}

/// A channel opened against the device, owning its output buffer
pub struct FrameSource {
    name: String,
    kind: ChannelKind,
    input: FrameDescription,
    output: FrameDescription,
    buffer: Vec<u8>,
    reader: Option<Box<dyn SensorChannel>>,
    registry: Arc<FrameRegistry>,
    lut: &'static DepthColorLut,
    frames_acquired: u64,
}

impl FrameSource {
    /// Open a color channel
    pub fn color(
        name: impl Into<String>,
        reader: Box<dyn SensorChannel>,
        registry: Arc<FrameRegistry>,
    ) -> Self {
        Self::open(name.into(), ChannelKind::Color, reader, registry)
    }

    /// Open a depth channel; frames are converted with the global LUT
    pub fn depth(
        name: impl Into<String>,
        reader: Box<dyn SensorChannel>,
        registry: Arc<FrameRegistry>,
    ) -> Self {
        Self::open(name.into(), ChannelKind::Depth, reader, registry)
    }

    fn open(
        name: String,
        kind: ChannelKind,
        reader: Box<dyn SensorChannel>,
        registry: Arc<FrameRegistry>,
    ) -> Self {
        let input = reader.description();
        let output = Self::output_description(kind, input);

        info!("Opened {:?} channel '{}' ({} -> {})", kind, name, input, output);

        Self {
            buffer: vec![0u8; output.frame_size()],
            name,
            kind,
            input,
            output,
            reader: Some(reader),
            registry,
            lut: DepthColorLut::global(),
            frames_acquired: 0,
        }
    }

    /// Published geometry for a given device geometry
    pub fn output_description(kind: ChannelKind, input: FrameDescription) -> FrameDescription {
        match kind {
            ChannelKind::Color => input,
            ChannelKind::Depth => FrameDescription::new(input.width, input.height, PixelFormat::Rgba32),
        }
    }

    /// Registry entry for this channel
    pub fn channel_info(&self) -> ChannelInfo {
        ChannelInfo {
            name: self.name.clone(),
            description: self.output,
        }
    }

    /// Try to pull the newest frame from the device and publish it.
    ///
    /// Returns `false` when nothing new was available, when the frame does
    /// not match the channel geometry, or after `close`; the buffer is left
    /// untouched in all of those cases.
    pub fn acquire_latest(&mut self) -> bool {
        let Some(reader) = self.reader.as_mut() else {
            return false;
        };

        let Some(frame) = reader.try_acquire_latest() else {
            return false;
        };

        if frame.description != self.input || !frame.validate_size() {
            debug!(
                "Dropping frame for '{}': got {} ({} bytes), expected {}",
                self.name,
                frame.description,
                frame.data.len(),
                self.input
            );
            return false;
        }

        match self.kind {
            ChannelKind::Color => self.buffer.copy_from_slice(&frame.data),
            ChannelKind::Depth => {
                self.lut.convert_depth_frame(&frame.data, &mut self.buffer);
            }
        }

        let published = self
            .registry
            .publish(&self.name, Bytes::copy_from_slice(&self.buffer));
        if published.is_none() {
            return false;
        }

        self.frames_acquired += 1;
        trace!("Acquired frame {} for '{}'", self.frames_acquired, self.name);
        true
    }

    /// Release the device reader; safe to call more than once
    pub fn close(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.close();
            info!(
                "Closed channel '{}' after {} frames",
                self.name, self.frames_acquired
            );
        }
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn description(&self) -> FrameDescription {
        self.output
    }

    /// Current contents of the owned buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn frames_acquired(&self) -> u64 {
        self.frames_acquired
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSensor {
        description: FrameDescription,
        frames: VecDeque<Option<RawFrame>>,
        closes: Arc<AtomicUsize>,
    }

    impl SensorChannel for ScriptedSensor {
        fn description(&self) -> FrameDescription {
            self.description
        }

        fn try_acquire_latest(&mut self) -> Option<RawFrame> {
            self.frames.pop_front().flatten()
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn depth_frame(desc: FrameDescription, depths: &[u16]) -> RawFrame {
        RawFrame::new(desc, depths.iter().flat_map(|d| d.to_le_bytes()).collect())
    }

    fn depth_source(frames: Vec<Option<RawFrame>>) -> (FrameSource, Arc<FrameRegistry>, Arc<AtomicUsize>) {
        let desc = FrameDescription::new(2, 2, PixelFormat::Depth16);
        let closes = Arc::new(AtomicUsize::new(0));
        let sensor = ScriptedSensor {
            description: desc,
            frames: frames.into(),
            closes: Arc::clone(&closes),
        };
        let registry = Arc::new(FrameRegistry::new([ChannelInfo {
            name: DEPTH_CHANNEL.to_string(),
            description: FrameSource::output_description(ChannelKind::Depth, desc),
        }]));
        let source = FrameSource::depth(DEPTH_CHANNEL, Box::new(sensor), Arc::clone(&registry));
        (source, registry, closes)
    }

    #[test]
    fn test_depth_frame_is_colorized_and_published() {
        let desc = FrameDescription::new(2, 2, PixelFormat::Depth16);
        let (mut source, registry, _) =
            depth_source(vec![Some(depth_frame(desc, &[0, 3000, 6000, 6001]))]);

        assert!(source.acquire_latest());

        let expected = vec![255, 0, 0, 255, 127, 0, 127, 255, 0, 0, 255, 255, 0, 0, 0, 255];
        assert_eq!(source.buffer(), expected.as_slice());
        let snapshot = registry.latest(DEPTH_CHANNEL).unwrap();
        assert_eq!(snapshot.sequence, 1);
        assert_eq!(snapshot.data.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_no_frame_leaves_buffer_untouched() {
        let desc = FrameDescription::new(2, 2, PixelFormat::Depth16);
        let (mut source, registry, _) =
            depth_source(vec![Some(depth_frame(desc, &[0, 0, 0, 0])), None]);

        assert!(source.acquire_latest());
        let before = source.buffer().to_vec();

        assert!(!source.acquire_latest());
        assert_eq!(source.buffer(), before.as_slice());
        assert_eq!(registry.latest(DEPTH_CHANNEL).unwrap().sequence, 1);
    }

    #[test]
    fn test_size_mismatch_is_skipped() {
        let desc = FrameDescription::new(2, 2, PixelFormat::Depth16);
        let short = RawFrame::new(desc, vec![0u8; 6]);
        let (mut source, registry, _) = depth_source(vec![Some(short)]);

        assert!(!source.acquire_latest());
        assert!(source.buffer().iter().all(|b| *b == 0));
        assert_eq!(registry.latest(DEPTH_CHANNEL).unwrap().sequence, 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut source, _, closes) = depth_source(vec![]);
        source.close();
        source.close();
        assert!(!source.is_open());
        assert!(!source.acquire_latest());
        drop(source);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_color_frame_is_copied() {
        let desc = FrameDescription::new(1, 2, PixelFormat::Rgba32);
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let sensor = ScriptedSensor {
            description: desc,
            frames: vec![Some(RawFrame::new(desc, data.clone()))].into(),
            closes: Arc::new(AtomicUsize::new(0)),
        };
        let registry = Arc::new(FrameRegistry::new([ChannelInfo {
            name: COLOR_CHANNEL.to_string(),
            description: desc,
        }]));
        let mut source = FrameSource::color(COLOR_CHANNEL, Box::new(sensor), Arc::clone(&registry));

        assert!(source.acquire_latest());
        assert_eq!(registry.latest(COLOR_CHANNEL).unwrap().data.as_ref(), data.as_slice());
    }
}
