use super::SensorChannel;
use crate::frame::{FrameDescription, PixelFormat, RawFrame};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Depth span of the generated ramp; exceeds the LUT range on purpose so
/// the out-of-range band is visible.
const SYNTHETIC_DEPTH_SPAN: u32 = 8000;

/// Test-pattern sensor used when no device driver is linked.
///
/// Produces a new frame at most once per `1/fps`, like a device refreshing
/// at its native rate; calls in between return `None`.
pub struct SyntheticSensor {
    description: FrameDescription,
    interval: Duration,
    last_frame: Option<Instant>,
    frame_index: u64,
    closed: bool,
}

impl SyntheticSensor {
    pub fn new(description: FrameDescription, fps: u32) -> Self {
        let fps = fps.max(1);
        debug!(
            "Created synthetic sensor {} @ {}fps",
            description, fps
        );
        Self {
            description,
            interval: Duration::from_secs_f64(1.0 / fps as f64),
            last_frame: None,
            frame_index: 0,
            closed: false,
        }
    }

    /// RGBA color channel
    pub fn color(width: u32, height: u32, fps: u32) -> Self {
        Self::new(FrameDescription::new(width, height, PixelFormat::Rgba32), fps)
    }

    /// 16-bit depth channel
    pub fn depth(width: u32, height: u32, fps: u32) -> Self {
        Self::new(FrameDescription::new(width, height, PixelFormat::Depth16), fps)
    }

    fn render(&self) -> Vec<u8> {
        let width = self.description.width as usize;
        let height = self.description.height as usize;
        let shift = self.frame_index as usize;
        let mut data = Vec::with_capacity(self.description.frame_size());

        match self.description.format {
            PixelFormat::Rgba32 | PixelFormat::Bgra32 => {
                for y in 0..height {
                    for x in 0..width {
                        data.push(((x + shift) % 256) as u8);
                        data.push(((y + shift / 2) % 256) as u8);
                        data.push((shift % 256) as u8);
                        data.push(255);
                    }
                }
            }
            PixelFormat::Depth16 => {
                let span = width.max(1) as u32;
                for _y in 0..height {
                    for x in 0..width {
                        let column = ((x + shift) % width.max(1)) as u32;
                        let depth = column * SYNTHETIC_DEPTH_SPAN / span;
                        data.extend_from_slice(&(depth as u16).to_le_bytes());
                    }
                }
            }
        }

        data
    }
}

impl SensorChannel for SyntheticSensor {
    fn description(&self) -> FrameDescription {
        self.description
    }

    fn try_acquire_latest(&mut self) -> Option<RawFrame> {
        if self.closed {
            return None;
        }

        let now = Instant::now();
        if let Some(last) = self.last_frame {
            if now.duration_since(last) < self.interval {
                return None;
            }
        }

        self.last_frame = Some(now);
        self.frame_index += 1;
        trace!("Generated synthetic frame {}", self.frame_index);
        Some(RawFrame::new(self.description, self.render()))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
