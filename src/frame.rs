use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Pixel layout of a channel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit RGBA, 4 bytes per pixel
    Rgba32,
    /// 8-bit BGRA, 4 bytes per pixel
    Bgra32,
    /// Little-endian 16-bit depth in millimeters, 2 bytes per pixel
    Depth16,
}

impl PixelFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgba32 | PixelFormat::Bgra32 => 4,
            PixelFormat::Depth16 => 2,
        }
    }

    /// Stable numeric tag used in raw container headers
    pub fn tag(&self) -> u32 {
        match self {
            PixelFormat::Rgba32 => 1,
            PixelFormat::Bgra32 => 2,
            PixelFormat::Depth16 => 3,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(PixelFormat::Rgba32),
            2 => Some(PixelFormat::Bgra32),
            3 => Some(PixelFormat::Depth16),
            _ => None,
        }
    }
}

/// Geometry of one channel's frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDescription {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl FrameDescription {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub fn frame_size(&self) -> usize {
        self.stride() * self.height as usize
    }
}

impl fmt::Display for FrameDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {:?}", self.width, self.height, self.format)
    }
}

/// A frame as delivered by the sensor collaborator
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub description: FrameDescription,
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn new(description: FrameDescription, data: Vec<u8>) -> Self {
        Self { description, data }
    }

    /// Check the payload length against the declared geometry
    pub fn validate_size(&self) -> bool {
        self.data.len() == self.description.frame_size()
    }
}

/// Immutable, cheaply cloneable view of a channel's most recent buffer
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    /// Channel the frame belongs to
    pub channel: String,
    /// Per-channel publish sequence; 0 is the blank frame present before any acquisition
    pub sequence: u64,
    /// Timestamp when the frame was published
    pub timestamp: SystemTime,
    /// Frame geometry and format of `data`
    pub description: FrameDescription,
    /// Pixel data (shared, never mutated after publish)
    pub data: Bytes,
}

impl FrameSnapshot {
    pub fn new(
        channel: impl Into<String>,
        sequence: u64,
        description: FrameDescription,
        data: Bytes,
    ) -> Self {
        Self {
            channel: channel.into(),
            sequence,
            timestamp: SystemTime::now(),
            description,
            data,
        }
    }

    /// Zero-filled frame used before the first acquisition
    pub fn blank(channel: impl Into<String>, description: FrameDescription) -> Self {
        Self::new(
            channel,
            0,
            description,
            Bytes::from(vec![0u8; description.frame_size()]),
        )
    }
}
