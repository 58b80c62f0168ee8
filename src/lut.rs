//! Depth to color lookup table.
//!
//! Depth samples are mapped onto a linear gradient between two anchor
//! colors. Samples outside `[MIN_LUT_DEPTH, MAX_LUT_DEPTH]` (both inclusive)
//! map to opaque black. The byte table spans the entire `u16` sample domain,
//! so converting a frame costs exactly one indexed load per sample.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

pub const MIN_LUT_DEPTH: u16 = 0;
pub const MAX_LUT_DEPTH: u16 = 6000;
pub const LUT_START_COLOR: Rgba = Rgba::RED;
pub const LUT_END_COLOR: Rgba = Rgba::BLUE;

/// Bytes produced per converted depth sample (R, G, B, A)
pub const BYTES_PER_COLOR: usize = 4;

/// Bytes consumed per raw depth sample (little-endian u16)
pub const BYTES_PER_DEPTH_SAMPLE: usize = 2;

const TABLE_LEN: usize = u16::MAX as usize + 1;

/// Floating point color with channels in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const RED: Rgba = Rgba::new(1.0, 0.0, 0.0, 1.0);
    pub const BLUE: Rgba = Rgba::new(0.0, 0.0, 1.0, 1.0);
    pub const OPAQUE_BLACK: Rgba = Rgba::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Component-wise `self + (other - self) * t`
    pub fn lerp(self, other: Rgba, t: f32) -> Rgba {
        Rgba {
            r: self.r + (other.r - self.r) * t,
            g: self.g + (other.g - self.g) * t,
            b: self.b + (other.b - self.b) * t,
            a: self.a + (other.a - self.a) * t,
        }
    }

    /// Convert to bytes, truncating each `channel * 255`
    pub fn to_bytes(self) -> [u8; 4] {
        [
            channel_to_byte(self.r),
            channel_to_byte(self.g),
            channel_to_byte(self.b),
            channel_to_byte(self.a),
        ]
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RGBA({:.3}, {:.3}, {:.3}, {:.3})",
            self.r, self.g, self.b, self.a
        )
    }
}

/// `as u8` truncates toward zero and saturates, which is floor for `[0, 1]`
#[inline]
fn channel_to_byte(channel: f32) -> u8 {
    (channel * 255.0) as u8
}

/// Immutable depth to RGBA table
pub struct DepthColorLut {
    start: Rgba,
    end: Rgba,
    min_depth: u16,
    max_depth: u16,
    table: Box<[[u8; 4]]>,
}

impl DepthColorLut {
    /// Build the table for the given anchors and inclusive depth range
    pub fn build(start: Rgba, end: Rgba, min_depth: u16, max_depth: u16) -> Self {
        let mut lut = Self {
            start,
            end,
            min_depth,
            max_depth,
            table: Vec::new().into_boxed_slice(),
        };

        let table: Vec<[u8; 4]> = (0..TABLE_LEN)
            .map(|depth| lut.color_for(depth as u32).to_bytes())
            .collect();
        lut.table = table.into_boxed_slice();

        debug!(
            "Built depth LUT over [{}, {}] from {} to {}",
            min_depth, max_depth, start, end
        );
        lut
    }

    /// Table with the standard red-to-blue anchors over `[0, 6000]`
    pub fn standard() -> Self {
        Self::build(LUT_START_COLOR, LUT_END_COLOR, MIN_LUT_DEPTH, MAX_LUT_DEPTH)
    }

    /// Process-wide table, built on first use
    pub fn global() -> &'static DepthColorLut {
        static LUT: OnceLock<DepthColorLut> = OnceLock::new();
        LUT.get_or_init(DepthColorLut::standard)
    }

    /// Color for an arbitrary depth value
    pub fn color_for(&self, depth: u32) -> Rgba {
        if depth < self.min_depth as u32 || depth > self.max_depth as u32 || self.max_depth == 0 {
            return Rgba::OPAQUE_BLACK;
        }

        let t = depth as f32 / self.max_depth as f32;
        let mut color = self.start.lerp(self.end, t);
        color.a = 1.0;
        color
    }

    /// Byte color for a raw sample, straight from the table
    #[inline]
    pub fn bytes_for(&self, depth: u16) -> [u8; 4] {
        self.table[depth as usize]
    }

    /// Convert little-endian u16 depth samples into RGBA bytes.
    ///
    /// Returns the number of samples converted, which is bounded by both
    /// the input sample count and the output capacity.
    pub fn convert_depth_frame(&self, samples: &[u8], out: &mut [u8]) -> usize {
        let mut converted = 0;
        for (sample, pixel) in samples
            .chunks_exact(BYTES_PER_DEPTH_SAMPLE)
            .zip(out.chunks_exact_mut(BYTES_PER_COLOR))
        {
            let depth = u16::from_le_bytes([sample[0], sample[1]]);
            pixel.copy_from_slice(&self.table[depth as usize]);
            converted += 1;
        }
        converted
    }

    /// Write one `depth,r,g,b,a` line per depth in `[min_depth, max_depth)`
    pub fn write_dump<W: Write>(&self, writer: W) -> std::io::Result<()> {
        let mut writer = BufWriter::new(writer);
        for depth in self.min_depth..self.max_depth {
            let color = self.color_for(depth as u32);
            writeln!(
                writer,
                "{},{},{},{},{}",
                depth, color.r, color.g, color.b, color.a
            )?;
        }
        writer.flush()
    }

    /// Write the dump to a file, replacing any previous dump
    pub fn write_dump_file(&self, path: &Path) -> std::io::Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_dump(file)
    }

    pub fn start_color(&self) -> Rgba {
        self.start
    }

    pub fn end_color(&self) -> Rgba {
        self.end
    }

    pub fn min_depth(&self) -> u16 {
        self.min_depth
    }

    pub fn max_depth(&self) -> u16 {
        self.max_depth
    }

    /// Summary of the table parameters for manifests
    pub fn descriptor(&self) -> LutDescriptor {
        LutDescriptor {
            min_depth: self.min_depth,
            max_depth: self.max_depth,
            start_color: self.start,
            end_color: self.end,
        }
    }
}

impl fmt::Debug for DepthColorLut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepthColorLut")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("min_depth", &self.min_depth)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

/// LUT parameters recorded alongside each session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LutDescriptor {
    pub min_depth: u16,
    pub max_depth: u16,
    pub start_color: Rgba,
    pub end_color: Rgba,
}
