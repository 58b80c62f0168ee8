use super::{ContainerSpec, VideoContainer};
use crate::error::ContainerError;
use crate::frame::{FrameDescription, PixelFormat};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

/// Magic number for raw frame files: "DCRF"
const RAW_MAGIC: [u8; 4] = *b"DCRF";
const RAW_VERSION: u32 = 1;
const RAW_HEADER_SIZE: usize = 32;
const RECORD_HEADER_SIZE: usize = 12;
const FRAME_COUNT_OFFSET: u64 = 24;

/// Storage a raw frame stream is written to
#[async_trait]
pub trait FrameFile: AsyncWrite + AsyncSeek + Unpin + Send + Sync {
    /// Push written data to stable storage
    async fn sync_data(&self) -> std::io::Result<()>;

    /// Cut the file back to `len` bytes
    async fn set_len(&self, len: u64) -> std::io::Result<()>;
}

#[async_trait]
impl FrameFile for File {
    async fn sync_data(&self) -> std::io::Result<()> {
        File::sync_data(self).await
    }

    async fn set_len(&self, len: u64) -> std::io::Result<()> {
        File::set_len(self, len).await
    }
}

/// Uncompressed frame file, written unbuffered one record at a time.
///
/// Layout: a 32-byte header (magic, version, width, height, frame rate,
/// pixel format tag, frame count, reserved) followed by one record per
/// frame: `u64` presentation index, `u32` length, then the pixel bytes.
/// The frame count is patched in on finalize; a file finalized with zero
/// frames is still a valid, empty container.
///
/// A failed write may leave part of a record behind. The container then
/// refuses further frames, and finalize cuts the file back to the last
/// complete record.
pub struct RawFrameContainer<F = File> {
    file: F,
    path: PathBuf,
    spec: ContainerSpec,
    frame_size: usize,
    frame_count: u64,
    /// Bytes covered by the header and complete records
    committed_len: u64,
    poisoned: bool,
    last_sync: Instant,
}

impl RawFrameContainer<File> {
    /// Create the file and write its header
    pub async fn create(path: &Path, spec: &ContainerSpec) -> Result<Self, ContainerError> {
        validate(spec)?;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await
            .map_err(|e| ContainerError::io(path, e))?;

        let container = Self::with_file(file, path, spec).await?;

        info!(
            "Created raw frame container {} ({} @ {}fps)",
            path.display(),
            spec.description,
            spec.frame_rate
        );
        Ok(container)
    }
}

fn validate(spec: &ContainerSpec) -> Result<(), ContainerError> {
    let desc = spec.description;
    if desc.width == 0 || desc.height == 0 {
        return Err(ContainerError::UnsupportedDimensions {
            width: desc.width,
            height: desc.height,
            reason: "width and height must be greater than 0".to_string(),
        });
    }
    if spec.frame_rate == 0 {
        return Err(ContainerError::Backend(
            "frame rate must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

impl<F: FrameFile> RawFrameContainer<F> {
    async fn with_file(file: F, path: &Path, spec: &ContainerSpec) -> Result<Self, ContainerError> {
        let mut container = Self {
            file,
            path: path.to_path_buf(),
            spec: spec.clone(),
            frame_size: spec.description.frame_size(),
            frame_count: 0,
            committed_len: 0,
            poisoned: false,
            last_sync: Instant::now(),
        };
        container.write_header().await?;
        Ok(container)
    }

    async fn write_header(&mut self) -> Result<(), ContainerError> {
        let desc = self.spec.description;
        let mut header = Vec::with_capacity(RAW_HEADER_SIZE);
        header.extend_from_slice(&RAW_MAGIC);
        header.extend_from_slice(&RAW_VERSION.to_le_bytes());
        header.extend_from_slice(&desc.width.to_le_bytes());
        header.extend_from_slice(&desc.height.to_le_bytes());
        header.extend_from_slice(&self.spec.frame_rate.to_le_bytes());
        header.extend_from_slice(&desc.format.tag().to_le_bytes());
        // Frame count placeholder (updated on finalize)
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());

        self.file
            .write_all(&header)
            .await
            .map_err(|e| ContainerError::io(&self.path, e))?;
        self.committed_len = RAW_HEADER_SIZE as u64;
        Ok(())
    }

    async fn sync(&mut self) -> Result<(), ContainerError> {
        self.file
            .flush()
            .await
            .map_err(|e| ContainerError::io(&self.path, e))?;
        self.file
            .sync_data()
            .await
            .map_err(|e| ContainerError::io(&self.path, e))?;
        self.last_sync = Instant::now();
        debug!("Synced {} to disk", self.path.display());
        Ok(())
    }

    fn poison(&mut self, source: std::io::Error) -> ContainerError {
        if !self.poisoned {
            error!(
                "Write to {} failed after {} frames, refusing further frames: {}",
                self.path.display(),
                self.frame_count,
                source
            );
        }
        self.poisoned = true;
        ContainerError::io(&self.path, source)
    }
}

#[async_trait]
impl<F: FrameFile + 'static> VideoContainer for RawFrameContainer<F> {
    fn path(&self) -> &Path {
        &self.path
    }

    fn frames_written(&self) -> u64 {
        self.frame_count
    }

    async fn append_frame(&mut self, frame: &[u8]) -> Result<(), ContainerError> {
        if self.poisoned {
            return Err(ContainerError::Poisoned {
                path: self.path.clone(),
            });
        }
        if frame.len() != self.frame_size {
            return Err(ContainerError::FrameSize {
                expected: self.frame_size,
                actual: frame.len(),
            });
        }

        let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + frame.len());
        record.extend_from_slice(&self.frame_count.to_le_bytes());
        record.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        record.extend_from_slice(frame);

        if let Err(e) = self.file.write_all(&record).await {
            return Err(self.poison(e));
        }

        self.frame_count += 1;
        self.committed_len += record.len() as u64;

        // Sync to disk every second so a crash loses at most that much
        if self.last_sync.elapsed() > Duration::from_secs(1) {
            if let Err(e) = self.sync().await {
                warn!("Periodic sync of {} failed: {}", self.path.display(), e);
            }
        }

        Ok(())
    }

    async fn finalize(mut self: Box<Self>) -> Result<u64, ContainerError> {
        let frame_count = self.frame_count;
        let committed_len = self.committed_len;
        let poisoned = self.poisoned;
        let path = self.path.clone();
        let file = &mut self.file;

        // Drop the partial record left by a failed write
        if poisoned {
            file.set_len(committed_len)
                .await
                .map_err(|e| ContainerError::io(&path, e))?;
        }

        file.seek(std::io::SeekFrom::Start(FRAME_COUNT_OFFSET))
            .await
            .map_err(|e| ContainerError::io(&path, e))?;
        file.write_all(&(frame_count as u32).to_le_bytes())
            .await
            .map_err(|e| ContainerError::io(&path, e))?;
        file.flush()
            .await
            .map_err(|e| ContainerError::io(&path, e))?;
        file.sync_data()
            .await
            .map_err(|e| ContainerError::io(&path, e))?;

        info!(
            "Finalized raw frame container {} ({} frames)",
            path.display(),
            frame_count
        );
        Ok(frame_count)
    }
}

/// Header fields of a raw frame file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContainerHeader {
    pub description: FrameDescription,
    pub frame_rate: u32,
    pub frame_count: u32,
}

/// Streaming reader for raw frame files
pub struct RawFrameReader {
    file: File,
    header: RawContainerHeader,
    path: PathBuf,
}

impl RawFrameReader {
    /// Open a raw frame file and validate the header
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ContainerError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)
            .await
            .map_err(|e| ContainerError::io(&path, e))?;

        let mut header = [0u8; RAW_HEADER_SIZE];
        file.read_exact(&mut header)
            .await
            .map_err(|e| ContainerError::io(&path, e))?;

        if header[0..4] != RAW_MAGIC {
            return Err(ContainerError::Backend(
                "Invalid raw frame file: bad magic number".to_string(),
            ));
        }

        let field = |offset: usize| {
            u32::from_le_bytes([
                header[offset],
                header[offset + 1],
                header[offset + 2],
                header[offset + 3],
            ])
        };

        let version = field(4);
        if version != RAW_VERSION {
            return Err(ContainerError::Backend(format!(
                "Unsupported raw frame file version: {}",
                version
            )));
        }

        let format = PixelFormat::from_tag(field(20)).ok_or_else(|| {
            ContainerError::Backend(format!("Unknown pixel format tag: {}", field(20)))
        })?;

        let header = RawContainerHeader {
            description: FrameDescription::new(field(8), field(12), format),
            frame_rate: field(16),
            frame_count: field(24),
        };

        Ok(Self { file, header, path })
    }

    pub fn header(&self) -> &RawContainerHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the next frame as `(presentation index, pixels)`
    pub async fn next_frame(&mut self) -> Result<Option<(u64, Vec<u8>)>, ContainerError> {
        let mut index = [0u8; 8];
        match self.file.read_exact(&mut index).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(ContainerError::io(&self.path, e)),
        }

        let mut len = [0u8; 4];
        self.file
            .read_exact(&mut len)
            .await
            .map_err(|e| ContainerError::io(&self.path, e))?;

        let mut data = vec![0u8; u32::from_le_bytes(len) as usize];
        self.file
            .read_exact(&mut data)
            .await
            .map_err(|e| ContainerError::io(&self.path, e))?;

        Ok(Some((u64::from_le_bytes(index), data)))
    }
}
