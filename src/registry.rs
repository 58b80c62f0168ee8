use crate::frame::{FrameDescription, FrameSnapshot};
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// Latest-frame slots, one per channel.
///
/// A slot holds an immutable [`FrameSnapshot`]; publishing swaps the whole
/// snapshot, so a reader either sees the previous frame or the new one and
/// never a partially written buffer. The lock is held only for the swap or
/// the clone of the snapshot handle.
pub struct FrameRegistry {
    slots: Vec<ChannelSlot>,
    stats: RegistryStats,
}

struct ChannelSlot {
    name: String,
    description: FrameDescription,
    sequence: AtomicU64,
    current: RwLock<FrameSnapshot>,
}

/// Statistics for registry traffic
#[derive(Debug)]
pub struct RegistryStats {
    /// Total snapshots published
    pub frames_published: AtomicU64,
    /// Total snapshots read
    pub frames_read: AtomicU64,
    /// Publishes rejected for size or unknown channel
    pub publish_rejected: AtomicU64,
}

impl RegistryStats {
    fn new() -> Self {
        Self {
            frames_published: AtomicU64::new(0),
            frames_read: AtomicU64::new(0),
            publish_rejected: AtomicU64::new(0),
        }
    }

    /// Get current statistics as a snapshot
    pub fn snapshot(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            frames_read: self.frames_read.load(Ordering::Relaxed),
            publish_rejected: self.publish_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of registry statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStatsSnapshot {
    pub frames_published: u64,
    pub frames_read: u64,
    pub publish_rejected: u64,
}

/// Channel name and geometry as registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: String,
    pub description: FrameDescription,
}

impl FrameRegistry {
    /// Create a registry with one blank slot per channel, in the given order
    pub fn new(channels: impl IntoIterator<Item = ChannelInfo>) -> Self {
        let slots: Vec<ChannelSlot> = channels
            .into_iter()
            .map(|info| ChannelSlot {
                current: RwLock::new(FrameSnapshot::blank(&info.name, info.description)),
                name: info.name,
                description: info.description,
                sequence: AtomicU64::new(0),
            })
            .collect();

        debug!("Created frame registry with {} channel(s)", slots.len());

        Self {
            slots,
            stats: RegistryStats::new(),
        }
    }

    /// Publish a new buffer for a channel, replacing the previous snapshot.
    ///
    /// Returns the sequence number of the new snapshot, or `None` when the
    /// channel is unknown or the buffer does not match its geometry.
    pub fn publish(&self, channel: &str, data: Bytes) -> Option<u64> {
        let Some(slot) = self.slot(channel) else {
            warn!("Publish to unknown channel '{}' ignored", channel);
            self.stats.publish_rejected.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if data.len() != slot.description.frame_size() {
            warn!(
                "Publish to '{}' rejected: {} bytes, expected {}",
                channel,
                data.len(),
                slot.description.frame_size()
            );
            self.stats.publish_rejected.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let sequence = slot.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let snapshot = FrameSnapshot::new(&slot.name, sequence, slot.description, data);
        *slot.current.write() = snapshot;

        self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
        trace!("Published frame {} for '{}'", sequence, channel);
        Some(sequence)
    }

    /// Latest snapshot of a channel
    pub fn latest(&self, channel: &str) -> Option<FrameSnapshot> {
        let slot = self.slot(channel)?;
        let snapshot = slot.current.read().clone();
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        Some(snapshot)
    }

    /// Latest snapshot of every channel, in registration order
    pub fn snapshot_all(&self) -> Vec<FrameSnapshot> {
        let snapshots: Vec<FrameSnapshot> = self
            .slots
            .iter()
            .map(|slot| slot.current.read().clone())
            .collect();
        self.stats
            .frames_read
            .fetch_add(snapshots.len() as u64, Ordering::Relaxed);
        snapshots
    }

    /// Registered channels, in registration order
    pub fn channels(&self) -> Vec<ChannelInfo> {
        self.slots
            .iter()
            .map(|slot| ChannelInfo {
                name: slot.name.clone(),
                description: slot.description,
            })
            .collect()
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.slot(channel).is_some()
    }

    pub fn stats(&self) -> RegistryStatsSnapshot {
        self.stats.snapshot()
    }

    fn slot(&self, channel: &str) -> Option<&ChannelSlot> {
        self.slots.iter().find(|slot| slot.name == channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use std::sync::Arc;

    fn registry() -> FrameRegistry {
        FrameRegistry::new([
            ChannelInfo {
                name: "ColorStream".to_string(),
                description: FrameDescription::new(4, 4, PixelFormat::Rgba32),
            },
            ChannelInfo {
                name: "DepthStream".to_string(),
                description: FrameDescription::new(2, 2, PixelFormat::Rgba32),
            },
        ])
    }

    #[test]
    fn test_slots_start_blank() {
        let registry = registry();
        let snapshot = registry.latest("DepthStream").unwrap();
        assert_eq!(snapshot.sequence, 0);
        assert_eq!(snapshot.data.len(), 16);
        assert!(registry.latest("IrStream").is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let registry = registry();
        registry.publish("DepthStream", Bytes::from(vec![1u8; 16]));
        registry.publish("DepthStream", Bytes::from(vec![2u8; 16]));
        let seq = registry.publish("DepthStream", Bytes::from(vec![3u8; 16]));

        assert_eq!(seq, Some(3));
        let snapshot = registry.latest("DepthStream").unwrap();
        assert_eq!(snapshot.sequence, 3);
        assert!(snapshot.data.iter().all(|b| *b == 3));
    }

    #[test]
    fn test_repeated_reads_return_same_frame() {
        let registry = registry();
        registry.publish("ColorStream", Bytes::from(vec![9u8; 64]));

        let first = registry.latest("ColorStream").unwrap();
        let second = registry.latest("ColorStream").unwrap();
        assert_eq!(first.sequence, second.sequence);
        assert_eq!(first.data, second.data);
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let registry = registry();
        assert_eq!(registry.publish("ColorStream", Bytes::from(vec![1u8; 10])), None);
        assert_eq!(registry.publish("Unknown", Bytes::from(vec![1u8; 64])), None);
        assert_eq!(registry.latest("ColorStream").unwrap().sequence, 0);
        assert_eq!(registry.stats().publish_rejected, 2);
    }

    #[test]
    fn test_snapshot_all_preserves_order() {
        let registry = registry();
        let names: Vec<String> = registry
            .snapshot_all()
            .into_iter()
            .map(|s| s.channel)
            .collect();
        assert_eq!(names, vec!["ColorStream", "DepthStream"]);
    }

    #[test]
    fn test_readers_never_observe_torn_frames() {
        let registry = Arc::new(registry());
        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for i in 1..=2000u32 {
                    registry.publish("ColorStream", Bytes::from(vec![(i % 251) as u8; 64]));
                }
            })
        };

        for _ in 0..2000 {
            let snapshot = registry.latest("ColorStream").unwrap();
            let first = snapshot.data[0];
            assert!(snapshot.data.iter().all(|b| *b == first));
        }

        writer.join().unwrap();
    }
}
