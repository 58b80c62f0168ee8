//! Destinations that receive the frames of a recording tick.
//!
//! A recording session owns an ordered set of [`Sink`]s and hands every one
//! of them the same [`Tick`]. The built-in sinks are:
//!
//! - [`FileEncodeSink`]: appends one channel's frame to a video container
//! - [`NetworkSink`]: sends one channel's frame as a UDP datagram
//! - [`AggregateSink`]: POSTs all channels of the tick as one JSON object
//!
//! Errors returned from [`Sink::write`] are isolated by the session: they are
//! logged and counted, and the tick, the frame counter and every other sink
//! carry on.

mod aggregate;
mod file;
mod network;

pub use aggregate::{AggregatePayload, AggregateSink};
pub use file::FileEncodeSink;
pub use network::NetworkSink;

use crate::error::SinkError;
use crate::frame::FrameSnapshot;
use async_trait::async_trait;
use serde::Serialize;

/// Frames dispatched by one pacing tick, in channel registration order
#[derive(Debug, Clone)]
pub struct Tick {
    /// Zero-based tick index within the session
    pub index: u64,
    pub frames: Vec<FrameSnapshot>,
}

impl Tick {
    pub fn new(index: u64, frames: Vec<FrameSnapshot>) -> Self {
        Self { index, frames }
    }

    /// Snapshot for one channel
    pub fn frame(&self, channel: &str) -> Option<&FrameSnapshot> {
        self.frames.iter().find(|f| f.channel == channel)
    }

    /// Snapshot for one channel or a [`SinkError::MissingChannel`]
    pub fn require(&self, channel: &str) -> Result<&FrameSnapshot, SinkError> {
        self.frame(channel)
            .ok_or_else(|| SinkError::MissingChannel(channel.to_string()))
    }
}

/// Counters kept by each sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    /// Payloads handed to the destination
    pub delivered: u64,
    /// Payloads the destination rejected or that failed in transport
    pub failed: u64,
    /// Payloads skipped without an attempt (e.g. concurrency cap reached)
    pub dropped: u64,
}

/// A destination for recording ticks.
///
/// Sinks are created when a session starts and are owned by its pacing task,
/// so methods take `&mut self` and are never called concurrently.
///
/// `finish` is called exactly once per successfully opened sink when the
/// session stops, even if no tick was ever written. Writes after `finish`
/// return [`SinkError::Disposed`].
#[async_trait]
pub trait Sink: Send {
    /// Name used in logs and in the session metadata
    fn name(&self) -> &str;

    /// Accept one tick
    async fn write(&mut self, tick: &Tick) -> Result<(), SinkError>;

    /// Flush and release resources
    async fn finish(&mut self) -> Result<(), SinkError>;

    /// Current counters
    fn stats(&self) -> SinkStats;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameDescription, PixelFormat};
    use bytes::Bytes;

    fn snapshot(channel: &str) -> FrameSnapshot {
        FrameSnapshot::new(
            channel,
            1,
            FrameDescription::new(1, 1, PixelFormat::Rgba32),
            Bytes::from_static(&[1, 2, 3, 4]),
        )
    }

    #[test]
    fn test_tick_lookup_by_channel() {
        let tick = Tick::new(0, vec![snapshot("ColorStream"), snapshot("DepthStream")]);
        assert_eq!(tick.frame("DepthStream").unwrap().channel, "DepthStream");
        assert!(tick.frame("IrStream").is_none());
    }

    #[test]
    fn test_require_reports_missing_channel() {
        let tick = Tick::new(0, vec![snapshot("ColorStream")]);
        match tick.require("DepthStream") {
            Err(SinkError::MissingChannel(name)) => assert_eq!(name, "DepthStream"),
            other => panic!("unexpected result: {:?}", other.map(|f| f.channel.clone())),
        }
    }

    #[test]
    fn test_sink_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Box<dyn Sink>>();
    }
}
