use super::{Sink, SinkStats, Tick};
use crate::error::SinkError;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Best-effort UDP streamer for one channel.
///
/// Each tick's frame is sent as a single datagram. Frames larger than the
/// path allows fail in the kernel; like every other transport error this is
/// counted and otherwise ignored, and `write` still reports success.
pub struct NetworkSink {
    name: String,
    channel: String,
    socket: Option<UdpSocket>,
    target: SocketAddr,
    send_timeout: Duration,
    stats: SinkStats,
}

impl NetworkSink {
    pub async fn bind(
        channel: &str,
        target: SocketAddr,
        send_timeout: Duration,
    ) -> Result<Self, SinkError> {
        let bind_addr: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| SinkError::transport(format!("failed to bind UDP socket: {}", e)))?;

        info!("Network sink for '{}' sending to {}", channel, target);

        Ok(Self {
            name: format!("udp:{}", channel),
            channel: channel.to_string(),
            socket: Some(socket),
            target,
            send_timeout,
            stats: SinkStats::default(),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    fn record_failure(&mut self, reason: &str) {
        self.stats.failed += 1;
        if self.stats.failed == 1 {
            warn!(
                "Network sink for '{}' failed to send to {}: {} (further failures logged at debug)",
                self.channel, self.target, reason
            );
        } else {
            debug!(
                "Network sink for '{}' send failure #{}: {}",
                self.channel, self.stats.failed, reason
            );
        }
    }
}

#[async_trait]
impl Sink for NetworkSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, tick: &Tick) -> Result<(), SinkError> {
        let socket = self.socket.as_ref().ok_or(SinkError::Disposed)?;
        let frame = tick.require(&self.channel)?;

        match tokio::time::timeout(self.send_timeout, socket.send_to(&frame.data, self.target)).await
        {
            Ok(Ok(_)) => self.stats.delivered += 1,
            Ok(Err(e)) => self.record_failure(&e.to_string()),
            Err(_) => self.record_failure("send timed out"),
        }

        Ok(())
    }

    async fn finish(&mut self) -> Result<(), SinkError> {
        if self.socket.take().is_some() {
            info!(
                "Network sink for '{}' closed ({} sent, {} failed)",
                self.channel, self.stats.delivered, self.stats.failed
            );
        }
        Ok(())
    }

    fn stats(&self) -> SinkStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameDescription, FrameSnapshot, PixelFormat};
    use bytes::Bytes;

    fn tick(channel: &str, data: Vec<u8>) -> Tick {
        let desc = FrameDescription::new(1, (data.len() / 4) as u32, PixelFormat::Rgba32);
        Tick::new(0, vec![FrameSnapshot::new(channel, 1, desc, Bytes::from(data))])
    }

    #[tokio::test]
    async fn test_frame_is_sent_as_one_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();

        let mut sink = NetworkSink::bind("ColorStream", target, Duration::from_millis(100))
            .await
            .unwrap();
        sink.write(&tick("ColorStream", vec![7u8; 64])).await.unwrap();

        let mut buf = [0u8; 128];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], &[7u8; 64][..]);
        assert_eq!(sink.stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_oversized_datagram_is_swallowed() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();

        let mut sink = NetworkSink::bind("DepthStream", target, Duration::from_millis(100))
            .await
            .unwrap();
        // Larger than the maximum UDP payload
        let result = sink.write(&tick("DepthStream", vec![0u8; 70_000])).await;

        assert!(result.is_ok());
        assert_eq!(sink.stats().failed, 1);
        assert_eq!(sink.stats().delivered, 0);
    }

    #[tokio::test]
    async fn test_write_after_finish_is_rejected() {
        let target: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut sink = NetworkSink::bind("ColorStream", target, Duration::from_millis(10))
            .await
            .unwrap();
        sink.finish().await.unwrap();
        sink.finish().await.unwrap();

        let result = sink.write(&tick("ColorStream", vec![0u8; 4])).await;
        assert!(matches!(result, Err(SinkError::Disposed)));
    }
}
