use super::{Sink, SinkStats, Tick};
use crate::error::SinkError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// How long `finish` waits for in-flight requests before aborting them
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// JSON body of one aggregate request: channel name to base64 frame bytes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregatePayload(pub BTreeMap<String, String>);

impl AggregatePayload {
    pub fn from_tick(tick: &Tick) -> Self {
        Self(
            tick.frames
                .iter()
                .map(|f| (f.channel.clone(), STANDARD.encode(&f.data)))
                .collect(),
        )
    }

    /// Decoded frame bytes for one channel
    pub fn frame(&self, channel: &str) -> Option<Vec<u8>> {
        self.0.get(channel).and_then(|b| STANDARD.decode(b).ok())
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

#[derive(Default)]
struct RequestCounters {
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Periodic publisher of every channel as one HTTP POST per tick.
///
/// Requests are fire-and-forget: `write` serializes the tick and spawns the
/// request, the response body is ignored. At most `max_in_flight` requests
/// run at once; a tick arriving while the cap is reached is dropped and
/// counted instead of queued.
pub struct AggregateSink {
    name: String,
    url: String,
    client: reqwest::Client,
    permits: Arc<Semaphore>,
    requests: JoinSet<()>,
    counters: Arc<RequestCounters>,
    dropped: u64,
    drain_timeout: Duration,
    finished: bool,
}

impl AggregateSink {
    pub fn new(
        url: impl Into<String>,
        request_timeout: Duration,
        max_in_flight: usize,
    ) -> Result<Self, SinkError> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SinkError::transport(format!("failed to build HTTP client: {}", e)))?;

        info!(
            "Aggregate sink posting to {} (timeout {:?}, max {} in flight)",
            url, request_timeout, max_in_flight
        );

        Ok(Self {
            name: "aggregate".to_string(),
            url,
            client,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            requests: JoinSet::new(),
            counters: Arc::new(RequestCounters::default()),
            dropped: 0,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            finished: false,
        })
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Requests spawned but not yet reaped
    pub fn in_flight(&self) -> usize {
        self.requests.len()
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.requests.try_join_next() {
            if let Err(e) = result {
                debug!("Aggregate request task ended abnormally: {}", e);
            }
        }
    }
}

#[async_trait]
impl Sink for AggregateSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, tick: &Tick) -> Result<(), SinkError> {
        if self.finished {
            return Err(SinkError::Disposed);
        }
        self.reap_finished();

        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            self.dropped += 1;
            debug!(
                "Aggregate sink at capacity, dropping tick {} ({} dropped)",
                tick.index, self.dropped
            );
            return Ok(());
        };

        let body = serde_json::to_vec(&AggregatePayload::from_tick(tick))
            .map_err(|e| SinkError::custom(format!("failed to serialize payload: {}", e)))?;

        let request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        let counters = Arc::clone(&self.counters);
        let url = self.url.clone();
        let index = tick.index;

        self.requests.spawn(async move {
            let _permit = permit;
            match request.send().await {
                Ok(_) => {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    let failed = counters.failed.fetch_add(1, Ordering::Relaxed) + 1;
                    if failed == 1 {
                        warn!(
                            "Aggregate POST to {} failed for tick {}: {} (further failures logged at debug)",
                            url, index, e
                        );
                    } else {
                        debug!("Aggregate POST failure #{} for tick {}: {}", failed, index, e);
                    }
                }
            }
        });

        Ok(())
    }

    async fn finish(&mut self) -> Result<(), SinkError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let pending = self.requests.len();
        if pending > 0 {
            debug!("Waiting for {} aggregate request(s)", pending);
            let requests = &mut self.requests;
            let drained = tokio::time::timeout(self.drain_timeout, async {
                while requests.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(
                    "Aborting {} aggregate request(s) still in flight",
                    self.requests.len()
                );
                self.requests.abort_all();
                while self.requests.join_next().await.is_some() {}
            }
        }

        let stats = self.stats();
        info!(
            "Aggregate sink closed ({} delivered, {} failed, {} dropped)",
            stats.delivered, stats.failed, stats.dropped
        );
        Ok(())
    }

    fn stats(&self) -> SinkStats {
        SinkStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameDescription, FrameSnapshot, PixelFormat};
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    fn tick(index: u64) -> Tick {
        let desc = FrameDescription::new(1, 1, PixelFormat::Rgba32);
        Tick::new(
            index,
            vec![
                FrameSnapshot::new("ColorStream", 1, desc, Bytes::from_static(&[1, 2, 3, 4])),
                FrameSnapshot::new("DepthStream", 1, desc, Bytes::from_static(&[255, 0, 0, 255])),
            ],
        )
    }

    /// Read one HTTP request and return (head, body)
    async fn read_request(stream: &mut TcpStream) -> (String, Vec<u8>) {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&data[..pos]).to_string();
                let length = head
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap())
                    })
                    .unwrap_or(0);
                if data.len() >= pos + 4 + length {
                    return (head, data[pos + 4..pos + 4 + length].to_vec());
                }
            }
        }
        (String::from_utf8_lossy(&data).to_string(), Vec::new())
    }

    #[tokio::test]
    async fn test_posts_json_map_of_channels() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
            tx.send(request).await.unwrap();
        });

        let mut sink = AggregateSink::new(
            format!("http://{}/frames", addr),
            Duration::from_secs(2),
            4,
        )
        .unwrap();
        sink.write(&tick(0)).await.unwrap();

        let (head, body) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(head.starts_with("POST /frames"));
        assert!(head.to_ascii_lowercase().contains("content-type: application/json"));

        let payload: AggregatePayload = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.frame("ColorStream").unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(payload.frame("DepthStream").unwrap(), vec![255, 0, 0, 255]);

        sink.finish().await.unwrap();
        assert_eq!(sink.stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_ticks_dropped_while_at_capacity() {
        // Accepts connections but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let mut sink = AggregateSink::new(format!("http://{}/", addr), Duration::from_secs(10), 1)
            .unwrap()
            .with_drain_timeout(Duration::from_millis(100));

        sink.write(&tick(0)).await.unwrap();
        sink.write(&tick(1)).await.unwrap();
        sink.write(&tick(2)).await.unwrap();

        assert_eq!(sink.stats().dropped, 2);
        assert_eq!(sink.in_flight(), 1);

        // Hanging request is aborted rather than awaited
        tokio::time::timeout(Duration::from_secs(2), sink.finish())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sink.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_counted_not_raised() {
        // Bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();

        let mut sink =
            AggregateSink::new(format!("http://{}/", addr), Duration::from_secs(2), 4).unwrap();
        assert!(sink.write(&tick(0)).await.is_ok());

        sink.finish().await.unwrap();
        assert_eq!(sink.stats().failed, 1);
        assert!(matches!(sink.write(&tick(1)).await, Err(SinkError::Disposed)));
    }
}
