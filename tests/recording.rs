//! End-to-end recording through the public API: synthetic sensors, the
//! acquisition loop, raw file containers, a UDP receiver and an HTTP
//! endpoint standing in for the aggregate consumer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use depthcam::encoder::RawFrameReader;
use depthcam::session::{AggregateTarget, NetworkTarget, MANIFEST_JSON_FILE, MANIFEST_LOG_FILE};
use depthcam::sink::AggregatePayload;
use depthcam::source::ChannelKind;
use depthcam::{
    AcquisitionLoop, ChannelInfo, FrameRegistry, FrameSource, Recorder, RecordingOptions,
    SensorChannel, SyntheticSensor, COLOR_CHANNEL, DEPTH_CHANNEL,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};

fn channel_info(name: &str, kind: ChannelKind, sensor: &SyntheticSensor) -> ChannelInfo {
    ChannelInfo {
        name: name.to_string(),
        description: FrameSource::output_description(kind, sensor.description()),
    }
}

/// Minimal HTTP endpoint: answers 200 to every request and keeps the
/// last decoded payload
async fn spawn_http_endpoint(
    requests: Arc<AtomicUsize>,
    last_payload: Arc<parking_lot::Mutex<Option<AggregatePayload>>>,
) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let requests = Arc::clone(&requests);
            let last_payload = Arc::clone(&last_payload);
            tokio::spawn(async move {
                let mut data = Vec::new();
                let mut buf = [0u8; 8192];
                loop {
                    let Ok(n) = stream.read(&mut buf).await else {
                        return;
                    };
                    if n == 0 {
                        return;
                    }
                    data.extend_from_slice(&buf[..n]);

                    let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
                        continue;
                    };
                    let head = String::from_utf8_lossy(&data[..pos]).to_ascii_lowercase();
                    let length = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if data.len() < pos + 4 + length {
                        continue;
                    }

                    let body = data[pos + 4..pos + 4 + length].to_vec();
                    data.drain(..pos + 4 + length);
                    if let Ok(payload) = serde_json::from_slice::<AggregatePayload>(&body) {
                        *last_payload.lock() = Some(payload);
                    }
                    requests.fetch_add(1, Ordering::SeqCst);
                    if stream
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            });
        }
    });

    addr
}

#[tokio::test]
async fn test_full_session_with_all_sinks() {
    let root = tempfile::tempdir().unwrap();

    let color = SyntheticSensor::color(8, 4, 200);
    let depth = SyntheticSensor::depth(8, 4, 200);
    let registry = Arc::new(FrameRegistry::new([
        channel_info(COLOR_CHANNEL, ChannelKind::Color, &color),
        channel_info(DEPTH_CHANNEL, ChannelKind::Depth, &depth),
    ]));
    let acquisition = AcquisitionLoop::start(
        vec![
            FrameSource::color(COLOR_CHANNEL, Box::new(color), Arc::clone(&registry)),
            FrameSource::depth(DEPTH_CHANNEL, Box::new(depth), Arc::clone(&registry)),
        ],
        Duration::from_millis(2),
    );

    let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let requests = Arc::new(AtomicUsize::new(0));
    let last_payload = Arc::new(parking_lot::Mutex::new(None));
    let http = spawn_http_endpoint(Arc::clone(&requests), Arc::clone(&last_payload)).await;

    let mut options = RecordingOptions::new(root.path(), 30);
    options.network = Some(NetworkTarget {
        address: udp.local_addr().unwrap(),
        send_timeout: Duration::from_millis(50),
    });
    options.aggregate = Some(AggregateTarget {
        url: format!("http://{}/frames", http),
        request_timeout: Duration::from_secs(2),
        max_in_flight: 4,
    });

    let mut recorder = Recorder::new(Arc::clone(&registry), options);
    let info = recorder.start().await.unwrap();
    assert_eq!(info.sink_count, 5);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let manifest = recorder.stop().await.unwrap();
    acquisition.stop().await;

    assert!(manifest.frame_count >= 2);
    assert!(manifest.sinks.iter().all(|s| s.dispatch_errors == 0));

    // Every tick reached both files
    for channel in [COLOR_CHANNEL, DEPTH_CHANNEL] {
        let reader = RawFrameReader::open(info.output_dir.join(format!("{}.frames", channel)))
            .await
            .unwrap();
        assert_eq!(reader.header().frame_count as u64, manifest.frame_count);
        assert_eq!(reader.header().description.frame_size(), 8 * 4 * 4);
    }

    // Depth frames are colorized: red-to-blue gradient or opaque black
    let mut reader = RawFrameReader::open(info.output_dir.join("DepthStream.frames"))
        .await
        .unwrap();
    let mut last = None;
    while let Some((_, frame)) = reader.next_frame().await.unwrap() {
        last = Some(frame);
    }
    let last = last.unwrap();
    assert!(last.chunks_exact(4).all(|px| px[1] == 0 && px[3] == 255));

    // Datagrams arrive with the raw frame size
    let mut buf = vec![0u8; 1024];
    let (len, _) = tokio::time::timeout(Duration::from_secs(1), udp.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(len, 8 * 4 * 4);

    // The aggregate endpoint saw requests carrying both channels
    assert!(requests.load(Ordering::SeqCst) > 0);
    let payload = last_payload.lock().clone().unwrap();
    assert_eq!(payload.channels().count(), 2);
    assert_eq!(payload.frame(DEPTH_CHANNEL).unwrap().len(), 8 * 4 * 4);

    let log = std::fs::read_to_string(info.output_dir.join(MANIFEST_LOG_FILE)).unwrap();
    assert!(log.contains("Minimum LUT Depth: 0"));
    assert!(log.contains("Maximum LUT Depth: 6000"));

    let json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(info.output_dir.join(MANIFEST_JSON_FILE)).unwrap())
            .unwrap();
    assert_eq!(json["sinks"].as_array().unwrap().len(), 5);
    assert_eq!(json["target_frame_rate"], 30);
}

#[tokio::test]
async fn test_consecutive_sessions_use_separate_directories() {
    let root = tempfile::tempdir().unwrap();
    let sensor = SyntheticSensor::color(4, 4, 30);
    let registry = Arc::new(FrameRegistry::new([channel_info(
        COLOR_CHANNEL,
        ChannelKind::Color,
        &sensor,
    )]));
    let mut recorder = Recorder::new(registry, RecordingOptions::new(root.path(), 30));

    let first = recorder.start().await.unwrap();
    recorder.stop().await.unwrap();
    let second = recorder.start().await.unwrap();
    recorder.stop().await.unwrap();

    assert_ne!(first.output_dir, second.output_dir);
    assert_ne!(first.session_id, second.session_id);
    assert!(second.output_dir.join(format!("{}.frames", COLOR_CHANNEL)).exists());
}
