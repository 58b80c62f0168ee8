use crate::lut::{DepthColorLut, LutDescriptor};
use crate::sink::SinkStats;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const MANIFEST_LOG_FILE: &str = "recordings.log";
pub const MANIFEST_JSON_FILE: &str = "session.json";
pub const LUT_DUMP_FILE: &str = "LUT.csv";

/// Per-sink outcome of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkReport {
    pub name: String,
    /// Ticks for which `write` returned an error
    pub dispatch_errors: u64,
    /// Whether `finish` completed without error
    pub finished_cleanly: bool,
    #[serde(flatten)]
    pub stats: SinkStats,
}

/// Summary written to the session directory when recording stops
#[derive(Debug, Clone, Serialize)]
pub struct SessionManifest {
    pub session_id: Uuid,
    pub output_dir: PathBuf,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
    pub elapsed_seconds: f64,
    pub frame_count: u64,
    pub target_frame_rate: u32,
    pub effective_frame_rate: f64,
    pub lut: LutDescriptor,
    pub sinks: Vec<SinkReport>,
}

/// Frames per second actually achieved; 0 when no time has elapsed
pub fn effective_rate(frame_count: u64, elapsed_seconds: f64) -> f64 {
    if elapsed_seconds > 0.0 {
        frame_count as f64 / elapsed_seconds
    } else {
        0.0
    }
}

impl SessionManifest {
    /// Human-readable `Key: value` form written to `recordings.log`
    pub fn to_log(&self) -> String {
        let mut log = String::new();
        // Writing into a String cannot fail
        let _ = writeln!(log, "Start Time: {}", self.start_time.format("%Y-%m-%d %H:%M:%S%.3f"));
        let _ = writeln!(log, "End Time: {}", self.end_time.format("%Y-%m-%d %H:%M:%S%.3f"));
        let _ = writeln!(log, "Elapsed Seconds: {}", self.elapsed_seconds);
        let _ = writeln!(log, "Number of Recorded Frames: {}", self.frame_count);
        let _ = writeln!(log, "Effective Framerate: {:.2}", self.effective_frame_rate);
        let _ = writeln!(log, "Minimum LUT Depth: {}", self.lut.min_depth);
        let _ = writeln!(log, "Maximum LUT Depth: {}", self.lut.max_depth);
        let _ = writeln!(log, "LUT Start Color: {}", self.lut.start_color);
        let _ = writeln!(log, "LUT End Color: {}", self.lut.end_color);
        log
    }

    /// Write `recordings.log`, `session.json` and the LUT dump into `dir`
    pub async fn write_to(&self, dir: &Path, lut: &'static DepthColorLut) -> crate::Result<()> {
        tokio::fs::write(dir.join(MANIFEST_LOG_FILE), self.to_log()).await?;

        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(dir.join(MANIFEST_JSON_FILE), json).await?;

        let lut_path = dir.join(LUT_DUMP_FILE);
        tokio::task::spawn_blocking(move || lut.write_dump_file(&lut_path))
            .await
            .map_err(|e| crate::DepthcamError::system(format!("LUT dump task failed: {}", e)))??;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn manifest(frame_count: u64, elapsed_seconds: f64) -> SessionManifest {
        let start = Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        SessionManifest {
            session_id: Uuid::new_v4(),
            output_dir: PathBuf::from("/tmp/recordings/2024-3-05--14-07-09"),
            start_time: start,
            end_time: start + chrono::Duration::milliseconds((elapsed_seconds * 1000.0) as i64),
            elapsed_seconds,
            frame_count,
            target_frame_rate: 30,
            effective_frame_rate: effective_rate(frame_count, elapsed_seconds),
            lut: DepthColorLut::global().descriptor(),
            sinks: vec![SinkReport {
                name: "file:ColorStream".to_string(),
                dispatch_errors: 0,
                finished_cleanly: true,
                stats: SinkStats {
                    delivered: frame_count,
                    ..Default::default()
                },
            }],
        }
    }

    #[test]
    fn test_effective_rate() {
        assert_eq!(effective_rate(300, 10.0), 30.0);
        assert_eq!(effective_rate(0, 0.0), 0.0);
        assert_eq!(effective_rate(5, 0.0), 0.0);
    }

    #[test]
    fn test_log_lines() {
        let log = manifest(299, 10.0).to_log();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 9);
        assert_eq!(lines[0], "Start Time: 2024-03-05 14:07:09.000");
        assert_eq!(lines[2], "Elapsed Seconds: 10");
        assert_eq!(lines[3], "Number of Recorded Frames: 299");
        assert_eq!(lines[4], "Effective Framerate: 29.90");
        assert_eq!(lines[5], "Minimum LUT Depth: 0");
        assert_eq!(lines[6], "Maximum LUT Depth: 6000");
        assert!(lines[7].starts_with("LUT Start Color: RGBA(1.000"));
        assert!(lines[8].starts_with("LUT End Color: RGBA(0.000"));
    }

    #[tokio::test]
    async fn test_write_to_creates_all_files() {
        let dir = tempfile::tempdir().unwrap();
        manifest(3, 0.1)
            .write_to(dir.path(), DepthColorLut::global())
            .await
            .unwrap();

        assert!(dir.path().join(MANIFEST_LOG_FILE).exists());

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(MANIFEST_JSON_FILE)).unwrap())
                .unwrap();
        assert_eq!(json["frame_count"], 3);
        assert_eq!(json["sinks"][0]["name"], "file:ColorStream");
        assert_eq!(json["sinks"][0]["delivered"], 3);

        let lut = std::fs::read_to_string(dir.path().join(LUT_DUMP_FILE)).unwrap();
        assert_eq!(lut.lines().count(), 6000);
    }
}
