use crate::session::Recorder;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Elapsed recording time as `HH:MM:SS`
pub fn format_record_time(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Periodic status line while a session is active
pub(super) fn spawn_status_line(
    recorder: Arc<Mutex<Recorder>>,
    period: Duration,
    cancellation_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(100)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = interval.tick() => {}
            }

            // Skip the line rather than wait on a start/stop in progress
            let Ok(recorder) = recorder.try_lock() else {
                continue;
            };
            if let Some(elapsed) = recorder.elapsed() {
                info!(
                    "REC {} | {} frames",
                    format_record_time(elapsed),
                    recorder.frame_count()
                );
            }
        }
    })
}
