//! Container probing via FFprobe.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;

/// How long a probe may take before it is abandoned.
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Probe the container duration of `input` in seconds.
///
/// Returns `None` on any failure; progress reporting then degrades to
/// current-time-only without a percentage.
pub async fn probe_duration(ffprobe: &Path, input: &Path) -> Option<f64> {
    let result = tokio::time::timeout(
        PROBE_TIMEOUT,
        Command::new(ffprobe)
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(input)
            .output(),
    )
    .await;

    let output = match result {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::warn!(input = %input.display(), error = %e, "ffprobe failed to run");
            return None;
        }
        Err(_) => {
            tracing::warn!(input = %input.display(), "ffprobe timed out");
            return None;
        }
    };

    if !output.status.success() {
        tracing::warn!(
            input = %input.display(),
            status = %output.status,
            "ffprobe exited with failure"
        );
        return None;
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let duration = text.trim().parse::<f64>().ok()?;
    (duration.is_finite() && duration > 0.0).then_some(duration)
}
