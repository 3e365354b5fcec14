//! Progress parsing and throttling for the encoder's stderr stream.
//!
//! With `-progress pipe:2` FFmpeg interleaves structured `key=value` lines
//! with its regular status lines. Three time forms are recognized, in this
//! order of preference per line:
//!
//! 1. `time=HH:MM:SS.cc` (status lines)
//! 2. `out_time_ms=<microseconds>` (structured progress)
//! 3. `out_time=HH:MM:SS.uuuuuu` (structured progress)

use std::time::{Duration, Instant};

/// One recognized progress observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressLine {
    /// Encoder position in seconds.
    pub seconds: f64,
    /// Encoder-reported speed multiplier, when the line carried one.
    pub reported_speed: Option<f64>,
}

/// Parse one stderr line; `None` when it carries no position.
#[must_use]
pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let mut time: Option<f64> = None;
    let mut out_time_ms: Option<f64> = None;
    let mut out_time: Option<f64> = None;
    let mut reported_speed: Option<f64> = None;

    for token in line.split_whitespace() {
        if let Some(rest) = token.strip_prefix("time=") {
            time = Some(parse_clock(rest));
        } else if let Some(rest) = token.strip_prefix("out_time_ms=") {
            if let Ok(us) = rest.parse::<f64>() {
                out_time_ms = Some(us / 1_000_000.0);
            }
        } else if let Some(rest) = token.strip_prefix("out_time=") {
            out_time = Some(parse_clock(rest));
        } else if let Some(rest) = token.strip_prefix("speed=") {
            if let Ok(v) = rest.trim_end_matches('x').parse::<f64>() {
                reported_speed = Some(v);
            }
        }
    }

    let seconds = time.or(out_time_ms).or(out_time)?;
    (seconds.is_finite() && seconds >= 0.0).then_some(ProgressLine {
        seconds,
        reported_speed,
    })
}

/// Whether this is FFmpeg's final `progress=end` marker.
#[must_use]
pub fn is_progress_end(line: &str) -> bool {
    line.split_whitespace()
        .any(|token| token.strip_prefix("progress=") == Some("end"))
}

/// Parse `HH:MM:SS.frac` (or plain seconds) into seconds.
#[must_use]
pub fn parse_clock(s: &str) -> f64 {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() == 3 {
        let h = parts[0].parse::<f64>().unwrap_or(0.0);
        let m = parts[1].parse::<f64>().unwrap_or(0.0);
        let sec = parts[2].parse::<f64>().unwrap_or(0.0);
        return h * 3600.0 + m * 60.0 + sec;
    }
    s.parse::<f64>().unwrap_or(0.0)
}

/// Percentage for a known duration, capped at 99 until the encoder exits.
#[must_use]
pub fn percent_of(duration_sec: f64, current_sec: f64) -> u8 {
    if !duration_sec.is_finite() || duration_sec <= 0.0 {
        return 0;
    }
    let pct = (current_sec / duration_sec * 100.0).floor();
    pct.clamp(0.0, 99.0) as u8
}

/// Throttle gate: admit an update every `min_interval` *or* every
/// `percent_step` of progress, whichever comes first.
pub struct ProgressGate {
    min_interval: Duration,
    percent_step: u8,
    last_emit: Option<Instant>,
    last_percent: u8,
}

impl ProgressGate {
    /// Create a gate with the given spacing.
    #[must_use]
    pub fn new(min_interval: Duration, percent_step: u8) -> Self {
        Self {
            min_interval,
            percent_step: percent_step.max(1),
            last_emit: None,
            last_percent: 0,
        }
    }

    /// Whether an update at `percent` should go out now; records the emit
    /// when admitted.
    pub fn admit(&mut self, percent: u8) -> bool {
        let now = Instant::now();
        let due_by_time = self
            .last_emit
            .is_none_or(|last| now.duration_since(last) >= self.min_interval);
        let due_by_step = percent >= self.last_percent.saturating_add(self.percent_step);
        if due_by_time || due_by_step {
            self.last_emit = Some(now);
            self.last_percent = percent;
            return true;
        }
        false
    }
}

/// Bounded tail of recent stderr output for failure diagnostics.
pub struct StderrTail {
    buf: Vec<u8>,
    cap: usize,
}

impl StderrTail {
    /// Keep at most `cap` trailing bytes.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            buf: Vec::new(),
            cap,
        }
    }

    /// Append one line.
    pub fn push_line(&mut self, line: &str) {
        if !self.buf.is_empty() {
            self.buf.push(b'\n');
        }
        self.buf.extend_from_slice(line.as_bytes());
        if self.buf.len() > self.cap {
            let cut = self.buf.len() - self.cap;
            self.buf.drain(..cut);
        }
    }

    /// The tail as lossy UTF-8.
    #[must_use]
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }

    /// Whether nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
