use once_cell::sync::Lazy;
use regex::Regex;

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2})\.(\d{1,2})").expect("valid duration regex")
});

static OUT_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^out_time_ms=(\d+)").expect("valid out_time regex"));

/// Incremental parser for ffmpeg's stderr progress stream.
///
/// The banner's `Duration: HH:MM:SS.ss` line is captured once; afterwards
/// every `out_time_ms=<microseconds>` line yields a percentage against the
/// total. Callers that know the expected output duration up front (the
/// encoder, whose input duration is the frame budget) supply it and the
/// banner value is only a fallback.
#[derive(Debug)]
pub struct ProgressParser {
    expected_seconds: Option<f64>,
    banner_seconds: Option<f64>,
}

impl ProgressParser {
    pub fn new(expected_seconds: Option<f64>) -> Self {
        Self {
            expected_seconds: expected_seconds.filter(|s| s.is_finite() && *s > 0.0),
            banner_seconds: None,
        }
    }

    /// Feed one stderr line; returns the derived percentage when the line
    /// advances progress.
    pub fn feed_line(&mut self, line: &str) -> Option<f64> {
        if self.banner_seconds.is_none()
            && let Some(caps) = DURATION_RE.captures(line)
        {
            let hours: f64 = caps[1].parse().ok()?;
            let minutes: f64 = caps[2].parse().ok()?;
            let seconds: f64 = caps[3].parse().ok()?;
            let centis: f64 = caps[4].parse().ok()?;
            let frac = centis / 10f64.powi(caps[4].len() as i32);
            self.banner_seconds = Some(hours * 3600.0 + minutes * 60.0 + seconds + frac);
            return None;
        }

        let caps = OUT_TIME_RE.captures(line.trim())?;
        let micros: f64 = caps[1].parse().ok()?;
        let total = self.expected_seconds.or(self.banner_seconds)?;
        Some((micros / 1e6 / total * 100.0).clamp(0.0, 100.0))
    }
}
