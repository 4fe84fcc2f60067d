use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::command::{CommandContext, CommandError};

/// Stream metadata needed to size the pipeline: geometry, the source frame
/// rate, and the total frame count.
#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub input_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub frame_count: i64,
}

impl VideoInfo {
    /// Bytes per raw RGB24 frame.
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe failed for {}: {detail}", path.display())]
    ProbeFailed {
        path: PathBuf,
        detail: String,
        output: String,
    },
    #[error("no video streams found in {}", path.display())]
    NoVideoStream { path: PathBuf, output: String },
    #[error("invalid frame rate {raw:?} reported for {}", path.display())]
    InvalidFrameRate {
        path: PathBuf,
        raw: String,
        output: String,
    },
    #[error("invalid frame count {raw:?} reported for {}", path.display())]
    InvalidFrameCount {
        path: PathBuf,
        raw: String,
        output: String,
    },
    #[error("invalid stream geometry {width}x{height} reported for {}", path.display())]
    InvalidGeometry {
        path: PathBuf,
        width: u32,
        height: u32,
        output: String,
    },
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl ProbeError {
    /// Combined probe output for the failure record; empty when the probe
    /// never produced any.
    pub fn process_output(&self) -> &str {
        match self {
            Self::ProbeFailed { output, .. }
            | Self::NoVideoStream { output, .. }
            | Self::InvalidFrameRate { output, .. }
            | Self::InvalidFrameCount { output, .. }
            | Self::InvalidGeometry { output, .. } => output,
            Self::Command(_) => "",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeDocument {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    nb_frames: Option<String>,
    #[serde(default)]
    nb_read_frames: Option<String>,
}

/// Probe the first video stream of `input`.
///
/// A fast metadata probe supplies geometry, frame rate and — when the
/// container carries it — the frame count. Containers that report nothing
/// (or the literal `N/A`) get a second, counting probe.
pub async fn get_video_info(
    input: &Path,
    cancel: &CancellationToken,
) -> Result<VideoInfo, ProbeError> {
    let input_str = input.to_string_lossy().into_owned();
    let cmd = CommandContext::new(
        "ffprobe",
        [
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate,nb_frames",
            "-of",
            "json",
            input_str.as_str(),
        ],
    );

    let captured = cmd.run_capture(cancel).await?;
    if !captured.status.success() {
        return Err(ProbeError::ProbeFailed {
            path: input.to_path_buf(),
            detail: format!("exit status {}", captured.status),
            output: captured.output,
        });
    }

    let stream = parse_first_stream(&captured.output).ok_or_else(|| ProbeError::NoVideoStream {
        path: input.to_path_buf(),
        output: captured.output.clone(),
    })?;

    let raw_rate = stream.r_frame_rate.clone().unwrap_or_default();
    let frame_rate =
        parse_frame_rate(&raw_rate).ok_or_else(|| ProbeError::InvalidFrameRate {
            path: input.to_path_buf(),
            raw: raw_rate,
            output: captured.output.clone(),
        })?;

    let width = stream.width.unwrap_or(0);
    let height = stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(ProbeError::InvalidGeometry {
            path: input.to_path_buf(),
            width,
            height,
            output: captured.output,
        });
    }

    let frame_count = match stream.nb_frames.as_deref() {
        Some(raw) if !needs_counting_probe(Some(raw)) => {
            raw.parse::<i64>()
                .map_err(|_| ProbeError::InvalidFrameCount {
                    path: input.to_path_buf(),
                    raw: raw.to_string(),
                    output: captured.output.clone(),
                })?
        }
        _ => count_frames(input, &input_str, cancel).await?,
    };

    Ok(VideoInfo {
        input_path: input.to_path_buf(),
        width,
        height,
        frame_rate,
        frame_count,
    })
}

/// Slow path: decode the stream once, counting frames.
async fn count_frames(
    input: &Path,
    input_str: &str,
    cancel: &CancellationToken,
) -> Result<i64, ProbeError> {
    let cmd = CommandContext::new(
        "ffprobe",
        [
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-count_frames",
            "-show_entries",
            "stream=nb_read_frames",
            "-of",
            "json",
            input_str,
        ],
    );

    let captured = cmd.run_capture(cancel).await?;
    if !captured.status.success() {
        return Err(ProbeError::ProbeFailed {
            path: input.to_path_buf(),
            detail: format!("counting probe exit status {}", captured.status),
            output: captured.output,
        });
    }

    let stream = parse_first_stream(&captured.output).ok_or_else(|| ProbeError::NoVideoStream {
        path: input.to_path_buf(),
        output: captured.output.clone(),
    })?;

    let raw = stream.nb_read_frames.clone().unwrap_or_default();
    raw.parse::<i64>()
        .map_err(|_| ProbeError::InvalidFrameCount {
            path: input.to_path_buf(),
            raw,
            output: captured.output,
        })
}

fn parse_first_stream(output: &str) -> Option<ProbeStream> {
    let document: ProbeDocument = serde_json::from_str(output).ok()?;
    document.streams.into_iter().next()
}

/// Parse ffprobe's rational `"n/d"` frame rate into a positive double.
pub(crate) fn parse_frame_rate(raw: &str) -> Option<f64> {
    let (num, den) = raw.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 {
        return None;
    }
    let rate = num / den;
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// The container either omitted the frame count entirely or reported the
/// literal `N/A` token; both mean a counting probe is required.
pub(crate) fn needs_counting_probe(nb_frames: Option<&str>) -> bool {
    match nb_frames {
        None => true,
        Some(raw) => raw.is_empty() || raw == "N/A",
    }
}
