use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result, anyhow, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::command::{CommandContext, CommandHandle};
use crate::config::FfmpegOptions;
use crate::media::probe::VideoInfo;
use crate::media::progress::ProgressParser;

/// A raw RGB24 pixel buffer of exactly `width * height * 3` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Result of a frame read: a full frame, or clean end-of-stream at a frame
/// boundary.
#[derive(Debug)]
pub enum FrameRead {
    Frame(Frame),
    Eof,
}

const STDERR_TAIL_LINES: usize = 40;

/// The streaming pipeline around one source file: a decoder child emitting
/// raw frames on stdout and an encoder child consuming raw frames on stdin
/// while mux-copying the original audio.
///
/// Each pipe is owned here by exactly one reader/writer; the encoder's
/// stderr is drained by a background task that feeds the progress parser
/// and keeps a bounded tail for diagnostics.
pub struct VideoProcessor {
    info: VideoInfo,
    options: FfmpegOptions,
    frame_size: usize,
    cancel: CancellationToken,

    decoder: Option<CommandHandle>,
    decoder_stdout: Option<ChildStdout>,
    encoder: Option<CommandHandle>,
    encoder_stdin: Option<ChildStdin>,
    encoder_stderr_task: Option<JoinHandle<String>>,

    captured_output: String,
    closed: bool,
}

impl VideoProcessor {
    pub fn new(info: VideoInfo, options: FfmpegOptions, cancel: CancellationToken) -> Self {
        let frame_size = info.frame_size();
        Self {
            info,
            options,
            frame_size,
            cancel,
            decoder: None,
            decoder_stdout: None,
            encoder: None,
            encoder_stdin: None,
            encoder_stderr_task: None,
            captured_output: String::new(),
            closed: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Diagnostics captured from the encoder's stderr; populated by
    /// `close`/`abort`.
    pub fn captured_output(&self) -> &str {
        &self.captured_output
    }

    /// Launch the decoder child. Its stdout becomes the frame source.
    pub fn start_reading(&mut self) -> Result<()> {
        let cmd = CommandContext::new("ffmpeg", decoder_args(&self.info, &self.options));
        let mut handle = cmd.spawn(Stdio::null(), Stdio::piped(), Stdio::null())?;
        self.decoder_stdout = handle.take_stdout();
        self.decoder = Some(handle);
        Ok(())
    }

    /// Launch the encoder child reading raw frames from stdin at the target
    /// rate, copying the audio stream from the original source.
    ///
    /// `expected_seconds` is the planned output duration
    /// (`target_frame_count / target_fps`); parsed stderr progress is pushed
    /// into `progress` without ever blocking the stderr reader.
    pub fn start_writing(
        &mut self,
        output_path: &Path,
        target_fps: f64,
        expected_seconds: f64,
        progress: mpsc::Sender<f64>,
    ) -> Result<()> {
        let cmd = CommandContext::new(
            "ffmpeg",
            encoder_args(&self.info, &self.options, output_path, target_fps),
        );
        let mut handle = cmd.spawn(Stdio::piped(), Stdio::null(), Stdio::piped())?;
        self.encoder_stdin = handle.take_stdin();

        if let Some(stderr) = handle.take_stderr() {
            self.encoder_stderr_task = Some(tokio::spawn(drain_encoder_stderr(
                stderr,
                expected_seconds,
                progress,
            )));
        }

        self.encoder = Some(handle);
        Ok(())
    }

    /// Read exactly one frame from the decoder. Zero bytes at a frame
    /// boundary is a clean `Eof`; zero bytes mid-frame is an error.
    pub async fn read_frame(&mut self) -> Result<FrameRead> {
        let cancel = self.cancel.clone();
        let (frame_size, width, height) = (self.frame_size, self.info.width, self.info.height);
        let stdout = self
            .decoder_stdout
            .as_mut()
            .ok_or_else(|| anyhow!("decoder stream is not open"))?;
        read_frame_from(stdout, frame_size, width, height, &cancel).await
    }

    /// Write one frame to the encoder; write order defines output order.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.data.len() != self.frame_size {
            bail!(
                "frame size mismatch: expected {} bytes, got {}",
                self.frame_size,
                frame.data.len()
            );
        }
        let cancel = self.cancel.clone();
        let stdin = self
            .encoder_stdin
            .as_mut()
            .ok_or_else(|| anyhow!("encoder stream is not open"))?;

        tokio::select! {
            result = stdin.write_all(&frame.data) => {
                result.context("writing frame to encoder")
            }
            _ = cancel.cancelled() => {
                bail!("frame write cancelled")
            }
        }
    }

    /// Finish the stream: signal EOF to the encoder, wait for it to exit,
    /// then terminate and reap the decoder. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Dropping stdin is the encoder's EOF.
        drop(self.encoder_stdin.take());
        drop(self.decoder_stdout.take());

        let mut errors: Vec<anyhow::Error> = Vec::new();

        if let Some(mut encoder) = self.encoder.take() {
            match encoder.wait(&self.cancel).await {
                Ok(status) if status.success() => {}
                Ok(status) => errors.push(anyhow!("encoder exited with {status}")),
                Err(err) => errors.push(err.into()),
            }
        }
        self.collect_encoder_stderr().await;

        if let Some(mut decoder) = self.decoder.take() {
            // The decoder may still be mid-stream when the frame budget was
            // reached; terminate it rather than draining the rest.
            decoder.kill().await;
        }

        match errors.len() {
            0 => Ok(()),
            _ => {
                let detail = errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(anyhow!("closing video streams failed: {detail}"))
            }
        }
    }

    /// Tear the pipeline down after a failure: kill both children, reap
    /// them, and return whatever the encoder said on stderr.
    pub async fn abort(&mut self) -> String {
        self.closed = true;
        drop(self.encoder_stdin.take());
        drop(self.decoder_stdout.take());
        if let Some(mut encoder) = self.encoder.take() {
            encoder.kill().await;
        }
        if let Some(mut decoder) = self.decoder.take() {
            decoder.kill().await;
        }
        self.collect_encoder_stderr().await;
        self.captured_output.clone()
    }

    async fn collect_encoder_stderr(&mut self) {
        if let Some(task) = self.encoder_stderr_task.take() {
            self.captured_output = task.await.unwrap_or_default();
        }
    }
}

/// Decoder command line:
/// `ffmpeg [-hwaccel <flag>] -i <input> -f rawvideo -pix_fmt rgb24 pipe:1`.
fn decoder_args(info: &VideoInfo, options: &FfmpegOptions) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    if let Some(flag) = &options.hw_decode_flag {
        args.push("-hwaccel".to_string());
        args.push(flag.clone());
    }
    args.push("-i".to_string());
    args.push(info.input_path.to_string_lossy().into_owned());
    for arg in ["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"] {
        args.push(arg.to_string());
    }
    args
}

/// Encoder command line:
/// `ffmpeg -f rawvideo -pix_fmt rgb24 -video_size WxH -framerate <fps>
/// -i pipe:0 -i <input> [-c:v <hw_encode_flag>] -c:v h264_nvenc -c:a copy
/// -crf 20 -pix_fmt yuv420p -progress pipe:2 <output>`.
///
/// The optional hardware flag precedes the fixed `h264_nvenc` selection;
/// both `-c:v` entries are emitted when the flag is set.
fn encoder_args(
    info: &VideoInfo,
    options: &FfmpegOptions,
    output_path: &Path,
    target_fps: f64,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    for arg in ["-f", "rawvideo", "-pix_fmt", "rgb24", "-video_size"] {
        args.push(arg.to_string());
    }
    args.push(format!("{}x{}", info.width, info.height));
    args.push("-framerate".to_string());
    args.push(format!("{target_fps}"));
    args.push("-i".to_string());
    args.push("pipe:0".to_string());
    args.push("-i".to_string());
    args.push(info.input_path.to_string_lossy().into_owned());
    if let Some(flag) = &options.hw_encode_flag {
        args.push("-c:v".to_string());
        args.push(flag.clone());
    }
    for arg in [
        "-c:v",
        "h264_nvenc",
        "-c:a",
        "copy",
        "-crf",
        "20",
        "-pix_fmt",
        "yuv420p",
        "-progress",
        "pipe:2",
    ] {
        args.push(arg.to_string());
    }
    args.push(output_path.to_string_lossy().into_owned());
    args
}

/// Drain encoder stderr line by line: parsed progress percentages go to the
/// bounded channel (dropped, never awaited, when the consumer lags) and a
/// bounded tail of non-progress lines is kept for failure records.
async fn drain_encoder_stderr<R>(stderr: R, expected_seconds: f64, progress: mpsc::Sender<f64>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut parser = ProgressParser::new(Some(expected_seconds));
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(stderr).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(percent) = parser.feed_line(&line) {
            let _ = progress.try_send(percent);
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    tail.into_iter().collect::<Vec<_>>().join("\n")
}

/// Fill exactly `frame_size` bytes from `reader`, honoring cancellation.
async fn read_frame_from<R>(
    reader: &mut R,
    frame_size: usize,
    width: u32,
    height: u32,
    cancel: &CancellationToken,
) -> Result<FrameRead>
where
    R: AsyncRead + Unpin,
{
    let mut data = vec![0u8; frame_size];
    let mut filled = 0usize;

    while filled < frame_size {
        let read = tokio::select! {
            read = reader.read(&mut data[filled..]) => read.context("reading frame from decoder")?,
            _ = cancel.cancelled() => bail!("frame read cancelled"),
        };

        if read == 0 {
            if filled == 0 {
                return Ok(FrameRead::Eof);
            }
            bail!("decoder stream ended mid-frame ({filled} of {frame_size} bytes)");
        }
        filled += read;
    }

    Ok(FrameRead::Frame(Frame {
        data,
        width,
        height,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_info() -> VideoInfo {
        VideoInfo {
            input_path: PathBuf::from("in.mp4"),
            width: 1920,
            height: 1080,
            frame_rate: 24.0,
            frame_count: 240,
        }
    }

    #[test]
    fn decoder_args_match_the_command_contract() {
        let args = decoder_args(&test_info(), &FfmpegOptions::default());
        assert_eq!(
            args,
            ["-i", "in.mp4", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"]
        );
    }

    #[test]
    fn decoder_args_put_the_hwaccel_flag_before_the_input() {
        let options = FfmpegOptions {
            hw_decode_flag: Some("cuda".to_string()),
            hw_encode_flag: None,
        };
        let args = decoder_args(&test_info(), &options);
        assert_eq!(
            args,
            [
                "-hwaccel", "cuda", "-i", "in.mp4", "-f", "rawvideo", "-pix_fmt", "rgb24",
                "pipe:1"
            ]
        );
    }

    #[test]
    fn encoder_args_match_the_command_contract() {
        let args = encoder_args(
            &test_info(),
            &FfmpegOptions::default(),
            Path::new("out.mp4"),
            60.0,
        );
        assert_eq!(
            args,
            [
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-video_size",
                "1920x1080",
                "-framerate",
                "60",
                "-i",
                "pipe:0",
                "-i",
                "in.mp4",
                "-c:v",
                "h264_nvenc",
                "-c:a",
                "copy",
                "-crf",
                "20",
                "-pix_fmt",
                "yuv420p",
                "-progress",
                "pipe:2",
                "out.mp4"
            ]
        );
    }

    #[test]
    fn encoder_args_keep_both_codec_entries_when_a_hw_flag_is_set() {
        let options = FfmpegOptions {
            hw_decode_flag: None,
            hw_encode_flag: Some("hevc_nvenc".to_string()),
        };
        let args = encoder_args(&test_info(), &options, Path::new("out.mp4"), 60.0);
        assert_eq!(
            args,
            [
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-video_size",
                "1920x1080",
                "-framerate",
                "60",
                "-i",
                "pipe:0",
                "-i",
                "in.mp4",
                "-c:v",
                "hevc_nvenc",
                "-c:v",
                "h264_nvenc",
                "-c:a",
                "copy",
                "-crf",
                "20",
                "-pix_fmt",
                "yuv420p",
                "-progress",
                "pipe:2",
                "out.mp4"
            ]
        );
    }

    #[test]
    fn encoder_args_format_fractional_frame_rates() {
        let args = encoder_args(
            &test_info(),
            &FfmpegOptions::default(),
            Path::new("out.mp4"),
            23.5,
        );
        let framerate_at = args.iter().position(|a| a == "-framerate").expect("flag");
        assert_eq!(args[framerate_at + 1], "23.5");
    }

    async fn read_all_frames(bytes: &[u8], frame_size: usize) -> (Vec<Frame>, Result<FrameRead>) {
        let cancel = CancellationToken::new();
        let mut reader = bytes;
        let mut frames = Vec::new();
        loop {
            match read_frame_from(&mut reader, frame_size, 2, 1, &cancel).await {
                Ok(FrameRead::Frame(frame)) => frames.push(frame),
                other => return (frames, other),
            }
        }
    }

    #[tokio::test]
    async fn reads_whole_frames_then_clean_eof() {
        let bytes: Vec<u8> = (0u8..12).collect();
        let (frames, last) = read_all_frames(&bytes, 6).await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, (0u8..6).collect::<Vec<_>>());
        assert_eq!(frames[1].data, (6u8..12).collect::<Vec<_>>());
        assert!(matches!(last, Ok(FrameRead::Eof)));
    }

    #[tokio::test]
    async fn short_read_at_stream_end_is_an_error() {
        let bytes: Vec<u8> = (0u8..9).collect();
        let (frames, last) = read_all_frames(&bytes, 6).await;

        assert_eq!(frames.len(), 1);
        let err = last.expect_err("trailing partial frame must fail");
        assert!(err.to_string().contains("mid-frame"), "got: {err:#}");
    }

    #[tokio::test]
    async fn cancellation_unblocks_a_pending_read() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        // A duplex stream with no data would block forever without the token.
        let (mut rx, _tx) = tokio::io::duplex(64);
        let err = read_frame_from(&mut rx, 6, 2, 1, &cancel)
            .await
            .expect_err("cancelled read must fail");
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn encoder_stderr_drain_parses_progress_and_keeps_tail() {
        let (client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            server
                .write_all(b"Input #0, rawvideo, from 'pipe:0':\nout_time_ms=5000000\n[error] something broke\n")
                .await
                .expect("write stderr");
            drop(server);
        });

        let (tx, mut rx) = mpsc::channel::<f64>(4);
        let tail = drain_encoder_stderr(client, 10.0, tx).await;

        let pct = rx.try_recv().expect("progress percent");
        assert!((pct - 50.0).abs() < 1e-9);
        assert!(tail.contains("something broke"));
        assert!(!tail.contains("out_time_ms"));
    }
}
