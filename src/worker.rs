use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result, anyhow};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::domain::{Event, Job, WorkerInfo};
use crate::fsutil;
use crate::media::probe::ProbeError;
use crate::media::processor::{Frame, FrameRead, VideoProcessor};
use crate::media::{VideoInfo, get_video_info};
use crate::rife::{Rife, RifeConfig};
use crate::sync_ext::RwLockExt;

/// How many times a job is re-enqueued after a processing failure before it
/// is terminally failed.
pub const RETRY_LIMIT: i64 = 5;

/// Depth of the progress tick channel between the pipeline and the worker's
/// update task.
const PROGRESS_BUFFER: usize = 32;

const STEP_VALIDATE: &str = "validating output";
const STEP_PROBE: &str = "getting video information";
const STEP_SETUP: &str = "preparing pipeline";
const STEP_INTERPOLATE: &str = "interpolating frames";
const STEP_FINALIZE: &str = "finalizing output";
const STEP_COPY: &str = "copying to destination";

/// A pipeline error plus whatever the failing subprocess said, preserved
/// for the eventual failure record.
#[derive(Debug)]
pub(crate) struct StepError {
    pub error: anyhow::Error,
    pub process_output: String,
}

impl StepError {
    fn new(error: anyhow::Error) -> Self {
        Self {
            error,
            process_output: String::new(),
        }
    }

    fn with_output(error: anyhow::Error, process_output: String) -> Self {
        Self {
            error,
            process_output,
        }
    }
}

impl From<anyhow::Error> for StepError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(error)
    }
}

impl From<ProbeError> for StepError {
    fn from(error: ProbeError) -> Self {
        let output = error.process_output().to_string();
        Self::with_output(error.into(), output)
    }
}

/// How a pipeline run ended short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipelineOutcome {
    /// The interpolated output was produced.
    Completed,
    /// The source did not need interpolation (or a stale temp file was
    /// found); copy-on-skip may apply.
    Skipped,
    /// The output already exists and overwriting is disabled; treated as
    /// completed without producing anything.
    OutputAlreadyExists,
    /// The input file is gone; terminal failure without retries.
    InputMissing,
}

/// Where the encoder writes, resolved by the S1 output policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OutputPlan {
    Write {
        target: PathBuf,
        /// When set, `target` is a temp file that is renamed over this
        /// destination during finalize.
        temp_for: Option<PathBuf>,
    },
    AlreadyExists,
    /// A temp file from a prior aborted attempt is still present.
    SkipStaleTemp,
}

/// A long-lived actor driving one job at a time through the pipeline.
pub struct Worker {
    id: usize,
    ctx: AppContext,
    cancel: CancellationToken,
    info: Arc<RwLock<WorkerInfo>>,
}

impl Worker {
    pub fn new(id: usize, ctx: AppContext, cancel: CancellationToken) -> Self {
        Self {
            id,
            ctx,
            cancel,
            info: Arc::new(RwLock::new(WorkerInfo::idle(id))),
        }
    }

    pub fn info_handle(&self) -> Arc<RwLock<WorkerInfo>> {
        self.info.clone()
    }

    /// Consume jobs from the hand-off channel until cancellation or channel
    /// close.
    pub async fn run(self, jobs: flume::Receiver<Job>) {
        loop {
            let job = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = jobs.recv_async() => match received {
                    Ok(job) => job,
                    Err(_) => break,
                },
            };
            self.handle_job(job).await;
        }
        self.set_idle();
        debug!(worker = self.id, "worker stopped");
    }

    async fn handle_job(&self, job: Job) {
        info!(worker = self.id, job_id = job.id, input = %job.input_path, "processing video");
        self.set_active(&job);

        let outcome = self.process_job(&job).await;

        if self.cancel.is_cancelled() {
            // Cancellation is not a failure: no retry bump, no store write.
            debug!(worker = self.id, job_id = job.id, "job cancelled mid-pipeline");
            self.set_idle();
            return;
        }

        match outcome {
            Err(step) => self.handle_process_error(&job, step).await,
            Ok(PipelineOutcome::InputMissing) => {
                error!(worker = self.id, job_id = job.id, input = %job.input_path,
                    "video to process was not found");
                self.fail_job(&job, "", "source video not found").await;
            }
            Ok(outcome) => self.finish_job(&job, outcome).await,
        }

        self.set_idle();
    }

    async fn finish_job(&self, job: &Job, outcome: PipelineOutcome) {
        let config = &self.ctx.config;
        let input = Path::new(&job.input_path);
        let output = Path::new(&job.output_path);

        if outcome == PipelineOutcome::Skipped && config.copy_file_to_destination_on_skip {
            match fsutil::is_same_path(input, output) {
                Ok(true) => {
                    warn!(worker = self.id, job_id = job.id,
                        "skipped video has output path equal to input, not copying");
                }
                Ok(false) => {
                    self.set_step(STEP_COPY);
                    if let Err(err) = fsutil::copy_file(input, output) {
                        error!(worker = self.id, job_id = job.id, error = %err,
                            "failed to copy skipped video to destination");
                        return;
                    }
                    info!(worker = self.id, job_id = job.id, "video file copied to destination");
                }
                Err(err) => {
                    error!(worker = self.id, job_id = job.id, error = %err,
                        "failed to compare input and output paths");
                    return;
                }
            }
        }

        if let Err(err) = self.ctx.store.mark_done(job.id).await {
            // Leave the job pending; it is picked up again on next startup.
            error!(worker = self.id, job_id = job.id, error = %err, "failed to mark video as done");
            return;
        }

        if config.delete_input_file_when_finished && outcome != PipelineOutcome::OutputAlreadyExists
        {
            match fsutil::is_same_path(input, output) {
                Ok(true) => {
                    warn!(worker = self.id, job_id = job.id,
                        "input equals output with delete_input_file_when_finished, not deleting");
                }
                Ok(false) => {
                    if let Err(err) = fs::remove_file(input) {
                        error!(worker = self.id, job_id = job.id, error = %err,
                            "failed to delete input file");
                    } else {
                        info!(worker = self.id, job_id = job.id, file = %job.input_path,
                            "deleted input file");
                    }
                }
                Err(err) => {
                    error!(worker = self.id, job_id = job.id, error = %err,
                        "failed to compare input and output paths");
                }
            }
        }

        info!(worker = self.id, job_id = job.id, "finished processing video");
    }

    async fn handle_process_error(&self, job: &Job, step: StepError) {
        error!(worker = self.id, job_id = job.id, error = %format!("{:#}", step.error),
            "error processing video");
        if !step.process_output.is_empty() {
            debug!(worker = self.id, job_id = job.id, output = %step.process_output,
                "process output");
        }

        let retries = match self.ctx.store.retries(job.id).await {
            Ok(retries) => retries,
            Err(err) => {
                error!(worker = self.id, job_id = job.id, error = %err, "failed to get retries");
                return;
            }
        };

        if retries >= RETRY_LIMIT {
            self.fail_job(job, &step.process_output, &format!("{:#}", step.error))
                .await;
            return;
        }

        if let Err(err) = self.ctx.store.update_retries(job.id, retries + 1).await {
            error!(worker = self.id, job_id = job.id, error = %err, "failed to update retries");
            return;
        }

        self.ctx.queue.enqueue(job.clone());
        info!(worker = self.id, job_id = job.id, retries = retries + 1,
            "requeued video at the back of the queue");
    }

    async fn fail_job(&self, job: &Job, process_output: &str, error_message: &str) {
        info!(worker = self.id, job_id = job.id, "video failed terminally");
        if let Err(err) = self
            .ctx
            .store
            .fail_job(job.id, process_output, error_message)
            .await
        {
            error!(worker = self.id, job_id = job.id, error = %err, "failed to record job failure");
        }
    }

    /// Run the pipeline state machine for one job.
    async fn process_job(&self, job: &Job) -> Result<PipelineOutcome, StepError> {
        let config = self.ctx.config.clone();
        let input = Path::new(&job.input_path);
        let output = Path::new(&job.output_path);

        // S1: validate input and resolve the output policy.
        self.set_step(STEP_VALIDATE);
        if !fsutil::path_exists(input).map_err(|e| anyhow!(e))? {
            return Ok(PipelineOutcome::InputMissing);
        }
        fsutil::ensure_parent_dir(output)
            .with_context(|| format!("creating output directory for {}", job.output_path))
            .map_err(StepError::new)?;

        let plan = resolve_output_plan(input, output, config.delete_output_if_already_exist)
            .map_err(|e| StepError::new(anyhow!(e)))?;
        let (target, temp_for) = match plan {
            OutputPlan::AlreadyExists => {
                debug!(worker = self.id, job_id = job.id, "output already exists, skipping");
                return Ok(PipelineOutcome::OutputAlreadyExists);
            }
            OutputPlan::SkipStaleTemp => {
                warn!(worker = self.id, job_id = job.id,
                    "temp output from a previous attempt already exists, skipping");
                return Ok(PipelineOutcome::Skipped);
            }
            OutputPlan::Write { target, temp_for } => (target, temp_for),
        };

        // S2: probe the source and size the interpolation.
        self.set_step(STEP_PROBE);
        let video_info = get_video_info(input, &self.cancel).await?;
        info!(worker = self.id, job_id = job.id,
            fps = video_info.frame_rate, target_fps = config.target_fps,
            frame_count = video_info.frame_count, "probed video");

        if video_info.frame_rate >= config.target_fps {
            info!(worker = self.id, job_id = job.id,
                "video frame rate is at or above the target, skipping");
            return Ok(PipelineOutcome::Skipped);
        }

        let target_frame_count = compute_target_frame_count(
            video_info.frame_count,
            video_info.frame_rate,
            config.target_fps,
        );
        let scale = video_info.frame_count as f64 / target_frame_count as f64;
        info!(worker = self.id, job_id = job.id, target_frame_count, scale, "sized interpolation");

        // S3: scratch dir, interpolation engine, decoder and encoder streams.
        self.set_step(STEP_SETUP);
        let scratch = config.process_folder.join(format!("worker_{}", self.id));
        if fsutil::path_exists(&scratch).map_err(|e| anyhow!(e))? {
            fs::remove_dir_all(&scratch)
                .with_context(|| format!("wiping scratch folder {}", scratch.display()))
                .map_err(StepError::new)?;
        }
        fs::create_dir_all(&scratch)
            .with_context(|| format!("creating scratch folder {}", scratch.display()))
            .map_err(StepError::new)?;

        let mut rife = Rife::new(video_info.width, video_info.height, RifeConfig::default())
            .map_err(StepError::new)?;
        rife.load_model(&config.model_path).map_err(StepError::new)?;

        let (progress_tx, progress_rx) = mpsc::channel::<f64>(PROGRESS_BUFFER);
        let update_task = self.spawn_progress_task(progress_rx);

        let mut processor = VideoProcessor::new(
            video_info.clone(),
            config.ffmpeg.clone(),
            self.cancel.clone(),
        );
        let expected_seconds = target_frame_count as f64 / config.target_fps;

        let run = async {
            processor.start_reading().map_err(StepError::new)?;
            processor
                .start_writing(
                    &target,
                    config.target_fps,
                    expected_seconds,
                    progress_tx.clone(),
                )
                .map_err(StepError::new)?;

            // S4: the interpolation loop.
            self.set_step(STEP_INTERPOLATE);
            run_interpolation(
                &mut processor,
                &rife,
                &video_info,
                target_frame_count,
                scale,
                &progress_tx,
            )
            .await
            .map_err(StepError::new)?;

            // S5: finalize streams.
            self.set_step(STEP_FINALIZE);
            processor.close().await.map_err(StepError::new)?;
            Ok::<(), StepError>(())
        };

        let result = run.await;
        drop(progress_tx);

        if let Err(mut step) = result {
            if step.process_output.is_empty() {
                step.process_output = processor.abort().await;
            } else {
                processor.abort().await;
            }
            update_task.abort();
            return Err(step);
        }
        // All senders are gone; the update task drains and exits.
        let _ = update_task.await;

        if let Some(final_path) = temp_for {
            if fsutil::path_exists(&final_path).map_err(|e| anyhow!(e))? {
                fs::remove_file(&final_path)
                    .with_context(|| format!("removing old output {}", final_path.display()))
                    .map_err(StepError::new)?;
            }
            fs::rename(&target, &final_path)
                .with_context(|| {
                    format!(
                        "renaming {} over {}",
                        target.display(),
                        final_path.display()
                    )
                })
                .map_err(StepError::new)?;
        }

        fs::remove_dir_all(&scratch)
            .with_context(|| format!("removing scratch folder {}", scratch.display()))
            .map_err(StepError::new)?;

        Ok(PipelineOutcome::Completed)
    }

    /// Consume progress ticks, keep `WorkerInfo.progress` monotonic, and
    /// broadcast whenever the rounded percentage moves forward.
    fn spawn_progress_task(&self, mut progress_rx: mpsc::Receiver<f64>) -> JoinHandle<()> {
        let info = self.info.clone();
        let hub = self.ctx.hub.clone();
        tokio::spawn(async move {
            let mut last_broadcast = -1i64;
            while let Some(percent) = progress_rx.recv().await {
                let snapshot = {
                    let mut guard = info.write_unpoisoned();
                    let clamped = percent.clamp(0.0, 100.0);
                    if clamped <= guard.progress {
                        continue;
                    }
                    guard.progress = clamped;
                    guard.clone()
                };
                let rounded = snapshot.progress.round() as i64;
                if rounded > last_broadcast {
                    last_broadcast = rounded;
                    hub.broadcast(&Event::WorkerProgress(snapshot));
                }
            }
        })
    }

    fn set_active(&self, job: &Job) {
        let snapshot = {
            let mut guard = self.info.write_unpoisoned();
            guard.active = true;
            guard.step = String::new();
            guard.progress = 0.0;
            guard.job = Some(job.clone());
            guard.clone()
        };
        self.ctx.hub.broadcast(&Event::WorkerProgress(snapshot));
    }

    fn set_idle(&self) {
        let snapshot = {
            let mut guard = self.info.write_unpoisoned();
            guard.active = false;
            guard.job = None;
            guard.clone()
        };
        self.ctx.hub.broadcast(&Event::WorkerProgress(snapshot));
    }

    fn set_step(&self, step: &str) {
        let snapshot = {
            let mut guard = self.info.write_unpoisoned();
            guard.step = step.to_string();
            guard.progress = 0.0;
            guard.clone()
        };
        self.ctx.hub.broadcast(&Event::WorkerProgress(snapshot));
    }
}

/// `round(frame_count * target_fps / source_fps)`, never below 1 for a
/// non-empty source.
pub(crate) fn compute_target_frame_count(
    frame_count: i64,
    source_fps: f64,
    target_fps: f64,
) -> i64 {
    if frame_count <= 0 {
        return 0;
    }
    let target = (frame_count as f64 * target_fps / source_fps).round() as i64;
    target.max(1)
}

/// S1 output policy. Same-path jobs and overwrites go through a `.tmp`
/// sibling; an existing output without the overwrite flag short-circuits;
/// a leftover temp file from an aborted attempt means skip.
pub(crate) fn resolve_output_plan(
    input: &Path,
    output: &Path,
    delete_output_if_already_exist: bool,
) -> std::io::Result<OutputPlan> {
    let same_path = fsutil::is_same_path(input, output)?;
    let output_exists = fsutil::path_exists(output)?;

    let use_temp = if same_path {
        true
    } else if output_exists {
        if !delete_output_if_already_exist {
            return Ok(OutputPlan::AlreadyExists);
        }
        true
    } else {
        false
    };

    if !use_temp {
        return Ok(OutputPlan::Write {
            target: output.to_path_buf(),
            temp_for: None,
        });
    }

    let temp = temp_output_path(output);
    if fsutil::path_exists(&temp)? {
        return Ok(OutputPlan::SkipStaleTemp);
    }
    Ok(OutputPlan::Write {
        target: temp,
        temp_for: Some(output.to_path_buf()),
    })
}

fn temp_output_path(output: &Path) -> PathBuf {
    let mut name = OsString::from(output.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Frame source/sink seam so the interpolation loop is testable without
/// child processes.
pub(crate) trait FramePipe {
    async fn read_frame(&mut self) -> Result<FrameRead>;
    async fn write_frame(&mut self, frame: &Frame) -> Result<()>;
}

impl FramePipe for VideoProcessor {
    async fn read_frame(&mut self) -> Result<FrameRead> {
        VideoProcessor::read_frame(self).await
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        VideoProcessor::write_frame(self, frame).await
    }
}

/// The S4 loop: walk the source once, forward only, emitting exactly
/// `target_frame_count` frames unless the source ends first.
///
/// For each output index `i`, `fx = i * scale` positions the frame between
/// source frames `floor(fx)` and `floor(fx) + 1`; the fraction is the
/// engine timestep. An EOF while advancing is terminal: publish 100% and
/// stop.
pub(crate) async fn run_interpolation<P: FramePipe>(
    pipe: &mut P,
    rife: &Rife,
    video_info: &VideoInfo,
    target_frame_count: i64,
    scale: f64,
    progress: &mpsc::Sender<f64>,
) -> Result<()> {
    let source_frame_count = video_info.frame_count;

    let mut frame_a = match pipe.read_frame().await? {
        FrameRead::Frame(frame) => frame,
        FrameRead::Eof => {
            let _ = progress.send(100.0).await;
            return Ok(());
        }
    };
    let mut frame_b = match pipe.read_frame().await? {
        FrameRead::Frame(frame) => frame,
        FrameRead::Eof => {
            // Single-frame source: emit it verbatim when exactly one output
            // frame is due, otherwise produce nothing.
            if target_frame_count == 1 {
                pipe.write_frame(&frame_a).await?;
            }
            let _ = progress.send(100.0).await;
            return Ok(());
        }
    };

    let mut current_idx: i64 = 0;
    'emit: for i in 0..target_frame_count {
        let fx = i as f64 * scale;
        let mut sx = fx.floor() as i64;
        let mut timestep = (fx - sx as f64) as f32;

        if sx < 0 {
            sx = 0;
            timestep = 0.0;
        }
        if sx >= source_frame_count - 1 {
            sx = source_frame_count - 2;
            timestep = 1.0;
        }

        while current_idx < sx {
            match pipe.read_frame().await? {
                FrameRead::Frame(next) => {
                    frame_a = std::mem::replace(&mut frame_b, next);
                }
                FrameRead::Eof => {
                    warn!(emitted = i, target_frame_count, "source ended before the frame budget");
                    let _ = progress.send(100.0).await;
                    break 'emit;
                }
            }
            current_idx += 1;
        }

        if timestep == 0.0 {
            pipe.write_frame(&frame_a).await?;
        } else {
            let data = rife.interpolate(&frame_a.data, &frame_b.data, timestep)?;
            pipe.write_frame(&Frame {
                data,
                width: frame_a.width,
                height: frame_a.height,
            })
            .await?;
        }

        let _ = progress
            .send(i as f64 * 100.0 / target_frame_count as f64)
            .await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_frame_count_rounds() {
        // 24 fps, 240 frames, target 60 → exactly 600 frames, scale 0.4.
        assert_eq!(compute_target_frame_count(240, 24.0, 60.0), 600);
        assert_eq!(240.0 / 600.0, 0.4);

        // Fractional targets round rather than truncate: 7 * 60 / 24 = 17.5.
        assert_eq!(compute_target_frame_count(7, 24.0, 60.0), 18);
        assert_eq!(compute_target_frame_count(0, 24.0, 60.0), 0);
        assert_eq!(compute_target_frame_count(1, 30.0, 60.0), 2);
    }

    #[test]
    fn output_plan_same_path_uses_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("video.mp4");
        std::fs::write(&path, b"x").expect("write");

        let plan = resolve_output_plan(&path, &path, false).expect("plan");
        assert_eq!(
            plan,
            OutputPlan::Write {
                target: dir.path().join("video.mp4.tmp"),
                temp_for: Some(path),
            }
        );
    }

    #[test]
    fn output_plan_existing_output_without_flag_short_circuits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("in.mp4");
        let output = dir.path().join("out.mp4");
        std::fs::write(&input, b"x").expect("write");
        std::fs::write(&output, b"y").expect("write");

        assert_eq!(
            resolve_output_plan(&input, &output, false).expect("plan"),
            OutputPlan::AlreadyExists
        );
        assert_eq!(
            resolve_output_plan(&input, &output, true).expect("plan"),
            OutputPlan::Write {
                target: dir.path().join("out.mp4.tmp"),
                temp_for: Some(output),
            }
        );
    }

    #[test]
    fn output_plan_fresh_output_writes_directly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("in.mp4");
        let output = dir.path().join("out.mp4");
        std::fs::write(&input, b"x").expect("write");

        assert_eq!(
            resolve_output_plan(&input, &output, false).expect("plan"),
            OutputPlan::Write {
                target: output,
                temp_for: None,
            }
        );
    }

    #[test]
    fn output_plan_stale_temp_skips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("video.mp4");
        std::fs::write(&path, b"x").expect("write");
        std::fs::write(dir.path().join("video.mp4.tmp"), b"partial").expect("write");

        assert_eq!(
            resolve_output_plan(&path, &path, false).expect("plan"),
            OutputPlan::SkipStaleTemp
        );
    }

    // ------------------------------------------------------------------
    // Interpolation loop semantics against an in-memory pipe.
    // ------------------------------------------------------------------

    struct MockPipe {
        frames: std::collections::VecDeque<Frame>,
        written: Vec<Frame>,
    }

    impl MockPipe {
        fn with_source(count: usize) -> Self {
            let frames = (0..count)
                .map(|i| Frame {
                    data: vec![i as u8; 3],
                    width: 1,
                    height: 1,
                })
                .collect();
            Self {
                frames,
                written: Vec::new(),
            }
        }
    }

    impl FramePipe for MockPipe {
        async fn read_frame(&mut self) -> Result<FrameRead> {
            Ok(match self.frames.pop_front() {
                Some(frame) => FrameRead::Frame(frame),
                None => FrameRead::Eof,
            })
        }

        async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
            self.written.push(frame.clone());
            Ok(())
        }
    }

    fn info_for(frame_count: i64) -> VideoInfo {
        VideoInfo {
            input_path: PathBuf::from("test.mp4"),
            width: 1,
            height: 1,
            frame_rate: 24.0,
            frame_count,
        }
    }

    fn loaded_rife() -> Rife {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut rife = Rife::new(1, 1, RifeConfig::default()).expect("engine");
        rife.load_model(dir.path()).expect("model");
        std::mem::forget(dir);
        rife
    }

    #[tokio::test]
    async fn emits_exactly_the_target_frame_count() {
        // 4 source frames → 10 output frames, scale 0.4.
        let mut pipe = MockPipe::with_source(4);
        let rife = loaded_rife();
        let (tx, mut rx) = mpsc::channel(64);

        run_interpolation(&mut pipe, &rife, &info_for(4), 10, 0.4, &tx)
            .await
            .expect("loop");

        assert_eq!(pipe.written.len(), 10);
        // i = 0 and i = 5 land exactly on source frames 0 and 2.
        assert_eq!(pipe.written[0].data, vec![0, 0, 0]);
        assert_eq!(pipe.written[5].data, vec![2, 2, 2]);

        drop(tx);
        let mut ticks = Vec::new();
        while let Some(tick) = rx.recv().await {
            ticks.push(tick);
        }
        assert_eq!(ticks.len(), 10);
        assert_eq!(ticks[0], 0.0);
        assert!(ticks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn upscales_a_240_frame_source_to_exactly_600_frames() {
        let frame_count = 240i64;
        let target = compute_target_frame_count(frame_count, 24.0, 60.0);
        assert_eq!(target, 600);
        let scale = frame_count as f64 / target as f64;

        let mut pipe = MockPipe::with_source(frame_count as usize);
        let rife = loaded_rife();
        let (tx, _rx) = mpsc::channel(1024);

        run_interpolation(&mut pipe, &rife, &info_for(frame_count), target, scale, &tx)
            .await
            .expect("loop");

        assert_eq!(pipe.written.len(), 600);
    }

    #[tokio::test]
    async fn early_eof_publishes_completion_and_stops() {
        // Probe claims 8 frames but the decoder delivers only 3.
        let mut pipe = MockPipe::with_source(3);
        let rife = loaded_rife();
        let (tx, mut rx) = mpsc::channel(64);

        run_interpolation(&mut pipe, &rife, &info_for(8), 20, 0.4, &tx)
            .await
            .expect("loop");

        assert!(pipe.written.len() < 20);
        drop(tx);
        let mut last = 0.0;
        while let Some(tick) = rx.recv().await {
            last = tick;
        }
        assert_eq!(last, 100.0);
    }

    #[tokio::test]
    async fn single_frame_source_with_single_target_emits_once() {
        let mut pipe = MockPipe::with_source(1);
        let rife = loaded_rife();
        let (tx, _rx) = mpsc::channel(8);

        run_interpolation(&mut pipe, &rife, &info_for(1), 1, 1.0, &tx)
            .await
            .expect("loop");
        assert_eq!(pipe.written.len(), 1);
    }

    #[tokio::test]
    async fn single_frame_source_with_larger_target_emits_nothing() {
        let mut pipe = MockPipe::with_source(1);
        let rife = loaded_rife();
        let (tx, _rx) = mpsc::channel(8);

        run_interpolation(&mut pipe, &rife, &info_for(1), 3, 1.0 / 3.0, &tx)
            .await
            .expect("loop");
        assert!(pipe.written.is_empty());
    }

    #[tokio::test]
    async fn empty_source_emits_nothing() {
        let mut pipe = MockPipe::with_source(0);
        let rife = loaded_rife();
        let (tx, _rx) = mpsc::channel(8);

        run_interpolation(&mut pipe, &rife, &info_for(0), 0, 1.0, &tx)
            .await
            .expect("loop");
        assert!(pipe.written.is_empty());
    }

    #[tokio::test]
    async fn integer_positions_pass_source_frames_through() {
        // scale 1.0 means every output lands exactly on a source frame.
        let mut pipe = MockPipe::with_source(5);
        let rife = loaded_rife();
        let (tx, _rx) = mpsc::channel(64);

        run_interpolation(&mut pipe, &rife, &info_for(5), 5, 1.0, &tx)
            .await
            .expect("loop");

        let values: Vec<u8> = pipe.written.iter().map(|f| f.data[0]).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }
}
