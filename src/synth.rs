use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::ai::{InferenceEngine, OpenAiEngine, SynthesisRequest};
use crate::cancel::CancelToken;
use crate::capture::{FrameArtifact, FrameSettings};
use crate::config::SynthesisConfig;
use crate::error::SynthesisError;
use crate::report::MeetingReport;
use crate::source::MediaSource;
use crate::wav::{EncodedAudio, PcmBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    ExtractingAudio,
    SamplingFrames,
    BuildingRequest,
    AwaitingResponse,
    Validating,
}

impl Stage {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Stage::ExtractingAudio => "Extracting Acoustic Spectrum...",
            Stage::SamplingFrames => "Sampling Visual Context...",
            Stage::BuildingRequest => "Resolving Decision Graph...",
            Stage::AwaitingResponse => "Awaiting Synthesis Engine...",
            Stage::Validating => "Validating Record of Decision...",
        }
    }
}

pub(crate) type ProgressSender = UnboundedSender<Stage>;

/// Local media work the synthesizer depends on. Implementations should stop
/// early once `cancel` fires.
#[async_trait]
pub(crate) trait MediaPipeline: Send + Sync {
    async fn extract_audio(
        &self,
        source: &MediaSource,
        target_rate: u32,
        cancel: &CancelToken,
    ) -> anyhow::Result<PcmBuffer>;

    async fn sample_frames(
        &self,
        source: &MediaSource,
        settings: &FrameSettings,
        cancel: &CancelToken,
    ) -> anyhow::Result<Vec<FrameArtifact>>;
}

pub(crate) struct FfmpegPipeline;

#[async_trait]
impl MediaPipeline for FfmpegPipeline {
    async fn extract_audio(
        &self,
        source: &MediaSource,
        target_rate: u32,
        cancel: &CancelToken,
    ) -> anyhow::Result<PcmBuffer> {
        crate::audio::extract_audio(source, target_rate, cancel).await
    }

    async fn sample_frames(
        &self,
        source: &MediaSource,
        settings: &FrameSettings,
        cancel: &CancelToken,
    ) -> anyhow::Result<Vec<FrameArtifact>> {
        crate::capture::sample_frames(source, settings, cancel).await
    }
}

pub(crate) struct Synthesizer {
    config: SynthesisConfig,
    media: Arc<dyn MediaPipeline>,
    engine: Arc<dyn InferenceEngine>,
}

impl Synthesizer {
    pub(crate) fn new(config: SynthesisConfig) -> Result<Self, SynthesisError> {
        let api_key = config.api_key().ok_or(SynthesisError::Auth)?;
        let engine = OpenAiEngine::new(api_key, &config.api_base, &config.model);
        Ok(Self::with_parts(config, Arc::new(FfmpegPipeline), Arc::new(engine)))
    }

    pub(crate) fn with_parts(
        config: SynthesisConfig,
        media: Arc<dyn MediaPipeline>,
        engine: Arc<dyn InferenceEngine>,
    ) -> Self {
        Self {
            config,
            media,
            engine,
        }
    }

    /// Runs the whole pipeline once. Yields exactly one report or one error.
    pub(crate) async fn process_meeting_video(
        &self,
        input: &Path,
        progress: Option<&ProgressSender>,
        cancel: &CancelToken,
    ) -> Result<MeetingReport, SynthesisError> {
        if self.config.api_key().is_none() {
            return Err(SynthesisError::Auth);
        }

        let started = Instant::now();
        let source = MediaSource::open(input)
            .map_err(|e| SynthesisError::media_decode("Unsupported or unreadable recording", &e))?;
        info!(%source, "Starting synthesis");

        let result = self.run(&source, progress, cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(report) => info!(
                elapsed_ms,
                decisions = report.decisions.len(),
                action_items = report.action_items.len(),
                "Synthesis finalized"
            ),
            // The caller reports the error itself.
            Err(err) => debug!(elapsed_ms, "Synthesis failed: {err}"),
        }
        result
    }

    async fn run(
        &self,
        source: &MediaSource,
        progress: Option<&ProgressSender>,
        cancel: &CancelToken,
    ) -> Result<MeetingReport, SynthesisError> {
        enter(Stage::ExtractingAudio, progress, cancel)?;
        let pcm = interruptible(
            cancel,
            self.media.extract_audio(source, self.config.sample_rate, cancel),
        )
        .await?
        .map_err(|e| media_failure(cancel, || SynthesisError::audio_decode(&e)))?;
        info!(
            samples = pcm.samples.len(),
            duration_secs = pcm.duration_secs(),
            "Audio extracted"
        );
        let audio = EncodedAudio::try_from(pcm).map_err(|e| SynthesisError::audio_decode(&e))?;

        enter(Stage::SamplingFrames, progress, cancel)?;
        let frames = interruptible(
            cancel,
            self.media.sample_frames(source, &self.config.frames, cancel),
        )
        .await?
        .map_err(|e| {
            media_failure(cancel, || {
                SynthesisError::media_decode("Failed to sample visual context", &e)
            })
        })?;
        debug!(
            timestamps = ?frames.iter().map(|f| f.timestamp).collect::<Vec<_>>(),
            "Frames sampled"
        );

        enter(Stage::BuildingRequest, progress, cancel)?;
        let request = SynthesisRequest::new(&audio, &frames);
        drop(audio);
        drop(frames);
        info!(
            images = request.images.len(),
            payload_bytes = request.payload_len(),
            "Request assembled"
        );

        enter(Stage::AwaitingResponse, progress, cancel)?;
        let timeout = self.config.request_timeout;
        let text = interruptible(
            cancel,
            tokio::time::timeout(timeout, self.engine.generate(&request)),
        )
        .await?
        .map_err(|_| {
            SynthesisError::SynthesisFailed(format!(
                "SYNTHESIS_FAILED: No response from the synthesis engine within {timeout:?}."
            ))
        })?
        .map_err(|e| SynthesisError::synthesis_failed(&e))?;

        enter(Stage::Validating, progress, cancel)?;
        let text = text
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| SynthesisError::engine_empty(None))?;
        MeetingReport::from_engine_text(&text)
            .map_err(|e| SynthesisError::engine_empty(Some(&e.to_string())))
    }
}

fn enter(
    stage: Stage,
    progress: Option<&ProgressSender>,
    cancel: &CancelToken,
) -> Result<(), SynthesisError> {
    if cancel.is_cancelled() {
        return Err(SynthesisError::cancelled());
    }
    debug!(?stage, "{}", stage.label());
    if let Some(progress) = progress {
        // A closed receiver only means nobody is listening.
        let _ = progress.send(stage);
    }
    Ok(())
}

/// Drops `work` as soon as `cancel` fires.
async fn interruptible<F: Future>(
    cancel: &CancelToken,
    work: F,
) -> Result<F::Output, SynthesisError> {
    cancel
        .run_until_cancelled(work)
        .await
        .ok_or_else(SynthesisError::cancelled)
}

/// A decoder that stopped because of cancellation reports that, not a
/// decode failure.
fn media_failure(cancel: &CancelToken, err: impl FnOnce() -> SynthesisError) -> SynthesisError {
    if cancel.is_cancelled() {
        SynthesisError::cancelled()
    } else {
        err()
    }
}
