use std::time::Duration;

use crate::ai::{DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::audio::DEFAULT_SAMPLE_RATE;
use crate::capture::FrameSettings;

pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
/// Keeps WAV byte-rate fields well inside `u32`.
pub(crate) const MAX_SAMPLE_RATE: u32 = 384_000;

/// Everything a synthesis run needs, resolved up front and handed to the
/// synthesizer. Nothing downstream reads the environment.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SynthesisConfig {
    pub(crate) api_key: Option<String>,
    pub(crate) api_base: String,
    pub(crate) model: String,
    pub(crate) sample_rate: u32,
    pub(crate) frames: FrameSettings,
    pub(crate) request_timeout: Duration,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_owned(),
            model: DEFAULT_MODEL.to_owned(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            frames: FrameSettings::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl SynthesisConfig {
    /// The credential is opaque; only presence is checked.
    pub(crate) fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.trim().is_empty())
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            (1..=MAX_SAMPLE_RATE).contains(&self.sample_rate),
            "Sample rate must be within 1..={MAX_SAMPLE_RATE} Hz, got {}",
            self.sample_rate
        );
        anyhow::ensure!(
            self.frames.width > 0 && self.frames.height > 0,
            "Frame resolution must be non-zero, got {}x{}",
            self.frames.width,
            self.frames.height
        );
        anyhow::ensure!(
            (1..=100).contains(&self.frames.jpeg_quality),
            "JPEG quality must be within 1..=100, got {}",
            self.frames.jpeg_quality
        );
        anyhow::ensure!(
            !self.frames.seek_timeout.is_zero(),
            "Seek timeout must be positive"
        );
        anyhow::ensure!(
            !self.request_timeout.is_zero(),
            "Request timeout must be positive"
        );
        anyhow::ensure!(!self.model.trim().is_empty(), "Model name must not be empty");
        Ok(())
    }
}
