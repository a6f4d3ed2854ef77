use thiserror::Error;

pub(crate) const AUDIO_DECODE_HINT: &str =
    "Failed to extract the audio track. Ensure the video has a valid audio stream.";
pub(crate) const ENGINE_EMPTY_MESSAGE: &str = "Synthesis failed to resolve.";
pub(crate) const SYNTHESIS_FAILED_MESSAGE: &str =
    "System encountered an error resolving long-form data.";

/// Every way a synthesis run can end without a report.
///
/// The `Display` output is the message shown to the user verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("AUTH_ERROR: System API key missing.")]
    Auth,

    #[error("MEDIA_DECODE_FAILED: {0}")]
    MediaDecode(String),

    #[error("ENGINE_EMPTY: {0}")]
    EngineEmpty(String),

    #[error("{0}")]
    SynthesisFailed(String),
}

impl SynthesisError {
    pub(crate) fn audio_decode(cause: &anyhow::Error) -> Self {
        Self::MediaDecode(format!("{AUDIO_DECODE_HINT} ({cause:#})"))
    }

    pub(crate) fn media_decode(context: &str, cause: &anyhow::Error) -> Self {
        Self::MediaDecode(format!("{context} ({cause:#})"))
    }

    pub(crate) fn engine_empty(detail: Option<&str>) -> Self {
        match detail {
            Some(detail) => Self::EngineEmpty(format!("{ENGINE_EMPTY_MESSAGE} ({detail})")),
            None => Self::EngineEmpty(ENGINE_EMPTY_MESSAGE.to_owned()),
        }
    }

    /// Wraps any other failure, keeping its message when it has one.
    pub(crate) fn synthesis_failed(cause: &anyhow::Error) -> Self {
        let message = format!("{cause:#}");
        if message.trim().is_empty() {
            Self::SynthesisFailed(format!("SYNTHESIS_FAILED: {SYNTHESIS_FAILED_MESSAGE}"))
        } else {
            Self::SynthesisFailed(message)
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self::SynthesisFailed("SYNTHESIS_FAILED: Run was cancelled.".to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_message_is_stable() {
        assert_eq!(
            SynthesisError::Auth.to_string(),
            "AUTH_ERROR: System API key missing."
        );
    }

    #[test]
    fn audio_decode_carries_hint_and_cause() {
        let err = SynthesisError::audio_decode(&anyhow::anyhow!("no audio stream"));
        let message = err.to_string();
        assert!(message.starts_with("MEDIA_DECODE_FAILED: Failed to extract the audio track"));
        assert!(message.ends_with("(no audio stream)"));
    }

    #[test]
    fn synthesis_failed_preserves_original_message() {
        let err = SynthesisError::synthesis_failed(&anyhow::anyhow!("quota exceeded"));
        assert_eq!(err.to_string(), "quota exceeded");
    }

    #[test]
    fn synthesis_failed_falls_back_when_message_is_blank() {
        let err = SynthesisError::synthesis_failed(&anyhow::anyhow!(""));
        assert!(err.to_string().starts_with("SYNTHESIS_FAILED: "));
    }

    #[test]
    fn engine_empty_without_detail() {
        assert_eq!(
            SynthesisError::engine_empty(None).to_string(),
            "ENGINE_EMPTY: Synthesis failed to resolve."
        );
    }
}
