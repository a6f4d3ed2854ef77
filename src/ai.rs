use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartAudio,
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
    ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, ImageUrlArgs, InputAudio, InputAudioFormat, ResponseFormat,
    ResponseFormatJsonSchema,
};
use async_openai::Client;
use async_trait::async_trait;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use tracing::debug;

use crate::capture::FrameArtifact;
use crate::report::response_schema;
use crate::wav::EncodedAudio;

/// Gemini takes `input_audio`, `image_url` and `json_schema` together in a
/// single chat completion on its OpenAI-compatible endpoint.
pub(crate) const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub(crate) const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

pub(crate) const INSTRUCTION: &str =
    "Synthesize the record of decision from this audio and these supporting frames.";

pub(crate) const SYSTEM_INSTRUCTION: &str = r#"You are an executive decision analyst. You receive the full audio track of a long meeting and a series of keyframes sampled in order across the recording.

Produce a definitive Record of Decision for the whole conversation.

Rules:
1. Take dialogue from the audio. Use the frames only for visual grounding such as slides or demos.
2. Cover the entire recording, including decisions made near the end.
3. Answer with JSON only, in exactly this shape:

{
  "summary": "Concise high-level result",
  "action_items": [{"task": "...", "owner": "...", "deadline": "..."}],
  "decisions": ["string"],
  "whatsapp_followup": "string",
  "email_followup": "string"
}"#;

/// Base64 payload tagged with its media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InlinePart {
    pub(crate) mime_type: &'static str,
    pub(crate) data: String,
}

impl InlinePart {
    fn encode(mime_type: &'static str, bytes: &[u8]) -> Self {
        Self {
            mime_type,
            data: BASE64_STANDARD.encode(bytes),
        }
    }

    pub(crate) fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Provider-neutral multimodal request: one audio part, the frames in
/// timeline order, then the instruction text.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SynthesisRequest {
    pub(crate) audio: InlinePart,
    pub(crate) images: Vec<InlinePart>,
    pub(crate) instruction: String,
    pub(crate) system_instruction: String,
    pub(crate) response_schema: serde_json::Value,
}

impl SynthesisRequest {
    pub(crate) fn new(audio: &EncodedAudio, frames: &[FrameArtifact]) -> Self {
        Self {
            audio: InlinePart::encode(audio.mime_type, &audio.bytes),
            images: frames
                .iter()
                .map(|frame| InlinePart::encode(frame.mime_type, &frame.bytes))
                .collect(),
            instruction: INSTRUCTION.to_owned(),
            system_instruction: SYSTEM_INSTRUCTION.to_owned(),
            response_schema: response_schema(),
        }
    }

    pub(crate) fn payload_len(&self) -> usize {
        self.audio.data.len() + self.images.iter().map(|i| i.data.len()).sum::<usize>()
    }
}

/// The external model that turns a request into report text.
///
/// `Ok(None)` means the engine answered without any text.
#[async_trait]
pub(crate) trait InferenceEngine: Send + Sync {
    async fn generate(&self, request: &SynthesisRequest) -> anyhow::Result<Option<String>>;
}

pub(crate) struct OpenAiEngine {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEngine {
    /// `api_base` is any OpenAI-compatible chat completions endpoint.
    pub(crate) fn new(api_key: &str, api_base: &str, model: &str) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base.trim_end_matches('/'));
        Self {
            client: Client::with_config(config),
            model: model.to_owned(),
        }
    }
}

#[async_trait]
impl InferenceEngine for OpenAiEngine {
    async fn generate(&self, request: &SynthesisRequest) -> anyhow::Result<Option<String>> {
        let request = chat_request(&self.model, request)?;
        debug!(model = %self.model, "Sending chat completion request");
        let response = self.client.chat().create(request).await?;
        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content))
    }
}

pub(crate) fn chat_request(
    model: &str,
    request: &SynthesisRequest,
) -> Result<CreateChatCompletionRequest, OpenAIError> {
    let audio_part =
        ChatCompletionRequestUserMessageContentPart::InputAudio(ChatCompletionRequestMessageContentPartAudio {
            input_audio: InputAudio {
                data: request.audio.data.clone(),
                format: InputAudioFormat::Wav,
            },
        });

    CreateChatCompletionRequestArgs::default()
        .model(model)
        .response_format(ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Record of Decision for a recorded meeting".to_owned()),
                name: "meeting_report".to_owned(),
                schema: Some(request.response_schema.clone()),
                strict: Some(true),
            },
        })
        .messages([
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(request.system_instruction.as_str())
                    .build()?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(ChatCompletionRequestUserMessageContent::Array(
                        [
                            vec![audio_part],
                            request
                                .images
                                .iter()
                                .map(|image| -> Result<_, OpenAIError> {
                                    Ok(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                                        ChatCompletionRequestMessageContentPartImageArgs::default()
                                            .image_url(
                                                ImageUrlArgs::default().url(image.data_url()).build()?,
                                            )
                                            .build()?,
                                    ))
                                })
                                .collect::<Result<_, _>>()?,
                            vec![ChatCompletionRequestUserMessageContentPart::Text(
                                ChatCompletionRequestMessageContentPartTextArgs::default()
                                    .text(request.instruction.as_str())
                                    .build()?,
                            )],
                        ]
                        .concat(),
                    ))
                    .build()?,
            ),
        ])
        .build()
}
