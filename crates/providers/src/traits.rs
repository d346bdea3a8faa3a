use futures_util::StreamExt;

use rtc_domain::audio::{SpeechAudio, UtteranceAudio};
use rtc_domain::config::{LlmParams, TtsConfig};
use rtc_domain::error::Result;
use rtc_domain::message::{Attachment, Message};
use rtc_domain::stream::{BoxStream, LlmStreamEvent, SttStreamEvent};
use rtc_domain::tool::{ToolChoice, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// How the model may use the tool set.
    pub tool_choice: ToolChoice,
    /// Sampling parameters.
    pub params: LlmParams,
}

/// A provider-agnostic chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Textual content of the response.
    pub text: String,
    /// Tool calls emitted by the model, in order.
    pub tool_calls: Vec<rtc_domain::tool::ToolCallRequest>,
    /// Why the model stopped.
    pub stop_reason: rtc_domain::stream::StopReason,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Language-model backend.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a completion request and wait for the full response.
    async fn complete(&self, req: ChatRequest) -> Result<ChatResponse>;

    /// Send a completion request and return a stream of events.
    async fn stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<LlmStreamEvent>>>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}

/// Speech-to-text backend.
#[async_trait::async_trait]
pub trait SttProvider: Send + Sync {
    /// Transcribe a complete utterance.
    async fn transcribe(&self, audio: &UtteranceAudio) -> Result<String>;

    /// Whether [`SttProvider::transcribe_stream`] yields real partials.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Stream partial transcripts followed by the final one. The default
    /// wraps [`SttProvider::transcribe`] as a single final event.
    async fn transcribe_stream(
        &self,
        audio: &UtteranceAudio,
    ) -> Result<BoxStream<'static, Result<SttStreamEvent>>> {
        let text = self.transcribe(audio).await?;
        Ok(futures_util::stream::iter(vec![Ok(SttStreamEvent::Final { text })]).boxed())
    }

    fn provider_id(&self) -> &str;
}

/// Text-to-speech backend.
#[async_trait::async_trait]
pub trait TtsProvider: Send + Sync {
    /// Synthesize a text fragment in one shot.
    async fn speak(&self, text: &str, config: &TtsConfig) -> Result<SpeechAudio>;

    /// Whether [`TtsProvider::speak_stream`] yields incremental audio.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Stream synthesized audio chunks. The default wraps
    /// [`TtsProvider::speak`] as a single chunk.
    async fn speak_stream(
        &self,
        text: &str,
        config: &TtsConfig,
    ) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let audio = self.speak(text, config).await?;
        Ok(futures_util::stream::iter(vec![Ok(audio.data)]).boxed())
    }

    fn provider_id(&self) -> &str;
}

/// Optional image-understanding backend.
#[async_trait::async_trait]
pub trait VisionProvider: Send + Sync {
    async fn analyze(&self, image: &Attachment, prompt: &str) -> Result<String>;

    fn provider_id(&self) -> &str;
}
