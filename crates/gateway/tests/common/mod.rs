//! Shared test support: scripted providers and a session harness that
//! drives the engine without a WebSocket.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use rtc_domain::audio::{SpeechAudio, UtteranceAudio};
use rtc_domain::config::{Config, TtsConfig};
use rtc_domain::error::{Error, ProviderKind, Result};
use rtc_domain::stream::{BoxStream, LlmStreamEvent, SttStreamEvent, StopReason};
use rtc_domain::tool::ToolDefinition;
use rtc_gateway::api::rtc::spawn_runtime;
use rtc_gateway::bootstrap::{build_state, Bootstrap};
use rtc_gateway::runtime::cancel::CancelToken;
use rtc_gateway::runtime::tools::{Tool, ToolRegistry};
use rtc_gateway::state::{AppState, ProviderSet, SessionLink};
use rtc_protocol::ServerMessage;
use rtc_providers::{ChatRequest, ChatResponse, LlmProvider, SttProvider, TtsProvider};
use rtc_sessions::Session;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ScriptedStt {
    text: Option<String>,
}

impl ScriptedStt {
    pub fn ok(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: Some(text.to_string()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { text: None })
    }
}

#[async_trait::async_trait]
impl SttProvider for ScriptedStt {
    async fn transcribe(&self, _audio: &UtteranceAudio) -> Result<String> {
        match &self.text {
            Some(text) => Ok(text.clone()),
            None => Err(Error::Provider {
                kind: ProviderKind::Stt,
                message: "scripted failure".into(),
                retryable: false,
            }),
        }
    }

    fn provider_id(&self) -> &str {
        "scripted-stt"
    }
}

pub enum LlmTurn {
    Complete(ChatResponse),
    Stream(Vec<&'static str>),
}

pub struct ScriptedLlm {
    script: Mutex<VecDeque<LlmTurn>>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    pub fn new(turns: Vec<LlmTurn>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn unexpected(&self, what: &str) -> Error {
        Error::Provider {
            kind: ProviderKind::Llm,
            message: format!("script exhausted or wrong call kind: {what}"),
            retryable: false,
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(&self, req: ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().push(req);
        match self.script.lock().pop_front() {
            Some(LlmTurn::Complete(resp)) => Ok(resp),
            _ => Err(self.unexpected("complete")),
        }
    }

    async fn stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<LlmStreamEvent>>> {
        self.requests.lock().push(req);
        match self.script.lock().pop_front() {
            Some(LlmTurn::Stream(deltas)) => {
                let mut events: Vec<Result<LlmStreamEvent>> = deltas
                    .into_iter()
                    .map(|d| {
                        Ok(LlmStreamEvent::Delta {
                            content: d.to_string(),
                        })
                    })
                    .collect();
                events.push(Ok(LlmStreamEvent::Done {
                    stop_reason: StopReason::EndTurn,
                }));
                Ok(futures_util::stream::iter(events).boxed())
            }
            _ => Err(self.unexpected("stream")),
        }
    }

    fn provider_id(&self) -> &str {
        "scripted-llm"
    }
}

/// Streams `chunks_per_fragment` audio chunks per fragment with a fixed
/// delay between them, so tests can cancel mid-playback.
pub struct StreamingTts {
    pub chunks_per_fragment: usize,
    pub chunk_delay: Duration,
}

impl StreamingTts {
    pub fn fast() -> Arc<Self> {
        Arc::new(Self {
            chunks_per_fragment: 2,
            chunk_delay: Duration::from_millis(1),
        })
    }

    pub fn slow() -> Arc<Self> {
        Arc::new(Self {
            chunks_per_fragment: 100,
            chunk_delay: Duration::from_millis(20),
        })
    }
}

#[async_trait::async_trait]
impl TtsProvider for StreamingTts {
    async fn speak(&self, _text: &str, config: &TtsConfig) -> Result<SpeechAudio> {
        Ok(SpeechAudio {
            format: config.format,
            sample_rate: config.sample_rate,
            data: vec![0u8; 320],
        })
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn speak_stream(
        &self,
        _text: &str,
        _config: &TtsConfig,
    ) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let n = self.chunks_per_fragment;
        let delay = self.chunk_delay;
        let stream = async_stream::stream! {
            for _ in 0..n {
                tokio::time::sleep(delay).await;
                yield Ok(vec![0u8; 160]);
            }
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        "scripted-tts"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WeatherTool;

#[async_trait::async_trait]
impl Tool for WeatherTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_weather".into(),
            description: "Current weather for a city".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "city": { "type": "string" } },
                "required": ["city"]
            }),
        }
    }

    async fn execute(
        &self,
        _args: serde_json::Value,
        _cancel: CancelToken,
    ) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "temp": 22, "condition": "clear" }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Harness {
    pub state: AppState,
    pub session: Arc<Session>,
    pub link: SessionLink,
    pub rx: mpsc::UnboundedReceiver<ServerMessage>,
}

pub fn providers(
    stt: Arc<ScriptedStt>,
    llm: Arc<ScriptedLlm>,
    tts: Arc<StreamingTts>,
) -> ProviderSet {
    ProviderSet {
        stt: Some(stt),
        llm: Some(llm),
        tts: Some(tts),
        vision: None,
    }
}

pub fn harness(parts: Bootstrap) -> Harness {
    let state = build_state(Config::default(), parts).expect("state builds");
    let session = state.registry.create();
    let (tx, rx) = mpsc::unbounded_channel();
    let link = spawn_runtime(&state, &session, tx);
    Harness {
        state,
        session,
        link,
        rx,
    }
}

pub fn utterance() -> UtteranceAudio {
    UtteranceAudio::new(16_000, vec![0i16; 1_600])
}

pub fn tool_registry(tools: Vec<Arc<dyn Tool>>) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    for t in tools {
        reg.register(t).unwrap();
    }
    reg
}

/// Receive events until `stop` matches (inclusive) or the timeout hits.
pub async fn collect_until(
    rx: &mut mpsc::UnboundedReceiver<ServerMessage>,
    stop: impl Fn(&ServerMessage) -> bool,
) -> Vec<ServerMessage> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let msg = tokio::select! {
            msg = rx.recv() => msg,
            _ = tokio::time::sleep_until(deadline) => panic!(
                "timed out waiting for terminal event; got {:?}",
                events.iter().map(tag).collect::<Vec<_>>()
            ),
        };
        let Some(msg) = msg else { break };
        let done = stop(&msg);
        events.push(msg);
        if done {
            break;
        }
    }
    events
}

/// Drain anything still pending after a short quiet period.
pub async fn drain_quiet(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            Ok(Some(msg)) => events.push(msg),
            _ => break,
        }
    }
    events
}

/// Short tag for order assertions.
pub fn tag(msg: &ServerMessage) -> &'static str {
    match msg {
        ServerMessage::Ready { .. } => "ready",
        ServerMessage::Pong { .. } => "pong",
        ServerMessage::Signal { .. } => "signal",
        ServerMessage::ReconnectAck { .. } => "reconnect-ack",
        ServerMessage::Transcript { is_final: false, .. } => "transcript-partial",
        ServerMessage::Transcript { is_final: true, .. } => "transcript",
        ServerMessage::LlmChunk { done: false, .. } => "llm-chunk",
        ServerMessage::LlmChunk { done: true, .. } => "llm-done",
        ServerMessage::Llm { .. } => "llm",
        ServerMessage::TtsStart { .. } => "tts-start",
        ServerMessage::TtsChunk { .. } => "tts-chunk",
        ServerMessage::Tts { .. } => "tts",
        ServerMessage::TtsComplete => "tts-complete",
        ServerMessage::TtsCancelled => "tts-cancelled",
        ServerMessage::SpeechStart => "speech-start",
        ServerMessage::SpeechEnd => "speech-end",
        ServerMessage::ToolCallStart { .. } => "tool-call-start",
        ServerMessage::ToolCallEnd { .. } => "tool-call-end",
        ServerMessage::StageChange { .. } => "stage-change",
        ServerMessage::Error { .. } => "error",
    }
}

/// Canonical per-turn ordering rank (§ event order); `None` for events
/// outside the turn sequence.
pub fn canonical_rank(msg: &ServerMessage) -> Option<u8> {
    Some(match msg {
        ServerMessage::Transcript { is_final: false, .. } => 0,
        ServerMessage::Transcript { is_final: true, .. } => 1,
        ServerMessage::ToolCallStart { .. } | ServerMessage::ToolCallEnd { .. } => 2,
        ServerMessage::LlmChunk { .. } | ServerMessage::Llm { .. } => 3,
        ServerMessage::TtsStart { .. } => 4,
        ServerMessage::TtsChunk { .. } | ServerMessage::Tts { .. } => 5,
        ServerMessage::TtsComplete | ServerMessage::TtsCancelled => 6,
        ServerMessage::StageChange { .. } => 7,
        _ => return None,
    })
}
