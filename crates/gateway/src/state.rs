//! Shared application state passed to all handlers and the per-session
//! runtimes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use rtc_domain::config::Config;
use rtc_playbook::{IntentClassifier, PlaybookEngine};
use rtc_providers::{LlmProvider, RetryPolicy, SttProvider, TtsProvider, VisionProvider};
use rtc_sessions::SessionRegistry;

use crate::hooks::HookBus;
use crate::runtime::bargein::BargeInController;
use crate::runtime::cancel::CancelMap;
use crate::runtime::tools::ToolRegistry;
use crate::runtime::SessionCommand;
use crate::transport::{Multiplexer, PeerTransport};

/// The injected provider backends. All optional: the gateway serves
/// without them and turns fail with the matching `_ERROR` code.
#[derive(Clone, Default)]
pub struct ProviderSet {
    pub stt: Option<Arc<dyn SttProvider>>,
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub tts: Option<Arc<dyn TtsProvider>>,
    pub vision: Option<Arc<dyn VisionProvider>>,
}

/// Per-session runtime wiring: the transport multiplexer, the command
/// channel into the session's executor task, and its barge-in controller.
/// Rebindable on reconnect; conversational state lives on the `Session`.
#[derive(Clone)]
pub struct SessionLink {
    pub session_id: String,
    pub mux: Arc<Multiplexer>,
    pub cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    pub bargein: Arc<BargeInController>,
}

/// Lookup of live session runtimes by session id.
#[derive(Default)]
pub struct ConnectionMap {
    links: RwLock<HashMap<String, SessionLink>>,
}

impl ConnectionMap {
    pub fn insert(&self, session_id: &str, link: SessionLink) {
        self.links.write().insert(session_id.to_owned(), link);
    }

    pub fn get(&self, session_id: &str) -> Option<SessionLink> {
        self.links.read().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionLink> {
        self.links.write().remove(session_id)
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub providers: ProviderSet,
    pub retry: RetryPolicy,

    // ── Session management ────────────────────────────────────────────
    pub registry: Arc<SessionRegistry>,
    pub connections: Arc<ConnectionMap>,
    pub cancel_map: Arc<CancelMap>,

    // ── Runtime ───────────────────────────────────────────────────────
    pub tools: Arc<ToolRegistry>,
    pub playbook: Option<Arc<PlaybookEngine>>,
    pub classifier: Option<Arc<dyn IntentClassifier>>,
    pub hooks: HookBus,

    // ── Transport ─────────────────────────────────────────────────────
    /// Peer-connection machinery; `None` = media channel unavailable.
    pub peer: Option<Arc<dyn PeerTransport>>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Arc<Vec<u8>>>,
}
