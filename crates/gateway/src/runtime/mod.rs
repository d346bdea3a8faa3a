//! Per-session runtime: the single-active-turn executor and the turn
//! engine it drives.

pub mod bargein;
pub mod cancel;
pub mod segment;
pub mod tools;
pub mod turn;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use rtc_domain::audio::UtteranceAudio;
use rtc_sessions::Session;

use crate::state::{AppState, SessionLink};
use cancel::CancelToken;
use turn::{TurnInput, TurnSource};

/// Commands accepted by a session's executor task.
#[derive(Debug)]
pub enum SessionCommand {
    /// A buffered utterance from the VAD or the WebSocket audio fallback.
    Utterance(UtteranceAudio),
    /// A text-mode turn (embedders, tests); skips STT.
    Text(String),
    /// Tear the session runtime down.
    Close,
}

/// The session's logical executor: at most one turn runs at a time. A new
/// utterance arriving while a turn is active cancels that turn first,
/// then starts the next one.
pub async fn run_session(
    state: AppState,
    session: Arc<Session>,
    link: SessionLink,
    mut rx: mpsc::UnboundedReceiver<SessionCommand>,
) {
    let mut active: Option<(CancelToken, JoinHandle<()>)> = None;

    while let Some(cmd) = rx.recv().await {
        let source = match cmd {
            SessionCommand::Utterance(audio) => TurnSource::Utterance(audio),
            SessionCommand::Text(text) => TurnSource::Text(text),
            SessionCommand::Close => break,
        };

        // Supersede the active turn, if any, before admitting the next.
        if let Some((token, handle)) = active.take() {
            token.cancel();
            let _ = handle.await;
        }

        session.touch(Utc::now());
        let token = state.cancel_map.register(session.id());
        let handle = tokio::spawn(turn::run_turn(
            state.clone(),
            session.clone(),
            link.clone(),
            TurnInput { source },
            token.clone(),
        ));
        active = Some((token, handle));
    }

    if let Some((token, handle)) = active.take() {
        token.cancel();
        let _ = handle.await;
    }
    tracing::debug!(session_id = %session.id(), "session executor stopped");
}
