//! WebSocket signaling endpoint — the reliable channel.
//!
//! Flow:
//! 1. Client connects to `/v1/rtc?token=<bearer>`; a fresh session is
//!    bound and `ready{id}` goes out.
//! 2. `offer` negotiates the peer media session (when machinery is
//!    injected) and the SDP answer returns as `signal`.
//! 3. Media-channel audio feeds the VAD; `audio` messages are the
//!    WebSocket fallback carrying one WAV utterance each.
//! 4. `reconnect{sessionId}` on a fresh connection rebinds a surviving
//!    session, cancelling its in-flight turn cleanly.

use axum::extract::ws::{Message as WsFrame, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;

use rtc_domain::audio::UtteranceAudio;
use rtc_domain::error::Error;
use rtc_protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
use rtc_sessions::{Reconnect, Session};

use crate::hooks::HookEvent;
use crate::runtime::bargein::BargeInController;
use crate::runtime::{run_session, SessionCommand};
use crate::state::{AppState, SessionLink};
use crate::transport::Multiplexer;
use crate::vad::{VadEvent, VoiceGate};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upgrade + auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// API bearer token; required when the server was started with one.
    pub token: Option<String>,
}

/// GET /v1/rtc — upgrade to WebSocket.
pub async fn rtc_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    if let Some(expected) = &state.api_token_hash {
        let provided = Sha256::digest(query.token.as_deref().unwrap_or("").as_bytes());
        if !bool::from(provided.as_slice().ct_eq(expected.as_slice())) {
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                "invalid or missing token",
            )
                .into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Writer task: reliable-channel FIFO onto the socket.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let Ok(json) = serde_json::to_string(&msg) else {
                continue;
            };
            if ws_sink.send(WsFrame::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Bind a fresh session to this connection.
    let session = state.registry.create();
    let mut link = spawn_runtime(&state, &session, out_tx.clone());
    link.mux.send_control(ServerMessage::Ready {
        id: link.session_id.clone(),
        protocol_version: PROTOCOL_VERSION,
        ice_servers: state
            .config
            .server
            .ice_servers
            .iter()
            .cloned()
            .map(Into::into)
            .collect(),
    });
    state.hooks.emit(HookEvent::ConnectionOpened {
        session_id: link.session_id.clone(),
    });

    // Reader loop with the heartbeat watchdog: any inbound traffic counts
    // as liveness; silence past the limit closes the channels but leaves
    // the session alive for reconnect.
    let heartbeat = Duration::from_millis(state.config.server.heartbeat_timeout_ms);
    let mut last_heard = Instant::now();
    loop {
        let frame = tokio::select! {
            frame = ws_stream.next() => frame,
            _ = tokio::time::sleep_until((last_heard + heartbeat).into()) => {
                tracing::info!(
                    session_id = %link.session_id,
                    "nothing heard within heartbeat window, closing channels"
                );
                break;
            }
        };
        let Some(Ok(frame)) = frame else { break };
        last_heard = Instant::now();

        match frame {
            WsFrame::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle_message(&state, &mut link, msg, &out_tx).await,
                Err(e) => {
                    // Drop the offending frame; the session continues.
                    link.mux.send_control(ServerMessage::from_error(
                        &Error::InvalidMessage(e.to_string()),
                    ));
                }
            },
            WsFrame::Close(_) => break,
            WsFrame::Ping(_) | WsFrame::Pong(_) => {
                // WebSocket-level keepalive; axum answers automatically.
            }
            WsFrame::Binary(_) => {
                link.mux.send_control(ServerMessage::from_error(&Error::InvalidMessage(
                    "binary frames are not part of the protocol".into(),
                )));
            }
        }
    }

    // Transport gone. The session and its executor stay for reconnect;
    // the TTL sweep is what finally retires them.
    link.mux.unbind_reliable();
    link.mux.unbind_media();
    writer.abort();
    state.hooks.emit(HookEvent::ConnectionClosed {
        session_id: link.session_id.clone(),
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_message(
    state: &AppState,
    link: &mut SessionLink,
    msg: ClientMessage,
    out_tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    match msg {
        ClientMessage::Ping { timestamp } => {
            state.registry.touch(&link.session_id);
            link.mux.send_control(ServerMessage::Pong { timestamp });
        }

        ClientMessage::Offer { signal } => match &state.peer {
            None => {
                link.mux
                    .send_control(ServerMessage::from_error(&Error::WebRtcUnavailable));
            }
            Some(peer) => match peer.negotiate(&link.session_id, &signal).await {
                Ok(peer_session) => {
                    link.mux.send_control(ServerMessage::Signal {
                        signal: peer_session.answer,
                    });
                    link.mux.bind_media(peer_session.media);
                    spawn_media_pump(state.clone(), link.clone(), peer_session.inbound_audio);
                }
                Err(e) => link.mux.send_control(ServerMessage::from_error(&e)),
            },
        },

        ClientMessage::Reconnect { session_id } => {
            handle_reconnect(state, link, &session_id, out_tx).await;
        }

        ClientMessage::Audio { data, attachments } => {
            if let Some(attachments) = attachments {
                if let Some(session) = state.registry.get(&link.session_id) {
                    session.queue_attachments(attachments);
                }
            }
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(data.as_bytes())
                .map_err(|e| Error::InvalidAudioFormat(format!("bad base64 payload: {e}")))
                .and_then(|bytes| UtteranceAudio::from_wav_bytes(&bytes));
            match decoded {
                Ok(utterance) => {
                    let _ = link.cmd_tx.send(SessionCommand::Utterance(utterance));
                }
                Err(e) => link.mux.send_control(ServerMessage::from_error(&e)),
            }
        }

        ClientMessage::Attachments { attachments } => {
            if let Some(session) = state.registry.get(&link.session_id) {
                session.queue_attachments(attachments);
            }
        }
    }
}

/// Rebind a surviving session to this connection, or mint a replacement.
async fn handle_reconnect(
    state: &AppState,
    link: &mut SessionLink,
    old_id: &str,
    out_tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    match state.registry.reconnect(old_id) {
        Reconnect::Recovered(session) => {
            // Cancel the in-flight turn cleanly before rebinding.
            state.cancel_map.cancel(session.id());

            let recovered = match state.connections.get(session.id()) {
                Some(existing) => {
                    existing.mux.bind_reliable(out_tx.clone());
                    existing
                }
                None => spawn_runtime(state, &session, out_tx.clone()),
            };

            // The fresh session opened at connect time loses.
            discard_session(state, link);
            *link = recovered;

            link.mux.send_control(ServerMessage::ReconnectAck {
                success: true,
                session_id: link.session_id.clone(),
                history_recovered: true,
            });
        }
        Reconnect::Replaced { session, error } => {
            discard_session(state, link);
            *link = spawn_runtime(state, &session, out_tx.clone());

            link.mux.send_control(ServerMessage::ReconnectAck {
                success: false,
                session_id: link.session_id.clone(),
                history_recovered: false,
            });
            link.mux.send_control(ServerMessage::from_error(&error));
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime wiring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Create the session's multiplexer, barge-in controller and executor
/// task, register the link, and bind the given reliable sender. Also the
/// entry point for embedders driving sessions without a WebSocket.
pub fn spawn_runtime(
    state: &AppState,
    session: &Arc<Session>,
    out_tx: mpsc::UnboundedSender<ServerMessage>,
) -> SessionLink {
    let mux = Arc::new(Multiplexer::new());
    mux.bind_reliable(out_tx);

    let bargein = Arc::new(BargeInController::new(Duration::from_millis(
        state.config.turn.bargein_grace_ms,
    )));
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let link = SessionLink {
        session_id: session.id().to_string(),
        mux,
        cmd_tx,
        bargein,
    };
    state.connections.insert(session.id(), link.clone());

    tokio::spawn(run_session(
        state.clone(),
        session.clone(),
        link.clone(),
        cmd_rx,
    ));
    link
}

/// Tear down a session and its runtime (losing side of a reconnect).
fn discard_session(state: &AppState, link: &SessionLink) {
    state.cancel_map.cancel(&link.session_id);
    if let Some(old) = state.connections.remove(&link.session_id) {
        let _ = old.cmd_tx.send(SessionCommand::Close);
        old.mux.unbind_reliable();
        old.mux.unbind_media();
    }
    state.registry.remove(&link.session_id);
}

/// Feed decoded media-channel PCM through the VAD: edges go to the
/// client and the barge-in controller; finished utterances enter the
/// session's command queue.
fn spawn_media_pump(
    state: AppState,
    link: SessionLink,
    mut inbound: mpsc::Receiver<Vec<i16>>,
) {
    tokio::spawn(async move {
        let mut gate = VoiceGate::new(&state.config.vad);
        while let Some(frame) = inbound.recv().await {
            for event in gate.push(&frame) {
                match event {
                    VadEvent::SpeechStart => {
                        link.mux.send_control(ServerMessage::SpeechStart);
                        if state.cancel_map.is_running(&link.session_id)
                            && link.bargein.should_cancel()
                        {
                            tracing::debug!(
                                session_id = %link.session_id,
                                "barge-in: speech started during playback"
                            );
                            state.cancel_map.cancel(&link.session_id);
                        }
                    }
                    VadEvent::SpeechEnd(utterance) => {
                        link.mux.send_control(ServerMessage::SpeechEnd);
                        let _ = link.cmd_tx.send(SessionCommand::Utterance(utterance));
                    }
                }
            }
        }
        tracing::debug!(session_id = %link.session_id, "media pump stopped");
    });
}
