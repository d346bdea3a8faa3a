//! The turn engine.
//!
//! One turn converts a buffered utterance into a spoken reply:
//! STT → phase-1 tool loop → phase-2 reply stream → streaming TTS, with
//! events multiplexed back to the client in emission order and a
//! cooperative cancel token observed at every suspension point.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use rtc_domain::audio::UtteranceAudio;
use rtc_domain::config::LlmParams;
use rtc_domain::error::{Error, ProviderKind, Result};
use rtc_domain::message::Message;
use rtc_domain::stream::{LlmStreamEvent, SttStreamEvent, StopReason};
use rtc_domain::tool::{ToolChoice, ToolDefinition};
use rtc_playbook::{TurnOutcome, TRANSITION_TOOL};
use rtc_protocol::ServerMessage;
use rtc_providers::{ChatRequest, ChatResponse, LlmProvider, RetryPolicy};
use rtc_sessions::Session;

use crate::hooks::HookEvent;
use crate::state::{AppState, SessionLink};

use super::cancel::CancelToken;
use super::segment::SentenceSegmenter;

/// Prompt used to pre-describe vision attachments for the LLM.
const VISION_PROMPT: &str = "Describe this image concisely for a voice conversation.";

/// Input to a single turn.
pub struct TurnInput {
    pub source: TurnSource,
}

#[derive(Debug)]
pub enum TurnSource {
    /// A buffered utterance; STT produces the user text.
    Utterance(UtteranceAudio),
    /// Pre-transcribed text; STT is skipped.
    Text(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn — entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one turn to completion (or cancellation). Spawned by the session
/// executor; never panics the session.
pub async fn run_turn(
    state: AppState,
    session: Arc<Session>,
    link: SessionLink,
    input: TurnInput,
    cancel: CancelToken,
) {
    let generation = session.next_generation();
    link.mux.set_active_generation(generation);
    let session_id = session.id().to_string();

    let span = tracing::info_span!("turn", session_id = %session_id, generation);
    let started = Instant::now();
    state.hooks.emit(HookEvent::TurnStarted {
        session_id: session_id.clone(),
        generation,
    });

    let result = run_turn_inner(&state, &session, &link, input, &cancel, generation)
        .instrument(span)
        .await;

    let cancelled = match result {
        Ok(cancelled) => cancelled,
        Err(e) => {
            tracing::error!(session_id = %session_id, generation, error = %e, "turn failed");
            report_error(&state, &link, generation, &e, &session_id);
            cancel.is_cancelled()
        }
    };

    link.bargein.set_armed(false);
    state.cancel_map.remove_token(&session_id, &cancel);
    state.hooks.emit(HookEvent::TurnCompleted {
        session_id,
        generation,
        duration_ms: started.elapsed().as_millis() as u64,
        cancelled,
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn_inner — the per-turn protocol
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Returns `Ok(true)` when the turn was cancelled.
async fn run_turn_inner(
    state: &AppState,
    session: &Arc<Session>,
    link: &SessionLink,
    input: TurnInput,
    cancel: &CancelToken,
    generation: u64,
) -> Result<bool> {
    let mux = &link.mux;
    let session_id = session.id().to_string();
    let turn_cfg = &state.config.turn;
    let retry = &state.retry;

    // ── Admit: drain queued attachments into the new user message ───
    let attachments = session.drain_attachments();
    let (mut user_text, audio) = match input.source {
        TurnSource::Utterance(a) => (String::new(), Some(a)),
        TurnSource::Text(t) => (t, None),
    };
    session.with_history(|h| {
        h.push(Message::user_with_attachments(
            user_text.clone(),
            attachments.clone(),
        ))
    });

    // ── STT ─────────────────────────────────────────────────────────
    if let Some(audio) = audio {
        let stt_started = Instant::now();
        match run_stt(state, link, generation, cancel, &audio).await {
            Ok(None) => return Ok(true),
            Ok(Some(text)) => {
                user_text = text;
                mux.send_turn(
                    generation,
                    ServerMessage::Transcript {
                        text: user_text.clone(),
                        is_final: true,
                    },
                );
                session.with_history(|h| h.set_last_user_content(&user_text));
                state.hooks.emit(HookEvent::SttCompleted {
                    session_id: session_id.clone(),
                    generation,
                    duration_ms: stt_started.elapsed().as_millis() as u64,
                });
            }
            Err(e) => {
                // No assistant reply for this turn.
                report_error(state, link, generation, &e, &session_id);
                return Ok(false);
            }
        }
    } else {
        // Text mode still confirms what the engine understood.
        mux.send_turn(
            generation,
            ServerMessage::Transcript {
                text: user_text.clone(),
                is_final: true,
            },
        );
    }

    // ── Vision pre-analysis ─────────────────────────────────────────
    if !attachments.is_empty() {
        if let Some(vision) = &state.providers.vision {
            for att in &attachments {
                if cancel.is_cancelled() {
                    return Ok(true);
                }
                match vision.analyze(att, VISION_PROMPT).await {
                    Ok(description) => {
                        user_text.push_str("\n[image] ");
                        user_text.push_str(&description);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "vision analysis failed, attachment skipped")
                    }
                }
            }
            session.with_history(|h| h.set_last_user_content(&user_text));
        }
    }

    // ── Stage resolution ────────────────────────────────────────────
    let stage = resolve_stage(state, session);
    if let Some(stage_id) = &stage.stage_id {
        tracing::debug!(stage = %stage_id, two_phase = stage.two_phase, "stage resolved");
    }

    let Some(llm) = state.providers.llm.clone() else {
        report_error(
            state,
            link,
            generation,
            &Error::Provider {
                kind: ProviderKind::Llm,
                message: "no LLM provider configured".into(),
                retryable: false,
            },
            &session_id,
        );
        return Ok(false);
    };

    // ── TTS sub-stage (runs concurrently with the reply stream) ─────
    let (tts_tx, tts_task) = spawn_tts(state, link, generation, cancel.clone());

    let mut outcome = TurnOutcome {
        user_text: user_text.clone(),
        ..Default::default()
    };

    // ── Phase 1: tool loop ──────────────────────────────────────────
    // Runs when tools are in play, and always when two-phase execution
    // is off (the single pass *is* this loop).
    let tools_active = !stage.tool_defs.is_empty() && stage.tool_choice != ToolChoice::None;
    let run_loop = tools_active || !stage.two_phase;

    let mut phase1_text = String::new();
    let mut forced = false;
    if run_loop {
        let deadline = Instant::now() + Duration::from_millis(turn_cfg.phase1_timeout_ms);
        let mut executed_calls: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                drop(tts_tx);
                let _ = tts_task.await;
                return Ok(true);
            }
            if executed_calls >= turn_cfg.max_tool_calls_per_turn || Instant::now() >= deadline {
                tracing::warn!(executed_calls, "phase-1 cap reached, forcing reply");
                forced = true;
                break;
            }

            let req = ChatRequest {
                messages: build_messages(&stage.system_prompt, session),
                tools: if tools_active {
                    stage.tool_defs.clone()
                } else {
                    Vec::new()
                },
                tool_choice: if tools_active {
                    stage.tool_choice.clone()
                } else {
                    ToolChoice::None
                },
                params: stage.llm.clone(),
            };

            let resp = match call_complete(&llm, retry, turn_cfg.llm_timeout_ms, cancel, req).await
            {
                CallEnd::Cancelled => {
                    drop(tts_tx);
                    let _ = tts_task.await;
                    return Ok(true);
                }
                CallEnd::Failed(e) => {
                    report_error(state, link, generation, &e, &session_id);
                    drop(tts_tx);
                    let _ = tts_task.await;
                    return Ok(false);
                }
                CallEnd::Done(resp) => resp,
            };

            if resp.stop_reason == StopReason::ToolUse && !resp.tool_calls.is_empty() {
                executed_calls += resp.tool_calls.len() as u32;
                if !execute_tool_round(state, session, link, generation, cancel, &resp, &mut outcome)
                    .await
                {
                    drop(tts_tx);
                    let _ = tts_task.await;
                    return Ok(true);
                }
            } else {
                phase1_text = resp.text;
                break;
            }
        }
    }

    // ── Phase 2: reply ──────────────────────────────────────────────
    link.bargein.set_armed(true);
    let llm_started = Instant::now();

    // A phase-1 `end_turn` that carried text is the reply verbatim (also
    // the single-pass mode). A cap breach always forces the streaming
    // call with tool use disabled.
    let use_phase1_text = run_loop && !forced && (!stage.two_phase || !phase1_text.is_empty());
    let reply = if use_phase1_text {
        mux.send_turn(
            generation,
            ServerMessage::Llm {
                text: phase1_text.clone(),
            },
        );
        let mut seg = SentenceSegmenter::new(turn_cfg.sentence_soft_cap, turn_cfg.min_fragment_chars);
        for frag in seg.push(&phase1_text) {
            let _ = tts_tx.send(frag);
        }
        if let Some(rest) = seg.flush() {
            let _ = tts_tx.send(rest);
        }
        Some(phase1_text)
    } else {
        // Fresh streaming call with tool use disabled.
        let req = ChatRequest {
            messages: build_messages(&stage.system_prompt, session),
            tools: Vec::new(),
            tool_choice: ToolChoice::None,
            params: stage.llm.clone(),
        };
        match stream_reply(state, link, generation, cancel, &llm, req, &tts_tx, llm_started).await {
            Ok(text) => text,
            Err(e) => {
                report_error(state, link, generation, &e, &session_id);
                drop(tts_tx);
                let _ = tts_task.await;
                return Ok(false);
            }
        }
    };

    let Some(reply) = reply else {
        // Cancelled mid-stream: no partial assistant message is appended.
        drop(tts_tx);
        let _ = tts_task.await;
        return Ok(true);
    };

    session.with_history(|h| h.push(Message::assistant(reply.clone())));
    state.hooks.emit(HookEvent::LlmCompleted {
        session_id: session_id.clone(),
        generation,
        duration_ms: llm_started.elapsed().as_millis() as u64,
    });

    // ── Wait for playback to drain ──────────────────────────────────
    drop(tts_tx);
    let tts_end = tts_task.await.unwrap_or_default();
    if tts_end.cancelled || cancel.is_cancelled() {
        return Ok(true);
    }

    // ── Playbook evaluation ─────────────────────────────────────────
    outcome.assistant_reply = reply;
    evaluate_playbook(state, session, link, generation, &stage, outcome).await;

    Ok(false)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct StageSetup {
    stage_id: Option<String>,
    system_prompt: String,
    tool_defs: Vec<ToolDefinition>,
    tool_choice: ToolChoice,
    llm: LlmParams,
    two_phase: bool,
    wants_intent: bool,
}

/// Expose the active playbook stage (or the global defaults) to this turn.
fn resolve_stage(state: &AppState, session: &Arc<Session>) -> StageSetup {
    match &state.playbook {
        Some(engine) => {
            let ps = session
                .playbook_state()
                .unwrap_or_else(|| engine.initial_state(Utc::now()));
            let ctx = engine.resolve(
                &ps,
                &state.config.llm.params,
                state.config.turn.two_phase_execution,
            );
            session.set_playbook_state(Some(ps));

            let mut tool_defs = state.tools.definitions(Some(&ctx.tools));
            if ctx.include_transition_tool {
                tool_defs.push(engine.transition_tool_def());
            }
            StageSetup {
                stage_id: Some(ctx.stage_id),
                system_prompt: ctx.system_prompt,
                tool_defs,
                tool_choice: ctx.tool_choice,
                llm: ctx.llm,
                two_phase: ctx.two_phase,
                wants_intent: ctx.wants_intent,
            }
        }
        None => StageSetup {
            stage_id: None,
            system_prompt: state.config.llm.system_prompt.clone(),
            tool_defs: state.tools.definitions(None),
            tool_choice: ToolChoice::Auto,
            llm: state.config.llm.params.clone(),
            two_phase: state.config.turn.two_phase_execution,
            wants_intent: false,
        },
    }
}

fn build_messages(system_prompt: &str, session: &Arc<Session>) -> Vec<Message> {
    let mut messages = Vec::new();
    messages.push(Message::system(system_prompt));
    messages.extend(session.with_history(|h| h.snapshot()));
    messages
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `Ok(None)` = cancelled; `Ok(Some(text))` = final transcript. Streaming
/// providers forward partials as non-final transcript events.
async fn run_stt(
    state: &AppState,
    link: &SessionLink,
    generation: u64,
    cancel: &CancelToken,
    audio: &UtteranceAudio,
) -> Result<Option<String>> {
    let Some(stt) = state.providers.stt.clone() else {
        return Err(Error::Provider {
            kind: ProviderKind::Stt,
            message: "no STT provider configured".into(),
            retryable: false,
        });
    };
    let timeout_ms = state.config.turn.stt_timeout_ms;
    let retry = &state.retry;

    if !stt.supports_streaming() {
        let audio = audio.clone();
        let text = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            out = retry.run("stt.transcribe", || {
                with_timeout(ProviderKind::Stt, timeout_ms, stt.transcribe(&audio))
            }) => out?,
        };
        return Ok(Some(text));
    }

    let mut stream = tokio::select! {
        _ = cancel.cancelled() => return Ok(None),
        out = retry.run("stt.transcribe_stream", || stt.transcribe_stream(audio)) => out?,
    };

    let deadline = tokio::time::sleep(Duration::from_millis(timeout_ms));
    tokio::pin!(deadline);
    let mut final_text = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            _ = &mut deadline => {
                return Err(Error::ProviderTimeout {
                    kind: ProviderKind::Stt,
                    elapsed_ms: timeout_ms,
                });
            }
            event = stream.next() => match event {
                None => break,
                Some(Err(e)) => return Err(e),
                Some(Ok(SttStreamEvent::Partial { text })) => {
                    link.mux.send_turn(
                        generation,
                        ServerMessage::Transcript {
                            text,
                            is_final: false,
                        },
                    );
                }
                Some(Ok(SttStreamEvent::Final { text })) => {
                    final_text = Some(text);
                    break;
                }
            }
        }
    }

    final_text.map(Some).ok_or_else(|| Error::Provider {
        kind: ProviderKind::Stt,
        message: "stream closed without a final transcript".into(),
        retryable: false,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phase 1 helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum CallEnd {
    Done(ChatResponse),
    Failed(Error),
    Cancelled,
}

async fn call_complete(
    llm: &Arc<dyn LlmProvider>,
    retry: &RetryPolicy,
    timeout_ms: u64,
    cancel: &CancelToken,
    req: ChatRequest,
) -> CallEnd {
    tokio::select! {
        _ = cancel.cancelled() => CallEnd::Cancelled,
        out = retry.run("llm.complete", || {
            with_timeout(ProviderKind::Llm, timeout_ms, llm.complete(req.clone()))
        }) => match out {
            Ok(resp) => CallEnd::Done(resp),
            Err(e) => CallEnd::Failed(e),
        },
    }
}

/// Emit, validate, execute and record one round of tool calls, then
/// append the assistant message and its results as a single history
/// group. Returns false when cancelled (nothing is appended).
async fn execute_tool_round(
    state: &AppState,
    session: &Arc<Session>,
    link: &SessionLink,
    generation: u64,
    cancel: &CancelToken,
    resp: &ChatResponse,
    outcome: &mut TurnOutcome,
) -> bool {
    let session_id = session.id().to_string();
    let mut results: Vec<Message> = Vec::with_capacity(resp.tool_calls.len());

    for tc in &resp.tool_calls {
        if cancel.is_cancelled() {
            return false;
        }

        link.mux.send_turn(
            generation,
            ServerMessage::ToolCallStart {
                name: tc.name.clone(),
                call_id: tc.call_id.clone(),
                arguments: tc.arguments.clone(),
            },
        );
        state.hooks.emit(HookEvent::ToolCallStarted {
            session_id: session_id.clone(),
            generation,
            name: tc.name.clone(),
            call_id: tc.call_id.clone(),
        });

        let started = Instant::now();
        let out = if tc.name == TRANSITION_TOOL && state.playbook.is_some() {
            // Synthetic tool: record the requested stage, never dispatch.
            outcome.requested_stage = tc.arguments["targetStage"].as_str().map(String::from);
            super::tools::ToolOutcome {
                result: serde_json::json!({ "ok": true }),
                is_error: false,
            }
        } else {
            state
                .tools
                .dispatch(&tc.name, &tc.arguments, cancel.clone())
                .await
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        link.mux.send_turn(
            generation,
            ServerMessage::ToolCallEnd {
                call_id: tc.call_id.clone(),
                result: (!out.is_error).then(|| out.result.clone()),
                error: out.is_error.then(|| {
                    out.result["error"]
                        .as_str()
                        .unwrap_or("tool failed")
                        .to_string()
                }),
                duration_ms,
            },
        );
        state.hooks.emit(HookEvent::ToolCallFinished {
            session_id: session_id.clone(),
            generation,
            name: tc.name.clone(),
            call_id: tc.call_id.clone(),
            duration_ms,
            is_error: out.is_error,
        });

        outcome.tools_called.push(tc.name.clone());
        if !out.is_error {
            outcome.tool_results.push((tc.name.clone(), out.result.clone()));
        }
        results.push(Message::tool_result(&tc.call_id, &tc.name, &out.result));
    }

    // The group lands atomically; a cancel above left history untouched.
    let mut group = Vec::with_capacity(1 + results.len());
    group.push(Message::assistant_tool_calls(
        resp.text.clone(),
        resp.tool_calls.clone(),
    ));
    group.extend(results);
    session.with_history(|h| h.push_group(group));
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phase 2 — reply streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stream the reply, forwarding deltas to the client and sentence
/// fragments to TTS. `Ok(None)` = cancelled mid-stream.
#[allow(clippy::too_many_arguments)]
async fn stream_reply(
    state: &AppState,
    link: &SessionLink,
    generation: u64,
    cancel: &CancelToken,
    llm: &Arc<dyn LlmProvider>,
    req: ChatRequest,
    tts_tx: &mpsc::UnboundedSender<String>,
    llm_started: Instant,
) -> Result<Option<String>> {
    let turn_cfg = &state.config.turn;
    let session_id = link.session_id.clone();

    let mut stream = tokio::select! {
        _ = cancel.cancelled() => return Ok(None),
        out = state.retry.run("llm.stream", || llm.stream(req.clone())) => out?,
    };

    let mut seg = SentenceSegmenter::new(turn_cfg.sentence_soft_cap, turn_cfg.min_fragment_chars);
    let mut text = String::new();
    let mut first_token = true;

    let deadline = tokio::time::sleep(Duration::from_millis(turn_cfg.llm_timeout_ms));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            _ = &mut deadline => {
                return Err(Error::ProviderTimeout {
                    kind: ProviderKind::Llm,
                    elapsed_ms: turn_cfg.llm_timeout_ms,
                });
            }
            event = stream.next() => match event {
                None => break,
                Some(Err(e)) => return Err(e),
                Some(Ok(LlmStreamEvent::Delta { content })) => {
                    if first_token {
                        first_token = false;
                        state.hooks.emit(HookEvent::LlmFirstToken {
                            session_id: session_id.clone(),
                            generation,
                            elapsed_ms: llm_started.elapsed().as_millis() as u64,
                        });
                    }
                    link.mux.send_turn(
                        generation,
                        ServerMessage::LlmChunk {
                            content: content.clone(),
                            done: false,
                        },
                    );
                    for frag in seg.push(&content) {
                        let _ = tts_tx.send(frag);
                    }
                    text.push_str(&content);
                }
                // Tool use is disabled for the reply call.
                Some(Ok(LlmStreamEvent::ToolCall(tc))) => {
                    tracing::warn!(tool = %tc.name, "reply stream produced a tool call, ignored");
                }
                Some(Ok(LlmStreamEvent::Done { .. })) => break,
            }
        }
    }

    link.mux.send_turn(
        generation,
        ServerMessage::LlmChunk {
            content: String::new(),
            done: true,
        },
    );
    if let Some(rest) = seg.flush() {
        let _ = tts_tx.send(rest);
    }
    Ok(Some(text))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TTS sub-stage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
struct TtsEnd {
    started: bool,
    cancelled: bool,
}

enum SpeakEnd {
    Done,
    Cancelled,
    Failed(Error),
}

/// Spawn the playback task. Text fragments arrive on the returned sender;
/// the task owns the `tts-start` / `tts-complete` / `tts-cancelled`
/// lifecycle and emits the terminal event exactly once.
fn spawn_tts(
    state: &AppState,
    link: &SessionLink,
    generation: u64,
    cancel: CancelToken,
) -> (mpsc::UnboundedSender<String>, JoinHandle<TtsEnd>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let state = state.clone();
    let link = link.clone();

    let handle = tokio::spawn(async move {
        let session_id = link.session_id.clone();
        let Some(tts) = state.providers.tts.clone() else {
            // No synthesis backend: drain fragments so the turn can finish.
            while rx.recv().await.is_some() {}
            return TtsEnd::default();
        };

        let mut end = TtsEnd::default();
        let started_at = Instant::now();
        loop {
            let fragment = tokio::select! {
                _ = cancel.cancelled() => {
                    if end.started {
                        link.mux.send_turn(generation, ServerMessage::TtsCancelled);
                    }
                    end.cancelled = true;
                    return end;
                }
                fragment = rx.recv() => fragment,
            };
            let Some(fragment) = fragment else { break };

            if !end.started {
                end.started = true;
                link.mux.send_turn(
                    generation,
                    ServerMessage::TtsStart {
                        channel: Some(link.mux.tts_channel()),
                    },
                );
                state.hooks.emit(HookEvent::TtsStarted {
                    session_id: session_id.clone(),
                    generation,
                });
            }

            match speak_fragment(&state, &link, generation, &cancel, &*tts, &fragment).await {
                SpeakEnd::Done => {}
                SpeakEnd::Cancelled => {
                    link.mux.send_turn(generation, ServerMessage::TtsCancelled);
                    end.cancelled = true;
                    return end;
                }
                SpeakEnd::Failed(e) => {
                    report_error(&state, &link, generation, &e, &session_id);
                    break;
                }
            }
        }

        if end.started {
            link.mux.send_turn(generation, ServerMessage::TtsComplete);
            link.bargein.record_tts_complete();
            state.hooks.emit(HookEvent::TtsCompleted {
                session_id,
                generation,
                duration_ms: started_at.elapsed().as_millis() as u64,
            });
        }
        end
    });

    (tx, handle)
}

/// Synthesize one fragment and push its audio to the multiplexer.
async fn speak_fragment(
    state: &AppState,
    link: &SessionLink,
    generation: u64,
    cancel: &CancelToken,
    tts: &dyn rtc_providers::TtsProvider,
    text: &str,
) -> SpeakEnd {
    let tts_cfg = &state.config.tts;
    let timeout_ms = state.config.turn.tts_timeout_ms;

    if !tts.supports_streaming() {
        // One-shot synthesis; delivered as a media frame when possible,
        // else as a single full `tts` payload on the reliable channel.
        let out = tokio::select! {
            _ = cancel.cancelled() => return SpeakEnd::Cancelled,
            out = state.retry.run("tts.speak", || {
                with_timeout(ProviderKind::Tts, timeout_ms, tts.speak(text, tts_cfg))
            }) => out,
        };
        return match out {
            Ok(audio) => {
                link.mux
                    .send_full_tts(generation, audio.format, audio.sample_rate, audio.data);
                SpeakEnd::Done
            }
            Err(e) => SpeakEnd::Failed(e),
        };
    }

    let mut stream = tokio::select! {
        _ = cancel.cancelled() => return SpeakEnd::Cancelled,
        out = state.retry.run("tts.speak_stream", || tts.speak_stream(text, tts_cfg)) => {
            match out {
                Ok(s) => s,
                Err(e) => return SpeakEnd::Failed(e),
            }
        }
    };

    let deadline = tokio::time::sleep(Duration::from_millis(timeout_ms));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return SpeakEnd::Cancelled,
            _ = &mut deadline => {
                return SpeakEnd::Failed(Error::ProviderTimeout {
                    kind: ProviderKind::Tts,
                    elapsed_ms: timeout_ms,
                });
            }
            chunk = stream.next() => match chunk {
                None => return SpeakEnd::Done,
                Some(Err(e)) => return SpeakEnd::Failed(e),
                Some(Ok(data)) => {
                    link.mux
                        .send_tts_audio(generation, tts_cfg.format, tts_cfg.sample_rate, data);
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Playbook evaluation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn evaluate_playbook(
    state: &AppState,
    session: &Arc<Session>,
    link: &SessionLink,
    generation: u64,
    stage: &StageSetup,
    mut outcome: TurnOutcome,
) {
    let Some(engine) = &state.playbook else { return };
    let Some(mut ps) = session.playbook_state() else { return };
    let session_id = session.id().to_string();

    if stage.wants_intent {
        if let Some(classifier) = &state.classifier {
            outcome.intent = classifier.classify(&outcome.user_text).await;
        }
    }

    if let Some(fired) = engine.evaluate(&mut ps, &outcome, Utc::now()) {
        if fired.clear_history {
            session.with_history(|h| h.clear());
        }
        if let Some(msg) = &fired.message {
            let message = match msg.role {
                rtc_playbook::TransitionRole::System => Message::system(&msg.text),
                rtc_playbook::TransitionRole::Assistant => Message::assistant(&msg.text),
            };
            session.with_history(|h| h.push(message));
        }

        link.mux.send_turn(
            generation,
            ServerMessage::StageChange {
                from: fired.from.clone(),
                to: fired.to.clone(),
                reason: fired.reason.clone(),
            },
        );
        state.hooks.emit(HookEvent::StageExited {
            session_id: session_id.clone(),
            stage: fired.from.clone(),
        });
        state.hooks.emit(HookEvent::StageEntered {
            session_id: session_id.clone(),
            stage: fired.to.clone(),
        });
        state.hooks.emit(HookEvent::TransitionFired {
            session_id,
            from: fired.from,
            to: fired.to,
            reason: fired.reason,
        });
    }
    session.set_playbook_state(Some(ps));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn with_timeout<T>(
    kind: ProviderKind,
    timeout_ms: u64,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(out) => out,
        Err(_) => Err(Error::ProviderTimeout {
            kind,
            elapsed_ms: timeout_ms,
        }),
    }
}

fn report_error(state: &AppState, link: &SessionLink, generation: u64, e: &Error, session_id: &str) {
    link.mux
        .send_turn(generation, ServerMessage::from_error(e));
    state.hooks.emit(HookEvent::ErrorReported {
        session_id: session_id.to_string(),
        code: e.wire_code(),
    });
}

