//! LLMRTC gateway: the server that turns live audio streams into
//! conversational turns.
//!
//! Browser clients open a reliable WebSocket signaling channel, negotiate
//! an optional peer media session, and stream microphone audio in; the
//! gateway runs STT → two-phase LLM → streaming TTS per turn and streams
//! transcripts, model output and synthesized audio back, cancelling
//! cleanly on barge-in.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod hooks;
pub mod runtime;
pub mod state;
pub mod transport;
pub mod vad;
