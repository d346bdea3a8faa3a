//! Provider contracts consumed by the turn engine, plus the bounded retry
//! policy applied to their failures.
//!
//! Concrete STT/LLM/TTS backends live outside this workspace; they
//! implement these traits and are injected into the gateway at startup.
//! Providers are shared across sessions and must be safe for concurrent
//! use.

mod retry;
mod traits;

pub use retry::RetryPolicy;
pub use traits::*;
