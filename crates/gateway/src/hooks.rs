//! Observer bus for lifecycle events.
//!
//! Pure sink: producers fire-and-forget onto an unbounded channel; a
//! dedicated task fans events out to registered observers. Observer
//! panics are caught and dropped, so nothing downstream can stall or kill
//! the pipeline.

use std::panic::AssertUnwindSafe;

use serde::Serialize;
use tokio::sync::mpsc;

use rtc_domain::error::ErrorCode;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle events observed across the gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HookEvent {
    ConnectionOpened {
        session_id: String,
    },
    ConnectionClosed {
        session_id: String,
    },
    TurnStarted {
        session_id: String,
        generation: u64,
    },
    TurnCompleted {
        session_id: String,
        generation: u64,
        duration_ms: u64,
        cancelled: bool,
    },
    SttCompleted {
        session_id: String,
        generation: u64,
        duration_ms: u64,
    },
    LlmFirstToken {
        session_id: String,
        generation: u64,
        elapsed_ms: u64,
    },
    LlmCompleted {
        session_id: String,
        generation: u64,
        duration_ms: u64,
    },
    TtsStarted {
        session_id: String,
        generation: u64,
    },
    TtsCompleted {
        session_id: String,
        generation: u64,
        duration_ms: u64,
    },
    ToolCallStarted {
        session_id: String,
        generation: u64,
        name: String,
        call_id: String,
    },
    ToolCallFinished {
        session_id: String,
        generation: u64,
        name: String,
        call_id: String,
        duration_ms: u64,
        is_error: bool,
    },
    StageEntered {
        session_id: String,
        stage: String,
    },
    StageExited {
        session_id: String,
        stage: String,
    },
    TransitionFired {
        session_id: String,
        from: String,
        to: String,
        reason: String,
    },
    ErrorReported {
        session_id: String,
        code: ErrorCode,
    },
}

/// An observer registered on the bus. Must not block; long work belongs
/// on the observer's own executor.
pub trait HookObserver: Send + Sync {
    fn on_event(&self, event: &HookEvent);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct HookBus {
    tx: mpsc::UnboundedSender<HookEvent>,
}

impl HookBus {
    /// Start the dispatch task over the given observers.
    pub fn new(observers: Vec<Box<dyn HookObserver>>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<HookEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for obs in &observers {
                    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        obs.on_event(&event);
                    }));
                    if outcome.is_err() {
                        tracing::warn!(?event, "hook observer panicked; event dropped for it");
                    }
                }
            }
        });
        Self { tx }
    }

    /// A bus with the default tracing observer.
    pub fn with_tracing() -> Self {
        Self::new(vec![Box::new(TracingObserver)])
    }

    /// Non-blocking emit; delivery is best-effort.
    pub fn emit(&self, event: HookEvent) {
        let _ = self.tx.send(event);
    }
}

/// Default observer: one structured log line per event.
pub struct TracingObserver;

impl HookObserver for TracingObserver {
    fn on_event(&self, event: &HookEvent) {
        let json = serde_json::to_string(event).unwrap_or_default();
        tracing::info!(hook_event = %json, "rtc_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter(Arc<AtomicUsize>);

    impl HookObserver for Counter {
        fn on_event(&self, _event: &HookEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicker;

    impl HookObserver for Panicker {
        fn on_event(&self, _event: &HookEvent) {
            panic!("observer bug");
        }
    }

    #[tokio::test]
    async fn delivers_to_all_observers() {
        let count = Arc::new(AtomicUsize::new(0));
        let bus = HookBus::new(vec![
            Box::new(Counter(count.clone())),
            Box::new(Counter(count.clone())),
        ]);
        bus.emit(HookEvent::ConnectionOpened {
            session_id: "s1".into(),
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn observer_panic_does_not_stop_dispatch() {
        let count = Arc::new(AtomicUsize::new(0));
        let bus = HookBus::new(vec![
            Box::new(Panicker),
            Box::new(Counter(count.clone())),
        ]);
        bus.emit(HookEvent::ConnectionClosed {
            session_id: "s1".into(),
        });
        bus.emit(HookEvent::ConnectionClosed {
            session_id: "s1".into(),
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn emit_never_blocks_the_producer() {
        // No observer consumes slowly enough to matter: the channel is
        // unbounded and emit is synchronous.
        let bus = HookBus::new(vec![]);
        for i in 0..10_000 {
            bus.emit(HookEvent::TurnStarted {
                session_id: "s".into(),
                generation: i,
            });
        }
    }
}
