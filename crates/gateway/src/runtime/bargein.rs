//! Barge-in: user speech starting while the assistant is replying
//! cancels the in-flight turn.
//!
//! Armed by the turn engine while a turn is in its reply/playback phase.
//! A short grace window after `tts-complete` ignores `speech-start`, so
//! residual playback leaking into the microphone does not cancel the next
//! thing the user actually says over.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub struct BargeInController {
    grace: Duration,
    /// Set while the active turn is generating or speaking its reply.
    armed: AtomicBool,
    last_complete: Mutex<Option<Instant>>,
}

impl BargeInController {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            armed: AtomicBool::new(false),
            last_complete: Mutex::new(None),
        }
    }

    /// The turn engine arms the controller when the reply phase starts and
    /// disarms it when the turn retires.
    pub fn set_armed(&self, armed: bool) {
        self.armed.store(armed, Ordering::Release);
    }

    /// Record that playback finished; opens the suppression window.
    pub fn record_tts_complete(&self) {
        self.record_tts_complete_at(Instant::now());
    }

    pub fn record_tts_complete_at(&self, now: Instant) {
        *self.last_complete.lock() = Some(now);
    }

    /// Should this `speech-start` edge cancel the active turn?
    pub fn should_cancel(&self) -> bool {
        self.should_cancel_at(Instant::now())
    }

    pub fn should_cancel_at(&self, now: Instant) -> bool {
        if !self.armed.load(Ordering::Acquire) {
            return false;
        }
        match *self.last_complete.lock() {
            Some(completed) => now.duration_since(completed) >= self.grace,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disarmed_controller_never_cancels() {
        let c = BargeInController::new(Duration::from_millis(500));
        assert!(!c.should_cancel());
    }

    #[test]
    fn armed_controller_cancels() {
        let c = BargeInController::new(Duration::from_millis(500));
        c.set_armed(true);
        assert!(c.should_cancel());
        c.set_armed(false);
        assert!(!c.should_cancel());
    }

    #[test]
    fn grace_window_suppresses_after_completion() {
        let c = BargeInController::new(Duration::from_millis(500));
        c.set_armed(true);
        let t0 = Instant::now();
        c.record_tts_complete_at(t0);
        assert!(!c.should_cancel_at(t0 + Duration::from_millis(100)));
        assert!(c.should_cancel_at(t0 + Duration::from_millis(500)));
    }
}
