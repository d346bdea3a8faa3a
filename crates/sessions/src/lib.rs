//! Session management for LLMRTC.
//!
//! The registry owns every live [`Session`], keyed by an opaque random id.
//! Sessions survive transport loss: a disconnected client can reconnect
//! within the TTL and find its conversation history and playbook position
//! intact. Eviction is idle-time based and never removes a session with a
//! running turn.

mod history;
mod registry;
mod session;

pub use history::History;
pub use registry::{Reconnect, SessionRegistry};
pub use session::Session;
