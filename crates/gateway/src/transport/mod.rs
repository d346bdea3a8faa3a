//! Transport: the reliable control channel, the optional unreliable media
//! channel, and the multiplexer that routes events between them.

mod media;
mod mux;

pub use media::{MediaChannel, MediaFrame, PeerSession, PeerTransport};
pub use mux::Multiplexer;
