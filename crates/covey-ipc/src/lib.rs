//! Inter-process transport for the Covey coordinator and its workers.
//!
//! - [`protocol`] — JSON-serialisable [`Command`]/[`Response`] tagged unions,
//!   one pair per worker interaction
//! - [`framing`] — length-prefixed JSON wire format (4-byte LE `u32` +
//!   payload)
//! - [`channel`] — [`WorkerHandle`]: one spawned (or attached) worker process
//!   plus its full-duplex loopback channel, with bounded-wait receives
//!
//! The channel is the only coordination mechanism between coordinator and
//! workers: no shared memory, no locks. A receive that times out surfaces
//! [`ChannelError::Unresponsive`]; a closed socket or dead process surfaces
//! [`ChannelError::Lost`].

pub mod channel;
pub mod framing;
pub mod protocol;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use channel::{connect, ChannelError, LaunchOptions, WorkerHandle};
pub use framing::{read_frame, write_frame, MAX_FRAME_LEN};
pub use protocol::{Command, ProtocolError, Response};
