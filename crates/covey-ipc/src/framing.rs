//! Length-prefixed JSON framing.
//!
//! Every message on the wire is a 4-byte **little-endian** `u32` length
//! prefix followed by that many bytes of UTF-8 JSON:
//!
//! ```text
//! +----------------+------------------+
//! | Length (4B LE) | JSON Payload     |
//! +----------------+------------------+
//! ```

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::ProtocolError;

/// Maximum payload size (16 MiB). Guards both directions against a
/// corrupted length prefix.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Read one framed message.
///
/// Returns `Ok(None)` on EOF before any prefix byte (clean channel
/// shutdown). A short read inside a frame, an oversized prefix, or invalid
/// JSON is an error.
pub fn read_frame<T: DeserializeOwned>(reader: &mut impl Read) -> Result<Option<T>, ProtocolError> {
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(ProtocolError::Io(e)),
    }

    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(serde_json::from_slice(&payload)?))
}

/// Write one framed message and flush.
pub fn write_frame<T: Serialize>(writer: &mut impl Write, msg: &T) -> Result<(), ProtocolError> {
    let payload = serde_json::to_vec(msg)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }

    // MAX_FRAME_LEN fits in u32, so the cast cannot truncate.
    #[allow(clippy::cast_possible_truncation)]
    let prefix = (payload.len() as u32).to_le_bytes();
    writer.write_all(&prefix)?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
