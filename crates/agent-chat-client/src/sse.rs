//! Incremental decoding of an SSE response body into frame payloads.
//!
//! The agent server writes one `data: <json>` line per event. Chunk
//! boundaries from the network are arbitrary, so the decoder keeps the
//! unterminated tail of the body between calls.

use tracing::trace;

const DATA_PREFIX: &[u8] = b"data: ";

/// Splits a chunked SSE body into `data:` payload strings.
///
/// Bytes are buffered undecoded until a full line is available. `\n` never
/// appears inside a multi-byte UTF-8 sequence, so a character split across
/// two chunks is always decoded whole.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Feeds one chunk and returns the payloads of every line it completed.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let Some(last_newline) = self.buf.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.buf.drain(..=last_newline).collect();
        complete
            .split(|b| *b == b'\n')
            .filter_map(frame_payload)
            .collect()
    }

    /// Number of buffered bytes that do not yet form a complete line.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Drops the unterminated tail at end of input or on cancellation.
    pub fn finish(&mut self) {
        if !self.buf.is_empty() {
            trace!(bytes = self.buf.len(), "discarding unterminated SSE line");
            self.buf.clear();
        }
    }
}

fn frame_payload(line: &[u8]) -> Option<String> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let rest = line.strip_prefix(DATA_PREFIX)?;
    let payload = String::from_utf8_lossy(rest);
    let payload = payload.trim();
    (!payload.is_empty()).then(|| payload.to_string())
}
