use bytes::{Buf, BytesMut};
use tracing::warn;

/// Encode one payload as a Content-Length framed message.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 32);
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", payload.len()).as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Incremental decoder for Content-Length framed messages.
///
/// Bytes arrive in arbitrary chunks; a payload is surfaced only once the full
/// header block and the declared number of payload bytes are buffered. A
/// malformed header block is logged and discarded, and scanning resumes at
/// the next header boundary — decoding never fails the connection.
#[derive(Default)]
pub struct FrameCodec {
    buf: BytesMut,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pull the next complete payload out of the buffer, if any.
    pub fn next_payload(&mut self) -> Option<Vec<u8>> {
        loop {
            let (header_end, body_start) = match find_header_terminator(&self.buf) {
                Some(pos) => pos,
                None => return None,
            };

            let content_length = parse_content_length(&self.buf[..header_end]);
            match content_length {
                Some(len) => {
                    if self.buf.len() < body_start + len {
                        // Wait for the rest of the declared payload.
                        return None;
                    }
                    self.buf.advance(body_start);
                    let payload = self.buf.split_to(len).to_vec();
                    return Some(payload);
                }
                None => {
                    warn!(
                        discarded = body_start,
                        "malformed frame header, resynchronizing"
                    );
                    self.buf.advance(body_start);
                    // Scan the remaining bytes for the next header block.
                }
            }
        }
    }

    /// Drain every complete payload currently buffered.
    pub fn drain_payloads(&mut self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(payload) = self.next_payload() {
            out.push(payload);
        }
        out
    }
}

/// Locate the end of the header block. Returns (header_end, body_start).
/// Accepts CRLF CRLF per the protocol, tolerating bare LF LF.
fn find_header_terminator(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = find_subsequence(buf, b"\r\n\r\n").map(|i| (i, i + 4));
    let lf = find_subsequence(buf, b"\n\n").map(|i| (i, i + 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_content_length(header_block: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(header_block).ok()?;
    for line in text.lines() {
        let mut parts = line.splitn(2, ':');
        let field = parts.next()?.trim();
        if field.eq_ignore_ascii_case("content-length") {
            return parts.next()?.trim().parse().ok();
        }
    }
    None
}
