//! Server-sent-events framing for streaming chat responses.
//!
//! - [`drain_data_lines`] pulls complete `data:` payloads out of a text buffer
//! - [`sse_response_stream`] turns a `reqwest::Response` plus a payload parser
//!   into a [`BoxStream`] of [`StreamEvent`]s

use crate::util::from_reqwest;
use docent_domain::error::Result;
use docent_domain::stream::{BoxStream, StreamEvent};

/// Extract complete `data:` payloads from an SSE buffer.
///
/// Events are delimited by a blank line. Only `data:` lines are kept;
/// `event:`, `id:` and `retry:` are ignored. Consumed text is drained from
/// the buffer and any trailing partial event stays for the next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    if buffer.contains('\r') {
        *buffer = buffer.replace("\r\n", "\n");
    }

    let mut data_lines = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos + 2).collect();
        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }
    data_lines
}

/// Move the longest valid UTF-8 prefix of `pending` into `buffer`.
///
/// A multi-byte character split across two network chunks stays in
/// `pending` until its remaining bytes arrive.
fn decode_utf8_prefix(pending: &mut Vec<u8>, buffer: &mut String) {
    let valid = match std::str::from_utf8(pending) {
        Ok(s) => s.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => {
            buffer.push_str(&String::from_utf8_lossy(pending));
            pending.clear();
            return;
        }
    };
    let rest = pending.split_off(valid);
    buffer.push_str(&String::from_utf8_lossy(pending));
    *pending = rest;
}

/// Build a [`BoxStream`] from an SSE response and a payload parser.
///
/// The parser is `FnMut` so it can carry state across payloads (tool-call
/// index to id mapping). When the body closes the remaining buffer is
/// flushed, and a `Done` is synthesized if the parser never produced one.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut pending: Vec<u8> = Vec::new();
        let mut buffer = String::new();
        let mut done_emitted = false;

        loop {
            let finished = match response.chunk().await {
                Ok(Some(bytes)) => {
                    pending.extend_from_slice(&bytes);
                    decode_utf8_prefix(&mut pending, &mut buffer);
                    false
                }
                Ok(None) => {
                    if !pending.is_empty() {
                        buffer.push_str(&String::from_utf8_lossy(&pending));
                        pending.clear();
                    }
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                    }
                    true
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    return;
                }
            };

            for data in drain_data_lines(&mut buffer) {
                for event in parse_data(&data) {
                    if matches!(&event, Ok(StreamEvent::Done { .. })) {
                        done_emitted = true;
                    }
                    yield event;
                }
            }

            if finished {
                break;
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
