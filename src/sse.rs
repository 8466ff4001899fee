//! Server-sent event framing for the chat stream.
//!
//! Two layers, both transport independent:
//! - [`LineDecoder`] turns raw body chunks into text lines (chunk boundaries
//!   may fall anywhere, including inside a UTF-8 sequence).
//! - [`FrameParser`] groups `data:` lines into frame payloads, one per
//!   blank-line-terminated event.
//!
//! [`lines_from_bytes`] and [`frames`] lift both onto async streams. The
//! resulting streams are finite and tied to one connection.

use std::collections::VecDeque;
use std::fmt::Display;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt as _};

use crate::errors::StreamError;

/// Boxed line stream handed out by transports.
pub type LineStream =
    std::pin::Pin<Box<dyn Stream<Item = Result<String, StreamError>> + Send + 'static>>;

#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    /// Buffers `chunk` and returns every line it completed, without the
    /// `\n` / `\r\n` terminator.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(idx) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=idx).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Flushes an unterminated trailing line at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.buf);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

#[derive(Debug, Default)]
pub struct FrameParser {
    data_lines: Vec<String>,
}

impl FrameParser {
    /// Feeds one line; returns a frame payload when `line` closes one.
    ///
    /// `:` comments never touch the buffer. `event:`, `id:`, `retry:` and any
    /// other field are tolerated and ignored.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.flush();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            let payload = rest.strip_prefix(' ').unwrap_or(rest);
            self.data_lines.push(payload.to_string());
        }
        None
    }

    /// End of stream: the producer may close before the trailing blank line.
    pub fn finish(&mut self) -> Option<String> {
        self.flush()
    }

    fn flush(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        let lines = std::mem::take(&mut self.data_lines);
        Some(lines.join("\n"))
    }
}

/// Decodes a body byte stream into lines. Any read error after the first
/// byte is reported as a [`StreamError`] and ends the stream.
pub fn lines_from_bytes<S, E>(bytes: S) -> impl Stream<Item = Result<String, StreamError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Unpin + Send,
    E: Display,
{
    struct State<S> {
        bytes: S,
        decoder: LineDecoder,
        pending: VecDeque<String>,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes,
            decoder: LineDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(line) = state.pending.pop_front() {
                    return Ok(Some((line, state)));
                }
                if state.done {
                    return Ok(None);
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => state.pending.extend(state.decoder.push_chunk(&chunk)),
                    Some(Err(e)) => return Err(StreamError::new(e.to_string())),
                    None => {
                        state.done = true;
                        state.pending.extend(state.decoder.finish());
                    }
                }
            }
        },
    )
}

/// Groups a line stream into frame payloads, flushing a dangling frame at
/// graceful EOF. A frame cut off by a transport error is discarded.
pub fn frames<S>(lines: S) -> impl Stream<Item = Result<String, StreamError>> + Send
where
    S: Stream<Item = Result<String, StreamError>> + Unpin + Send,
{
    stream::try_unfold(
        (lines, FrameParser::default(), false),
        |(mut lines, mut parser, done)| async move {
            if done {
                return Ok(None);
            }
            loop {
                match lines.next().await {
                    Some(Ok(line)) => {
                        if let Some(frame) = parser.push_line(&line) {
                            return Ok(Some((frame, (lines, parser, false))));
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        return Ok(parser.finish().map(|frame| (frame, (lines, parser, true))));
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(lines: &[&str]) -> Vec<String> {
        let mut parser = FrameParser::default();
        let mut out: Vec<String> = lines.iter().filter_map(|l| parser.push_line(l)).collect();
        out.extend(parser.finish());
        out
    }

    #[test]
    fn blank_line_closes_a_frame() {
        let frames = parse_all(&["data: one", "", "data:two", ""]);
        assert_eq!(frames, vec!["one", "two"]);
    }

    #[test]
    fn multi_line_data_is_newline_joined() {
        let frames = parse_all(&["data: a", "data:  b", ""]);
        // Only a single leading space is stripped.
        assert_eq!(frames, vec!["a\n b"]);
    }

    #[test]
    fn comments_and_other_fields_are_ignored() {
        let frames = parse_all(&[": heartbeat", "event: message", "id: 7", "data: x", ": ping", "retry: 10", ""]);
        assert_eq!(frames, vec!["x"]);
    }

    #[test]
    fn blank_lines_without_data_emit_nothing() {
        assert!(parse_all(&["", "", ": only a comment", ""]).is_empty());
    }

    #[test]
    fn dangling_frame_is_flushed_at_eof() {
        let frames = parse_all(&["data: [DONE]"]);
        assert_eq!(frames, vec!["[DONE]"]);
    }

    #[test]
    fn line_decoder_handles_split_chunks_and_crlf() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push_chunk(b"data: he").is_empty());
        assert_eq!(decoder.push_chunk(b"llo\r\n\r\ndata: x"), vec!["data: hello", ""]);
        assert_eq!(decoder.finish().as_deref(), Some("data: x"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn line_decoder_reassembles_split_utf8() {
        let mut decoder = LineDecoder::default();
        let bytes = "data: é\n".as_bytes();
        let (a, b) = bytes.split_at(7);
        assert!(decoder.push_chunk(a).is_empty());
        assert_eq!(decoder.push_chunk(b), vec!["data: é"]);
    }

    #[tokio::test]
    async fn byte_stream_becomes_frames() {
        let chunks: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"data: {\"a\":1}\n\nda")),
            Ok(Bytes::from_static(b"ta: [DONE]\n")),
        ];
        let lines = Box::pin(lines_from_bytes(stream::iter(chunks)));
        let out: Vec<_> = frames(lines).collect().await;
        assert_eq!(
            out,
            vec![Ok("{\"a\":1}".to_string()), Ok("[DONE]".to_string())]
        );
    }

    #[tokio::test]
    async fn read_error_surfaces_and_drops_partial_frame() {
        let chunks: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"data: first\n\ndata: half")),
            Ok(Bytes::from_static(b"\n")),
            Err("connection reset".to_string()),
        ];
        let lines = Box::pin(lines_from_bytes(stream::iter(chunks)));
        let out: Vec<_> = frames(lines).collect().await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Ok("first".to_string()));
        assert_eq!(out[1], Err(StreamError::new("connection reset")));
    }
}
