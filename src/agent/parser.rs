// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Streaming classifier for the tool-call wire syntax (spec §4.6 step 4,
//! §6 "Tool-call wire syntax").
//!
//! Recognises `<thinking>...</thinking>` and
//! `<tool><server>S</server><n>N</n><args>{JSON}</args></tool>` as they
//! arrive in arbitrarily-chunked token deltas. Text outside those tags is
//! free text. The parser discards anything received after a `</tool>`
//! closer (spec §9 open question: "this spec mandates discard").

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone)]
pub struct ParsedToolCall {
    pub server: String,
    pub name: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum ParseEvent {
    ThinkingDelta(String),
    TextDelta(String),
    ToolCallComplete(ParsedToolCall),
    /// A second `<tool>` tag appeared in the same stream (spec §4.6: "tie
    /// breaks & edge cases").
    ProtocolError(String),
}

static TOOL_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<server>(.*?)</server>\s*<n>(.*?)</n>\s*<args>(.*?)</args>").unwrap()
});

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Mode {
    Free,
    Thinking,
    Tool,
    Done,
}

/// Incremental state machine driven one text chunk at a time.
pub struct StreamParser {
    buffer: String,
    mode: Mode,
    saw_tool_tag: bool,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            mode: Mode::Free,
            saw_tool_tag: false,
        }
    }

    /// True once a `</tool>` closer has been fully consumed; the Agent Loop
    /// uses this to stop polling the stream (spec §4.6 step 5).
    pub fn is_done(&self) -> bool {
        self.mode == Mode::Done
    }

    /// Feeds one chunk and returns every event it produced. Call
    /// `is_done()` after each call: once true, stop feeding further chunks
    /// from this stream and cancel it.
    pub fn feed(&mut self, chunk: &str) -> Vec<ParseEvent> {
        if self.mode == Mode::Done {
            if chunk.contains("<tool>") {
                return vec![ParseEvent::ProtocolError(
                    "multiple tool-call tags in a single stream".to_string(),
                )];
            }
            return Vec::new();
        }

        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        loop {
            match self.mode {
                Mode::Free => {
                    let thinking_idx = self.buffer.find("<thinking>");
                    let tool_idx = self.buffer.find("<tool>");

                    let next = match (thinking_idx, tool_idx) {
                        (Some(t), Some(u)) => Some(t.min(u)),
                        (Some(t), None) => Some(t),
                        (None, Some(u)) => Some(u),
                        (None, None) => None,
                    };

                    let Some(idx) = next else {
                        // No recognised tag yet. Flush everything except a
                        // trailing partial prefix that might be the start
                        // of one.
                        let safe_len = safe_flush_len(&self.buffer);
                        if safe_len > 0 {
                            let text: String = self.buffer.drain(..safe_len).collect();
                            events.push(ParseEvent::TextDelta(text));
                        }
                        break;
                    };

                    if idx > 0 {
                        let text: String = self.buffer.drain(..idx).collect();
                        events.push(ParseEvent::TextDelta(text));
                    }

                    if self.buffer.starts_with("<thinking>") {
                        self.buffer.drain(.."<thinking>".len());
                        self.mode = Mode::Thinking;
                    } else {
                        if self.saw_tool_tag {
                            events.push(ParseEvent::ProtocolError(
                                "multiple tool-call tags in a single stream".to_string(),
                            ));
                            self.mode = Mode::Done;
                            break;
                        }
                        self.saw_tool_tag = true;
                        self.buffer.drain(.."<tool>".len());
                        self.mode = Mode::Tool;
                    }
                }
                Mode::Thinking => {
                    let Some(idx) = self.buffer.find("</thinking>") else {
                        if !self.buffer.is_empty() {
                            let text = std::mem::take(&mut self.buffer);
                            events.push(ParseEvent::ThinkingDelta(text));
                        }
                        break;
                    };
                    if idx > 0 {
                        let text: String = self.buffer.drain(..idx).collect();
                        events.push(ParseEvent::ThinkingDelta(text));
                    }
                    self.buffer.drain(.."</thinking>".len());
                    self.mode = Mode::Free;
                }
                Mode::Tool => {
                    let Some(idx) = self.buffer.find("</tool>") else {
                        break;
                    };
                    let inner: String = self.buffer.drain(..idx).collect();
                    self.buffer.drain(.."</tool>".len());

                    match parse_tool_block(&inner) {
                        Ok(call) => events.push(ParseEvent::ToolCallComplete(call)),
                        Err(msg) => events.push(ParseEvent::ProtocolError(msg)),
                    }
                    self.buffer.clear();
                    self.mode = Mode::Done;
                    break;
                }
                Mode::Done => break,
            }
        }

        events
    }
}

/// How many leading bytes of `buffer` are safe to flush as free text
/// without risking a split `<thinking>`/`<tool>` prefix at the tail.
fn safe_flush_len(buffer: &str) -> usize {
    let max_prefix = "<thinking>".len();
    let tail_start = buffer.len().saturating_sub(max_prefix - 1);
    for i in (tail_start..=buffer.len()).rev() {
        if !buffer.is_char_boundary(i) {
            continue;
        }
        let tail = &buffer[i..];
        if "<thinking>".starts_with(tail) || "<tool>".starts_with(tail) {
            return i;
        }
    }
    buffer.len()
}

fn parse_tool_block(inner: &str) -> Result<ParsedToolCall, String> {
    let caps = TOOL_BLOCK
        .captures(inner)
        .ok_or_else(|| format!("malformed <tool> block: {inner:?}"))?;
    let server = caps[1].trim().to_string();
    let name = caps[2].trim().to_string();
    let args_raw = caps[3].trim();
    let args: serde_json::Value =
        serde_json::from_str(args_raw).map_err(|e| format!("malformed tool args JSON: {e}"))?;
    Ok(ParsedToolCall { server, name, args })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_call_split_across_chunks() {
        let mut parser = StreamParser::new();
        let full = r#"<tool><server>fs</server><n>list_files</n><args>{"path":"src"}</args></tool>"#;
        let mut events = Vec::new();
        for chunk in full.as_bytes().chunks(7) {
            events.extend(parser.feed(std::str::from_utf8(chunk).unwrap()));
        }
        assert!(parser.is_done());
        let call = events
            .into_iter()
            .find_map(|e| match e {
                ParseEvent::ToolCallComplete(c) => Some(c),
                _ => None,
            })
            .expect("expected a completed tool call");
        assert_eq!(call.server, "fs");
        assert_eq!(call.name, "list_files");
        assert_eq!(call.args, serde_json::json!({"path": "src"}));
    }

    #[test]
    fn thinking_then_free_text_then_tool() {
        let mut parser = StreamParser::new();
        let events = parser.feed("<thinking>let me check</thinking>Sure thing. ");
        assert!(matches!(&events[0], ParseEvent::ThinkingDelta(t) if t == "let me check"));
        assert!(matches!(&events[1], ParseEvent::TextDelta(t) if t == "Sure thing. "));
        assert!(!parser.is_done());
    }

    #[test]
    fn discards_tokens_after_tool_closer() {
        let mut parser = StreamParser::new();
        parser.feed(r#"<tool><server>fs</server><n>x</n><args>{}</args></tool>"#);
        assert!(parser.is_done());
        let events = parser.feed("trailing junk that should be discarded");
        assert!(events.is_empty());
    }

    #[test]
    fn second_tool_tag_is_a_protocol_error() {
        let mut parser = StreamParser::new();
        parser.feed(r#"<tool><server>fs</server><n>x</n><args>{}</args></tool>"#);
        let events = parser.feed("<tool><server>fs</server><n>y</n><args>{}</args></tool>");
        assert!(matches!(events[0], ParseEvent::ProtocolError(_)));
    }

    #[test]
    fn malformed_args_json_is_a_protocol_error_not_a_panic() {
        let mut parser = StreamParser::new();
        let events = parser.feed(r#"<tool><server>fs</server><n>x</n><args>{not json}</args></tool>"#);
        assert!(matches!(events[0], ParseEvent::ProtocolError(_)));
    }
}
