//! Side-channel usage extraction from event-stream and JSON bodies.
//!
//! The extractor never touches the bytes relayed to the caller. It sees a
//! copy of each chunk, keeps only the unterminated tail of the current line,
//! and folds completed records into running usage counts. Memory stays
//! bounded by the longest line, capped at [`MAX_LINE_BYTES`].

use serde::Deserialize;

use super::events::StreamEvent;
use crate::pricing::TokenUsage;

/// Longest single line buffered before it is discarded as oversized.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Usage recovered from a completed response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedUsage {
    /// Model reported by the upstream, if it said.
    pub model: Option<String>,
    /// `None` when no usage-bearing event was seen. Accounting is skipped.
    pub usage: Option<TokenUsage>,
}

/// Incremental event-stream parser.
///
/// A record is one or more `field: value` lines terminated by a blank line.
/// Only `data` fields are read; multiple data lines are joined with `\n`.
/// Records whose payload does not parse are skipped.
#[derive(Debug, Default)]
pub struct UsageExtractor {
    /// Unterminated tail of the current line.
    line: Vec<u8>,
    /// Joined `data` values of the current record.
    data: String,
    /// The current line overflowed and is being dropped up to its newline.
    discarding_line: bool,
    /// The current record lost a line and must not be parsed.
    record_corrupt: bool,
    model: Option<String>,
    input_tokens: Option<i64>,
    output_tokens: Option<i64>,
}

impl UsageExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one relayed chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            if self.discarding_line {
                self.discarding_line = false;
            } else {
                self.line.extend_from_slice(head);
                let line = std::mem::take(&mut self.line);
                self.handle_line(&line);
                self.line = line;
                self.line.clear();
            }
            rest = &tail[1..];
        }

        if self.discarding_line {
            return;
        }
        self.line.extend_from_slice(rest);
        if self.line.len() > MAX_LINE_BYTES {
            tracing::debug!(
                buffered = self.line.len(),
                "Discarding oversized event-stream line"
            );
            self.line = Vec::new();
            self.discarding_line = true;
            self.record_corrupt = true;
        }
    }

    /// End of stream. A trailing record without its blank line still counts.
    pub fn finish(mut self) -> ExtractedUsage {
        if !self.discarding_line && !self.line.is_empty() {
            let line = std::mem::take(&mut self.line);
            self.handle_line(&line);
        }
        self.dispatch_record();

        let usage = match (self.input_tokens, self.output_tokens) {
            (None, None) => None,
            (input, output) => Some(TokenUsage::new(input.unwrap_or(0), output.unwrap_or(0))),
        };
        ExtractedUsage {
            model: self.model,
            usage,
        }
    }

    fn handle_line(&mut self, line: &[u8]) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            self.dispatch_record();
            return;
        }

        let Some(value) = line.strip_prefix(b"data:") else {
            // event:, id:, retry: and ": comment" lines carry nothing we bill on
            return;
        };
        let value = value.strip_prefix(b" ").unwrap_or(value);
        if !self.data.is_empty() {
            self.data.push('\n');
        }
        self.data.push_str(&String::from_utf8_lossy(value));
        if self.data.len() > MAX_LINE_BYTES {
            self.data.clear();
            self.record_corrupt = true;
        }
    }

    fn dispatch_record(&mut self) {
        let data = std::mem::take(&mut self.data);
        let corrupt = std::mem::replace(&mut self.record_corrupt, false);
        if corrupt || data.is_empty() {
            return;
        }

        match StreamEvent::parse(&data) {
            Some(StreamEvent::StreamStart {
                model,
                input_tokens,
            }) => {
                if model.is_some() {
                    self.model = model;
                }
                self.input_tokens = Some(input_tokens);
            }
            Some(StreamEvent::StreamDelta { output_tokens }) => {
                self.output_tokens = Some(output_tokens);
            }
            Some(StreamEvent::Other) => {}
            None => tracing::trace!("Skipping unparsable event-stream record"),
        }
    }
}

/// Read usage straight from a buffered JSON response body.
pub fn extract_buffered(body: &[u8]) -> ExtractedUsage {
    #[derive(Deserialize)]
    struct Response {
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        usage: Option<Usage>,
    }

    #[derive(Deserialize)]
    struct Usage {
        #[serde(default)]
        input_tokens: i64,
        #[serde(default)]
        output_tokens: i64,
    }

    match serde_json::from_slice::<Response>(body) {
        Ok(response) => ExtractedUsage {
            model: response.model,
            usage: response
                .usage
                .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens)),
        },
        Err(_) => ExtractedUsage::default(),
    }
}
