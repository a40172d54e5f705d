//! Incremental decoder for the engine's JSONL progress stream.
//!
//! Stdout arrives in arbitrary chunks: a record may be split across reads,
//! several records may share one read, and a multi-byte character may be cut
//! in half. The decoder keeps the trailing fragment between calls and only
//! parses complete lines. Anything that is not a valid record is dropped;
//! the progress stream is advisory and must never fail a job.

use engine_bridge_protocol::ProgressEvent;
use tracing::debug;
use tracing::warn;

/// Longest line kept in memory. Longer lines are skipped up to the next
/// newline.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug)]
pub struct JsonlDecoder {
    remainder: Vec<u8>,
    max_line_bytes: usize,
    discarding: bool,
    dropped_lines: u64,
}

impl Default for JsonlDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonlDecoder {
    pub fn new() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            remainder: Vec::new(),
            max_line_bytes: max_line_bytes.max(1),
            discarding: false,
            dropped_lines: 0,
        }
    }

    /// Feeds one stdout chunk and returns the records completed by it, in
    /// arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.discarding {
                self.discarding = false;
                self.remainder.clear();
                continue;
            }
            if self.remainder.len() + head.len() > self.max_line_bytes {
                self.drop_oversized();
                self.remainder.clear();
                continue;
            }

            let event = if self.remainder.is_empty() {
                self.parse_line(head)
            } else {
                self.remainder.extend_from_slice(head);
                let line = std::mem::take(&mut self.remainder);
                self.parse_line(&line)
            };
            events.extend(event);
        }

        if !self.discarding && !rest.is_empty() {
            if self.remainder.len() + rest.len() > self.max_line_bytes {
                self.drop_oversized();
                self.remainder.clear();
                self.discarding = true;
            } else {
                self.remainder.extend_from_slice(rest);
            }
        }

        events
    }

    /// Parses whatever is left once stdout reaches EOF. An engine that exits
    /// without a trailing newline still gets its last record delivered.
    pub fn finish(&mut self) -> Option<ProgressEvent> {
        let line = std::mem::take(&mut self.remainder);
        let discarding = std::mem::replace(&mut self.discarding, false);
        if discarding || line.is_empty() {
            return None;
        }
        self.parse_line(&line)
    }

    /// Bytes held back waiting for a newline.
    pub fn pending_bytes(&self) -> usize {
        self.remainder.len()
    }

    /// Non-empty lines that did not decode into a record.
    pub fn dropped_lines(&self) -> u64 {
        self.dropped_lines
    }

    fn parse_line(&mut self, raw: &[u8]) -> Option<ProgressEvent> {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('{') {
            self.dropped_lines += 1;
            debug!(line_len = line.len(), "dropping non-object stdout line");
            return None;
        }
        match serde_json::from_str::<ProgressEvent>(line) {
            Ok(event) => Some(event),
            Err(err) => {
                self.dropped_lines += 1;
                debug!(error = %err, line_len = line.len(), "dropping malformed progress record");
                None
            }
        }
    }

    fn drop_oversized(&mut self) {
        self.dropped_lines += 1;
        warn!(
            limit = self.max_line_bytes,
            "progress line exceeds size limit; skipping"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RECORD: &str = r#"{"type":"job.progress","jobId":"j1","stage":"parsing","progress":42,"message":"Parsing document"}"#;

    fn kinds(events: &[ProgressEvent]) -> Vec<&str> {
        events.iter().map(|e| e.kind.as_str()).collect()
    }

    #[test]
    fn every_split_point_yields_the_record_once() {
        let line = format!("{RECORD}\n");
        let bytes = line.as_bytes();
        for split in 0..=bytes.len() {
            let mut decoder = JsonlDecoder::new();
            let mut events = decoder.push(&bytes[..split]);
            events.extend(decoder.push(&bytes[split..]));
            assert_eq!(events.len(), 1, "split at {split}");
            assert_eq!(events[0].progress, Some(42.0));
            assert_eq!(decoder.pending_bytes(), 0);
        }
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let stream = format!("{RECORD}\r\n\n{RECORD}\n");
        let mut decoder = JsonlDecoder::new();
        let events: Vec<ProgressEvent> = stream
            .as_bytes()
            .iter()
            .flat_map(|b| decoder.push(std::slice::from_ref(b)))
            .collect();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn malformed_lines_are_skipped_without_losing_neighbours() {
        let mut decoder = JsonlDecoder::new();
        let chunk = format!(
            "Loading model weights...\n{{\"type\":\n[1,2]\n{RECORD}\n{{\"stage\":\"no type\"}}\n"
        );
        let events = decoder.push(chunk.as_bytes());
        assert_eq!(kinds(&events), vec!["job.progress"]);
        assert_eq!(decoder.dropped_lines(), 4);
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let line = "{\"type\":\"job.progress\",\"message\":\"解析完成\"}\n";
        let bytes = line.as_bytes();
        let cut = line.find('析').expect("char present") + 1;
        let mut decoder = JsonlDecoder::new();
        assert!(decoder.push(&bytes[..cut]).is_empty());
        let events = decoder.push(&bytes[cut..]);
        assert_eq!(events[0].message.as_deref(), Some("解析完成"));
    }

    #[test]
    fn finish_parses_unterminated_tail() {
        let mut decoder = JsonlDecoder::new();
        assert!(decoder.push(RECORD.as_bytes()).is_empty());
        assert_eq!(decoder.pending_bytes(), RECORD.len());
        let event = decoder.finish().expect("tail record");
        assert_eq!(event.kind, "job.progress");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn oversized_line_is_discarded_until_newline() {
        let mut decoder = JsonlDecoder::with_max_line_bytes(64);
        let noise = "x".repeat(100);
        assert!(decoder.push(noise.as_bytes()).is_empty());
        assert_eq!(decoder.pending_bytes(), 0);
        assert!(decoder.push(noise.as_bytes()).is_empty());

        let events = decoder.push(b"still noise\n{\"type\":\"job.completed\"}\n");
        assert_eq!(kinds(&events), vec!["job.completed"]);
        assert_eq!(decoder.dropped_lines(), 1);
    }
}
