// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! A minimal server-sent-events decoder over a raw byte stream. Only the
//! parts of the protocol the flag stream uses are implemented: named events,
//! multi-line data, and comment keep-alives.

/// One decoded event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
    pub name: String,
    pub data: String,
}

/// Incremental decoder; feed it raw chunks in arrival order and collect the
/// events completed by each chunk. Carries partial lines and partial events
/// across feeds.
#[derive(Default)]
pub struct SseDecoder {
    buffer: String,
    event_name: String,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        // The stream is UTF-8; invalid bytes are replaced rather than
        // aborting the connection over one bad event.
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            if line.is_empty() {
                if let Some(event) = self.finish_event() {
                    events.push(event);
                }
                continue;
            }
            self.process_line(line);
        }
        events
    }

    fn process_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return; // comment / keep-alive
        }
        let (field, value) = match line.find(':') {
            Some(index) => {
                let value = &line[index + 1..];
                (&line[..index], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };
        match field {
            "event" => self.event_name = value.to_string(),
            "data" => self.data_lines.push(value.to_string()),
            // "id" and "retry" are not used by the flag stream
            _ => {}
        }
    }

    fn finish_event(&mut self) -> Option<SseEvent> {
        if self.data_lines.is_empty() && self.event_name.is_empty() {
            return None;
        }
        let event = SseEvent {
            name: if self.event_name.is_empty() {
                "message".to_string()
            } else {
                std::mem::take(&mut self.event_name)
            },
            data: self.data_lines.join("\n"),
        };
        self.event_name.clear();
        self.data_lines.clear();
        Some(event)
    }
}
