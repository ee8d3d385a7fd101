use serde_json::{json, Value};

use crate::models::message::Message;
use crate::models::role::Role;

/// Convert history to the chat-completions `messages` array
pub fn messages_to_spec(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            json!({
                "role": message.role(),
                "content": message.content(),
            })
        })
        .collect()
}

/// Flatten history into a single prompt for endpoints that take plain text
pub fn messages_to_prompt(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| {
            let speaker = match message.role() {
                Role::System => "System",
                Role::User => "Human",
                Role::Assistant => "AI",
            };
            format!("{}: {}", speaker, message.content())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Byte offset of the earliest occurrence of any stop sequence
fn first_stop_index(text: &str, stops: &[String]) -> Option<usize> {
    stops
        .iter()
        .filter(|stop| !stop.is_empty())
        .filter_map(|stop| text.find(stop.as_str()))
        .min()
}

/// Cut the text at the first occurrence of any stop sequence
pub fn enforce_stop_sequences(text: &str, stops: &[String]) -> String {
    match first_stop_index(text, stops) {
        Some(index) => text[..index].to_string(),
        None => text.to_string(),
    }
}

/// Incremental counterpart of [`enforce_stop_sequences`] for streamed tokens.
///
/// Holds back the last `longest stop - 1` bytes so a stop sequence split across tokens is never
/// partially forwarded. The concatenated output equals `enforce_stop_sequences` on the full text.
#[derive(Debug)]
pub struct StopSequenceFilter {
    stops: Vec<String>,
    holdback: usize,
    buffer: String,
    stopped: bool,
}

impl StopSequenceFilter {
    pub fn new(stops: Vec<String>) -> Self {
        let holdback = stops
            .iter()
            .map(|stop| stop.len().saturating_sub(1))
            .max()
            .unwrap_or(0);
        Self {
            stops,
            holdback,
            buffer: String::new(),
            stopped: false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Feed one token, returning the text that is now safe to forward
    pub fn push(&mut self, token: &str) -> Option<String> {
        if self.stopped {
            return None;
        }
        self.buffer.push_str(token);

        if let Some(index) = first_stop_index(&self.buffer, &self.stops) {
            self.stopped = true;
            self.buffer.truncate(index);
            return non_empty(std::mem::take(&mut self.buffer));
        }

        let mut cut = self.buffer.len().saturating_sub(self.holdback);
        while !self.buffer.is_char_boundary(cut) {
            cut -= 1;
        }
        non_empty(self.buffer.drain(..cut).collect())
    }

    /// Release whatever is still held back once the input ends
    pub fn finish(&mut self) -> Option<String> {
        non_empty(std::mem::take(&mut self.buffer))
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
