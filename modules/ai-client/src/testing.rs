//! Test double for the generation capability.
//!
//! `MockModel` routes prompts to scripted responses, either by substring
//! match or from a FIFO queue, and can inject failures. Builder pattern:
//! `.on_contains()`, `.fail_contains()`, `.push()`.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::traits::TextModel;

enum Rule {
    Respond { pattern: String, response: String },
    Fail { pattern: String, message: String },
}

/// Scripted [`TextModel`]. Substring rules are checked in registration
/// order; if none matches, the next queued response is popped. A prompt
/// with no scripted response is an error, so tests fail loudly on
/// unexpected calls.
#[derive(Default)]
pub struct MockModel {
    rules: Vec<Rule>,
    queue: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<String>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond with `response` whenever the prompt contains `pattern`.
    pub fn on_contains(mut self, pattern: &str, response: &str) -> Self {
        self.rules.push(Rule::Respond {
            pattern: pattern.to_string(),
            response: response.to_string(),
        });
        self
    }

    /// Fail whenever the prompt contains `pattern`.
    pub fn fail_contains(mut self, pattern: &str, message: &str) -> Self {
        self.rules.push(Rule::Fail {
            pattern: pattern.to_string(),
            message: message.to_string(),
        });
        self
    }

    /// Queue a response consumed by the next unmatched prompt.
    pub fn push(self, response: &str) -> Self {
        self.queue.lock().unwrap().push_back(response.to_string());
        self
    }

    /// Prompts seen so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextModel for MockModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.lock().unwrap().push(prompt.to_string());

        for rule in &self.rules {
            match rule {
                Rule::Respond { pattern, response } if prompt.contains(pattern.as_str()) => {
                    return Ok(response.clone());
                }
                Rule::Fail { pattern, message } if prompt.contains(pattern.as_str()) => {
                    bail!("{message}");
                }
                _ => {}
            }
        }

        if let Some(next) = self.queue.lock().unwrap().pop_front() {
            return Ok(next);
        }

        bail!(
            "MockModel: no scripted response for prompt: {}",
            crate::util::truncate_to_char_boundary(prompt, 120)
        );
    }
}
