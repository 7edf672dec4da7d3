//! Multi-turn conversations.
//!
//! Every request starts from a cleared recurrent state, so a
//! [`Conversation`] replays its whole history through the [`Template`] on
//! each turn.

use llama_engine::{Backend, Result};
use serde::{Deserialize, Serialize};

use crate::engine::Generation;
use crate::session::Session;
use crate::stream::{StopFilter, TokenObserver};
use crate::template::Template;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Chat history plus the template used to render it.
#[derive(Debug, Clone)]
pub struct Conversation {
    template: Template,
    history: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(template: Template) -> Self {
        Self::with_history(template, Vec::new())
    }

    pub fn with_history(template: Template, history: Vec<ChatMessage>) -> Self {
        Conversation { template, history }
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Forget every message.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Render the prompt for `input` without running the model.
    pub fn prompt(&self, input: &str) -> String {
        self.template.preprocess(input, &self.history, false)
    }

    /// Answer `input` and record both turns.
    ///
    /// The returned text is cut at the template's stop sequence, and
    /// `observer` sees nothing from the stop sequence on. On error the history
    /// is left untouched.
    pub fn respond<B: Backend>(
        &mut self,
        session: &Session<B>,
        input: &str,
        observer: Option<&mut dyn TokenObserver>,
    ) -> Result<Generation> {
        let prompt = self.prompt(input);
        let tokens = session.tokenize(&prompt)?;
        let mut filter = StopFilter::new(self.template.stop_sequence.as_deref(), observer);
        let mut generation = session.generate(&tokens, Some(&mut filter))?;
        filter.finish();

        let reply = self.template.truncate_at_stop(&generation.text).to_string();
        tracing::debug!(
            turn = self.history.len() / 2 + 1,
            prompt_tokens = tokens.len(),
            reply_chars = reply.len(),
            "conversation turn complete"
        );

        self.history.push(ChatMessage::user(input));
        self.history.push(ChatMessage::assistant(reply.clone()));
        generation.text = reply;
        Ok(generation)
    }
}
