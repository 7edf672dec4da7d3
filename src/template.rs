//! Prompt templates.
//!
//! A [`Template`] wraps each turn of a conversation in the markers a model
//! family was trained on and leaves the prompt open at the start of the
//! assistant's reply.

use llama_engine::{LlamaError, Result};

use crate::chat::{ChatMessage, Role};

/// Text placed around one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachment {
    pub prefix: String,
    pub suffix: String,
}

impl Attachment {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    fn wrap(&self, out: &mut String, content: &str) {
        out.push_str(&self.prefix);
        out.push_str(content);
        out.push_str(&self.suffix);
    }
}

/// Conversation format for one model family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    /// Emitted once at the start of every prompt.
    pub prefix: String,
    pub system: Attachment,
    pub user: Attachment,
    pub bot: Attachment,
    /// Text the model emits to end its turn.
    pub stop_sequence: Option<String>,
    pub system_prompt: Option<String>,
    /// Drop the final character of the bot prefix when opening a reply.
    pub drop_last: bool,
}

/// Names accepted by [`Template::by_name`].
pub const PRESETS: &[&str] = &["olmoe", "chatml", "alpaca", "llama", "mistral", "raw"];

impl Template {
    pub fn olmoe(system_prompt: Option<&str>) -> Self {
        Template {
            prefix: "<|endoftext|>".into(),
            system: Attachment::new("<|system|>\n", "\n"),
            user: Attachment::new("<|user|>\n", "\n"),
            bot: Attachment::new("<|assistant|>\n", "\n"),
            stop_sequence: Some("<|endoftext|>".into()),
            system_prompt: system_prompt.map(str::to_string),
            drop_last: false,
        }
    }

    pub fn chatml(system_prompt: Option<&str>) -> Self {
        Template {
            prefix: String::new(),
            system: Attachment::new("<|im_start|>system\n", "<|im_end|>\n"),
            user: Attachment::new("<|im_start|>user\n", "<|im_end|>\n"),
            bot: Attachment::new("<|im_start|>assistant\n", "<|im_end|>\n"),
            stop_sequence: Some("<|im_end|>".into()),
            system_prompt: system_prompt.map(str::to_string),
            drop_last: false,
        }
    }

    pub fn alpaca(system_prompt: Option<&str>) -> Self {
        Template {
            prefix: String::new(),
            system: Attachment::new("", "\n\n"),
            user: Attachment::new("### Instruction:\n", "\n\n"),
            bot: Attachment::new("### Response:\n", "\n\n"),
            stop_sequence: Some("###".into()),
            system_prompt: system_prompt.map(str::to_string),
            drop_last: false,
        }
    }

    pub fn llama(system_prompt: Option<&str>) -> Self {
        Template {
            prefix: "[INST] ".into(),
            system: Attachment::new("<<SYS>>\n", "\n<</SYS>>\n\n"),
            user: Attachment::new("", " [/INST]"),
            bot: Attachment::new(" ", "</s><s>[INST] "),
            stop_sequence: Some("</s>".into()),
            system_prompt: system_prompt.map(str::to_string),
            drop_last: true,
        }
    }

    /// Mistral instruct format. Has no system slot.
    pub fn mistral() -> Self {
        Template {
            prefix: String::new(),
            system: Attachment::default(),
            user: Attachment::new("[INST] ", " [/INST]"),
            bot: Attachment::new("", "</s> "),
            stop_sequence: Some("</s>".into()),
            system_prompt: None,
            drop_last: false,
        }
    }

    /// No markers at all; the prompt is the plain concatenated text.
    pub fn raw() -> Self {
        Template::default()
    }

    /// Look up a preset by name (see [`PRESETS`]).
    pub fn by_name(name: &str, system_prompt: Option<&str>) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "olmoe" => Ok(Self::olmoe(system_prompt)),
            "chatml" => Ok(Self::chatml(system_prompt)),
            "alpaca" => Ok(Self::alpaca(system_prompt)),
            "llama" => Ok(Self::llama(system_prompt)),
            "mistral" => Ok(Self::mistral()),
            "raw" => Ok(Self::raw()),
            other => Err(LlamaError::Config(format!(
                "unknown template '{other}', expected one of {}",
                PRESETS.join(", ")
            ))),
        }
    }

    /// Render `history` plus the new `input` into a prompt.
    ///
    /// With `saved_state` the model is assumed to still hold the earlier
    /// turns, so only the new input is rendered.
    pub fn preprocess(&self, input: &str, history: &[ChatMessage], saved_state: bool) -> String {
        let mut out = self.prefix.clone();

        if saved_state {
            self.user.wrap(&mut out, input);
            out.push_str(&self.bot.prefix);
            return out;
        }

        if let Some(system_prompt) = &self.system_prompt {
            self.system.wrap(&mut out, system_prompt);
        }

        for message in history {
            let attachment = match message.role {
                Role::System => &self.system,
                Role::User => &self.user,
                Role::Assistant => &self.bot,
            };
            attachment.wrap(&mut out, &message.content);
        }

        self.user.wrap(&mut out, input);

        let mut opening = self.bot.prefix.as_str();
        if self.drop_last {
            if let Some((i, _)) = opening.char_indices().last() {
                opening = &opening[..i];
            }
        }
        out.push_str(opening);
        out
    }

    /// `text` up to the first stop sequence, if any.
    pub fn truncate_at_stop<'t>(&self, text: &'t str) -> &'t str {
        match &self.stop_sequence {
            Some(stop) if !stop.is_empty() => match text.find(stop.as_str()) {
                Some(i) => &text[..i],
                None => text,
            },
            _ => text,
        }
    }
}
