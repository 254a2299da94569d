//! Prompt construction and tactic extraction per backend family.
//!
//! Chat-style models are asked for a tactic and answer in a fenced Lean code
//! block; raw continuation models complete the proof state directly.

use std::fmt;
use std::str::FromStr;

use crate::errors::AdapterError;

const CHATML_ASSISTANT: &str = "<|im_start|>assistant";
pub const CHATML_END: &str = "<|im_end|>";
const LEAN_FENCE: &str = "```lean";
const FENCE: &str = "```";

/// How a backend family wants its prompt and how its answer is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptFamily {
    /// Local chat models using the ChatML turn format.
    LocalChat,
    /// Hosted chat-completion APIs.
    HostedChat,
    /// Plain continuation models (seq2seq tactic generators, base decoders).
    Raw,
}

impl PromptFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            PromptFamily::LocalChat => "local-chat",
            PromptFamily::HostedChat => "hosted-chat",
            PromptFamily::Raw => "raw",
        }
    }
}

impl fmt::Display for PromptFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptFamily {
    type Err = AdapterError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "local-chat" => Ok(PromptFamily::LocalChat),
            "hosted-chat" => Ok(PromptFamily::HostedChat),
            "raw" => Ok(PromptFamily::Raw),
            other => Err(AdapterError::UnsupportedBackend(other.to_string())),
        }
    }
}

/// Table-driven prompt formatter bound to one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptFormatter {
    family: PromptFamily,
}

impl PromptFormatter {
    /// Build a formatter from a family tag. Unknown tags are rejected here,
    /// so a misconfigured model fails at startup rather than per request.
    pub fn new(tag: &str) -> Result<Self, AdapterError> {
        Ok(Self::for_family(tag.parse()?))
    }

    pub fn for_family(family: PromptFamily) -> Self {
        Self { family }
    }

    pub fn family(&self) -> PromptFamily {
        self.family
    }

    /// Apply the family template to a proof state. The state is inserted
    /// verbatim.
    pub fn format_prompt(&self, state: &str) -> String {
        match self.family {
            PromptFamily::LocalChat => format!(
                "<|im_start|>user\n\
                 My LEAN 4 state is:\n\
                 ```lean\n\
                 {state}```\n\
                 Please predict a possible tactic to help me prove the theorem.\
                 <|im_end|>\n\
                 <|im_start|>assistant\n"
            ),
            PromptFamily::HostedChat => format!(
                "Here is a theorem you need to prove in Lean:\n\
                 {state}\n\
                 Now you should suggest one line tactic in lean code:"
            ),
            PromptFamily::Raw => state.to_string(),
        }
    }

    /// Recover a single tactic from raw backend output.
    pub fn extract_output(&self, raw: &str) -> Result<String, AdapterError> {
        match self.family {
            PromptFamily::LocalChat => {
                let answer = match raw.rfind(CHATML_ASSISTANT) {
                    Some(i) => &raw[i + CHATML_ASSISTANT.len()..],
                    None => raw,
                };
                let answer = answer.split(CHATML_END).next().unwrap_or_default();
                first_line_of_lean_block(answer)
            }
            PromptFamily::HostedChat => first_line_of_lean_block(raw),
            PromptFamily::Raw => whole_continuation(raw),
        }
    }

    /// Recover the tactic of a completion generated from a target `prefix`.
    ///
    /// Raw models continue the prefix itself, so the prefix is the start of
    /// the tactic and the continuation is kept exactly as decoded. A
    /// continuation that begins with a line break ends the tactic's first
    /// line at the prefix. Chat families answer with a complete tactic.
    pub fn extract_tactic(&self, prefix: &str, raw: &str) -> Result<String, AdapterError> {
        match self.family {
            PromptFamily::Raw => whole_continuation(&format!("{prefix}{raw}")),
            _ => self.extract_output(raw),
        }
    }
}

/// The full decoded sequence, surrounding whitespace trimmed.
fn whole_continuation(text: &str) -> Result<String, AdapterError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AdapterError::Extraction("empty continuation".into()));
    }
    Ok(text.to_string())
}

/// First line inside the last ```` ```lean ```` block (```` ```lean4 ```` included).
fn first_line_of_lean_block(text: &str) -> Result<String, AdapterError> {
    let open = text
        .rfind(LEAN_FENCE)
        .ok_or_else(|| AdapterError::Extraction("no lean code block".into()))?;

    // Skip the rest of the fence line ("lean", "lean4", ...).
    let body = match text[open..].split_once('\n') {
        Some((_, body)) => body,
        None => return Err(AdapterError::Extraction("lean code block has no body".into())),
    };
    let body = body.split(FENCE).next().unwrap_or_default();

    let first = body.lines().next().unwrap_or_default().trim();
    if first.is_empty() {
        return Err(AdapterError::Extraction(
            "lean code block starts with an empty line".into(),
        ));
    }
    Ok(first.to_string())
}
