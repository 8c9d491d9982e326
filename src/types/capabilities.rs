//! Operations and backend capability reporting

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::BifrostError;

/// Abstract operation a caller asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Single-turn text generation.
    Generate,
    /// Multi-turn chat.
    Chat,
    /// Text embeddings.
    Embed,
    /// Speech to text.
    Transcribe,
    /// Zero-shot or moderation-style classification.
    Classify,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Generate => "generate",
            Operation::Chat => "chat",
            Operation::Embed => "embed",
            Operation::Transcribe => "transcribe",
            Operation::Classify => "classify",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = BifrostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate" => Ok(Operation::Generate),
            "chat" => Ok(Operation::Chat),
            "embed" => Ok(Operation::Embed),
            "transcribe" => Ok(Operation::Transcribe),
            "classify" => Ok(Operation::Classify),
            other => Err(BifrostError::Configuration(format!(
                "unknown operation: {other}"
            ))),
        }
    }
}

/// What a backend can do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Single-turn text generation.
    pub generate: bool,
    /// Streaming text generation.
    pub generate_streaming: bool,
    /// Multi-turn chat conversations.
    pub chat: bool,
    /// Streaming chat responses.
    pub chat_streaming: bool,
    /// Text embeddings.
    pub embeddings: bool,
    /// Speech transcription.
    pub transcription: bool,
    /// Classification.
    pub classification: bool,
}

impl Capabilities {
    /// Text generation and chat, streaming included.
    pub fn text() -> Self {
        Self {
            generate: true,
            generate_streaming: true,
            chat: true,
            chat_streaming: true,
            ..Default::default()
        }
    }

    /// Everything.
    pub fn full() -> Self {
        Self {
            generate: true,
            generate_streaming: true,
            chat: true,
            chat_streaming: true,
            embeddings: true,
            transcription: true,
            classification: true,
        }
    }

    /// Embeddings only.
    pub fn embeddings_only() -> Self {
        Self {
            embeddings: true,
            ..Default::default()
        }
    }

    /// Whether a non-streaming call of `operation` is supported.
    pub fn supports(&self, operation: Operation) -> bool {
        match operation {
            Operation::Generate => self.generate,
            Operation::Chat => self.chat,
            Operation::Embed => self.embeddings,
            Operation::Transcribe => self.transcription,
            Operation::Classify => self.classification,
        }
    }

    /// Whether a streaming call of `operation` is supported.
    pub fn supports_streaming(&self, operation: Operation) -> bool {
        match operation {
            Operation::Generate => self.generate_streaming,
            Operation::Chat => self.chat_streaming,
            _ => false,
        }
    }

    /// Merge capabilities using OR logic (combines two capability sets).
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            generate: self.generate || other.generate,
            generate_streaming: self.generate_streaming || other.generate_streaming,
            chat: self.chat || other.chat,
            chat_streaming: self.chat_streaming || other.chat_streaming,
            embeddings: self.embeddings || other.embeddings,
            transcription: self.transcription || other.transcription,
            classification: self.classification || other.classification,
        }
    }
}
