//! HuggingFace tokenizers implementation.

use std::path::Path;

use super::TokenizerProvider;
use crate::{BifrostError, Result};

/// HuggingFace tokenizers implementation.
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
}

impl HfTokenizer {
    /// Load a `tokenizer.json` from disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            BifrostError::Configuration(format!(
                "failed to load tokenizer from {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self { inner })
    }

    /// Load a tokenizer from the bytes of a `tokenizer.json`.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_bytes(bytes)
            .map_err(|e| BifrostError::Configuration(format!("invalid tokenizer json: {e}")))?;
        Ok(Self { inner })
    }

    fn encode(&self, text: &str) -> Result<tokenizers::Encoding> {
        self.inner
            .encode(text, false)
            .map_err(|e| BifrostError::Configuration(format!("tokenization failed: {e}")))
    }
}

impl TokenizerProvider for HfTokenizer {
    fn name(&self) -> &str {
        "huggingface"
    }

    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(self.encode(text)?.len())
    }

    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        Ok(self.encode(text)?.get_ids().to_vec())
    }
}
