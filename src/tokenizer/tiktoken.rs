//! `tiktoken` BPE encodings.

use tiktoken_rs::CoreBPE;

use super::{TiktokenEncoding, TokenizerProvider};
use crate::{BifrostError, Result};

pub struct TiktokenTokenizer {
    encoding: TiktokenEncoding,
    bpe: CoreBPE,
}

impl TiktokenTokenizer {
    /// Build the BPE tables for `encoding`. Takes tens of milliseconds;
    /// the registry caches the result.
    pub fn new(encoding: TiktokenEncoding) -> Result<Self> {
        let bpe = match encoding {
            TiktokenEncoding::Cl100kBase => tiktoken_rs::cl100k_base(),
            TiktokenEncoding::O200kBase => tiktoken_rs::o200k_base(),
        }
        .map_err(|e| {
            BifrostError::Configuration(format!("failed to load {}: {e}", encoding.as_str()))
        })?;
        Ok(Self { encoding, bpe })
    }
}

impl TokenizerProvider for TiktokenTokenizer {
    fn name(&self) -> &str {
        self.encoding.as_str()
    }

    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(self.bpe.encode_with_special_tokens(text).len())
    }

    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        Ok(self
            .bpe
            .encode_with_special_tokens(text)
            .into_iter()
            .map(|rank| rank as u32)
            .collect())
    }
}
