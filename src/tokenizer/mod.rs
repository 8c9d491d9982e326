//! Token counting with per-model-family tokenizers.
//!
//! The [`TokenizerRegistry`] maps model names to a [`TokenizerSource`] by
//! longest prefix (`"gpt-4o-mini"` matches `"gpt-4o"` before `"gpt-4"`),
//! loads the tokenizer lazily and caches it per model. Counting never
//! fails: unknown models and tokenizer errors fall back to
//! [`HeuristicTokenizer`] (`ceil(chars / 4)`).

mod heuristic;
#[cfg(feature = "hf-tokenizers")]
mod hf;
#[cfg(feature = "tiktoken")]
mod tiktoken;

pub use heuristic::HeuristicTokenizer;
#[cfg(feature = "hf-tokenizers")]
pub use hf::HfTokenizer;
#[cfg(feature = "tiktoken")]
pub use tiktoken::TiktokenTokenizer;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use moka::sync::Cache;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use crate::{BifrostError, Result};

/// Resolved tokenizers kept per model name.
const MODEL_CACHE_CAPACITY: u64 = 512;

/// Alias chains longer than this are treated as unresolvable.
const MAX_ALIAS_DEPTH: usize = 8;

/// Trait for tokenizer implementations.
pub trait TokenizerProvider: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Count tokens in the given text.
    fn count_tokens(&self, text: &str) -> Result<usize>;

    /// Tokenize text into token IDs.
    fn tokenize(&self, _text: &str) -> Result<Vec<u32>> {
        Err(BifrostError::Configuration(format!(
            "{} does not expose token ids",
            self.name()
        )))
    }
}

/// BPE encodings shipped with `tiktoken`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiktokenEncoding {
    Cl100kBase,
    O200kBase,
}

impl TiktokenEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            TiktokenEncoding::Cl100kBase => "cl100k_base",
            TiktokenEncoding::O200kBase => "o200k_base",
        }
    }
}

/// Where a model's tokenizer comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenizerSource {
    /// `ceil(chars / 4)`.
    Heuristic,
    /// A `tiktoken` encoding (needs the `tiktoken` feature).
    Tiktoken { encoding: TiktokenEncoding },
    /// A HuggingFace `tokenizer.json` on disk (needs the `hf-tokenizers` feature).
    HuggingFace { path: PathBuf },
    /// Alias to another model's tokenizer.
    Alias { target: String },
}

impl TokenizerSource {
    fn cache_key(&self) -> String {
        match self {
            TokenizerSource::Heuristic => "heuristic".to_owned(),
            TokenizerSource::Tiktoken { encoding } => format!("tiktoken:{}", encoding.as_str()),
            TokenizerSource::HuggingFace { path } => format!("hf:{}", path.display()),
            TokenizerSource::Alias { target } => format!("alias:{target}"),
        }
    }
}

/// Registry mapping model names to tokenizers.
///
/// ```rust
/// # use bifrost::tokenizer::TokenizerRegistry;
/// let registry = TokenizerRegistry::new();
/// // Unknown model: ceil(11 / 4)
/// assert_eq!(registry.count_tokens("hello world", "my-local-model"), 3);
/// ```
pub struct TokenizerRegistry {
    mappings: RwLock<HashMap<String, TokenizerSource>>,
    by_model: Cache<String, Arc<dyn TokenizerProvider>>,
    by_source: Cache<String, Arc<dyn TokenizerProvider>>,
    heuristic: Arc<dyn TokenizerProvider>,
}

impl TokenizerRegistry {
    /// Create a registry with mappings for common model families.
    pub fn new() -> Self {
        let cl100k = TokenizerSource::Tiktoken {
            encoding: TiktokenEncoding::Cl100kBase,
        };
        let o200k = TokenizerSource::Tiktoken {
            encoding: TiktokenEncoding::O200kBase,
        };
        let mut mappings = HashMap::new();
        for prefix in ["gpt-4o", "gpt-4.1", "gpt-5", "o1", "o3", "o4", "chatgpt-4o"] {
            mappings.insert(prefix.to_owned(), o200k.clone());
        }
        for prefix in ["gpt-4", "gpt-3.5", "text-embedding-3", "text-embedding-ada"] {
            mappings.insert(prefix.to_owned(), cl100k.clone());
        }
        // Anthropic does not publish its tokenizer; cl100k is the closest
        // public approximation.
        mappings.insert("claude".to_owned(), cl100k);

        Self::with_mappings(mappings)
    }

    /// Create a registry without any mappings: everything is heuristic
    /// until [`register`](Self::register) is called.
    pub fn empty() -> Self {
        Self::with_mappings(HashMap::new())
    }

    fn with_mappings(mappings: HashMap<String, TokenizerSource>) -> Self {
        Self {
            mappings: RwLock::new(mappings),
            by_model: Cache::new(MODEL_CACHE_CAPACITY),
            by_source: Cache::new(MODEL_CACHE_CAPACITY),
            heuristic: Arc::new(HeuristicTokenizer),
        }
    }

    /// Register a model-prefix → tokenizer mapping, overriding defaults.
    pub fn register(&self, model_pattern: impl Into<String>, source: TokenizerSource) {
        self.mappings.write().insert(model_pattern.into(), source);
        self.by_model.invalidate_all();
    }

    /// Count tokens for `text` using `model`'s tokenizer.
    ///
    /// Never fails; falls back to the heuristic on any tokenizer error.
    pub fn count_tokens(&self, text: &str, model: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let provider = self.tokenizer_for(model);
        match provider.count_tokens(text) {
            Ok(count) => count,
            Err(e) => {
                debug!(model, tokenizer = provider.name(), error = %e, "tokenizer failed, using heuristic");
                HeuristicTokenizer::estimate(text)
            }
        }
    }

    /// Tokenize `text` with `model`'s tokenizer.
    pub fn tokenize(&self, text: &str, model: &str) -> Result<Vec<u32>> {
        self.tokenizer_for(model).tokenize(text)
    }

    /// The tokenizer used for `model` (the heuristic when none resolves).
    pub fn tokenizer_for(&self, model: &str) -> Arc<dyn TokenizerProvider> {
        self.by_model
            .get_with(model.to_owned(), || self.load_for_model(model))
    }

    /// Resolve model name to tokenizer source.
    ///
    /// Exact match first, then the longest registered prefix. Aliases are
    /// followed.
    pub fn resolve_source(&self, model: &str) -> Option<TokenizerSource> {
        let mappings = self.mappings.read();
        let mut current = model.to_owned();
        for _ in 0..MAX_ALIAS_DEPTH {
            let source = mappings.get(&current).or_else(|| {
                mappings
                    .iter()
                    .filter(|(pattern, _)| current.starts_with(pattern.as_str()))
                    .max_by_key(|(pattern, _)| pattern.len())
                    .map(|(_, source)| source)
            })?;
            match source {
                TokenizerSource::Alias { target } => current = target.clone(),
                other => return Some(other.clone()),
            }
        }
        None
    }

    fn load_for_model(&self, model: &str) -> Arc<dyn TokenizerProvider> {
        let Some(source) = self.resolve_source(model) else {
            return Arc::clone(&self.heuristic);
        };
        let key = source.cache_key();
        if let Some(provider) = self.by_source.get(&key) {
            return provider;
        }
        match load_tokenizer(&source) {
            Ok(provider) => {
                self.by_source.insert(key, Arc::clone(&provider));
                provider
            }
            Err(e) => {
                debug!(model, source = %key, error = %e, "tokenizer unavailable, using heuristic");
                Arc::clone(&self.heuristic)
            }
        }
    }
}

impl Default for TokenizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TokenizerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenizerRegistry")
            .field("mappings", &self.mappings.read().len())
            .field("cached_models", &self.by_model.entry_count())
            .finish()
    }
}

fn load_tokenizer(source: &TokenizerSource) -> Result<Arc<dyn TokenizerProvider>> {
    match source {
        TokenizerSource::Heuristic => Ok(Arc::new(HeuristicTokenizer)),
        #[cfg(feature = "tiktoken")]
        TokenizerSource::Tiktoken { encoding } => {
            Ok(Arc::new(TiktokenTokenizer::new(*encoding)?))
        }
        #[cfg(not(feature = "tiktoken"))]
        TokenizerSource::Tiktoken { encoding } => Err(BifrostError::Configuration(format!(
            "{} requires the `tiktoken` feature",
            encoding.as_str()
        ))),
        #[cfg(feature = "hf-tokenizers")]
        TokenizerSource::HuggingFace { path } => Ok(Arc::new(HfTokenizer::from_file(path)?)),
        #[cfg(not(feature = "hf-tokenizers"))]
        TokenizerSource::HuggingFace { path } => Err(BifrostError::Configuration(format!(
            "loading {} requires the `hf-tokenizers` feature",
            path.display()
        ))),
        TokenizerSource::Alias { target } => Err(BifrostError::Configuration(format!(
            "unresolved tokenizer alias: {target}"
        ))),
    }
}
