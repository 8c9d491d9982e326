//! Token counting, cost estimation, truncation and chunking.

use std::sync::Arc;

use serde_json::Value;

use super::chunk;
use super::pricing::{Direction, PriceTable};
use crate::tokenizer::TokenizerRegistry;
use crate::types::Usage;

/// Appended (or prepended) to truncated text.
pub const TRUNCATION_MARKER: &str = "...";

/// Counts tokens and prices them.
///
/// ```rust
/// # use bifrost::accounting::{Direction, PriceTable, TokenAccountant};
/// let accountant = TokenAccountant::new()
///     .with_prices(PriceTable::new().with("gpt-4o", 2.5, 10.0));
///
/// let cost = accountant.estimate_cost(2_000_000, "gpt-4o-mini", Direction::Output);
/// assert!((cost - 20.0).abs() < 1e-9);
/// assert_eq!(accountant.estimate_cost(1_000, "unpriced", Direction::Input), 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct TokenAccountant {
    tokenizers: Arc<TokenizerRegistry>,
    prices: PriceTable,
}

impl Default for TokenAccountant {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenAccountant {
    pub fn new() -> Self {
        Self {
            tokenizers: Arc::new(TokenizerRegistry::new()),
            prices: PriceTable::new(),
        }
    }

    pub fn with_prices(mut self, prices: PriceTable) -> Self {
        self.prices = prices;
        self
    }

    pub fn with_tokenizers(mut self, tokenizers: Arc<TokenizerRegistry>) -> Self {
        self.tokenizers = tokenizers;
        self
    }

    pub fn tokenizers(&self) -> &TokenizerRegistry {
        &self.tokenizers
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    /// Never fails; see [`TokenizerRegistry::count_tokens`].
    pub fn count_tokens(&self, text: &str, model: &str) -> usize {
        self.tokenizers.count_tokens(text, model)
    }

    /// USD cost of `tokens`; 0.0 for models without a price.
    pub fn estimate_cost(&self, tokens: u64, model: &str, direction: Direction) -> f64 {
        self.prices.cost(tokens, model, direction)
    }

    /// Combined input and output cost of `usage`.
    pub fn usage_cost(&self, usage: &Usage, model: &str) -> f64 {
        self.estimate_cost(usage.input_tokens, model, Direction::Input)
            + self.estimate_cost(usage.output_tokens, model, Direction::Output)
    }

    /// Shorten `text` to at most `max_tokens` tokens.
    ///
    /// Keeps the longest prefix (or suffix when `preserve_end`) whose token
    /// count, marker included, fits. Text that already fits is returned
    /// unchanged; `max_tokens == 0` yields an empty string.
    pub fn truncate_to_limit(
        &self,
        text: &str,
        model: &str,
        max_tokens: usize,
        preserve_end: bool,
    ) -> String {
        if max_tokens == 0 {
            return String::new();
        }
        if self.count_tokens(text, model) <= max_tokens {
            return text.to_owned();
        }

        // Char boundaries, including the end of the string.
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(idx, _)| idx)
            .chain(std::iter::once(text.len()))
            .collect();
        let render = |kept: usize| -> String {
            if preserve_end {
                let start = boundaries[boundaries.len() - 1 - kept];
                format!("{TRUNCATION_MARKER}{}", text[start..].trim_start())
            } else {
                format!("{}{TRUNCATION_MARKER}", text[..boundaries[kept]].trim_end())
            }
        };

        // Largest number of kept chars whose rendering fits.
        let (mut lo, mut hi) = (0usize, boundaries.len() - 1);
        while lo < hi {
            let mid = lo + (hi - lo).div_ceil(2);
            if self.count_tokens(&render(mid), model) <= max_tokens {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        let truncated = render(lo);
        if self.count_tokens(&truncated, model) <= max_tokens {
            truncated
        } else {
            String::new()
        }
    }

    /// Split `text` into sentence-aligned chunks of at most `chunk_size`
    /// tokens, each starting with up to `overlap` tokens of the previous one.
    pub fn split_into_chunks(
        &self,
        text: &str,
        model: &str,
        chunk_size: usize,
        overlap: usize,
    ) -> Vec<String> {
        chunk::split_into_chunks(text, chunk_size, overlap, |piece| {
            self.count_tokens(piece, model)
        })
    }

    /// Estimate usage for a call whose backend did not report any.
    pub fn estimate_usage(&self, args: &[Value], output: &Value, model: &str) -> Usage {
        let input: u64 = args
            .iter()
            .map(|arg| self.count_tokens(&value_text(arg), model) as u64)
            .sum();
        let output = self.count_tokens(&value_text(output), model) as u64;
        Usage::new(input, output)
    }
}

/// Text content of a JSON value for counting purposes.
fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const UNKNOWN: &str = "unknown-model";

    fn accountant() -> TokenAccountant {
        TokenAccountant::new()
    }

    #[test]
    fn truncation_fits_and_ends_with_marker() {
        let acc = accountant();
        let out = acc.truncate_to_limit("A B C D E.", UNKNOWN, 2, false);
        assert!(acc.count_tokens(&out, UNKNOWN) <= 2, "{out}");
        assert!(out.ends_with(TRUNCATION_MARKER), "{out}");
        assert!(out.starts_with("A B"), "{out}");
    }

    #[test]
    fn truncation_can_keep_the_end() {
        let acc = accountant();
        let out = acc.truncate_to_limit("first part, last part", UNKNOWN, 3, true);
        assert!(out.starts_with(TRUNCATION_MARKER), "{out}");
        assert!(out.ends_with("part"), "{out}");
        assert!(acc.count_tokens(&out, UNKNOWN) <= 3);
    }

    #[test]
    fn fitting_text_is_unchanged() {
        let acc = accountant();
        assert_eq!(acc.truncate_to_limit("short", UNKNOWN, 10, false), "short");
    }

    #[test]
    fn zero_limit_is_empty() {
        assert_eq!(accountant().truncate_to_limit("anything", UNKNOWN, 0, false), "");
    }

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        let acc = accountant();
        let text = "héllo wörld ünïcode ëverywhere";
        let out = acc.truncate_to_limit(text, UNKNOWN, 3, false);
        assert!(acc.count_tokens(&out, UNKNOWN) <= 3);
    }

    #[test]
    fn estimates_usage_from_args_and_output() {
        let usage = accountant().estimate_usage(&[json!("abcdefgh")], &json!("abcd"), UNKNOWN);
        assert_eq!(usage, Usage::new(2, 1));
    }

    #[test]
    fn usage_cost_sums_directions() {
        let acc = accountant().with_prices(PriceTable::new().with("m", 1.0, 2.0));
        let cost = acc.usage_cost(&Usage::new(1_000_000, 1_000_000), "m");
        assert!((cost - 3.0).abs() < 1e-9);
    }

    #[test]
    fn chunks_use_model_tokens() {
        let acc = accountant();
        let chunks = acc.split_into_chunks("aaaa bbbb. cccc dddd. eeee.", UNKNOWN, 3, 0);
        for chunk in &chunks {
            assert!(acc.count_tokens(chunk, UNKNOWN) <= 3, "{chunk}");
        }
        assert!(chunks.len() >= 2);
    }
}
