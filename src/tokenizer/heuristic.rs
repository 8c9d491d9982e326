//! Character-length heuristic.

use super::TokenizerProvider;
use crate::Result;

/// Estimates one token per four characters, rounding up.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenizer;

impl HeuristicTokenizer {
    pub fn estimate(text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

impl TokenizerProvider for HeuristicTokenizer {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(Self::estimate(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up() {
        assert_eq!(HeuristicTokenizer::estimate(""), 0);
        assert_eq!(HeuristicTokenizer::estimate("a"), 1);
        assert_eq!(HeuristicTokenizer::estimate("abcd"), 1);
        assert_eq!(HeuristicTokenizer::estimate("abcde"), 2);
    }

    #[test]
    fn counts_chars_not_bytes() {
        assert_eq!(HeuristicTokenizer::estimate("ééééé"), 2);
    }
}
