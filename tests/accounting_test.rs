//! Tests for token counting, pricing, truncation and chunking through the
//! public accounting API.

use std::sync::Arc;

use bifrost::accounting::{Direction, PriceTable, TRUNCATION_MARKER, TokenAccountant};
use bifrost::tokenizer::{TokenizerRegistry, TokenizerSource};

const LOCAL: &str = "local-model";

#[test]
fn unknown_models_use_the_character_heuristic() {
    let accountant = TokenAccountant::new();
    assert_eq!(accountant.count_tokens("", LOCAL), 0);
    assert_eq!(accountant.count_tokens("abc", LOCAL), 1);
    assert_eq!(accountant.count_tokens("abcde", LOCAL), 2);
}

#[cfg(feature = "tiktoken")]
#[test]
fn known_models_use_their_encoding() {
    let accountant = TokenAccountant::new();
    let text = "The quick brown fox jumps over the lazy dog.";
    let exact = accountant.count_tokens(text, "gpt-4o-mini");
    assert!(exact > 0);
    assert_ne!(exact, accountant.count_tokens(text, LOCAL));
}

#[test]
fn custom_mappings_override_defaults() {
    let tokenizers = TokenizerRegistry::empty();
    tokenizers.register(
        "house-",
        TokenizerSource::Alias {
            target: "other".into(),
        },
    );
    let accountant = TokenAccountant::new().with_tokenizers(Arc::new(tokenizers));
    // Alias to an unmapped model resolves to the heuristic.
    assert_eq!(accountant.count_tokens("abcdefgh", "house-7b"), 2);
}

#[test]
fn cost_uses_longest_price_prefix() {
    let accountant = TokenAccountant::new().with_prices(
        PriceTable::new()
            .with("gpt-4o", 2.5, 10.0)
            .with("gpt-4o-mini", 0.15, 0.6),
    );

    let mini = accountant.estimate_cost(1_000_000, "gpt-4o-mini-2024-07-18", Direction::Input);
    assert!((mini - 0.15).abs() < 1e-12);
    let full = accountant.estimate_cost(1_000_000, "gpt-4o-2024-08-06", Direction::Output);
    assert!((full - 10.0).abs() < 1e-12);
    assert_eq!(accountant.estimate_cost(1_000_000, LOCAL, Direction::Input), 0.0);
}

#[test]
fn truncation_never_exceeds_the_limit() {
    let accountant = TokenAccountant::new();
    let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(20);

    for limit in [1, 2, 5, 17, 60] {
        let head = accountant.truncate_to_limit(&text, LOCAL, limit, false);
        assert!(accountant.count_tokens(&head, LOCAL) <= limit, "{limit}: {head}");
        let tail = accountant.truncate_to_limit(&text, LOCAL, limit, true);
        assert!(accountant.count_tokens(&tail, LOCAL) <= limit, "{limit}: {tail}");
    }

    let head = accountant.truncate_to_limit(&text, LOCAL, 20, false);
    assert!(head.starts_with("Lorem ipsum"));
    assert!(head.ends_with(TRUNCATION_MARKER));
}

#[test]
fn chunks_cover_the_text_within_budget() {
    let accountant = TokenAccountant::new();
    let text = "First sentence here. Second one follows. Dr. Smith wrote a third. \
                A fourth closes it out. And a fifth, for good measure.";

    let chunks = accountant.split_into_chunks(text, LOCAL, 12, 0);
    assert!(chunks.len() > 1);
    for chunk in &chunks {
        assert!(accountant.count_tokens(chunk, LOCAL) <= 12, "{chunk}");
    }
    // The abbreviation stays attached to its sentence.
    assert!(chunks.iter().any(|c| c.contains("Dr. Smith")));
    let rejoined = chunks.join(" ");
    assert!(rejoined.starts_with("First sentence here."));
    assert!(rejoined.ends_with("for good measure."));
}

#[test]
fn chunk_overlap_repeats_the_previous_tail() {
    let accountant = TokenAccountant::new();
    let text = "aaaa bbbb. cccc dddd. eeee ffff. gggg hhhh.";

    let chunks = accountant.split_into_chunks(text, LOCAL, 6, 2);
    assert!(chunks.len() >= 2);
    for pair in chunks.windows(2) {
        let tail = pair[0].split_whitespace().last().unwrap();
        assert!(pair[1].contains(tail), "{pair:?}");
    }
}
