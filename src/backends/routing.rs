//! Candidate ordering: primary backend, fallbacks, and per-operation
//! preferred-backend promotion.
//!
//! ```toml
//! [routing]
//! primary = "openai"
//! fallbacks = ["anthropic", "local"]
//!
//! [routing.preferred]
//! embed = "local"
//! ```
//!
//! With the configuration above, `embed` calls try `local` first, then
//! `openai`, then `anthropic`; every other operation tries `openai`,
//! `anthropic`, `local` in that order.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::Operation;

/// Which backends are tried, in which order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Tried first. When unset, every registered backend is a candidate in
    /// registration order.
    pub primary: Option<String>,
    /// Tried after the primary, in order.
    pub fallbacks: Vec<String>,
    /// Operation name (`"chat"`, `"embed"`, ...) to backend id moved to the
    /// front of the chain for that operation.
    pub preferred: BTreeMap<String, String>,
}

impl RoutingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn primary(mut self, id: impl Into<String>) -> Self {
        self.primary = Some(id.into());
        self
    }

    /// Append a fallback backend.
    pub fn fallback(mut self, id: impl Into<String>) -> Self {
        self.fallbacks.push(id.into());
        self
    }

    /// Prefer `id` for `operation`.
    pub fn prefer(mut self, operation: Operation, id: impl Into<String>) -> Self {
        self.preferred.insert(operation.as_str().to_owned(), id.into());
        self
    }

    pub fn preferred_for(&self, operation: Operation) -> Option<&str> {
        self.preferred.get(operation.as_str()).map(String::as_str)
    }

    /// Every id the configuration names, primary first.
    pub fn named_ids(&self) -> impl Iterator<Item = &str> {
        self.primary
            .iter()
            .chain(self.fallbacks.iter())
            .chain(self.preferred.values())
            .map(String::as_str)
    }

    /// Candidate ids for `operation`.
    ///
    /// `registered` supplies the default order when no primary is set.
    pub fn candidates(&self, operation: Operation, registered: &[String]) -> Vec<String> {
        let mut chain: Vec<String> = match &self.primary {
            Some(primary) => std::iter::once(primary)
                .chain(self.fallbacks.iter())
                .cloned()
                .collect(),
            None => registered.to_vec(),
        };
        if let Some(preferred) = self.preferred_for(operation) {
            promote_preferred(&mut chain, preferred);
        }
        chain
    }
}

/// Reorder ids so `preferred` is at index 0.
///
/// If no id matches `preferred`, the slice is left unchanged.
pub(crate) fn promote_preferred<T: AsRef<str>>(ids: &mut [T], preferred: &str) {
    if let Some(idx) = ids.iter().position(|id| id.as_ref() == preferred)
        && idx > 0
    {
        ids[..=idx].rotate_right(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promote_moves_to_front() {
        let mut ids = ["a", "b", "c"];
        promote_preferred(&mut ids, "c");
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn promote_preserves_order_of_others() {
        let mut ids = ["a", "b", "c", "d"];
        promote_preferred(&mut ids, "c");
        assert_eq!(ids, ["c", "a", "b", "d"]);
    }

    #[test]
    fn promote_noop_if_not_found() {
        let mut ids = ["a", "b"];
        promote_preferred(&mut ids, "nonexistent");
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn candidates_follow_primary_then_fallbacks() {
        let routing = RoutingConfig::new().primary("a").fallback("b").fallback("c");
        let registered = vec!["c".to_owned(), "b".to_owned(), "a".to_owned()];
        assert_eq!(routing.candidates(Operation::Chat, &registered), ["a", "b", "c"]);
    }

    #[test]
    fn candidates_default_to_registration_order() {
        let registered = vec!["x".to_owned(), "y".to_owned()];
        assert_eq!(
            RoutingConfig::new().candidates(Operation::Generate, &registered),
            ["x", "y"]
        );
    }

    #[test]
    fn preferred_backend_applies_per_operation() {
        let routing = RoutingConfig::new()
            .primary("a")
            .fallback("b")
            .fallback("c")
            .prefer(Operation::Embed, "c");

        assert_eq!(routing.candidates(Operation::Embed, &[]), ["c", "a", "b"]);
        assert_eq!(routing.candidates(Operation::Chat, &[]), ["a", "b", "c"]);
    }

    #[test]
    fn deserializes_from_toml() {
        let routing: RoutingConfig = toml::from_str(
            r#"
            primary = "openai"
            fallbacks = ["local"]

            [preferred]
            embed = "local"
            "#,
        )
        .unwrap();
        assert_eq!(routing.primary.as_deref(), Some("openai"));
        assert_eq!(routing.preferred_for(Operation::Embed), Some("local"));
    }
}
