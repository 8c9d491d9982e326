//! Per-model prices.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{BifrostError, Result};

/// Which side of a call tokens were spent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

/// USD per million tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl ModelPrice {
    pub fn new(input_per_mtok: f64, output_per_mtok: f64) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
        }
    }

    pub fn per_mtok(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Input => self.input_per_mtok,
            Direction::Output => self.output_per_mtok,
        }
    }
}

/// Model name (or prefix) to price.
///
/// Lookup tries an exact match, then the longest registered prefix, so
/// `"gpt-4o"` prices `"gpt-4o-2024-08-06"`. Unknown models cost nothing.
///
/// ```toml
/// [pricing."gpt-4o"]
/// input_per_mtok = 2.5
/// output_per_mtok = 10.0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceTable {
    prices: BTreeMap<String, ModelPrice>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the price for a model prefix.
    pub fn with(mut self, model: impl Into<String>, input_per_mtok: f64, output_per_mtok: f64) -> Self {
        self.insert(model, ModelPrice::new(input_per_mtok, output_per_mtok));
        self
    }

    pub fn insert(&mut self, model: impl Into<String>, price: ModelPrice) {
        self.prices.insert(model.into(), price);
    }

    pub fn price_for(&self, model: &str) -> Option<&ModelPrice> {
        self.prices.get(model).or_else(|| {
            self.prices
                .iter()
                .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
                .max_by_key(|(prefix, _)| prefix.len())
                .map(|(_, price)| price)
        })
    }

    /// Cost in USD of `tokens` tokens; 0.0 for unknown models.
    pub fn cost(&self, tokens: u64, model: &str, direction: Direction) -> f64 {
        self.price_for(model)
            .map_or(0.0, |price| tokens as f64 * price.per_mtok(direction) / 1_000_000.0)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Reject negative or non-finite prices.
    pub fn validate(&self) -> Result<()> {
        for (model, price) in &self.prices {
            for value in [price.input_per_mtok, price.output_per_mtok] {
                if !value.is_finite() || value < 0.0 {
                    return Err(BifrostError::Configuration(format!(
                        "invalid price for {model}: {value}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_is_free() {
        let table = PriceTable::new().with("gpt-4o", 2.5, 10.0);
        assert_eq!(table.cost(1_000, "mystery", Direction::Input), 0.0);
    }

    #[test]
    fn prices_by_direction() {
        let table = PriceTable::new().with("gpt-4o", 2.5, 10.0);
        assert!((table.cost(1_000_000, "gpt-4o", Direction::Input) - 2.5).abs() < 1e-9);
        assert!((table.cost(500_000, "gpt-4o", Direction::Output) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn longest_prefix_wins() {
        let table = PriceTable::new()
            .with("gpt-4", 30.0, 60.0)
            .with("gpt-4o", 2.5, 10.0);
        assert_eq!(table.price_for("gpt-4o-mini").unwrap().input_per_mtok, 2.5);
        assert_eq!(table.price_for("gpt-4-turbo").unwrap().input_per_mtok, 30.0);
    }

    #[test]
    fn negative_prices_are_rejected() {
        let table = PriceTable::new().with("bad", -1.0, 1.0);
        assert!(table.validate().is_err());
    }
}
