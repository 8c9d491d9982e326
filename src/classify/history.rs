//! Bounded history of classified errors.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use super::{ClassifiedError, ErrorCategory};

/// Default number of retained records.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1_000;

#[derive(Debug, Clone)]
struct HistoryEntry {
    error: ClassifiedError,
    resolved: bool,
}

/// How often a particular failure has been seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFrequency {
    pub category: ErrorCategory,
    /// Display text of the raw cause.
    pub cause: String,
    pub count: usize,
}

/// FIFO ring buffer of classified errors with aggregate queries.
///
/// Once `capacity` records are held, each new record evicts the oldest.
pub struct ErrorHistory {
    entries: Mutex<VecDeque<HistoryEntry>>,
    capacity: usize,
}

impl ErrorHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, evicting the oldest when full.
    pub fn record(&self, error: ClassifiedError) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(HistoryEntry {
            error,
            resolved: false,
        });
    }

    /// Mark every unresolved record for `backend`/`operation` as resolved.
    ///
    /// Called after a later call for the same pair succeeded. Returns the
    /// number of records touched.
    pub fn mark_resolved(&self, backend: &str, operation: &str) -> usize {
        let mut entries = self.entries.lock();
        let mut marked = 0;
        for entry in entries.iter_mut().filter(|e| !e.resolved) {
            if entry.error.backend.as_deref() == Some(backend)
                && entry.error.operation.as_deref() == Some(operation)
            {
                entry.resolved = true;
                marked += 1;
            }
        }
        marked
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// The `n` most recent records, newest first.
    pub fn recent(&self, n: usize) -> Vec<ClassifiedError> {
        self.entries
            .lock()
            .iter()
            .rev()
            .take(n)
            .map(|e| e.error.clone())
            .collect()
    }

    pub fn count_by_category(&self) -> HashMap<ErrorCategory, usize> {
        let mut counts = HashMap::new();
        for entry in self.entries.lock().iter() {
            *counts.entry(entry.error.category).or_insert(0) += 1;
        }
        counts
    }

    pub fn count_by_backend(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for entry in self.entries.lock().iter() {
            let backend = entry.error.backend.as_deref().unwrap_or("unknown");
            *counts.entry(backend.to_owned()).or_insert(0) += 1;
        }
        counts
    }

    /// The `n` most frequent (category, cause) pairs, most frequent first.
    ///
    /// Ties are broken by category, then cause text, so the output is stable.
    pub fn most_common(&self, n: usize) -> Vec<ErrorFrequency> {
        let mut counts: HashMap<(ErrorCategory, String), usize> = HashMap::new();
        for entry in self.entries.lock().iter() {
            *counts
                .entry((entry.error.category, entry.error.cause.to_string()))
                .or_insert(0) += 1;
        }
        let mut frequencies: Vec<ErrorFrequency> = counts
            .into_iter()
            .map(|((category, cause), count)| ErrorFrequency {
                category,
                cause,
                count,
            })
            .collect();
        frequencies.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then(a.category.cmp(&b.category))
                .then_with(|| a.cause.cmp(&b.cause))
        });
        frequencies.truncate(n);
        frequencies
    }

    /// Fraction of retained records later marked resolved (0.0 when empty).
    pub fn resolution_rate(&self) -> f64 {
        let entries = self.entries.lock();
        if entries.is_empty() {
            return 0.0;
        }
        let resolved = entries.iter().filter(|e| e.resolved).count();
        resolved as f64 / entries.len() as f64
    }
}

impl Default for ErrorHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl std::fmt::Debug for ErrorHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHistory")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ErrorClassifier, ErrorContext};
    use crate::error::BackendError;

    fn classified(backend: &str, raw: BackendError) -> ClassifiedError {
        ErrorClassifier::new().classify(&raw, &ErrorContext::new(backend, "generate"))
    }

    #[test]
    fn evicts_oldest_when_full() {
        let history = ErrorHistory::new(3);
        for i in 0..5 {
            history.record(classified(&format!("b{i}"), BackendError::Other("x".into())));
        }
        assert_eq!(history.len(), 3);
        let backends: Vec<_> = history
            .recent(3)
            .into_iter()
            .filter_map(|e| e.backend)
            .collect();
        assert_eq!(backends, vec!["b4", "b3", "b2"]);
    }

    #[test]
    fn aggregates_by_category_and_backend() {
        let history = ErrorHistory::default();
        history.record(classified("openai", BackendError::AuthenticationFailed));
        history.record(classified("openai", BackendError::RateLimited { retry_after: None }));
        history.record(classified("anthropic", BackendError::RateLimited { retry_after: None }));

        let by_category = history.count_by_category();
        assert_eq!(by_category[&ErrorCategory::RateLimit], 2);
        assert_eq!(by_category[&ErrorCategory::Authentication], 1);

        let by_backend = history.count_by_backend();
        assert_eq!(by_backend["openai"], 2);
        assert_eq!(by_backend["anthropic"], 1);

        let common = history.most_common(1);
        assert_eq!(common[0].category, ErrorCategory::RateLimit);
        assert_eq!(common[0].count, 2);
    }

    #[test]
    fn resolution_rate_tracks_marked_entries() {
        let history = ErrorHistory::default();
        assert_eq!(history.resolution_rate(), 0.0);

        history.record(classified("openai", BackendError::Http("reset".into())));
        history.record(classified("anthropic", BackendError::Http("reset".into())));
        assert_eq!(history.mark_resolved("openai", "generate"), 1);
        assert!((history.resolution_rate() - 0.5).abs() < f64::EPSILON);

        // Already resolved entries are not counted twice.
        assert_eq!(history.mark_resolved("openai", "generate"), 0);
    }

    #[test]
    fn zero_capacity_records_nothing() {
        let history = ErrorHistory::new(0);
        history.record(classified("openai", BackendError::AuthenticationFailed));
        assert!(history.is_empty());
    }
}
