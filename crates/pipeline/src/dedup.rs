//! Deduplication index for one pipeline run
//!
//! Loaded once from storage when a run starts. Keys registered during a
//! batch stay staged until the batch commits; a failed batch discards them.

use collector_common::{Repository, Result};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Default, Clone)]
pub struct DedupIndex {
    identifiers: HashSet<String>,
    urls: HashSet<String>,
    staged_identifiers: HashSet<String>,
    staged_urls: HashSet<String>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from known keys
    pub fn from_keys<I, U>(identifiers: I, urls: U) -> Self
    where
        I: IntoIterator<Item = String>,
        U: IntoIterator<Item = String>,
    {
        Self {
            identifiers: identifiers.into_iter().collect(),
            urls: urls.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Snapshot every persisted identifier and URL
    pub async fn load(repository: &Repository) -> Result<Self> {
        let index = Self::from_keys(
            repository.identifier_keys().await?,
            repository.url_keys().await?,
        );
        debug!(
            identifiers = index.identifiers.len(),
            urls = index.urls.len(),
            "Deduplication index loaded"
        );
        Ok(index)
    }

    pub fn contains_identifier(&self, doi: &str) -> bool {
        self.identifiers.contains(doi) || self.staged_identifiers.contains(doi)
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.urls.contains(url) || self.staged_urls.contains(url)
    }

    /// Stage a URL. Returns false if it is already known or staged.
    pub fn register(&mut self, url: &str) -> bool {
        if self.contains_url(url) {
            return false;
        }
        self.staged_urls.insert(url.to_string())
    }

    /// Stage an identifier. Returns false if it is already known or staged.
    pub fn register_identifier(&mut self, doi: &str) -> bool {
        if self.contains_identifier(doi) {
            return false;
        }
        self.staged_identifiers.insert(doi.to_string())
    }

    /// The batch holding the staged keys was committed
    pub fn commit(&mut self) {
        self.identifiers.extend(self.staged_identifiers.drain());
        self.urls.extend(self.staged_urls.drain());
    }

    /// The batch holding the staged keys was rolled back
    pub fn rollback(&mut self) {
        self.staged_identifiers.clear();
        self.staged_urls.clear();
    }

    pub fn identifier_count(&self) -> usize {
        self.identifiers.len() + self.staged_identifiers.len()
    }

    pub fn url_count(&self) -> usize {
        self.urls.len() + self.staged_urls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_rejects_known_and_staged() {
        let mut index = DedupIndex::from_keys(vec![], vec!["https://doi.org/10.1000/a".to_string()]);
        assert!(!index.register("https://doi.org/10.1000/a"));
        assert!(index.register("https://doi.org/10.1000/b"));
        assert!(!index.register("https://doi.org/10.1000/b"));
        assert_eq!(index.url_count(), 2);
    }

    #[test]
    fn test_rollback_discards_staged() {
        let mut index = DedupIndex::new();
        index.register_identifier("10.1000/a");
        index.register("https://doi.org/10.1000/a");
        index.rollback();
        assert!(!index.contains_identifier("10.1000/a"));
        assert!(!index.contains_url("https://doi.org/10.1000/a"));
    }

    #[test]
    fn test_commit_keeps_staged() {
        let mut index = DedupIndex::new();
        index.register_identifier("10.1000/a");
        index.commit();
        index.rollback();
        assert!(index.contains_identifier("10.1000/a"));
        assert_eq!(index.identifier_count(), 1);
    }
}
