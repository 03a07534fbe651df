//! Title parsing adapter
//!
//! Wraps the pure release-name parser with a request-scoped memo so the
//! enricher can parse `(name, description, filename)` for thousands of
//! streams without re-running the regex tables on repeated inputs.

pub mod title;

pub use title::parse_title;

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::models::ParsedFile;

/// Request-scoped memo over exact input strings.
///
/// Not shared across requests; the orchestrator constructs one per request
/// so eviction never changes results mid-pipeline.
pub struct ParseMemo {
    cache: LruCache<String, Option<ParsedFile>>,
}

impl ParseMemo {
    pub fn new() -> Self {
        Self {
            // Large enough for the biggest realistic fan-out response set
            cache: LruCache::new(NonZeroUsize::new(4096).expect("non-zero capacity")),
        }
    }

    pub fn parse(&mut self, input: &str) -> Option<ParsedFile> {
        if let Some(hit) = self.cache.get(input) {
            return hit.clone();
        }
        let parsed = parse_title(input);
        self.cache.put(input.to_string(), parsed.clone());
        parsed
    }
}

impl Default for ParseMemo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memo_returns_identical_results() {
        let mut memo = ParseMemo::new();
        let a = memo.parse("Some.Show.S01E01.1080p.WEB-DL.x265-GRP");
        let b = memo.parse("Some.Show.S01E01.1080p.WEB-DL.x265-GRP");
        assert_eq!(a, b);
        assert!(a.is_some());
    }
}
