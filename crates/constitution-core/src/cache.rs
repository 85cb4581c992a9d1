//! Content-addressed parse cache.
//!
//! Keyed by the SHA-256 of the file bytes, so identical content parses once
//! regardless of path, and edited content reparses. Bounded by a byte
//! budget with least-recently-used eviction. Parse failures are cached as
//! sentinels so repeated lookups do not retry a file that cannot parse.

use crate::source::{SourceAst, SourceKind, ast};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Default budget: 64 MiB of cached parse results.
pub const DEFAULT_CACHE_BUDGET: usize = 64 * 1024 * 1024;

/// Why a cached parse is unavailable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub reason: String,
}

enum Entry {
    Parsed { ast: Arc<SourceAst>, cost: usize },
    Failed { reason: String },
}

impl Entry {
    fn cost(&self) -> usize {
        match self {
            Entry::Parsed { cost, .. } => *cost,
            // Sentinels are cheap but not free; charge a nominal amount so a
            // flood of bad files still respects the budget.
            Entry::Failed { .. } => 256,
        }
    }
}

struct Inner {
    entries: HashMap<String, Entry>,
    // Front = least recently used.
    order: VecDeque<String>,
    total_cost: usize,
    hits: u64,
    misses: u64,
}

/// Thread-safe parse cache shared across the worker pool.
///
/// Lookups hold the lock only around map access; parsing itself runs
/// outside the lock, so two workers may race to parse the same new content
/// and the second insert wins harmlessly.
pub struct AstCache {
    inner: Mutex<Inner>,
    byte_budget: usize,
}

impl AstCache {
    pub fn new(byte_budget: usize) -> Self {
        AstCache {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                total_cost: 0,
                hits: 0,
                misses: 0,
            }),
            byte_budget: byte_budget.max(1),
        }
    }

    /// The cache key for raw file bytes.
    pub fn content_key(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Fetch the parse for `bytes`, parsing at most once per content hash.
    pub fn get_or_parse(
        &self,
        kind: SourceKind,
        bytes: &[u8],
    ) -> Result<Arc<SourceAst>, ParseFailure> {
        let key = Self::content_key(bytes);

        if let Some(cached) = self.lookup(&key) {
            return cached;
        }

        // Parse outside the lock.
        let result = match std::str::from_utf8(bytes) {
            Ok(text) => Ok(Arc::new(ast::parse(kind, text))),
            Err(e) => Err(ParseFailure {
                reason: format!("not valid UTF-8: {e}"),
            }),
        };

        self.insert(key, bytes.len(), &result);
        result
    }

    /// (hits, misses) since construction.
    pub fn stats(&self) -> (u64, u64) {
        let inner = self.lock();
        (inner.hits, inner.misses)
    }

    fn lookup(&self, key: &str) -> Option<Result<Arc<SourceAst>, ParseFailure>> {
        let mut inner = self.lock();
        let result = match inner.entries.get(key) {
            Some(Entry::Parsed { ast, .. }) => Some(Ok(Arc::clone(ast))),
            Some(Entry::Failed { reason }) => Some(Err(ParseFailure {
                reason: reason.clone(),
            })),
            None => None,
        };
        if result.is_some() {
            inner.hits += 1;
            touch(&mut inner.order, key);
        } else {
            inner.misses += 1;
        }
        result
    }

    fn insert(
        &self,
        key: String,
        content_len: usize,
        result: &Result<Arc<SourceAst>, ParseFailure>,
    ) {
        let entry = match result {
            Ok(ast) => Entry::Parsed {
                ast: Arc::clone(ast),
                cost: content_len.max(1),
            },
            Err(failure) => Entry::Failed {
                reason: failure.reason.clone(),
            },
        };

        let mut inner = self.lock();
        // A racing worker may have inserted the same key already; keep the
        // existing entry (the ASTs are structurally equal anyway).
        if inner.entries.contains_key(&key) {
            return;
        }
        inner.total_cost += entry.cost();
        inner.entries.insert(key.clone(), entry);
        inner.order.push_back(key);

        while inner.total_cost > self.byte_budget && inner.order.len() > 1 {
            if let Some(oldest) = inner.order.pop_front() {
                if let Some(evicted) = inner.entries.remove(&oldest) {
                    inner.total_cost -= evicted.cost();
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn touch(order: &mut VecDeque<String>, key: &str) {
    if let Some(position) = order.iter().position(|k| k == key) {
        if let Some(entry) = order.remove(position) {
            order.push_back(entry);
        }
    }
}

impl Default for AstCache {
    fn default() -> Self {
        AstCache::new(DEFAULT_CACHE_BUDGET)
    }
}

impl std::fmt::Debug for AstCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("AstCache")
            .field("entries", &inner.entries.len())
            .field("total_cost", &inner.total_cost)
            .field("budget", &self.byte_budget)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_content_returns_same_instance() {
        let cache = AstCache::default();
        let bytes = b"def f():\n    pass\n";
        let first = cache.get_or_parse(SourceKind::Python, bytes).unwrap();
        let second = cache.get_or_parse(SourceKind::Python, bytes).unwrap();
        assert!(
            Arc::ptr_eq(&first, &second),
            "same content must share one parse"
        );
        let (hits, misses) = cache.stats();
        assert_eq!((hits, misses), (1, 1));
    }

    #[test]
    fn test_changed_content_reparses() {
        let cache = AstCache::default();
        let first = cache
            .get_or_parse(SourceKind::Python, b"def a():\n    pass\n")
            .unwrap();
        let second = cache
            .get_or_parse(SourceKind::Python, b"def b():\n    pass\n")
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.functions[0].name, "a");
        assert_eq!(second.functions[0].name, "b");
    }

    #[test]
    fn test_parse_failure_is_cached_as_sentinel() {
        let cache = AstCache::default();
        let bad = [0xff, 0xfe, 0x00, 0x41];
        let first = cache.get_or_parse(SourceKind::Python, &bad).unwrap_err();
        let second = cache.get_or_parse(SourceKind::Python, &bad).unwrap_err();
        assert_eq!(first, second);
        let (hits, misses) = cache.stats();
        assert_eq!(hits, 1, "second failure must come from the sentinel");
        assert_eq!(misses, 1);
    }

    #[test]
    fn test_lru_eviction_respects_budget() {
        // Budget fits roughly two of the three files.
        let content_a = format!("a = \"{}\"\n", "x".repeat(400));
        let content_b = format!("b = \"{}\"\n", "y".repeat(400));
        let content_c = format!("c = \"{}\"\n", "z".repeat(400));
        let cache = AstCache::new(1_000);

        cache
            .get_or_parse(SourceKind::Python, content_a.as_bytes())
            .unwrap();
        cache
            .get_or_parse(SourceKind::Python, content_b.as_bytes())
            .unwrap();
        // Touch A so B becomes the least recently used.
        cache
            .get_or_parse(SourceKind::Python, content_a.as_bytes())
            .unwrap();
        cache
            .get_or_parse(SourceKind::Python, content_c.as_bytes())
            .unwrap();

        // B was evicted: fetching it again is a miss (a fresh parse).
        let (_, misses_before) = cache.stats();
        cache
            .get_or_parse(SourceKind::Python, content_b.as_bytes())
            .unwrap();
        let (_, misses_after) = cache.stats();
        assert_eq!(misses_after, misses_before + 1);
    }

    #[test]
    fn test_content_key_is_stable_sha256() {
        let key = AstCache::content_key(b"hello");
        assert_eq!(key.len(), 64);
        assert_eq!(key, AstCache::content_key(b"hello"));
        assert_ne!(key, AstCache::content_key(b"hello "));
    }
}
