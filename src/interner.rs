//! Weak-Reference Caches (§4.8, §5, §9)
//!
//! Pattern constraints (`[P]: T`) compile `P` into a matcher; when `P` is a
//! string pattern the matcher is a compiled `regex::Regex`. Compilation is
//! not free, so compiled patterns are cached keyed by their source text.
//! The cache is a concurrent map holding `Weak` handles so an entry expires
//! automatically once nothing is using it, per the "weak-reference caches"
//! guidance in §9 and the thread-safety contract in §5. Readers must
//! tolerate the handle having expired between the map lookup and the
//! upgrade and simply recompile in that case.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use regex::Regex;

/// Cache of compiled regular expressions keyed by pattern source text.
#[derive(Default)]
pub struct RegexCache {
    entries: DashMap<String, Weak<Regex>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a cached compiled pattern or compile and cache a new one.
    /// Concurrent callers racing on the same pattern text may each compile
    /// once; only one `Arc` wins the slot, which is fine since compilation
    /// is pure and idempotent.
    pub fn get_or_compile(&self, pattern: &str) -> Result<Arc<Regex>, regex::Error> {
        if let Some(weak) = self.entries.get(pattern) {
            if let Some(strong) = weak.upgrade() {
                return Ok(strong);
            }
        }
        let compiled = Arc::new(Regex::new(pattern)?);
        self.entries
            .insert(pattern.to_string(), Arc::downgrade(&compiled));
        Ok(compiled)
    }

    /// Drop entries whose last strong reference has already gone away.
    /// Not required for correctness (an expired entry just misses on next
    /// lookup and recompiles) but keeps the map from growing unboundedly
    /// under programs that synthesize many distinct one-shot patterns.
    pub fn evict_expired(&self) {
        self.entries.retain(|_, weak| weak.strong_count() > 0);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_and_reuses_pattern() {
        let cache = RegexCache::new();
        let a = cache.get_or_compile("^foo.*$").unwrap();
        let b = cache.get_or_compile("^foo.*$").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn expired_entry_is_recompiled_not_reused() {
        let cache = RegexCache::new();
        {
            let _a = cache.get_or_compile("^bar$").unwrap();
        }
        // `_a` dropped: the only strong ref is gone.
        let b = cache.get_or_compile("^bar$").unwrap();
        assert!(b.is_match("bar"));
    }

    #[test]
    fn evict_expired_removes_dead_slots() {
        let cache = RegexCache::new();
        {
            let _a = cache.get_or_compile("^baz$").unwrap();
        }
        cache.evict_expired();
        assert!(cache.is_empty());
    }

    #[test]
    fn invalid_pattern_surfaces_regex_error() {
        let cache = RegexCache::new();
        assert!(cache.get_or_compile("(unclosed").is_err());
    }
}
