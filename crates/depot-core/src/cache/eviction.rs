//! Victim selection when a cache is full.
//!
//! The policy is "evict least-referenced": the entry with the smallest
//! current reference count goes, regardless of how recently it was used.
//! Ties go to whichever entry the map yields first.

use std::collections::HashMap;

use super::types::CacheEntry;

/// Picks the key to evict, or `None` if there is nothing to evict.
pub(crate) fn least_referenced(entries: &HashMap<String, CacheEntry>) -> Option<String> {
    entries
        .iter()
        .min_by_key(|(_, entry)| entry.ref_count)
        .map(|(key, _)| key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::refcount::RefCount;
    use depot_abstraction::Payload;

    fn entry(key: &str, refs: u32) -> (String, CacheEntry) {
        (
            key.to_string(),
            CacheEntry::new(key.to_string(), Payload::new(()), RefCount::new(refs), 0),
        )
    }

    #[test]
    fn test_empty_has_no_victim() {
        assert_eq!(least_referenced(&HashMap::new()), None);
    }

    #[test]
    fn test_picks_minimum_refcount() {
        let entries: HashMap<_, _> =
            [entry("a", 5), entry("b", 1), entry("c", 3)].into_iter().collect();
        assert_eq!(least_referenced(&entries).as_deref(), Some("b"));
    }

    #[test]
    fn test_refcount_beats_recency() {
        // "old" was installed first and never touched again, but holds more
        // references, so the fresher entry is evicted.
        let entries: HashMap<_, _> = [entry("old", 5), entry("fresh", 1)].into_iter().collect();
        assert_eq!(least_referenced(&entries).as_deref(), Some("fresh"));
    }

    #[test]
    fn test_tie_picks_one_of_the_minimum() {
        let entries: HashMap<_, _> =
            [entry("a", 1), entry("b", 1), entry("c", 2)].into_iter().collect();
        let victim = least_referenced(&entries).unwrap();
        assert!(victim == "a" || victim == "b");
    }
}
