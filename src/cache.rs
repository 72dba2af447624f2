//! Memoized lookup cache
//!
//! One map per operation kind (search, detail, episode detail), keyed by the
//! composite [`CacheKey`]. Values store the *outcome* of a call, so an absent
//! result is cached just like a present one and repeated failing lookups stay
//! off the network. Entries live for the owning resolver's lifetime and are
//! never evicted. The cache de-duplicates completed calls only: two
//! concurrent resolutions for the same key may both miss and perform
//! duplicate outbound calls, and last-writer-wins is fine because all writers
//! for a key compute the same deterministic value.

use crate::types::{CanonicalMetadata, EpisodeDetails, MediaKind, Provider, SearchHit};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Operation kind a cache entry belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Search-by-title
    Search,
    /// Detail-by-identifier
    Detail,
    /// Episode-detail lookup
    EpisodeDetail,
}

/// Composite cache key: operation kind, provider, title-or-id, media kind, year
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    op: Operation,
    provider: Provider,
    key: String,
    kind: Option<MediaKind>,
    year: Option<i32>,
}

impl CacheKey {
    /// Key for a search-by-title call
    pub fn search(provider: Provider, query: &str, kind: MediaKind, year: Option<i32>) -> Self {
        Self {
            op: Operation::Search,
            provider,
            key: query.to_string(),
            kind: Some(kind),
            year,
        }
    }

    /// Key for a detail-by-identifier call
    ///
    /// `kind` disambiguates providers whose movie and TV id namespaces
    /// overlap numerically; pass `None` when the id itself is unambiguous.
    pub fn detail(provider: Provider, id: &str, kind: Option<MediaKind>) -> Self {
        Self {
            op: Operation::Detail,
            provider,
            key: id.to_string(),
            kind,
            year: None,
        }
    }

    /// Key for an episode-detail call
    pub fn episode(provider: Provider, id: &str, season: u32, episode: u32) -> Self {
        Self {
            op: Operation::EpisodeDetail,
            provider,
            key: format!("{id}::{season}::{episode}"),
            kind: None,
            year: None,
        }
    }
}

/// Process-lifetime memoization cache for provider lookups
///
/// Owned by the resolver and shared by reference with all call sites; never
/// ambient global state.
#[derive(Debug, Default)]
pub struct LookupCache {
    searches: Mutex<HashMap<CacheKey, Option<SearchHit>>>,
    details: Mutex<HashMap<CacheKey, Option<CanonicalMetadata>>>,
    episodes: Mutex<HashMap<CacheKey, Option<EpisodeDetails>>>,
}

impl LookupCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached search outcome; outer `None` means miss.
    pub fn search(&self, key: &CacheKey) -> Option<Option<SearchHit>> {
        lock(&self.searches).get(key).cloned()
    }

    /// Record a search outcome (present or absent).
    pub fn put_search(&self, key: CacheKey, value: Option<SearchHit>) {
        lock(&self.searches).insert(key, value);
    }

    /// Look up a cached detail outcome; outer `None` means miss.
    pub fn detail(&self, key: &CacheKey) -> Option<Option<CanonicalMetadata>> {
        lock(&self.details).get(key).cloned()
    }

    /// Record a detail outcome (present or absent).
    pub fn put_detail(&self, key: CacheKey, value: Option<CanonicalMetadata>) {
        lock(&self.details).insert(key, value);
    }

    /// Look up a cached episode-detail outcome; outer `None` means miss.
    pub fn episode(&self, key: &CacheKey) -> Option<Option<EpisodeDetails>> {
        lock(&self.episodes).get(key).cloned()
    }

    /// Record an episode-detail outcome (present or absent).
    pub fn put_episode(&self, key: CacheKey, value: Option<EpisodeDetails>) {
        lock(&self.episodes).insert(key, value);
    }

    /// Total number of cached outcomes across all operation kinds
    pub fn len(&self) -> usize {
        lock(&self.searches).len() + lock(&self.details).len() + lock(&self.episodes).len()
    }

    /// Whether the cache holds no outcomes at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// A poisoned lock only means another writer panicked mid-insert; the map
// itself is still usable, so recover the guard instead of propagating.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
