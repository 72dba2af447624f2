//! Metadata resolution engine
//!
//! Resolves filename-derived hints into canonical records through a strict
//! provider-fallback chain: the community catalog answers first, TMDb answers
//! only when the primary chain comes up short. Every lookup outcome, present
//! or absent, is memoized in the resolver-owned [`LookupCache`].

use crate::cache::{CacheKey, LookupCache};
use crate::config::Config;
use crate::error::Result;
use crate::normalize;
use crate::providers::{CinemetaClient, TmdbClient};
use crate::types::{
    CanonicalMetadata, EpisodeDetails, FilenameParser, MediaHint, MediaKind, Provider,
    ReferenceContext, ReferenceEncoder, Resolution, ResolvedItem, SearchHit,
};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tokio::sync::Semaphore;

/// Filename parser that declines every filename.
///
/// Useful for callers that only drive the hint-level API and never the
/// single-file path.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpFilenameParser;

impl FilenameParser for NoOpFilenameParser {
    fn parse(&self, _filename: &str) -> Option<MediaHint> {
        None
    }
}

/// Reference encoder that never produces a token.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpReferenceEncoder;

impl ReferenceEncoder for NoOpReferenceEncoder {
    fn encode(&self, _context: &ReferenceContext) -> Option<String> {
        None
    }
}

/// Hint-to-metadata resolver with provider fallback and memoization
pub struct Resolver {
    config: Arc<Config>,
    cinemeta: CinemetaClient,
    tmdb: TmdbClient,
    cache: LookupCache,
    parser: Arc<dyn FilenameParser>,
    encoder: Arc<dyn ReferenceEncoder>,
}

impl Resolver {
    /// Build a resolver from a validated configuration.
    ///
    /// Both provider clients share one counting gate sized by
    /// `max_concurrent_requests`, so the cap applies across providers.
    pub fn new(
        config: Arc<Config>,
        parser: Arc<dyn FilenameParser>,
        encoder: Arc<dyn ReferenceEncoder>,
    ) -> Result<Self> {
        config.validate()?;
        let gate = Arc::new(Semaphore::new(config.providers.max_concurrent_requests));
        Ok(Self {
            cinemeta: CinemetaClient::new(&config.providers, Arc::clone(&gate))?,
            tmdb: TmdbClient::new(&config.providers, gate)?,
            cache: LookupCache::new(),
            parser,
            encoder,
            config,
        })
    }

    /// The resolver-owned lookup cache
    pub fn cache(&self) -> &LookupCache {
        &self.cache
    }

    /// Resolve a structured hint into a canonical record.
    ///
    /// A hint carrying both season and episode is resolved as an episode;
    /// anything else is resolved as a movie. An empty title short-circuits to
    /// [`Resolution::Unresolved`] without touching the network.
    pub async fn resolve_hint(&self, hint: &MediaHint) -> Resolution {
        if hint.title.trim().is_empty() {
            return Resolution::Unresolved;
        }
        match (hint.season, hint.episode) {
            (Some(season), Some(episode)) => self.resolve_episode(hint, season, episode).await,
            _ => self.resolve_movie(hint).await,
        }
    }

    /// Resolve a raw filename into a [`ResolvedItem`] for the caller.
    ///
    /// Returns `None` for anything the pipeline refuses to resolve: an
    /// unparseable filename, a gated-out item, or an unresolved hint.
    pub async fn resolve_file(
        &self,
        filename: &str,
        context: &ReferenceContext,
    ) -> Option<ResolvedItem> {
        let hint = self.parser.parse(filename)?;
        if should_skip(filename, &hint) {
            tracing::debug!(filename = %filename, "skipping file before resolution");
            return None;
        }

        let reference_token = self.encoder.encode(context);
        match self.resolve_hint(&hint).await {
            Resolution::Resolved(metadata) => Some(ResolvedItem {
                metadata,
                quality: hint.quality,
                reference_token,
            }),
            Resolution::Unresolved => {
                tracing::debug!(filename = %filename, title = %hint.title, "no provider resolved the file");
                None
            }
        }
    }

    async fn resolve_movie(&self, hint: &MediaHint) -> Resolution {
        // Primary chain: known id, else catalog search with "title year"
        let imdb_id = match imdb_hint(hint) {
            Some(id) => Some(id),
            None => {
                let query = match hint.year {
                    Some(year) => format!("{} {}", hint.title, year),
                    None => hint.title.clone(),
                };
                self.primary_search(&query, MediaKind::Movie)
                    .await
                    .map(|hit| hit.id)
            }
        };
        if let Some(id) = imdb_id {
            if let Some(meta) = self.primary_detail(&id, MediaKind::Movie).await {
                return Resolution::Resolved(meta);
            }
        }

        // Secondary chain
        let Some(hit) = self
            .secondary_search(&hint.title, MediaKind::Movie, hint.year)
            .await
        else {
            return Resolution::Unresolved;
        };
        let Ok(tmdb_id) = hit.id.parse::<i64>() else {
            return Resolution::Unresolved;
        };
        match self.secondary_movie_detail(tmdb_id).await {
            Some(meta) => Resolution::Resolved(meta),
            None => Resolution::Unresolved,
        }
    }

    async fn resolve_episode(&self, hint: &MediaHint, season: u32, episode: u32) -> Resolution {
        // Primary chain only counts when it yields BOTH the show record and
        // the episode fragment; a partial answer falls through wholesale.
        let imdb_id = match imdb_hint(hint) {
            Some(id) => Some(id),
            None => self
                .primary_search(&hint.title, MediaKind::Tv)
                .await
                .map(|hit| hit.id),
        };
        if let Some(id) = imdb_id {
            let show = self.primary_detail(&id, MediaKind::Tv).await;
            let fragment = self.primary_episode(&id, season, episode).await;
            if let (Some(show), Some(fragment)) = (show, fragment) {
                return Resolution::Resolved(show.with_episode(fragment));
            }
        }

        // Secondary chain; a missing episode fragment is tolerated here and
        // replaced with a labeled placeholder.
        let Some(hit) = self.secondary_search(&hint.title, MediaKind::Tv, None).await else {
            return Resolution::Unresolved;
        };
        let Ok(tmdb_id) = hit.id.parse::<i64>() else {
            return Resolution::Unresolved;
        };
        let Some(show) = self.secondary_tv_detail(tmdb_id).await else {
            return Resolution::Unresolved;
        };
        let fragment = self
            .secondary_episode(tmdb_id, season, episode)
            .await
            .unwrap_or_else(|| normalize::fallback_episode(&show.title, season, episode));
        Resolution::Resolved(show.with_episode(fragment))
    }

    async fn primary_search(&self, query: &str, kind: MediaKind) -> Option<SearchHit> {
        let key = CacheKey::search(Provider::Cinemeta, query, kind, None);
        if let Some(outcome) = self.cache.search(&key) {
            return outcome;
        }
        let outcome = self.cinemeta.search(query, kind).await;
        self.cache.put_search(key, outcome.clone());
        outcome
    }

    async fn primary_detail(&self, imdb_id: &str, requested: MediaKind) -> Option<CanonicalMetadata> {
        // IMDb ids are globally unique, so the key needs no kind.
        let key = CacheKey::detail(Provider::Cinemeta, imdb_id, None);
        if let Some(outcome) = self.cache.detail(&key) {
            return outcome;
        }
        let outcome = self
            .cinemeta
            .detail(imdb_id)
            .await
            .map(|raw| normalize::record_from_cinemeta(&self.config.providers, &raw, requested));
        self.cache.put_detail(key, outcome.clone());
        outcome
    }

    async fn primary_episode(
        &self,
        imdb_id: &str,
        season: u32,
        episode: u32,
    ) -> Option<EpisodeDetails> {
        let key = CacheKey::episode(Provider::Cinemeta, imdb_id, season, episode);
        if let Some(outcome) = self.cache.episode(&key) {
            return outcome;
        }
        let outcome = self
            .cinemeta
            .episode(imdb_id, season, episode)
            .await
            .map(|raw| normalize::episode_from_cinemeta(&raw, season, episode));
        self.cache.put_episode(key, outcome.clone());
        outcome
    }

    async fn secondary_search(
        &self,
        title: &str,
        kind: MediaKind,
        year: Option<i32>,
    ) -> Option<SearchHit> {
        let key = CacheKey::search(Provider::Tmdb, title, kind, year);
        if let Some(outcome) = self.cache.search(&key) {
            return outcome;
        }
        let outcome = self.tmdb.search(title, kind, year).await;
        self.cache.put_search(key, outcome.clone());
        outcome
    }

    async fn secondary_movie_detail(&self, tmdb_id: i64) -> Option<CanonicalMetadata> {
        // Movie and TV id namespaces overlap numerically, so the key carries
        // the kind.
        let key = CacheKey::detail(Provider::Tmdb, &tmdb_id.to_string(), Some(MediaKind::Movie));
        if let Some(outcome) = self.cache.detail(&key) {
            return outcome;
        }
        let outcome = self
            .tmdb
            .movie_details(tmdb_id)
            .await
            .map(|raw| normalize::movie_from_tmdb(&self.config.providers, &raw));
        self.cache.put_detail(key, outcome.clone());
        outcome
    }

    async fn secondary_tv_detail(&self, tmdb_id: i64) -> Option<CanonicalMetadata> {
        let key = CacheKey::detail(Provider::Tmdb, &tmdb_id.to_string(), Some(MediaKind::Tv));
        if let Some(outcome) = self.cache.detail(&key) {
            return outcome;
        }
        let outcome = self
            .tmdb
            .tv_details(tmdb_id)
            .await
            .map(|raw| normalize::show_from_tmdb(&self.config.providers, &raw));
        self.cache.put_detail(key, outcome.clone());
        outcome
    }

    async fn secondary_episode(
        &self,
        tmdb_id: i64,
        season: u32,
        episode: u32,
    ) -> Option<EpisodeDetails> {
        let key = CacheKey::episode(Provider::Tmdb, &tmdb_id.to_string(), season, episode);
        if let Some(outcome) = self.cache.episode(&key) {
            return outcome;
        }
        let outcome = self
            .tmdb
            .episode_details(tmdb_id, season, episode)
            .await
            .map(|raw| normalize::episode_from_tmdb(&self.config.providers, &raw, season, episode));
        self.cache.put_episode(key, outcome.clone());
        outcome
    }
}

fn imdb_hint(hint: &MediaHint) -> Option<String> {
    hint.external_id_hint
        .clone()
        .filter(|id| id.starts_with("tt"))
}

// Gating rules applied before any network work: combined multi-episode
// files, multipart archives, quality-less files, season-only hints, and
// title-less hints are all skipped.
fn should_skip(filename: &str, hint: &MediaHint) -> bool {
    static MULTIPART: OnceLock<Regex> = OnceLock::new();
    let multipart = MULTIPART.get_or_init(|| {
        Regex::new(r"(?i)(?:part|cd|dis[ck])[\s._-]*\d+\.\w+$").unwrap_or_else(|_| unreachable!())
    });

    filename.to_lowercase().contains("combined")
        || multipart.is_match(filename)
        || hint.quality.is_empty()
        || (hint.season.is_some() && hint.episode.is_none())
        || hint.title.trim().is_empty()
}
