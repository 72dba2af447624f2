//! Record store seam for batch reconciliation
//!
//! The reconciler never talks to a database directly; it drives the
//! [`MediaStore`] trait. [`MemoryStore`] is the in-process implementation
//! used in tests and small deployments.

use crate::error::{Error, Result};
use crate::types::CanonicalMetadata;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Identifier of one storage shard
pub type ShardId = u32;

/// Stored movie record, as the reconciler sees it
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredMovie {
    /// TMDb id, the record's primary key within its shard
    pub tmdb_id: i64,
    /// IMDb id, when known
    pub imdb_id: Option<String>,
    /// Display title
    pub title: String,
    /// Release year, when known
    pub release_year: Option<i32>,
    /// Cast display names
    pub cast: Vec<String>,
    /// Plot/overview
    pub description: String,
    /// Genre names
    pub genres: Vec<String>,
    /// Poster URL
    pub poster: String,
    /// Backdrop URL
    pub backdrop: String,
    /// Logo URL
    pub logo: String,
    /// Aggregate rating
    pub rating: f64,
}

impl StoredMovie {
    /// Whether the record needs no reconciliation work.
    ///
    /// Complete means cast, description, and genres are all non-empty and a
    /// logo URL is present.
    pub fn is_complete(&self) -> bool {
        !self.cast.is_empty()
            && !self.description.is_empty()
            && !self.genres.is_empty()
            && !self.logo.is_empty()
    }
}

/// Stored episode record within a season
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredEpisode {
    /// Episode number within its season
    pub episode_number: u32,
    /// Episode synopsis
    pub overview: String,
    /// Release timestamp string
    pub released: String,
    /// Episode still/backdrop URL
    pub episode_backdrop: String,
}

impl StoredEpisode {
    /// Whether the episode needs no reconciliation work (all three metadata
    /// fields present).
    pub fn is_complete(&self) -> bool {
        !self.overview.is_empty() && !self.released.is_empty() && !self.episode_backdrop.is_empty()
    }
}

/// Stored season: an episode list under a season number
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredSeason {
    /// Season number
    pub season_number: u32,
    /// Episodes in this season
    pub episodes: Vec<StoredEpisode>,
}

/// Stored show record with its nested seasons
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredShow {
    /// TMDb id, the record's primary key within its shard
    pub tmdb_id: i64,
    /// IMDb id, when known
    pub imdb_id: Option<String>,
    /// Display title
    pub title: String,
    /// First-air year, when known
    pub release_year: Option<i32>,
    /// Cast display names
    pub cast: Vec<String>,
    /// Plot/overview
    pub description: String,
    /// Genre names
    pub genres: Vec<String>,
    /// Poster URL
    pub poster: String,
    /// Backdrop URL
    pub backdrop: String,
    /// Logo URL
    pub logo: String,
    /// Aggregate rating
    pub rating: f64,
    /// Seasons with their episodes
    pub seasons: Vec<StoredSeason>,
}

impl StoredShow {
    /// Whether the show-level record needs no reconciliation work.
    ///
    /// Episode completeness is judged separately per episode.
    pub fn is_complete(&self) -> bool {
        !self.cast.is_empty()
            && !self.description.is_empty()
            && !self.genres.is_empty()
            && !self.logo.is_empty()
    }
}

/// Record-level field patch applied to a movie or show
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordPatch {
    /// TMDb id, when the resolution produced one
    pub tmdb_id: Option<i64>,
    /// IMDb id
    pub imdb_id: Option<String>,
    /// Cast display names
    pub cast: Vec<String>,
    /// Plot/overview
    pub description: String,
    /// Genre names
    pub genres: Vec<String>,
    /// Poster URL
    pub poster: String,
    /// Backdrop URL
    pub backdrop: String,
    /// Logo URL
    pub logo: String,
    /// Aggregate rating
    pub rating: f64,
}

impl RecordPatch {
    /// Build a patch from a resolved canonical record.
    pub fn from_metadata(meta: &CanonicalMetadata) -> Self {
        Self {
            tmdb_id: meta.tmdb_id,
            imdb_id: meta.imdb_id.clone(),
            cast: meta.cast.clone(),
            description: meta.description.clone(),
            genres: meta.genres.clone(),
            poster: meta.poster.clone(),
            backdrop: meta.backdrop.clone(),
            logo: meta.logo.clone(),
            rating: meta.rating,
        }
    }
}

/// Episode-level field patch
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EpisodePatch {
    /// Episode synopsis
    pub overview: String,
    /// Release timestamp string
    pub released: String,
    /// Episode still/backdrop URL
    pub episode_backdrop: String,
}

impl EpisodePatch {
    /// Build a patch from a resolved record's episode fragment, when present.
    pub fn from_metadata(meta: &CanonicalMetadata) -> Option<Self> {
        meta.episode.as_ref().map(|ep| Self {
            overview: ep.overview.clone(),
            released: ep.released_at.clone(),
            episode_backdrop: ep.backdrop.clone(),
        })
    }
}

/// Sharded record store driven by the reconciler
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Shard ids to reconcile, in the order passes should visit them
    async fn shards(&self) -> Result<Vec<ShardId>>;

    /// Number of movie records in a shard
    async fn count_movies(&self, shard: ShardId) -> Result<u64>;

    /// Number of show records in a shard
    async fn count_shows(&self, shard: ShardId) -> Result<u64>;

    /// Cursor over a shard's movie records
    async fn movies(&self, shard: ShardId) -> Result<BoxStream<'static, Result<StoredMovie>>>;

    /// Cursor over a shard's show records
    async fn shows(&self, shard: ShardId) -> Result<BoxStream<'static, Result<StoredShow>>>;

    /// Apply a record-level patch to a movie
    async fn update_movie(&self, shard: ShardId, tmdb_id: i64, patch: RecordPatch) -> Result<()>;

    /// Apply a record-level patch to a show
    async fn update_show(&self, shard: ShardId, tmdb_id: i64, patch: RecordPatch) -> Result<()>;

    /// Apply an episode-level patch to one episode of a show
    async fn update_episode(
        &self,
        shard: ShardId,
        tmdb_id: i64,
        season: u32,
        episode: u32,
        patch: EpisodePatch,
    ) -> Result<()>;
}

#[derive(Debug, Default)]
struct Shard {
    movies: Vec<StoredMovie>,
    shows: Vec<StoredShow>,
}

/// In-memory sharded store
#[derive(Debug, Default)]
pub struct MemoryStore {
    shards: Mutex<BTreeMap<ShardId, Shard>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a movie record into a shard, creating the shard if needed.
    pub fn insert_movie(&self, shard: ShardId, movie: StoredMovie) {
        lock(&self.shards).entry(shard).or_default().movies.push(movie);
    }

    /// Insert a show record into a shard, creating the shard if needed.
    pub fn insert_show(&self, shard: ShardId, show: StoredShow) {
        lock(&self.shards).entry(shard).or_default().shows.push(show);
    }

    /// Snapshot of one movie record, for inspection
    pub fn movie(&self, shard: ShardId, tmdb_id: i64) -> Option<StoredMovie> {
        lock(&self.shards)
            .get(&shard)?
            .movies
            .iter()
            .find(|m| m.tmdb_id == tmdb_id)
            .cloned()
    }

    /// Snapshot of one show record, for inspection
    pub fn show(&self, shard: ShardId, tmdb_id: i64) -> Option<StoredShow> {
        lock(&self.shards)
            .get(&shard)?
            .shows
            .iter()
            .find(|s| s.tmdb_id == tmdb_id)
            .cloned()
    }
}

#[async_trait]
impl MediaStore for MemoryStore {
    async fn shards(&self) -> Result<Vec<ShardId>> {
        Ok(lock(&self.shards).keys().copied().collect())
    }

    async fn count_movies(&self, shard: ShardId) -> Result<u64> {
        Ok(lock(&self.shards)
            .get(&shard)
            .map(|s| s.movies.len() as u64)
            .unwrap_or(0))
    }

    async fn count_shows(&self, shard: ShardId) -> Result<u64> {
        Ok(lock(&self.shards)
            .get(&shard)
            .map(|s| s.shows.len() as u64)
            .unwrap_or(0))
    }

    async fn movies(&self, shard: ShardId) -> Result<BoxStream<'static, Result<StoredMovie>>> {
        let snapshot: Vec<StoredMovie> = lock(&self.shards)
            .get(&shard)
            .map(|s| s.movies.clone())
            .unwrap_or_default();
        Ok(futures::stream::iter(snapshot.into_iter().map(Ok)).boxed())
    }

    async fn shows(&self, shard: ShardId) -> Result<BoxStream<'static, Result<StoredShow>>> {
        let snapshot: Vec<StoredShow> = lock(&self.shards)
            .get(&shard)
            .map(|s| s.shows.clone())
            .unwrap_or_default();
        Ok(futures::stream::iter(snapshot.into_iter().map(Ok)).boxed())
    }

    async fn update_movie(&self, shard: ShardId, tmdb_id: i64, patch: RecordPatch) -> Result<()> {
        let mut shards = lock(&self.shards);
        let movie = shards
            .get_mut(&shard)
            .and_then(|s| s.movies.iter_mut().find(|m| m.tmdb_id == tmdb_id))
            .ok_or_else(|| Error::Store(format!("movie {tmdb_id} not found in shard {shard}")))?;
        apply_record_patch_to_movie(movie, patch);
        Ok(())
    }

    async fn update_show(&self, shard: ShardId, tmdb_id: i64, patch: RecordPatch) -> Result<()> {
        let mut shards = lock(&self.shards);
        let show = shards
            .get_mut(&shard)
            .and_then(|s| s.shows.iter_mut().find(|s| s.tmdb_id == tmdb_id))
            .ok_or_else(|| Error::Store(format!("show {tmdb_id} not found in shard {shard}")))?;
        show.imdb_id = patch.imdb_id.or(show.imdb_id.take());
        show.cast = patch.cast;
        show.description = patch.description;
        show.genres = patch.genres;
        show.poster = patch.poster;
        show.backdrop = patch.backdrop;
        show.logo = patch.logo;
        show.rating = patch.rating;
        Ok(())
    }

    async fn update_episode(
        &self,
        shard: ShardId,
        tmdb_id: i64,
        season: u32,
        episode: u32,
        patch: EpisodePatch,
    ) -> Result<()> {
        let mut shards = lock(&self.shards);
        let target = shards
            .get_mut(&shard)
            .and_then(|s| s.shows.iter_mut().find(|s| s.tmdb_id == tmdb_id))
            .and_then(|show| {
                show.seasons
                    .iter_mut()
                    .find(|s| s.season_number == season)
            })
            .and_then(|s| {
                s.episodes
                    .iter_mut()
                    .find(|e| e.episode_number == episode)
            })
            .ok_or_else(|| {
                Error::Store(format!(
                    "episode S{season}E{episode} of show {tmdb_id} not found in shard {shard}"
                ))
            })?;
        target.overview = patch.overview;
        target.released = patch.released;
        target.episode_backdrop = patch.episode_backdrop;
        Ok(())
    }
}

fn apply_record_patch_to_movie(movie: &mut StoredMovie, patch: RecordPatch) {
    movie.imdb_id = patch.imdb_id.or(movie.imdb_id.take());
    movie.cast = patch.cast;
    movie.description = patch.description;
    movie.genres = patch.genres;
    movie.poster = patch.poster;
    movie.backdrop = patch.backdrop;
    movie.logo = patch.logo;
    movie.rating = patch.rating;
}

// Recover a poisoned guard; the map stays structurally valid.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
