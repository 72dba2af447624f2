//! Batch metadata reconciliation
//!
//! Walks every shard of a [`MediaStore`] in two passes (movies, then shows),
//! resolves incomplete records through the [`Resolver`], and writes the
//! repaired fields back. Progress is counted on attempt, not on success, so
//! a finished run always reports `done == total` regardless of how many
//! lookups failed.

use crate::config::Config;
use crate::error::Result;
use crate::resolver::Resolver;
use crate::store::{
    EpisodePatch, MediaStore, RecordPatch, ShardId, StoredMovie, StoredShow,
};
use crate::types::{Event, MediaHint, ReconcileReport, Resolution};
use futures::future::join_all;
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;

/// Batch reconciler over a sharded record store
pub struct Reconciler<S: MediaStore> {
    resolver: Arc<Resolver>,
    store: Arc<S>,
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
}

impl<S: MediaStore + 'static> Reconciler<S> {
    /// Create a reconciler over a store, sharing the resolver's cache across
    /// all work units.
    pub fn new(resolver: Arc<Resolver>, store: Arc<S>, config: Arc<Config>) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            resolver,
            store,
            config,
            event_tx,
        }
    }

    /// Subscribe to progress and completion events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Run one full reconciliation pass over every shard.
    ///
    /// Returns `Ok(None)` when the run was cancelled; a cancelled run emits
    /// no completion event and ends silently. Store-level failures inside a
    /// work unit are logged and absorbed; only failures enumerating shards
    /// or opening cursors abort the run.
    pub async fn run(&self, cancel: CancellationToken) -> Result<Option<ReconcileReport>> {
        let started = Instant::now();
        let shards = self.store.shards().await?;

        let mut total = 0u64;
        for &shard in &shards {
            total += self.store.count_movies(shard).await?;
            total += self.store.count_shows(shard).await?;
        }
        tracing::info!(shards = shards.len(), total, "starting metadata reconciliation");

        let done = Arc::new(AtomicU64::new(0));
        let reporter = self.spawn_progress_reporter(Arc::clone(&done), total, started, &cancel);

        let gate = Arc::new(Semaphore::new(self.config.reconcile.max_concurrent_units));
        self.reconcile_movies(&shards, &gate, &done, &cancel).await?;
        if !cancel.is_cancelled() {
            self.reconcile_shows(&shards, &gate, &done, &cancel).await?;
        }

        reporter.abort();

        if cancel.is_cancelled() {
            tracing::info!("reconciliation cancelled");
            return Ok(None);
        }

        let report = ReconcileReport {
            done: done.load(Ordering::Relaxed),
            total,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            done = report.done,
            total = report.total,
            elapsed_secs = report.elapsed.as_secs(),
            "reconciliation finished"
        );
        let _ = self.event_tx.send(Event::Completed {
            done: report.done,
            total: report.total,
            elapsed_secs: report.elapsed.as_secs(),
        });
        Ok(Some(report))
    }

    fn spawn_progress_reporter(
        &self,
        done: Arc<AtomicU64>,
        total: u64,
        started: Instant,
        cancel: &CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let event_tx = self.event_tx.clone();
        let interval = self.config.reconcile.progress_interval;
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = event_tx.send(Event::Progress {
                            done: done.load(Ordering::Relaxed),
                            total,
                            elapsed_secs: started.elapsed().as_secs(),
                        });
                    }
                }
            }
        })
    }

    async fn reconcile_movies(
        &self,
        shards: &[ShardId],
        gate: &Arc<Semaphore>,
        done: &Arc<AtomicU64>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let chunk_size = self.config.reconcile.max_concurrent_units * 2;
        for &shard in shards {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let mut cursor = self.store.movies(shard).await?;
            let mut pending = Vec::with_capacity(chunk_size);
            while let Some(record) = cursor.next().await {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                match record {
                    Ok(movie) => pending.push(self.movie_unit(shard, movie, gate, done, cancel)),
                    Err(e) => {
                        tracing::warn!(shard, error = %e, "skipping unreadable movie record");
                        done.fetch_add(1, Ordering::Relaxed);
                    }
                }
                if pending.len() >= chunk_size {
                    join_all(pending.drain(..)).await;
                }
            }
            join_all(pending).await;
        }
        Ok(())
    }

    async fn reconcile_shows(
        &self,
        shards: &[ShardId],
        gate: &Arc<Semaphore>,
        done: &Arc<AtomicU64>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let chunk_size = self.config.reconcile.max_concurrent_units * 2;
        for &shard in shards {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let mut cursor = self.store.shows(shard).await?;
            let mut pending = Vec::with_capacity(chunk_size);
            while let Some(record) = cursor.next().await {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                match record {
                    Ok(show) => pending.push(self.show_unit(shard, show, gate, done, cancel)),
                    Err(e) => {
                        tracing::warn!(shard, error = %e, "skipping unreadable show record");
                        done.fetch_add(1, Ordering::Relaxed);
                    }
                }
                if pending.len() >= chunk_size {
                    join_all(pending.drain(..)).await;
                }
            }
            join_all(pending).await;
        }
        Ok(())
    }

    async fn movie_unit(
        &self,
        shard: ShardId,
        movie: StoredMovie,
        gate: &Arc<Semaphore>,
        done: &Arc<AtomicU64>,
        cancel: &CancellationToken,
    ) {
        if cancel.is_cancelled() {
            return;
        }
        let Ok(_permit) = gate.acquire().await else {
            return;
        };

        if movie.is_complete() {
            done.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let hint = MediaHint {
            title: movie.title.clone(),
            year: movie.release_year,
            external_id_hint: movie.imdb_id.clone(),
            ..Default::default()
        };
        if let Resolution::Resolved(meta) = self.resolver.resolve_hint(&hint).await {
            let patch = RecordPatch::from_metadata(&meta);
            if let Err(e) = self.store.update_movie(shard, movie.tmdb_id, patch).await {
                tracing::warn!(shard, tmdb_id = movie.tmdb_id, error = %e, "movie update failed");
            }
        } else {
            tracing::debug!(shard, tmdb_id = movie.tmdb_id, title = %movie.title, "movie did not resolve");
        }
        done.fetch_add(1, Ordering::Relaxed);
    }

    async fn show_unit(
        &self,
        shard: ShardId,
        show: StoredShow,
        gate: &Arc<Semaphore>,
        done: &Arc<AtomicU64>,
        cancel: &CancellationToken,
    ) {
        if cancel.is_cancelled() {
            return;
        }
        let Ok(_permit) = gate.acquire().await else {
            return;
        };

        if !show.is_complete() {
            // S1E1 probe: the show-level record comes from an episode
            // resolution, so any concrete episode pins the TV chain.
            let hint = MediaHint {
                title: show.title.clone(),
                year: show.release_year,
                season: Some(1),
                episode: Some(1),
                external_id_hint: show.imdb_id.clone(),
                ..Default::default()
            };
            if let Resolution::Resolved(meta) = self.resolver.resolve_hint(&hint).await {
                let patch = RecordPatch::from_metadata(&meta);
                if let Err(e) = self.store.update_show(shard, show.tmdb_id, patch).await {
                    tracing::warn!(shard, tmdb_id = show.tmdb_id, error = %e, "show update failed");
                }
            } else {
                tracing::debug!(shard, tmdb_id = show.tmdb_id, title = %show.title, "show did not resolve");
            }
        }

        // The permit stays held through the episode waves, so the gate caps
        // shows in flight, episodes included.
        let mut incomplete = Vec::new();
        for season in &show.seasons {
            for episode in &season.episodes {
                if cancel.is_cancelled() {
                    return;
                }
                if !episode.is_complete() {
                    incomplete.push((season.season_number, episode.episode_number));
                }
            }
        }

        let wave_size = self.config.reconcile.max_concurrent_units;
        for wave in incomplete.chunks(wave_size) {
            if cancel.is_cancelled() {
                return;
            }
            join_all(
                wave.iter()
                    .map(|&(season, episode)| self.episode_unit(shard, &show, season, episode)),
            )
            .await;
        }

        // One unit of progress per show, episodes included.
        done.fetch_add(1, Ordering::Relaxed);
    }

    async fn episode_unit(&self, shard: ShardId, show: &StoredShow, season: u32, episode: u32) {
        let hint = MediaHint {
            title: show.title.clone(),
            year: show.release_year,
            season: Some(season),
            episode: Some(episode),
            external_id_hint: show.imdb_id.clone(),
            ..Default::default()
        };
        let Resolution::Resolved(meta) = self.resolver.resolve_hint(&hint).await else {
            tracing::debug!(shard, tmdb_id = show.tmdb_id, season, episode, "episode did not resolve");
            return;
        };
        let Some(patch) = EpisodePatch::from_metadata(&meta) else {
            return;
        };
        if let Err(e) = self
            .store
            .update_episode(shard, show.tmdb_id, season, episode, patch)
            .await
        {
            tracing::warn!(
                shard,
                tmdb_id = show.tmdb_id,
                season,
                episode,
                error = %e,
                "episode update failed"
            );
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ProviderConfig, ReconcileConfig};
    use crate::resolver::{NoOpFilenameParser, NoOpReferenceEncoder, Resolver};
    use crate::store::{MemoryStore, StoredEpisode, StoredSeason};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_with_units(
        primary: &MockServer,
        secondary: &MockServer,
        units: usize,
    ) -> Arc<Config> {
        Arc::new(Config {
            providers: ProviderConfig {
                cinemeta_base_url: primary.uri(),
                tmdb_base_url: secondary.uri(),
                tmdb_api_key: "test-key".into(),
                ..Default::default()
            },
            reconcile: ReconcileConfig {
                max_concurrent_units: units,
                progress_interval: Duration::from_millis(50),
            },
        })
    }

    fn config_for(primary: &MockServer, secondary: &MockServer) -> Arc<Config> {
        config_with_units(primary, secondary, 4)
    }

    fn reconciler_for(
        primary: &MockServer,
        secondary: &MockServer,
        store: Arc<MemoryStore>,
    ) -> Reconciler<MemoryStore> {
        let config = config_for(primary, secondary);
        let resolver = Arc::new(
            Resolver::new(
                Arc::clone(&config),
                Arc::new(NoOpFilenameParser),
                Arc::new(NoOpReferenceEncoder),
            )
            .unwrap(),
        );
        Reconciler::new(resolver, store, config)
    }

    fn complete_movie(id: i64, title: &str) -> StoredMovie {
        StoredMovie {
            tmdb_id: id,
            title: title.into(),
            cast: vec!["someone".into()],
            description: "desc".into(),
            genres: vec!["Drama".into()],
            logo: "http://img/logo.png".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn complete_records_skip_the_network() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&primary)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&secondary)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.insert_movie(0, complete_movie(1, "Inception"));
        store.insert_movie(0, complete_movie(2, "Interstellar"));

        let reconciler = reconciler_for(&primary, &secondary, Arc::clone(&store));
        let mut events = reconciler.subscribe();

        let report = reconciler
            .run(CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.done, 2);
        assert_eq!(report.total, 2);

        // Progress ticks may precede completion; the terminal event is what
        // matters here.
        loop {
            if let Event::Completed { done, total, .. } = events.recv().await.unwrap() {
                assert_eq!(done, 2);
                assert_eq!(total, 2);
                break;
            }
        }
    }

    #[tokio::test]
    async fn incomplete_movie_is_repaired_from_secondary() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"metas": []})))
            .mount(&primary)
            .await;
        Mock::given(method("GET"))
            .and(path("/search/movie"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": 27205, "title": "Inception", "release_date": "2010-07-16"}]
            })))
            .mount(&secondary)
            .await;
        Mock::given(method("GET"))
            .and(path("/movie/27205"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 27205, "title": "Inception", "overview": "A thief.",
                "release_date": "2010-07-16", "vote_average": 8.4,
                "genres": [{"name": "Action"}],
                "external_ids": {"imdb_id": "tt1375666"},
                "credits": {"cast": [{"name": "Leonardo DiCaprio"}]},
                "images": {"logos": [{"file_path": "/logo.png", "iso_639_1": "en"}]}
            })))
            .mount(&secondary)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.insert_movie(0, StoredMovie {
            tmdb_id: 27205,
            title: "Inception".into(),
            release_year: Some(2010),
            ..Default::default()
        });

        let reconciler = reconciler_for(&primary, &secondary, Arc::clone(&store));
        let report = reconciler
            .run(CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.done, 1);

        let repaired = store.movie(0, 27205).unwrap();
        assert!(repaired.is_complete());
        assert_eq!(repaired.imdb_id.as_deref(), Some("tt1375666"));
        assert_eq!(repaired.cast, vec!["Leonardo DiCaprio"]);
    }

    #[tokio::test]
    async fn unresolved_records_still_count_toward_progress() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"metas": []})))
            .mount(&primary)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .mount(&secondary)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.insert_movie(0, StoredMovie {
            tmdb_id: 7,
            title: "No Such Film".into(),
            ..Default::default()
        });

        let reconciler = reconciler_for(&primary, &secondary, Arc::clone(&store));
        let report = reconciler
            .run(CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.done, 1);
        assert_eq!(report.total, 1);
        // Record untouched
        assert!(!store.movie(0, 7).unwrap().is_complete());
    }

    #[tokio::test]
    async fn show_pass_repairs_record_and_episodes() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta/movie/tt0944947.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&primary)
            .await;
        Mock::given(method("GET"))
            .and(path("/meta/series/tt0944947.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {
                    "id": "tt0944947", "type": "series", "name": "Game of Thrones",
                    "description": "desc", "genres": ["Drama"], "imdbRating": "9.2",
                    "cast": ["Peter Dinklage"], "releaseInfo": "2011–2019",
                    "videos": [
                        {"season": 1, "episode": 1, "title": "Winter Is Coming",
                         "overview": "ep one", "thumbnail": "http://img/e1.jpg",
                         "released": "2011-04-17T05:00:00.000Z"},
                        {"season": 1, "episode": 2, "title": "The Kingsroad",
                         "overview": "ep two", "thumbnail": "http://img/e2.jpg",
                         "released": "2011-04-24T05:00:00.000Z"}
                    ]
                }
            })))
            .mount(&primary)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.insert_show(0, StoredShow {
            tmdb_id: 1399,
            imdb_id: Some("tt0944947".into()),
            title: "Game of Thrones".into(),
            release_year: Some(2011),
            seasons: vec![StoredSeason {
                season_number: 1,
                episodes: vec![
                    StoredEpisode { episode_number: 1, ..Default::default() },
                    StoredEpisode { episode_number: 2, ..Default::default() },
                ],
            }],
            ..Default::default()
        });

        let reconciler = reconciler_for(&primary, &secondary, Arc::clone(&store));
        let report = reconciler
            .run(CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        // One show, counted once regardless of episode count
        assert_eq!(report.done, 1);
        assert_eq!(report.total, 1);

        let show = store.show(0, 1399).unwrap();
        assert!(show.is_complete());
        assert_eq!(
            show.logo,
            "https://images.metahub.space/logo/medium/tt0944947/img"
        );
        let eps = &show.seasons[0].episodes;
        assert_eq!(eps[0].overview, "ep one");
        assert_eq!(eps[1].overview, "ep two");
        assert!(eps[0].is_complete());
        assert!(eps[1].is_complete());
    }

    #[tokio::test]
    async fn complete_show_with_incomplete_episodes_only_fills_episodes() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta/series/tt0944947.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {
                    "id": "tt0944947", "type": "series", "name": "Game of Thrones",
                    "videos": [
                        {"season": 1, "episode": 2, "title": "The Kingsroad",
                         "overview": "ep two", "thumbnail": "http://img/e2.jpg",
                         "released": "2011-04-24T05:00:00.000Z"}
                    ]
                }
            })))
            .mount(&primary)
            .await;
        // The kind probe tries the movie sub-resource first.
        Mock::given(method("GET"))
            .and(path("/meta/movie/tt0944947.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&primary)
            .await;

        let complete_episode = StoredEpisode {
            episode_number: 1,
            overview: "done".into(),
            released: "2011-04-17T05:00:00.000Z".into(),
            episode_backdrop: "http://img/e1.jpg".into(),
        };
        let store = Arc::new(MemoryStore::new());
        store.insert_show(0, StoredShow {
            tmdb_id: 1399,
            imdb_id: Some("tt0944947".into()),
            title: "Game of Thrones".into(),
            cast: vec!["Peter Dinklage".into()],
            description: "desc".into(),
            genres: vec!["Drama".into()],
            logo: "http://img/logo.png".into(),
            seasons: vec![StoredSeason {
                season_number: 1,
                episodes: vec![
                    complete_episode.clone(),
                    StoredEpisode { episode_number: 2, ..Default::default() },
                ],
            }],
            ..Default::default()
        });

        let reconciler = reconciler_for(&primary, &secondary, Arc::clone(&store));
        reconciler.run(CancellationToken::new()).await.unwrap().unwrap();

        let show = store.show(0, 1399).unwrap();
        // Show record untouched, complete episode untouched
        assert_eq!(show.logo, "http://img/logo.png");
        assert_eq!(show.seasons[0].episodes[0], complete_episode);
        assert_eq!(show.seasons[0].episodes[1].overview, "ep two");
    }

    #[tokio::test]
    async fn pre_cancelled_run_ends_silently() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&primary)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.insert_movie(0, StoredMovie {
            tmdb_id: 1,
            title: "Pending".into(),
            ..Default::default()
        });

        let reconciler = reconciler_for(&primary, &secondary, Arc::clone(&store));
        let mut events = reconciler.subscribe();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = reconciler.run(cancel).await.unwrap();
        assert!(outcome.is_none());

        // No completion event was emitted
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        // Record untouched
        assert!(!store.movie(0, 1).unwrap().is_complete());
    }

    #[tokio::test]
    async fn mid_run_cancel_suppresses_the_report() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;
        // Slow provider keeps the first unit in flight while we cancel.
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"metas": []}))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&primary)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"results": []}))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&secondary)
            .await;

        let store = Arc::new(MemoryStore::new());
        for id in 1..=6 {
            store.insert_movie(0, StoredMovie {
                tmdb_id: id,
                title: format!("Film {id}"),
                ..Default::default()
            });
        }

        let reconciler = reconciler_for(&primary, &secondary, Arc::clone(&store));
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let outcome = reconciler.run(cancel).await.unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn progress_events_are_emitted_during_the_run() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"metas": []}))
                    .set_delay(Duration::from_millis(150)),
            )
            .mount(&primary)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"results": []}))
                    .set_delay(Duration::from_millis(150)),
            )
            .mount(&secondary)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.insert_movie(0, StoredMovie {
            tmdb_id: 1,
            title: "Slow Film".into(),
            ..Default::default()
        });

        let reconciler = reconciler_for(&primary, &secondary, Arc::clone(&store));
        let mut events = reconciler.subscribe();
        reconciler.run(CancellationToken::new()).await.unwrap().unwrap();

        // With a 50ms interval and ~300ms of provider latency, at least one
        // progress tick lands before completion.
        let mut saw_progress = false;
        let mut saw_completed = false;
        while let Ok(event) = events.try_recv() {
            match event {
                Event::Progress { total, .. } => {
                    assert_eq!(total, 1);
                    saw_progress = true;
                }
                Event::Completed { done, total, .. } => {
                    assert_eq!(done, 1);
                    assert_eq!(total, 1);
                    saw_completed = true;
                }
            }
        }
        assert!(saw_progress);
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn movies_pass_runs_before_shows_pass() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;

        let store = Arc::new(MemoryStore::new());
        store.insert_movie(0, complete_movie(1, "Film"));
        store.insert_show(1, StoredShow {
            tmdb_id: 2,
            title: "Show".into(),
            cast: vec!["someone".into()],
            description: "desc".into(),
            genres: vec!["Drama".into()],
            logo: "http://img/logo.png".into(),
            ..Default::default()
        });

        let reconciler = reconciler_for(&primary, &secondary, Arc::clone(&store));
        let report = reconciler
            .run(CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.done, 2);
    }

    /// Store wrapper recording the order of episode writes.
    struct TrackingStore {
        inner: MemoryStore,
        episode_updates: std::sync::Mutex<Vec<i64>>,
    }

    impl TrackingStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                episode_updates: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl MediaStore for TrackingStore {
        async fn shards(&self) -> crate::error::Result<Vec<ShardId>> {
            self.inner.shards().await
        }

        async fn count_movies(&self, shard: ShardId) -> crate::error::Result<u64> {
            self.inner.count_movies(shard).await
        }

        async fn count_shows(&self, shard: ShardId) -> crate::error::Result<u64> {
            self.inner.count_shows(shard).await
        }

        async fn movies(
            &self,
            shard: ShardId,
        ) -> crate::error::Result<futures::stream::BoxStream<'static, crate::error::Result<StoredMovie>>>
        {
            self.inner.movies(shard).await
        }

        async fn shows(
            &self,
            shard: ShardId,
        ) -> crate::error::Result<futures::stream::BoxStream<'static, crate::error::Result<StoredShow>>>
        {
            self.inner.shows(shard).await
        }

        async fn update_movie(
            &self,
            shard: ShardId,
            tmdb_id: i64,
            patch: RecordPatch,
        ) -> crate::error::Result<()> {
            self.inner.update_movie(shard, tmdb_id, patch).await
        }

        async fn update_show(
            &self,
            shard: ShardId,
            tmdb_id: i64,
            patch: RecordPatch,
        ) -> crate::error::Result<()> {
            self.inner.update_show(shard, tmdb_id, patch).await
        }

        async fn update_episode(
            &self,
            shard: ShardId,
            tmdb_id: i64,
            season: u32,
            episode: u32,
            patch: EpisodePatch,
        ) -> crate::error::Result<()> {
            self.episode_updates.lock().unwrap().push(tmdb_id);
            self.inner
                .update_episode(shard, tmdb_id, season, episode, patch)
                .await
        }
    }

    fn complete_show_with_open_episodes(tmdb_id: i64, imdb_id: &str, title: &str) -> StoredShow {
        StoredShow {
            tmdb_id,
            imdb_id: Some(imdb_id.into()),
            title: title.into(),
            cast: vec!["someone".into()],
            description: "desc".into(),
            genres: vec!["Drama".into()],
            logo: "http://img/logo.png".into(),
            seasons: vec![StoredSeason {
                season_number: 1,
                episodes: vec![
                    StoredEpisode { episode_number: 1, ..Default::default() },
                    StoredEpisode { episode_number: 2, ..Default::default() },
                ],
            }],
            ..Default::default()
        }
    }

    async fn mount_slow_series_meta(server: &MockServer, imdb_id: &str, title: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/meta/series/{imdb_id}.json")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "meta": {
                            "id": imdb_id, "type": "series", "name": title,
                            "videos": [
                                {"season": 1, "episode": 1, "title": "One",
                                 "overview": "ep one", "thumbnail": "http://img/1.jpg",
                                 "released": "2020-01-01T05:00:00.000Z"},
                                {"season": 1, "episode": 2, "title": "Two",
                                 "overview": "ep two", "thumbnail": "http://img/2.jpg",
                                 "released": "2020-01-08T05:00:00.000Z"}
                            ]
                        }
                    }))
                    .set_delay(Duration::from_millis(50)),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn episode_waves_stay_inside_the_unit_gate() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;
        mount_slow_series_meta(&primary, "tt0000001", "First Show").await;
        mount_slow_series_meta(&primary, "tt0000002", "Second Show").await;

        let inner = MemoryStore::new();
        inner.insert_show(0, complete_show_with_open_episodes(10, "tt0000001", "First Show"));
        inner.insert_show(0, complete_show_with_open_episodes(20, "tt0000002", "Second Show"));
        let store = Arc::new(TrackingStore::new(inner));

        // A single unit slot: the second show must wait until the first
        // show's episode waves have drained, not just until its record check.
        let config = config_with_units(&primary, &secondary, 1);
        let resolver = Arc::new(
            Resolver::new(
                Arc::clone(&config),
                Arc::new(NoOpFilenameParser),
                Arc::new(NoOpReferenceEncoder),
            )
            .unwrap(),
        );
        let reconciler = Reconciler::new(resolver, Arc::clone(&store), config);
        let report = reconciler
            .run(CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.done, 2);

        let updates = store.episode_updates.lock().unwrap().clone();
        assert_eq!(updates.len(), 4);
        // One show's writes fully precede the other's
        assert_eq!(updates[0], updates[1]);
        assert_eq!(updates[2], updates[3]);
        assert_ne!(updates[0], updates[2]);
    }

    #[tokio::test]
    async fn cancel_between_waves_stops_remaining_episodes() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;
        // Primary knows nothing; the whole chain runs on the secondary.
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"metas": []})))
            .mount(&primary)
            .await;
        Mock::given(method("GET"))
            .and(path("/search/tv"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": 600, "name": "Long Show", "first_air_date": "2020-01-01"}]
            })))
            .mount(&secondary)
            .await;
        Mock::given(method("GET"))
            .and(path("/tv/600"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 600, "name": "Long Show", "first_air_date": "2020-01-01"
            })))
            .mount(&secondary)
            .await;
        for episode in 1..=2 {
            Mock::given(method("GET"))
                .and(path(format!("/tv/600/season/1/episode/{episode}")))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({
                            "name": format!("Episode {episode}"),
                            "overview": "ep",
                            "still_path": "/still.jpg",
                            "air_date": "2020-05-01"
                        }))
                        .set_delay(Duration::from_millis(150)),
                )
                .mount(&secondary)
                .await;
        }
        // The second wave must never launch once cancellation lands.
        Mock::given(method("GET"))
            .and(path("/tv/600/season/1/episode/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Episode 3"})))
            .expect(0)
            .mount(&secondary)
            .await;

        // Ten episodes, three incomplete; wave size 2 puts the third episode
        // in a second wave.
        let mut episodes: Vec<StoredEpisode> = (1..=3)
            .map(|n| StoredEpisode { episode_number: n, ..Default::default() })
            .collect();
        episodes.extend((4..=10).map(|n| StoredEpisode {
            episode_number: n,
            overview: "done".into(),
            released: "2020-01-01T05:00:00.000Z".into(),
            episode_backdrop: "http://img/done.jpg".into(),
        }));
        let store = Arc::new(MemoryStore::new());
        store.insert_show(0, StoredShow {
            tmdb_id: 600,
            title: "Long Show".into(),
            cast: vec!["someone".into()],
            description: "desc".into(),
            genres: vec!["Drama".into()],
            logo: "http://img/logo.png".into(),
            seasons: vec![StoredSeason { season_number: 1, episodes }],
            ..Default::default()
        });

        let config = config_with_units(&primary, &secondary, 2);
        let resolver = Arc::new(
            Resolver::new(
                Arc::clone(&config),
                Arc::new(NoOpFilenameParser),
                Arc::new(NoOpReferenceEncoder),
            )
            .unwrap(),
        );
        let reconciler = Reconciler::new(resolver, Arc::clone(&store), config);
        let mut events = reconciler.subscribe();

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            canceller.cancel();
        });

        let outcome = reconciler.run(cancel).await.unwrap();
        assert!(outcome.is_none());

        // The in-flight wave ran to completion; nothing after it did.
        let show = store.show(0, 600).unwrap();
        let eps = &show.seasons[0].episodes;
        assert!(eps[0].is_complete());
        assert!(eps[1].is_complete());
        assert!(!eps[2].is_complete());

        // No completion event either
        while let Ok(event) = events.try_recv() {
            assert!(matches!(event, Event::Progress { .. }));
        }
    }
}
