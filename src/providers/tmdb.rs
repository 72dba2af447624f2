//! Secondary provider client — TMDb v3 API.

use crate::config::ProviderConfig;
use crate::error::Result;
use crate::normalize;
use crate::types::{MediaKind, SearchHit};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Client for TMDb search, detail, and episode endpoints
pub(crate) struct TmdbClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    language: String,
    region: String,
    gate: Arc<Semaphore>,
}

impl TmdbClient {
    pub(crate) fn new(config: &ProviderConfig, gate: Arc<Semaphore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.tmdb_base_url.trim_end_matches('/').to_string(),
            api_key: config.tmdb_api_key.clone(),
            language: config.language.clone(),
            region: config.region.clone(),
            gate,
        })
    }

    /// Search for a title, returning the first result.
    ///
    /// The year filter applies to movie searches only; TV searches ignore it
    /// because air-date ranges make the first-year filter unreliable.
    pub(crate) async fn search(
        &self,
        title: &str,
        kind: MediaKind,
        year: Option<i32>,
    ) -> Option<SearchHit> {
        let mut params: Vec<(&str, String)> = vec![("query", title.to_string())];
        let url = match kind {
            MediaKind::Movie => {
                params.push(("region", self.region.clone()));
                if let Some(year) = year {
                    params.push(("year", year.to_string()));
                }
                format!("{}/search/movie", self.base_url)
            }
            MediaKind::Tv => format!("{}/search/tv", self.base_url),
        };

        let response: TmdbSearchResponse = self.get_json(&url, &params).await?;
        let result = response.results.unwrap_or_default().into_iter().next()?;
        let id = result.id?;
        let date = result.release_date.or(result.first_air_date);
        Some(SearchHit {
            id: id.to_string(),
            title: result.title.or(result.name).unwrap_or_default(),
            year: normalize::extract_year(date.as_deref()),
        })
    }

    /// Fetch full movie details, with external ids, credits, and images
    /// appended in the same response.
    pub(crate) async fn movie_details(&self, id: i64) -> Option<TmdbMovieDetails> {
        let url = format!("{}/movie/{}", self.base_url, id);
        self.get_json(
            &url,
            &[("append_to_response", "external_ids,credits,images".to_string())],
        )
        .await
    }

    /// Fetch full TV details, with external ids, credits, and images appended.
    pub(crate) async fn tv_details(&self, id: i64) -> Option<TmdbTvDetails> {
        let url = format!("{}/tv/{}", self.base_url, id);
        self.get_json(
            &url,
            &[("append_to_response", "external_ids,credits,images".to_string())],
        )
        .await
    }

    /// Fetch details for a single episode of a show.
    pub(crate) async fn episode_details(
        &self,
        tv_id: i64,
        season: u32,
        episode: u32,
    ) -> Option<TmdbEpisodeDetails> {
        let url = format!(
            "{}/tv/{}/season/{}/episode/{}",
            self.base_url, tv_id, season, episode
        );
        self.get_json(&url, &[]).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        extra: &[(&str, String)],
    ) -> Option<T> {
        let _permit = self.gate.acquire().await.ok()?;

        let mut request = self
            .http
            .get(url)
            .query(&[("api_key", self.api_key.as_str()), ("language", self.language.as_str())]);
        for (name, value) in extra {
            request = request.query(&[(*name, value.as_str())]);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "TMDb request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::debug!(url = %url, status = %response.status(), "TMDb returned non-success status");
            return None;
        }
        match response.json::<T>().await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "TMDb payload was malformed");
                None
            }
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct TmdbSearchResponse {
    pub(crate) results: Option<Vec<TmdbSearchResult>>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct TmdbSearchResult {
    pub(crate) id: Option<i64>,
    pub(crate) title: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) release_date: Option<String>,
    pub(crate) first_air_date: Option<String>,
}

/// Raw movie details; every field is optional at the boundary.
#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct TmdbMovieDetails {
    pub(crate) id: Option<i64>,
    pub(crate) title: Option<String>,
    pub(crate) overview: Option<String>,
    pub(crate) release_date: Option<String>,
    pub(crate) vote_average: Option<f64>,
    pub(crate) poster_path: Option<String>,
    pub(crate) backdrop_path: Option<String>,
    pub(crate) genres: Option<Vec<TmdbGenre>>,
    pub(crate) external_ids: Option<TmdbExternalIds>,
    pub(crate) credits: Option<TmdbCredits>,
    pub(crate) images: Option<TmdbImages>,
}

/// Raw TV details; every field is optional at the boundary.
#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct TmdbTvDetails {
    pub(crate) id: Option<i64>,
    pub(crate) name: Option<String>,
    pub(crate) overview: Option<String>,
    pub(crate) first_air_date: Option<String>,
    pub(crate) vote_average: Option<f64>,
    pub(crate) poster_path: Option<String>,
    pub(crate) backdrop_path: Option<String>,
    pub(crate) genres: Option<Vec<TmdbGenre>>,
    pub(crate) external_ids: Option<TmdbExternalIds>,
    pub(crate) credits: Option<TmdbCredits>,
    pub(crate) images: Option<TmdbImages>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct TmdbGenre {
    pub(crate) name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct TmdbExternalIds {
    pub(crate) imdb_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct TmdbCredits {
    pub(crate) cast: Option<Vec<TmdbCastMember>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct TmdbCastMember {
    pub(crate) name: Option<String>,
    pub(crate) original_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct TmdbImages {
    pub(crate) logos: Option<Vec<TmdbImage>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct TmdbImage {
    pub(crate) file_path: Option<String>,
    pub(crate) iso_639_1: Option<String>,
}

/// Raw episode details
#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct TmdbEpisodeDetails {
    pub(crate) name: Option<String>,
    pub(crate) overview: Option<String>,
    pub(crate) still_path: Option<String>,
    pub(crate) air_date: Option<String>,
}
