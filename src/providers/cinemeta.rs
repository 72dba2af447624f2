//! Primary provider client — community metadata catalog keyed by IMDb ids.

use crate::config::ProviderConfig;
use crate::error::Result;
use crate::normalize;
use crate::types::{MediaKind, SearchHit};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Client for the primary provider's catalog and meta endpoints
pub(crate) struct CinemetaClient {
    http: reqwest::Client,
    base_url: String,
    gate: Arc<Semaphore>,
}

impl CinemetaClient {
    pub(crate) fn new(config: &ProviderConfig, gate: Arc<Semaphore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.cinemeta_base_url.trim_end_matches('/').to_string(),
            gate,
        })
    }

    /// Search the catalog for a title, returning the first candidate.
    pub(crate) async fn search(&self, query: &str, kind: MediaKind) -> Option<SearchHit> {
        let catalog = match kind {
            MediaKind::Movie => "movie",
            MediaKind::Tv => "series",
        };
        let url = format!(
            "{}/catalog/{}/imdb/search={}.json",
            self.base_url,
            catalog,
            urlencoding::encode(query)
        );

        let response: CatalogResponse = self.get_json(&url).await?;
        let meta = response.metas.unwrap_or_default().into_iter().next()?;
        let id = meta.imdb_id.or(meta.id).unwrap_or_default();
        if id.is_empty() {
            return None;
        }
        Some(SearchHit {
            id,
            title: meta.name.unwrap_or_default(),
            year: normalize::extract_year(meta.release_info.as_deref()),
        })
    }

    /// Fetch full meta for an id.
    ///
    /// The caller does not always know the kind in advance, so both the
    /// movie and series sub-resources are probed, movie first; the first one
    /// yielding a payload wins.
    pub(crate) async fn detail(&self, imdb_id: &str) -> Option<CinemetaMeta> {
        for sub_resource in ["movie", "series"] {
            let url = format!("{}/meta/{}/{}.json", self.base_url, sub_resource, imdb_id);
            if let Some(envelope) = self.get_json::<MetaEnvelope>(&url).await {
                if let Some(meta) = envelope.meta {
                    return Some(meta);
                }
            }
        }
        None
    }

    /// Fetch the episode fragment for (season, episode) by scanning the
    /// series meta's videos array.
    pub(crate) async fn episode(
        &self,
        imdb_id: &str,
        season: u32,
        episode: u32,
    ) -> Option<CinemetaVideo> {
        let url = format!("{}/meta/series/{}.json", self.base_url, imdb_id);
        let envelope: MetaEnvelope = self.get_json(&url).await?;
        envelope
            .meta?
            .videos?
            .into_iter()
            .find(|v| number_matches(v.season.as_ref(), season) && number_matches(v.episode.as_ref(), episode))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Option<T> {
        let _permit = self.gate.acquire().await.ok()?;

        let response = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Cinemeta request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::debug!(url = %url, status = %response.status(), "Cinemeta returned non-success status");
            return None;
        }
        match response.json::<T>().await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Cinemeta payload was malformed");
                None
            }
        }
    }
}

/// Season/episode values arrive as either JSON numbers or strings.
fn number_matches(value: Option<&serde_json::Value>, expected: u32) -> bool {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_u64() == Some(u64::from(expected)),
        Some(serde_json::Value::String(s)) => s == &expected.to_string(),
        _ => false,
    }
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct CatalogResponse {
    pub(crate) metas: Option<Vec<CatalogMeta>>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct CatalogMeta {
    pub(crate) id: Option<String>,
    pub(crate) imdb_id: Option<String>,
    pub(crate) name: Option<String>,
    #[serde(rename = "releaseInfo")]
    pub(crate) release_info: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct MetaEnvelope {
    pub(crate) meta: Option<CinemetaMeta>,
}

/// Raw meta document; every field is optional at the boundary.
#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct CinemetaMeta {
    pub(crate) id: Option<String>,
    pub(crate) imdb_id: Option<String>,
    #[serde(rename = "type")]
    pub(crate) kind: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) genres: Option<Vec<String>>,
    pub(crate) genre: Option<Vec<String>>,
    pub(crate) year: Option<serde_json::Value>,
    #[serde(rename = "releaseInfo")]
    pub(crate) release_info: Option<String>,
    pub(crate) released: Option<String>,
    #[serde(rename = "imdbRating")]
    pub(crate) imdb_rating: Option<serde_json::Value>,
    pub(crate) moviedb_id: Option<i64>,
    pub(crate) cast: Option<Vec<String>>,
    pub(crate) videos: Option<Vec<CinemetaVideo>>,
}

/// Raw episode entry from a series meta's videos array
#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct CinemetaVideo {
    pub(crate) season: Option<serde_json::Value>,
    pub(crate) episode: Option<serde_json::Value>,
    pub(crate) title: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) thumbnail: Option<String>,
    pub(crate) overview: Option<String>,
    pub(crate) released: Option<String>,
}
