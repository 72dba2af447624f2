//! Normalization of raw provider payloads into [`CanonicalMetadata`].
//!
//! All field fallbacks, image URL construction, and year/rating coercion live
//! here, so the provider clients stay thin deserializers and the resolver
//! never touches raw shapes.

use crate::config::ProviderConfig;
use crate::providers::cinemeta::{CinemetaMeta, CinemetaVideo};
use crate::providers::tmdb::{
    TmdbCredits, TmdbEpisodeDetails, TmdbImages, TmdbMovieDetails, TmdbTvDetails,
};
use crate::types::{CanonicalMetadata, EpisodeDetails, MediaKind, Provider};
use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

/// Extract the first four-digit year from a free-form release string.
///
/// Provider release fields carry anything from a bare year to ranges like
/// "2019–2021" or placeholders like "N/A". The first four-digit run wins;
/// 0 means unknown.
pub fn extract_year(value: Option<&str>) -> i32 {
    static YEAR: OnceLock<Regex> = OnceLock::new();
    let re = YEAR.get_or_init(|| Regex::new(r"\d{4}").unwrap_or_else(|_| unreachable!()));
    value
        .and_then(|s| re.find(s))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Build a TMDb image URL for a path at the given size, empty when absent.
pub(crate) fn tmdb_image(config: &ProviderConfig, path: Option<&str>, size: &str) -> String {
    match path {
        Some(p) if !p.is_empty() => {
            format!("{}/{}{}", config.tmdb_image_base_url.trim_end_matches('/'), size, p)
        }
        _ => String::new(),
    }
}

/// Pick a logo from TMDb images: English-tagged first, then any, else empty.
pub(crate) fn tmdb_logo(config: &ProviderConfig, images: Option<&TmdbImages>) -> String {
    let logos = match images.and_then(|i| i.logos.as_ref()) {
        Some(logos) if !logos.is_empty() => logos,
        _ => return String::new(),
    };
    let preferred = logos
        .iter()
        .find(|l| l.iso_639_1.as_deref() == Some("en"))
        .or_else(|| logos.first());
    tmdb_image(
        config,
        preferred.and_then(|l| l.file_path.as_deref()),
        "original",
    )
}

/// Derived artwork triple (poster, backdrop, logo) for a primary-provider id.
///
/// All three are empty when the id is empty; the templates otherwise always
/// produce a URL, valid or not, and callers treat a broken image like any
/// other missing field.
pub(crate) fn metahub_images(config: &ProviderConfig, imdb_id: &str) -> (String, String, String) {
    if imdb_id.is_empty() {
        return (String::new(), String::new(), String::new());
    }
    let base = config.metahub_base_url.trim_end_matches('/');
    (
        format!("{base}/poster/small/{imdb_id}/img"),
        format!("{base}/background/medium/{imdb_id}/img"),
        format!("{base}/logo/medium/{imdb_id}/img"),
    )
}

/// Cast display names from TMDb credits, falling back to original names.
pub(crate) fn tmdb_cast(credits: Option<&TmdbCredits>) -> Vec<String> {
    credits
        .and_then(|c| c.cast.as_ref())
        .map(|cast| {
            cast.iter()
                .filter_map(|member| {
                    member
                        .name
                        .clone()
                        .filter(|n| !n.is_empty())
                        .or_else(|| member.original_name.clone().filter(|n| !n.is_empty()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn tmdb_genres(genres: Option<&Vec<crate::providers::tmdb::TmdbGenre>>) -> Vec<String> {
    genres
        .map(|gs| gs.iter().filter_map(|g| g.name.clone()).collect())
        .unwrap_or_default()
}

/// Canonical record from raw TMDb movie details
pub(crate) fn movie_from_tmdb(config: &ProviderConfig, raw: &TmdbMovieDetails) -> CanonicalMetadata {
    CanonicalMetadata {
        provider: Provider::Tmdb,
        imdb_id: raw
            .external_ids
            .as_ref()
            .and_then(|e| e.imdb_id.clone())
            .filter(|id| !id.is_empty()),
        tmdb_id: raw.id,
        title: raw.title.clone().unwrap_or_default(),
        year: extract_year(raw.release_date.as_deref()),
        rating: raw.vote_average.unwrap_or(0.0),
        description: raw.overview.clone().unwrap_or_default(),
        genres: tmdb_genres(raw.genres.as_ref()),
        cast: tmdb_cast(raw.credits.as_ref()),
        poster: tmdb_image(config, raw.poster_path.as_deref(), "w500"),
        backdrop: tmdb_image(config, raw.backdrop_path.as_deref(), "original"),
        logo: tmdb_logo(config, raw.images.as_ref()),
        kind: MediaKind::Movie,
        episode: None,
    }
}

/// Canonical show record from raw TMDb TV details
pub(crate) fn show_from_tmdb(config: &ProviderConfig, raw: &TmdbTvDetails) -> CanonicalMetadata {
    CanonicalMetadata {
        provider: Provider::Tmdb,
        imdb_id: raw
            .external_ids
            .as_ref()
            .and_then(|e| e.imdb_id.clone())
            .filter(|id| !id.is_empty()),
        tmdb_id: raw.id,
        title: raw.name.clone().unwrap_or_default(),
        year: extract_year(raw.first_air_date.as_deref()),
        rating: raw.vote_average.unwrap_or(0.0),
        description: raw.overview.clone().unwrap_or_default(),
        genres: tmdb_genres(raw.genres.as_ref()),
        cast: tmdb_cast(raw.credits.as_ref()),
        poster: tmdb_image(config, raw.poster_path.as_deref(), "w500"),
        backdrop: tmdb_image(config, raw.backdrop_path.as_deref(), "original"),
        logo: tmdb_logo(config, raw.images.as_ref()),
        kind: MediaKind::Tv,
        episode: None,
    }
}

/// Episode fragment from raw TMDb episode details
pub(crate) fn episode_from_tmdb(
    config: &ProviderConfig,
    raw: &TmdbEpisodeDetails,
    season: u32,
    episode: u32,
) -> EpisodeDetails {
    EpisodeDetails {
        season,
        episode,
        title: raw
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("S{season}E{episode}")),
        overview: raw.overview.clone().unwrap_or_default(),
        backdrop: tmdb_image(config, raw.still_path.as_deref(), "original"),
        released_at: raw
            .air_date
            .as_deref()
            .map(format_release_timestamp)
            .unwrap_or_default(),
    }
}

/// Placeholder fragment used when the secondary provider has no record of
/// the episode but the show itself resolved.
pub(crate) fn fallback_episode(show_title: &str, season: u32, episode: u32) -> EpisodeDetails {
    EpisodeDetails {
        season,
        episode,
        title: format!("{show_title} S{season}E{episode}"),
        overview: String::new(),
        backdrop: String::new(),
        released_at: String::new(),
    }
}

// Bare air dates become full timestamps pinned to 05:00 UTC, matching the
// format the primary provider emits.
fn format_release_timestamp(date: &str) -> String {
    match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(_) => format!("{date}T05:00:00.000Z"),
        Err(_) => String::new(),
    }
}

/// Canonical record from a raw primary-provider meta document.
///
/// `requested` supplies the kind when the payload omits its own.
pub(crate) fn record_from_cinemeta(
    config: &ProviderConfig,
    raw: &CinemetaMeta,
    requested: MediaKind,
) -> CanonicalMetadata {
    let imdb_id = raw
        .imdb_id
        .clone()
        .or_else(|| raw.id.clone())
        .filter(|id| !id.is_empty());
    let (poster, backdrop, logo) = metahub_images(config, imdb_id.as_deref().unwrap_or(""));
    let kind = match raw.kind.as_deref() {
        Some("movie") => MediaKind::Movie,
        Some("series") | Some("tv") => MediaKind::Tv,
        _ => requested,
    };

    CanonicalMetadata {
        provider: Provider::Cinemeta,
        imdb_id,
        tmdb_id: raw.moviedb_id,
        title: raw.name.clone().unwrap_or_default(),
        year: cinemeta_year(raw),
        rating: cinemeta_rating(raw.imdb_rating.as_ref()),
        description: raw.description.clone().unwrap_or_default(),
        genres: raw
            .genres
            .clone()
            .or_else(|| raw.genre.clone())
            .unwrap_or_default(),
        cast: raw.cast.clone().unwrap_or_default(),
        poster,
        backdrop,
        logo,
        kind,
        episode: None,
    }
}

/// Episode fragment from a primary-provider videos entry
pub(crate) fn episode_from_cinemeta(
    raw: &CinemetaVideo,
    season: u32,
    episode: u32,
) -> EpisodeDetails {
    EpisodeDetails {
        season,
        episode,
        title: raw
            .title
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| raw.name.clone().filter(|n| !n.is_empty()))
            .unwrap_or_else(|| format!("S{season}E{episode}")),
        overview: raw.overview.clone().unwrap_or_default(),
        backdrop: raw.thumbnail.clone().unwrap_or_default(),
        released_at: raw.released.clone().unwrap_or_default(),
    }
}

// Year can live in three places with three shapes; probe in order of
// reliability.
fn cinemeta_year(raw: &CinemetaMeta) -> i32 {
    if let Some(value) = raw.year.as_ref() {
        let year = match value {
            serde_json::Value::Number(n) => n.as_i64().map(|y| y as i32).unwrap_or(0),
            serde_json::Value::String(s) => extract_year(Some(s)),
            _ => 0,
        };
        if year != 0 {
            return year;
        }
    }
    let from_release_info = extract_year(raw.release_info.as_deref());
    if from_release_info != 0 {
        return from_release_info;
    }
    extract_year(raw.released.as_deref())
}

fn cinemeta_rating(value: Option<&serde_json::Value>) -> f64 {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}
