//! Core value types, events, and collaborator seams

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Kind of media a record describes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Feature film
    Movie,
    /// Television show (episode-addressable)
    Tv,
}

impl MediaKind {
    /// Wire name used in canonical records ("movie" / "tv")
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Tv => "tv",
        }
    }
}

/// Which external provider a canonical record came from
///
/// A record is stamped with exactly one provider; fields from the two
/// providers are never mixed in a single record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Primary provider — community metadata catalog keyed by IMDb ids
    Cinemeta,
    /// Secondary provider — TMDb
    Tmdb,
}

/// Structured guess produced by the external filename parser
///
/// Immutable once produced; one hint per filename.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaHint {
    /// Parsed title (empty when the parser found none)
    pub title: String,
    /// Season number, when the filename names one
    pub season: Option<u32>,
    /// Episode number, when the filename names one
    pub episode: Option<u32>,
    /// Release year, when the filename names one
    pub year: Option<i32>,
    /// Resolution/quality token (e.g. "1080p"); empty when absent
    pub quality: String,
    /// Provider id embedded in the filename (e.g. "tt0944947"), if any
    pub external_id_hint: Option<String>,
}

/// First search candidate returned by a provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Provider-native identifier (IMDb "tt..." or numeric TMDb id)
    pub id: String,
    /// Candidate title
    pub title: String,
    /// Release year, 0 when unknown
    pub year: i32,
}

/// Episode-level metadata fragment attached to a TV resolution
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeDetails {
    /// Season number the fragment was resolved for
    pub season: u32,
    /// Episode number the fragment was resolved for
    pub episode: u32,
    /// Episode title (falls back to "SxEy"-style labels when absent upstream)
    pub title: String,
    /// Episode synopsis, empty when unknown
    pub overview: String,
    /// Episode still/backdrop URL, empty when unknown
    pub backdrop: String,
    /// Release timestamp string, empty when unknown
    pub released_at: String,
}

/// The single normalized metadata shape consumed by all callers
///
/// Both providers' raw response shapes are erased by the normalizer; this is
/// the only value type callers ever see.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMetadata {
    /// Provider this record was resolved from (exactly one, never mixed)
    pub provider: Provider,
    /// Primary-provider (IMDb) id, when known
    pub imdb_id: Option<String>,
    /// TMDb id, when known
    pub tmdb_id: Option<i64>,
    /// Display title
    pub title: String,
    /// Release year, 0 when unknown
    pub year: i32,
    /// Aggregate rating, 0.0 when unknown
    pub rating: f64,
    /// Plot/overview, empty when unknown
    pub description: String,
    /// Genre names, in provider order
    pub genres: Vec<String>,
    /// Cast display names, in provider order
    pub cast: Vec<String>,
    /// Poster URL, empty when unknown
    pub poster: String,
    /// Backdrop URL, empty when unknown
    pub backdrop: String,
    /// Logo URL, empty when unknown
    pub logo: String,
    /// Movie or TV
    pub kind: MediaKind,
    /// Episode fragment, present only for episode-level TV resolutions
    pub episode: Option<EpisodeDetails>,
}

impl CanonicalMetadata {
    /// Attach an episode fragment, marking the record as a TV resolution.
    pub(crate) fn with_episode(mut self, episode: EpisodeDetails) -> Self {
        self.kind = MediaKind::Tv;
        self.episode = Some(episode);
        self
    }
}

/// Terminal outcome of one resolution request
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// A usable record was produced by one of the providers
    Resolved(CanonicalMetadata),
    /// Both providers failed to yield a usable record
    Unresolved,
}

impl Resolution {
    /// Whether this outcome carries a record
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }

    /// Convert into `Option`, discarding the unresolved marker
    pub fn into_option(self) -> Option<CanonicalMetadata> {
        match self {
            Resolution::Resolved(meta) => Some(meta),
            Resolution::Unresolved => None,
        }
    }
}

/// Resolution result for the single-file path, with caller context attached
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedItem {
    /// The normalized metadata record
    pub metadata: CanonicalMetadata,
    /// Quality token carried over from the filename hint
    pub quality: String,
    /// Opaque reference token for the originating message, when encoding succeeded
    pub reference_token: Option<String>,
}

/// Events broadcast by the batch reconciler
///
/// Consumed by the (external) front-end for progress rendering. Cancellation
/// emits nothing: a cancelled run ends silently without a completion event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Periodic progress snapshot
    Progress {
        /// Work units finished so far
        done: u64,
        /// Total work units in this run
        total: u64,
        /// Seconds elapsed since the run started
        elapsed_secs: u64,
    },
    /// Final summary of an uncancelled run
    Completed {
        /// Work units finished
        done: u64,
        /// Total work units
        total: u64,
        /// Seconds the run took
        elapsed_secs: u64,
    },
}

/// Final summary returned by an uncancelled reconciliation run
#[derive(Clone, Debug, PartialEq)]
pub struct ReconcileReport {
    /// Work units finished (counted on attempt, not on success)
    pub done: u64,
    /// Total work units in the run
    pub total: u64,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

/// Caller context encoded into a reference token for the single-file path
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceContext {
    /// Channel the file was posted in
    pub channel_id: i64,
    /// Message carrying the file
    pub message_id: i64,
}

/// External filename tokenizer collaborator
///
/// Produces one immutable [`MediaHint`] per filename. A `None` return means
/// the filename could not be parsed and the item is skipped entirely.
pub trait FilenameParser: Send + Sync {
    /// Parse a filename into a structured hint
    fn parse(&self, filename: &str) -> Option<MediaHint>;
}

/// External reference-token encoder collaborator
///
/// Encoding failures are tolerated; the token is simply omitted from output.
pub trait ReferenceEncoder: Send + Sync {
    /// Encode caller context into an opaque token
    fn encode(&self, context: &ReferenceContext) -> Option<String>;
}
