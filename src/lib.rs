//! # mediameta
//!
//! Media metadata resolution and reconciliation library.
//!
//! The crate turns weak filename-derived hints into canonical metadata
//! records through a strict provider-fallback chain (a community catalog
//! keyed by IMDb ids first, TMDb second), and batch-repairs incomplete
//! records already sitting in a sharded store.
//!
//! ## Features
//!
//! - Provider fallback with one canonical record shape, never a mix of
//!   providers within a record
//! - Memoized lookup cache that remembers absent outcomes too, keeping
//!   repeated failures off the network
//! - One counting gate capping outbound provider calls across both providers
//! - Batch reconciliation over sharded movie and show stores with bounded
//!   work-unit concurrency, episode waves, cooperative cancellation, and
//!   broadcast progress events
//! - Pluggable filename parsing and reference-token encoding seams
//!
//! ## Quick Start
//!
//! ```no_run
//! use mediameta::{
//!     Config, MediaHint, NoOpFilenameParser, NoOpReferenceEncoder, Resolution, Resolver,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> mediameta::Result<()> {
//!     let mut config = Config::default();
//!     config.providers.tmdb_api_key = "your-api-key".into();
//!
//!     let resolver = Resolver::new(
//!         Arc::new(config),
//!         Arc::new(NoOpFilenameParser),
//!         Arc::new(NoOpReferenceEncoder),
//!     )?;
//!
//!     let hint = MediaHint {
//!         title: "Inception".into(),
//!         year: Some(2010),
//!         ..Default::default()
//!     };
//!     if let Resolution::Resolved(meta) = resolver.resolve_hint(&hint).await {
//!         println!("{} ({}) via {:?}", meta.title, meta.year, meta.provider);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod cache;
pub mod config;
pub mod error;
pub mod normalize;
mod providers;
pub mod reconciler;
pub mod resolver;
pub mod store;
pub mod types;

pub use cache::{CacheKey, LookupCache, Operation};
pub use config::{Config, ProviderConfig, ReconcileConfig};
pub use error::{Error, Result};
pub use reconciler::Reconciler;
pub use resolver::{NoOpFilenameParser, NoOpReferenceEncoder, Resolver};
pub use store::{
    EpisodePatch, MediaStore, MemoryStore, RecordPatch, ShardId, StoredEpisode, StoredMovie,
    StoredSeason, StoredShow,
};
pub use types::{
    CanonicalMetadata, EpisodeDetails, Event, FilenameParser, MediaHint, MediaKind, Provider,
    ReconcileReport, ReferenceContext, ReferenceEncoder, Resolution, ResolvedItem, SearchHit,
};
