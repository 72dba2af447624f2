//! Thin HTTP clients for the two external metadata providers.
//!
//! Both clients share one process-wide counting gate that caps in-flight
//! outbound calls, and both absorb every transport, status, and payload
//! failure into an absent result — failures are logged here and are never
//! fatal to the caller.

pub(crate) mod cinemeta;
pub(crate) mod tmdb;

pub(crate) use cinemeta::CinemetaClient;
pub(crate) use tmdb::TmdbClient;
