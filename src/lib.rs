//! Request de-duplication and cache synchronisation for keyed data fetching.
//!
//! A request is described by a key plus [`cache::FetchOptions`]. The crate
//! turns that descriptor into a stable content hash, tracks an
//! `idle → loading → data | error` state machine per hash in a reducer-driven
//! store, and notifies only the observers whose hash actually changed.

pub mod cache;
pub mod config;
pub mod infra;
