//! Matchday News - a football news aggregation service
//!
//! This crate fetches per-club article collections from a document store,
//! merges the "news of the day" across clubs, caches article images on disk
//! and in memory, and exposes the published state through a JSON API.

pub mod article;
pub mod assets;
pub mod config;
pub mod db;
pub mod fetcher;
pub mod gateway;
pub mod remote;
pub mod routes;
pub mod state;
