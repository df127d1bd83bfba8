//! Aiko Ingest - local development ingestion endpoint.
//!
//! This crate provides a stand-in for the Aiko ingestion service, responsible for:
//! - Receiving gzip-compressed events from monitors
//! - Checking the project key and HMAC-SHA256 signature of each request
//! - Retaining the most recent events in memory for inspection
//!
//! # Architecture
//!
//! The server speaks the same wire protocol as the production endpoint, so a
//! monitor configured with `http://localhost:<port>/api/monitor/ingest` can be
//! exercised end to end without network access.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod store;
