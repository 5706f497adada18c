//! Ingestion endpoint for code-intelligence index uploads.
//!
//! Payloads arrive either in one request or as numbered parts, are staged in
//! an object store, and their upload record moves to `queued` once every byte
//! is present. Embedders pick the metadata type and extractor; the bundled
//! binary uses [`models::metadata::IndexMetadata`].

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
