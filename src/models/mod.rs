//! Core data models for the upload ingestion service.
//!
//! `upload` holds the durable record tracked across enqueue requests;
//! `metadata` holds the default caller metadata captured at creation.

pub mod metadata;
pub mod upload;
