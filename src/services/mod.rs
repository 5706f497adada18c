//! Upload enqueue protocol and the collaborators it drives.

pub mod enqueue_service;
pub mod fs_object_store;
pub mod metadata_extractor;
pub mod object_store;
pub mod request_classifier;
pub mod sqlite_store;
pub mod upload_store;
