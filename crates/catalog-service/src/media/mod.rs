//! Media ingestion.
//!
//! Turns inline image payloads into uploaded blobs with read-only grant
//! URLs, falling back to the inline payload whenever storage is missing
//! or fails.

pub mod ingest;

pub use ingest::{
    decode_inline_image, DecodedImage, ImageRole, IngestError, IngestOutcome, MediaIngestionPipeline,
};
