//! Repository layer for the Catalog Service.
//!
//! The document store is external; handlers reach it only through
//! [`AssetRepository`].

pub mod assets;

pub use assets::{AssetRepository, InMemoryAssetRepository};
