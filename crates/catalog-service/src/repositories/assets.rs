//! Asset repository.

use crate::errors::CatalogError;
use crate::models::Asset;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Asset persistence.
#[async_trait]
pub trait AssetRepository: Send + Sync {
    /// Store a new asset.
    async fn insert(&self, asset: Asset) -> Result<Asset, CatalogError>;

    /// All assets, newest first.
    async fn list(&self) -> Result<Vec<Asset>, CatalogError>;

    /// One asset by id.
    async fn get(&self, id: Uuid) -> Result<Option<Asset>, CatalogError>;

    /// Replace an existing asset. Returns `NotFound` if it does not exist.
    async fn update(&self, asset: Asset) -> Result<Asset, CatalogError>;
}

/// Process-local repository.
#[derive(Default)]
pub struct InMemoryAssetRepository {
    assets: RwLock<HashMap<Uuid, Asset>>,
}

impl InMemoryAssetRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssetRepository for InMemoryAssetRepository {
    async fn insert(&self, asset: Asset) -> Result<Asset, CatalogError> {
        self.assets.write().await.insert(asset.id, asset.clone());
        Ok(asset)
    }

    async fn list(&self) -> Result<Vec<Asset>, CatalogError> {
        let mut assets: Vec<Asset> = self.assets.read().await.values().cloned().collect();
        assets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(assets)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Asset>, CatalogError> {
        Ok(self.assets.read().await.get(&id).cloned())
    }

    async fn update(&self, asset: Asset) -> Result<Asset, CatalogError> {
        let mut assets = self.assets.write().await;
        match assets.get_mut(&asset.id) {
            Some(existing) => {
                *existing = asset.clone();
                Ok(asset)
            }
            None => Err(CatalogError::NotFound("Asset not found".to_string())),
        }
    }
}
