use crate::domain::credits::UserId;
use crate::domain::ports::{AssetStore, ImageUpload};
use crate::domain::project::AssetRef;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

fn asset_key(owner: UserId, upload: &ImageUpload) -> (Uuid, String) {
    let file_id = Uuid::new_v4();
    (file_id, format!("{owner}/{file_id}.{}", upload.extension()))
}

/// Keeps uploaded bytes in memory. Used by tests and the in-memory wiring.
#[derive(Default, Clone)]
pub struct InMemoryAssetStore {
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }
}

#[async_trait]
impl AssetStore for InMemoryAssetStore {
    async fn put(&self, owner: UserId, upload: &ImageUpload) -> Result<AssetRef> {
        let (file_id, key) = asset_key(owner, upload);
        self.files
            .write()
            .await
            .insert(key.clone(), upload.bytes.clone());
        Ok(AssetRef {
            file_id,
            url: format!("/uploads/{key}"),
            key,
        })
    }
}

/// Writes uploads below a root directory, one sub-directory per user.
#[derive(Debug, Clone)]
pub struct LocalDiskAssetStore {
    root: PathBuf,
}

impl LocalDiskAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl AssetStore for LocalDiskAssetStore {
    async fn put(&self, owner: UserId, upload: &ImageUpload) -> Result<AssetRef> {
        let (file_id, key) = asset_key(owner, upload);
        let path = self.root.join(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &upload.bytes).await?;
        Ok(AssetRef {
            file_id,
            url: format!("/uploads/{key}"),
            key,
        })
    }
}
