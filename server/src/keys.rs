use {
    crate::{StorageError, metadata::AreaStore},
    async_trait::async_trait,
    sharebucket_protocol::{AreaId, AreaKey},
};

/// Looks up the key of a storage area. Keys never change once an area exists.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn resolve(&self, area: AreaId) -> Result<AreaKey, StorageError>;
}

#[async_trait]
impl<S: AreaStore + ?Sized> KeyProvider for S {
    #[inline]
    async fn resolve(&self, area: AreaId) -> Result<AreaKey, StorageError> {
        self.area(area)
            .await?
            .map(|area| area.key.clone())
            .ok_or(StorageError::AreaNotFound(area))
    }
}
