use {
    crate::{AreaStore, FileStore, MetadataStore, StorageError},
    chrono::Utc,
    sharebucket_protocol::{AreaId, AreaKey, AreaSummary, NewStorageArea, PrincipalId, StorageArea},
    sharebucket_sdk::crypto::CipherError,
    tokio::fs,
    tracing::{info, instrument, warn},
};

impl<S: MetadataStore + AreaStore> FileStore<S> {
    /// Creates an area with a fresh key. `owner` becomes its first member.
    ///
    /// Without `max_size` the configured default quota is used.
    #[instrument(skip(self))]
    #[inline]
    pub async fn create_area(
        &self,
        owner: PrincipalId,
        name: &str,
        max_size: Option<u64>,
    ) -> Result<AreaSummary, StorageError> {
        let key = AreaKey::generate()
            .map_err(|err| StorageError::CipherFailure(CipherError::Random(err.to_string())))?;
        let area = self
            .store
            .create_area(NewStorageArea {
                name: name.to_owned(),
                key,
                owner,
                max_size: max_size.unwrap_or(self.default_quota),
                created_at: Utc::now(),
            })
            .await?;
        fs::create_dir_all(self.storage.area_root(area.id)).await?;
        info!(id = %area.id, "created area");
        Ok(area.summary())
    }

    /// Areas `principal` is a member of, ordered by id.
    #[inline]
    pub async fn areas_for_member(
        &self,
        principal: PrincipalId,
    ) -> Result<Vec<AreaSummary>, StorageError> {
        let mut areas = self.store.areas_for_member(principal).await?;
        areas.sort_by_key(|area| area.id);
        Ok(areas)
    }

    /// Returns `false` if `principal` already was a member.
    #[instrument(skip(self))]
    #[inline]
    pub async fn grant_access(
        &self,
        area: AreaId,
        principal: PrincipalId,
    ) -> Result<bool, StorageError> {
        self.existing_area(area).await?;
        let added = self.store.add_member(area, principal).await?;
        if added {
            info!("access granted");
        }
        Ok(added)
    }

    /// Returns `false` if `principal` wasn't a member. The owner always keeps access.
    #[instrument(skip(self))]
    #[inline]
    pub async fn revoke_access(
        &self,
        area: AreaId,
        principal: PrincipalId,
    ) -> Result<bool, StorageError> {
        let existing = self.existing_area(area).await?;
        if existing.owner == principal {
            warn!("refusing to revoke access of the owner");
            return Ok(false);
        }
        let removed = self.store.remove_member(area, principal).await?;
        if removed {
            info!("access revoked");
        }
        Ok(removed)
    }

    #[inline]
    pub async fn has_access(
        &self,
        area: AreaId,
        principal: PrincipalId,
    ) -> Result<bool, StorageError> {
        Ok(self.store.is_member(area, principal).await?)
    }

    pub(crate) async fn existing_area(&self, area: AreaId) -> Result<StorageArea, StorageError> {
        self.store
            .area(area)
            .await?
            .ok_or(StorageError::AreaNotFound(area))
    }
}
