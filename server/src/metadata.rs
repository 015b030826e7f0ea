//! Contracts of the relational store that keeps storage areas and file records.

use {
    async_trait::async_trait,
    sharebucket_protocol::{
        AreaId, AreaSummary, FileId, FileMetadata, FileName, LogicalPath, NewFileMetadata,
        NewStorageArea, PrincipalId, StorageArea,
    },
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("a record with the same identity already exists")]
    Conflict,
    #[error("metadata store is unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// File records. `(area, path, filename)` is unique among live records.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Fails with [`MetadataError::Conflict`] if a record with the same identity exists.
    async fn create(&self, record: NewFileMetadata) -> Result<FileMetadata, MetadataError>;

    async fn find_by_identity(
        &self,
        area: AreaId,
        path: &LogicalPath,
        filename: &FileName,
    ) -> Result<Option<FileMetadata>, MetadataError>;

    /// Records whose path is exactly `path`.
    async fn find_in_directory(
        &self,
        area: AreaId,
        path: &LogicalPath,
    ) -> Result<Vec<FileMetadata>, MetadataError>;

    /// Records whose path is `prefix` or lies below it.
    async fn find_all_under_prefix(
        &self,
        area: AreaId,
        prefix: &LogicalPath,
    ) -> Result<Vec<FileMetadata>, MetadataError>;

    async fn find_all_in_area(&self, area: AreaId) -> Result<Vec<FileMetadata>, MetadataError>;

    /// Returns the number of deleted records. Unknown ids are ignored.
    async fn delete_all(&self, ids: &[FileId]) -> Result<u64, MetadataError>;

    /// Deletes the area record together with its membership list.
    async fn delete_area(&self, area: AreaId) -> Result<bool, MetadataError>;
}

/// Storage areas, their keys and their members.
#[async_trait]
pub trait AreaStore: Send + Sync {
    /// The owner becomes the first member.
    async fn create_area(&self, area: NewStorageArea) -> Result<StorageArea, MetadataError>;

    async fn area(&self, area: AreaId) -> Result<Option<StorageArea>, MetadataError>;

    async fn areas_for_member(
        &self,
        principal: PrincipalId,
    ) -> Result<Vec<AreaSummary>, MetadataError>;

    /// Returns false if `principal` already was a member.
    async fn add_member(&self, area: AreaId, principal: PrincipalId)
    -> Result<bool, MetadataError>;

    /// Returns false if `principal` was not a member.
    async fn remove_member(
        &self,
        area: AreaId,
        principal: PrincipalId,
    ) -> Result<bool, MetadataError>;

    async fn is_member(&self, area: AreaId, principal: PrincipalId)
    -> Result<bool, MetadataError>;

    async fn is_owner(&self, area: AreaId, principal: PrincipalId) -> Result<bool, MetadataError>;
}
