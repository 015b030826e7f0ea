pub mod credentials;
mod path;
pub mod util;

pub use crate::{
    credentials::{AREA_KEY_LENGTH, AreaKey},
    path::{FileName, LogicalPath},
};

use {
    chrono::Utc,
    derive_more::{Display, From, Into},
    serde::{Deserialize, Serialize},
};

pub type DateTimeUtc = chrono::DateTime<Utc>;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into,
    Display,
)]
pub struct AreaId(pub i32);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into,
    Display,
)]
pub struct FileId(pub i64);

/// Identity of a user as established by the authentication layer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into,
    Display,
)]
pub struct PrincipalId(pub i32);

/// A tenant-scoped bucket with its own encryption key and membership list.
#[derive(Debug, Clone)]
pub struct StorageArea {
    pub id: AreaId,
    pub name: String,
    pub key: AreaKey,
    pub owner: PrincipalId,
    pub members: Vec<PrincipalId>,
    /// Maximum size of the area in bytes.
    pub max_size: u64,
    pub created_at: DateTimeUtc,
}

impl StorageArea {
    #[must_use]
    #[inline]
    pub fn is_member(&self, principal: PrincipalId) -> bool {
        self.members.contains(&principal)
    }

    #[must_use]
    #[inline]
    pub fn summary(&self) -> AreaSummary {
        AreaSummary {
            id: self.id,
            name: self.name.clone(),
            owner: self.owner,
            max_size: self.max_size,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewStorageArea {
    pub name: String,
    pub key: AreaKey,
    pub owner: PrincipalId,
    pub max_size: u64,
    pub created_at: DateTimeUtc,
}

/// Client-facing view of a storage area. Never carries the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaSummary {
    pub id: AreaId,
    pub name: String,
    pub owner: PrincipalId,
    pub max_size: u64,
    pub created_at: DateTimeUtc,
}

/// Metadata record of a single encrypted blob.
///
/// `(area_id, path, filename)` identifies the record; the store never holds two live records
/// with the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub id: FileId,
    pub area_id: AreaId,
    pub path: LogicalPath,
    pub filename: FileName,
    pub extension: String,
    pub created_at: DateTimeUtc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileMetadata {
    pub area_id: AreaId,
    pub path: LogicalPath,
    pub filename: FileName,
    pub extension: String,
    pub created_at: DateTimeUtc,
}

impl NewFileMetadata {
    #[must_use]
    #[inline]
    pub fn new(area_id: AreaId, path: LogicalPath, filename: FileName) -> Self {
        Self {
            area_id,
            extension: filename.extension().to_owned(),
            path,
            filename,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    #[inline]
    pub fn with_id(self, id: FileId) -> FileMetadata {
        FileMetadata {
            id,
            area_id: self.area_id,
            path: self.path,
            filename: self.filename,
            extension: self.extension,
            created_at: self.created_at,
        }
    }
}

/// Contents of one logical directory: files come from metadata, folders from the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryListing {
    pub path: LogicalPath,
    pub files: Vec<FileMetadata>,
    pub folders: Vec<String>,
}
