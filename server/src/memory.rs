use {
    crate::metadata::{AreaStore, MetadataError, MetadataStore},
    async_trait::async_trait,
    parking_lot::Mutex,
    sharebucket_protocol::{
        AreaId, AreaSummary, FileId, FileMetadata, FileName, LogicalPath, NewFileMetadata,
        NewStorageArea, PrincipalId, StorageArea,
    },
    std::collections::BTreeMap,
};

/// In-process store for tests and embedded use. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    areas: BTreeMap<AreaId, StorageArea>,
    files: BTreeMap<FileId, FileMetadata>,
    last_area_id: i32,
    last_file_id: i64,
}

impl MemoryStore {
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an area with a fixed id, replacing any area with the same id.
    #[inline]
    pub fn insert_area(&self, area: StorageArea) {
        let mut state = self.state.lock();
        state.last_area_id = state.last_area_id.max(area.id.0);
        state.areas.insert(area.id, area);
    }

    #[must_use]
    #[inline]
    pub fn file_count(&self) -> usize {
        self.state.lock().files.len()
    }
}

fn select(state: &State, mut filter: impl FnMut(&FileMetadata) -> bool) -> Vec<FileMetadata> {
    state
        .files
        .values()
        .filter(|record| filter(record))
        .cloned()
        .collect()
}

#[async_trait]
impl MetadataStore for MemoryStore {
    #[inline]
    async fn create(&self, record: NewFileMetadata) -> Result<FileMetadata, MetadataError> {
        let mut state = self.state.lock();
        if !state.areas.contains_key(&record.area_id) {
            return Err(MetadataError::Corrupt(format!(
                "area {} doesn't exist",
                record.area_id
            )));
        }
        let duplicate = state.files.values().any(|existing| {
            existing.area_id == record.area_id
                && existing.path == record.path
                && existing.filename == record.filename
        });
        if duplicate {
            return Err(MetadataError::Conflict);
        }
        let id = state
            .last_file_id
            .checked_add(1)
            .ok_or_else(|| MetadataError::Unavailable("file ids exhausted".into()))?;
        state.last_file_id = id;
        let record = record.with_id(FileId(id));
        state.files.insert(record.id, record.clone());
        Ok(record)
    }

    #[inline]
    async fn find_by_identity(
        &self,
        area: AreaId,
        path: &LogicalPath,
        filename: &FileName,
    ) -> Result<Option<FileMetadata>, MetadataError> {
        let state = self.state.lock();
        Ok(state
            .files
            .values()
            .find(|record| {
                record.area_id == area && &record.path == path && &record.filename == filename
            })
            .cloned())
    }

    #[inline]
    async fn find_in_directory(
        &self,
        area: AreaId,
        path: &LogicalPath,
    ) -> Result<Vec<FileMetadata>, MetadataError> {
        let state = self.state.lock();
        Ok(select(&state, |record| {
            record.area_id == area && &record.path == path
        }))
    }

    #[inline]
    async fn find_all_under_prefix(
        &self,
        area: AreaId,
        prefix: &LogicalPath,
    ) -> Result<Vec<FileMetadata>, MetadataError> {
        let state = self.state.lock();
        Ok(select(&state, |record| {
            record.area_id == area && record.path.starts_with(prefix)
        }))
    }

    #[inline]
    async fn find_all_in_area(&self, area: AreaId) -> Result<Vec<FileMetadata>, MetadataError> {
        let state = self.state.lock();
        Ok(select(&state, |record| record.area_id == area))
    }

    #[inline]
    async fn delete_all(&self, ids: &[FileId]) -> Result<u64, MetadataError> {
        let mut state = self.state.lock();
        let mut deleted = 0_u64;
        for id in ids {
            if state.files.remove(id).is_some() {
                deleted = deleted.saturating_add(1);
            }
        }
        Ok(deleted)
    }

    #[inline]
    async fn delete_area(&self, area: AreaId) -> Result<bool, MetadataError> {
        let mut state = self.state.lock();
        state.files.retain(|_, record| record.area_id != area);
        Ok(state.areas.remove(&area).is_some())
    }
}

#[async_trait]
impl AreaStore for MemoryStore {
    #[inline]
    async fn create_area(&self, area: NewStorageArea) -> Result<StorageArea, MetadataError> {
        let mut state = self.state.lock();
        let id = state
            .last_area_id
            .checked_add(1)
            .ok_or_else(|| MetadataError::Unavailable("area ids exhausted".into()))?;
        state.last_area_id = id;
        let area = StorageArea {
            id: AreaId(id),
            name: area.name,
            key: area.key,
            owner: area.owner,
            members: vec![area.owner],
            max_size: area.max_size,
            created_at: area.created_at,
        };
        state.areas.insert(area.id, area.clone());
        Ok(area)
    }

    #[inline]
    async fn area(&self, area: AreaId) -> Result<Option<StorageArea>, MetadataError> {
        Ok(self.state.lock().areas.get(&area).cloned())
    }

    #[inline]
    async fn areas_for_member(
        &self,
        principal: PrincipalId,
    ) -> Result<Vec<AreaSummary>, MetadataError> {
        Ok(self
            .state
            .lock()
            .areas
            .values()
            .filter(|area| area.is_member(principal))
            .map(StorageArea::summary)
            .collect())
    }

    #[inline]
    async fn add_member(
        &self,
        area: AreaId,
        principal: PrincipalId,
    ) -> Result<bool, MetadataError> {
        let mut state = self.state.lock();
        let Some(area) = state.areas.get_mut(&area) else {
            return Ok(false);
        };
        if area.is_member(principal) {
            return Ok(false);
        }
        area.members.push(principal);
        Ok(true)
    }

    #[inline]
    async fn remove_member(
        &self,
        area: AreaId,
        principal: PrincipalId,
    ) -> Result<bool, MetadataError> {
        let mut state = self.state.lock();
        let Some(area) = state.areas.get_mut(&area) else {
            return Ok(false);
        };
        let before = area.members.len();
        area.members.retain(|member| *member != principal);
        Ok(area.members.len() != before)
    }

    #[inline]
    async fn is_member(&self, area: AreaId, principal: PrincipalId) -> Result<bool, MetadataError> {
        Ok(self
            .state
            .lock()
            .areas
            .get(&area)
            .is_some_and(|area| area.is_member(principal)))
    }

    #[inline]
    async fn is_owner(&self, area: AreaId, principal: PrincipalId) -> Result<bool, MetadataError> {
        Ok(self
            .state
            .lock()
            .areas
            .get(&area)
            .is_some_and(|area| area.owner == principal))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        chrono::Utc,
        sharebucket_protocol::AreaKey,
    };

    fn new_area(owner: i32) -> NewStorageArea {
        NewStorageArea {
            name: "photos".into(),
            key: AreaKey::generate().unwrap(),
            owner: PrincipalId(owner),
            max_size: 1000,
            created_at: Utc::now(),
        }
    }

    fn record(area: AreaId, path: &str, name: &str) -> NewFileMetadata {
        NewFileMetadata::new(area, path.parse().unwrap(), FileName::new(name).unwrap())
    }

    #[tokio::test]
    async fn identity_is_unique() {
        let store = MemoryStore::new();
        let area = store.create_area(new_area(1)).await.unwrap().id;
        let created = store.create(record(area, "docs", "a.txt")).await.unwrap();
        assert_eq!(created.extension, ".txt");
        assert!(matches!(
            store.create(record(area, "/docs/", "a.txt")).await,
            Err(MetadataError::Conflict)
        ));
        store.create(record(area, "docs", "b.txt")).await.unwrap();
        store.create(record(area, "other", "a.txt")).await.unwrap();
        assert_eq!(store.file_count(), 3);
        let found = store
            .find_by_identity(area, &"docs".parse().unwrap(), &FileName::new("a.txt").unwrap())
            .await
            .unwrap();
        assert_eq!(found, Some(created));
    }

    #[tokio::test]
    async fn prefix_queries() {
        let store = MemoryStore::new();
        let area = store.create_area(new_area(1)).await.unwrap().id;
        let other_area = store.create_area(new_area(1)).await.unwrap().id;
        for (path, name) in [("docs", "1"), ("docs/sub", "2"), ("docsX", "3"), ("/", "4")] {
            store.create(record(area, path, name)).await.unwrap();
        }
        store.create(record(other_area, "docs", "5")).await.unwrap();

        let docs: LogicalPath = "docs".parse().unwrap();
        let mut under = store.find_all_under_prefix(area, &docs).await.unwrap();
        under.sort_by(|a, b| a.filename.cmp(&b.filename));
        let names: Vec<_> = under.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, ["1", "2"]);
        assert_eq!(store.find_in_directory(area, &docs).await.unwrap().len(), 1);
        assert_eq!(store.find_all_in_area(area).await.unwrap().len(), 4);

        let ids: Vec<_> = under.iter().map(|r| r.id).collect();
        assert_eq!(store.delete_all(&ids).await.unwrap(), 2);
        assert_eq!(store.delete_all(&ids).await.unwrap(), 0);
        assert_eq!(store.find_all_in_area(area).await.unwrap().len(), 2);

        assert!(store.delete_area(area).await.unwrap());
        assert!(!store.delete_area(area).await.unwrap());
        assert_eq!(store.file_count(), 1);
    }

    #[tokio::test]
    async fn membership() {
        let store = MemoryStore::new();
        let area = store.create_area(new_area(1)).await.unwrap();
        assert_eq!(area.members, [PrincipalId(1)]);
        assert!(store.is_owner(area.id, PrincipalId(1)).await.unwrap());
        assert!(store.add_member(area.id, PrincipalId(2)).await.unwrap());
        assert!(!store.add_member(area.id, PrincipalId(2)).await.unwrap());
        assert!(store.is_member(area.id, PrincipalId(2)).await.unwrap());
        assert!(!store.is_owner(area.id, PrincipalId(2)).await.unwrap());
        assert_eq!(store.areas_for_member(PrincipalId(2)).await.unwrap().len(), 1);
        assert!(store.remove_member(area.id, PrincipalId(2)).await.unwrap());
        assert!(!store.remove_member(area.id, PrincipalId(2)).await.unwrap());
        assert!(store.areas_for_member(PrincipalId(2)).await.unwrap().is_empty());
        assert!(!store.is_member(AreaId(99), PrincipalId(1)).await.unwrap());
    }
}
