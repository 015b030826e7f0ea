use {
    crate::{AreaStore, FileStore, MetadataStore, StorageError, storage::require_directory},
    sharebucket_protocol::{AreaId, DirectoryListing, FileName, LogicalPath},
    std::io,
    tokio::fs,
    tracing::{debug, instrument, warn},
};

impl<S: MetadataStore + AreaStore> FileStore<S> {
    /// Files recorded directly in `path` and the names of its sub-folders.
    ///
    /// The area root is created on first use, so a fresh area lists as empty.
    #[instrument(skip(self), fields(%area, %path))]
    #[inline]
    pub async fn list(
        &self,
        area: AreaId,
        path: &LogicalPath,
    ) -> Result<DirectoryListing, StorageError> {
        self.existing_area(area).await?;
        fs::create_dir_all(self.storage.area_root(area)).await?;
        let dir = self.storage.directory(area, path)?;
        require_directory(&dir, path).await?;

        let mut folders = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => folders.push(name),
                Err(name) => warn!(?name, "skipping folder with a non-UTF-8 name"),
            }
        }
        folders.sort();

        let mut files = self.store.find_in_directory(area, path).await?;
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        debug!(files = files.len(), folders = folders.len(), "listed");
        Ok(DirectoryListing {
            path: path.clone(),
            files,
            folders,
        })
    }

    /// Creates an empty folder along with any missing parents.
    #[instrument(skip(self), fields(%area, %path))]
    #[inline]
    pub async fn create_folder(&self, area: AreaId, path: &LogicalPath) -> Result<(), StorageError> {
        if path.is_root() {
            return Err(StorageError::ConflictingWrite(
                "the root folder always exists".into(),
            ));
        }
        self.existing_area(area).await?;
        let dir = self.storage.directory(area, path)?;
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::create_dir(&dir).await {
            Ok(()) => {
                debug!("created folder");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Err(
                StorageError::ConflictingWrite(format!("folder {path} already exists")),
            ),
            Err(err) => Err(err.into()),
        }
    }

    /// Whether a record with this identity exists. The blob isn't checked.
    #[inline]
    pub async fn exists(
        &self,
        area: AreaId,
        path: &LogicalPath,
        filename: &FileName,
    ) -> Result<bool, StorageError> {
        Ok(self
            .store
            .find_by_identity(area, path, filename)
            .await?
            .is_some())
    }
}
