use {
    crate::{
        AreaStore, FileStore, MetadataStore, StorageError, locks::Destination,
        storage::require_directory,
    },
    sharebucket_protocol::{AreaId, FileId, FileMetadata, FileName, LogicalPath},
    std::io,
    tokio::fs,
    tracing::{info, instrument, warn},
};

impl<S: MetadataStore + AreaStore> FileStore<S> {
    /// Removes one blob and its record.
    ///
    /// If the blob is already gone, the record is still purged and
    /// [`StorageError::BlobNotFound`] is returned.
    #[instrument(skip(self), fields(%area, %path, %filename))]
    #[inline]
    pub async fn delete_file(
        &self,
        area: AreaId,
        path: &LogicalPath,
        filename: &FileName,
    ) -> Result<(), StorageError> {
        let _lock = self
            .locks
            .lock(Destination::new(area, path, filename))
            .await;
        let record = self
            .store
            .find_by_identity(area, path, filename)
            .await?
            .ok_or_else(|| StorageError::MetadataNotFound {
                path: path.clone(),
                filename: filename.clone(),
            })?;

        let blob_path = self.storage.blob_path(area, path, filename)?;
        let removed = match fs::remove_file(&blob_path).await {
            Ok(()) => true,
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(err) => return Err(err.into()),
        };
        self.store.delete_all(&[record.id]).await?;
        if !removed {
            warn!(id = %record.id, "purged record of a missing blob");
            return Err(StorageError::BlobNotFound {
                path: path.clone(),
                filename: filename.clone(),
            });
        }
        info!(id = %record.id, "deleted file");
        Ok(())
    }

    /// Removes a folder with everything below it. Returns the number of purged records.
    #[instrument(skip(self), fields(%area, %path))]
    #[inline]
    pub async fn delete_folder(&self, area: AreaId, path: &LogicalPath) -> Result<u64, StorageError> {
        if path.is_root() {
            return Err(StorageError::InvalidPath(
                "the root folder can't be deleted".into(),
            ));
        }
        let dir = self.storage.directory(area, path)?;
        require_directory(&dir, path).await?;
        fs::remove_dir_all(&dir).await?;

        let ids = record_ids(self.store.find_all_under_prefix(area, path).await?);
        let deleted = self.store.delete_all(&ids).await?;
        info!(deleted, "deleted folder");
        Ok(deleted)
    }

    /// Removes an area: its records, its blobs and finally the area itself.
    #[instrument(skip(self), fields(%area))]
    #[inline]
    pub async fn delete_area(&self, area: AreaId) -> Result<(), StorageError> {
        if self.store.area(area).await?.is_none() {
            return Err(StorageError::AreaNotFound(area));
        }
        let ids = record_ids(self.store.find_all_in_area(area).await?);
        let deleted = self.store.delete_all(&ids).await?;

        match fs::remove_dir_all(self.storage.area_root(area)).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("area had no directory");
            }
            Err(err) => return Err(err.into()),
        }
        if !self.store.delete_area(area).await? {
            return Err(StorageError::AreaNotFound(area));
        }
        info!(deleted, "deleted area");
        Ok(())
    }
}

fn record_ids(records: Vec<FileMetadata>) -> Vec<FileId> {
    records.into_iter().map(|record| record.id).collect()
}

#[cfg(test)]
mod tests {
    use {
        crate::test_util::{env, name, path, seed_area},
        crate::{AreaStore, MetadataStore, StorageError},
        sharebucket_protocol::AreaId,
    };

    #[tokio::test]
    async fn single_file() {
        let env = env();
        let area = seed_area(env.files.store(), 1);
        env.files
            .upload(area, &path("docs"), &name("a.txt"), &b"a"[..])
            .await
            .unwrap();
        env.files
            .upload(area, &path("docs"), &name("b.txt"), &b"b"[..])
            .await
            .unwrap();

        env.files
            .delete_file(area, &path("docs"), &name("a.txt"))
            .await
            .unwrap();
        let dir = env.dir.path().join("1").join("docs");
        assert!(!dir.join("a.txt.enc").exists());
        assert!(dir.join("b.txt.enc").exists());
        assert_eq!(env.files.store().file_count(), 1);

        let result = env
            .files
            .delete_file(area, &path("docs"), &name("a.txt"))
            .await;
        assert!(matches!(result, Err(StorageError::MetadataNotFound { .. })));
    }

    #[tokio::test]
    async fn missing_blob_still_purges_record() {
        let env = env();
        let area = seed_area(env.files.store(), 1);
        env.files
            .upload(area, &path("/"), &name("a.txt"), &b"a"[..])
            .await
            .unwrap();
        fs_err::remove_file(env.dir.path().join("1").join("a.txt.enc")).unwrap();

        let result = env.files.delete_file(area, &path("/"), &name("a.txt")).await;
        assert!(matches!(result, Err(StorageError::BlobNotFound { .. })));
        assert_eq!(env.files.store().file_count(), 0);
    }

    #[tokio::test]
    async fn folder_with_subfolders() {
        let env = env();
        let area = seed_area(env.files.store(), 7);
        for (dir, file) in [
            ("docs", "a.txt"),
            ("docs", "b.txt"),
            ("docs/sub", "c.txt"),
            ("images", "d.png"),
            ("docsX", "e.txt"),
        ] {
            env.files
                .upload(area, &path(dir), &name(file), &b"content"[..])
                .await
                .unwrap();
        }

        let deleted = env.files.delete_folder(area, &path("/docs/")).await.unwrap();
        assert_eq!(deleted, 3);

        let root = env.dir.path().join("7");
        assert!(!root.join("docs").exists());
        assert!(root.join("images").join("d.png.enc").exists());
        assert!(root.join("docsX").join("e.txt.enc").exists());

        let store = env.files.store();
        assert!(
            store
                .find_all_under_prefix(area, &path("docs"))
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(store.find_in_directory(area, &path("images")).await.unwrap().len(), 1);
        assert_eq!(store.find_in_directory(area, &path("docsX")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn folder_errors() {
        let env = env();
        let area = seed_area(env.files.store(), 1);
        assert!(matches!(
            env.files.delete_folder(area, &path("/")).await,
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            env.files.delete_folder(area, &path("missing")).await,
            Err(StorageError::DirectoryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn area_cascade() {
        let env = env();
        let area = seed_area(env.files.store(), 3);
        let other = seed_area(env.files.store(), 4);
        for dir in ["/", "a", "a/b"] {
            env.files
                .upload(area, &path(dir), &name("f.bin"), &b"data"[..])
                .await
                .unwrap();
        }
        env.files
            .upload(other, &path("/"), &name("f.bin"), &b"data"[..])
            .await
            .unwrap();

        env.files.delete_area(area).await.unwrap();
        assert!(!env.dir.path().join("3").exists());
        assert!(env.dir.path().join("4").join("f.bin.enc").exists());
        assert_eq!(env.files.store().file_count(), 1);
        assert!(env.files.store().area(area).await.unwrap().is_none());

        assert!(matches!(
            env.files.delete_area(area).await,
            Err(StorageError::AreaNotFound(_))
        ));
    }

    #[tokio::test]
    async fn area_without_directory() {
        let env = env();
        let area = seed_area(env.files.store(), 9);
        env.files.delete_area(area).await.unwrap();
        assert!(matches!(
            env.files.delete_area(AreaId(9)).await,
            Err(StorageError::AreaNotFound(AreaId(9)))
        ));
    }
}
