use {
    crate::{
        AreaStore, FileStore, KeyProvider, MetadataError, MetadataStore, StorageError,
        locks::Destination, storage::remove_empty_directories,
    },
    fs_err::remove_file,
    scopeguard::{ScopeGuard, guard},
    sharebucket_protocol::{
        AreaId, FileMetadata, FileName, LogicalPath, NewFileMetadata, util::maybe_block_in_place,
    },
    std::io,
    tokio::{
        fs::{self, File},
        io::AsyncRead,
    },
    tracing::{debug, info, instrument, warn},
};

fn already_exists(path: &LogicalPath, filename: &FileName) -> StorageError {
    StorageError::ConflictingWrite(format!("{path}{filename} already exists"))
}

impl<S: MetadataStore + AreaStore> FileStore<S> {
    /// Encrypts `content` into a new blob and records its metadata.
    ///
    /// Content is encrypted into a temporary file that is moved into place only once it's
    /// complete, so a blob path never holds a partial blob. Never replaces an existing blob.
    /// If anything fails, including this future being dropped, no blob, record or newly
    /// created directory is left behind.
    #[instrument(skip(self, content), fields(%area, %path, %filename))]
    #[inline]
    pub async fn upload<R>(
        &self,
        area: AreaId,
        path: &LogicalPath,
        filename: &FileName,
        content: R,
    ) -> Result<FileMetadata, StorageError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let key = self.store.resolve(area).await?;
        let _lock = self
            .locks
            .lock(Destination::new(area, path, filename))
            .await;

        let dir = self.storage.directory(area, path)?;
        let blob_path = dir.join(filename.blob_name());
        if fs::try_exists(&blob_path).await? {
            return Err(already_exists(path, filename));
        }

        let (file, temp_path) =
            maybe_block_in_place(|| self.storage.create_temp_file())?.into_parts();
        let mut file = File::from_std(file);
        self.cipher.encrypt(content, &mut file, &key).await?;
        file.sync_all().await?;
        drop(file);

        let new_dirs = guard(self.storage.create_directories(&dir).await?, |dirs| {
            remove_empty_directories(&dirs);
        });
        if let Err(err) = maybe_block_in_place(|| temp_path.persist_noclobber(&blob_path)) {
            return Err(if err.error.kind() == io::ErrorKind::AlreadyExists {
                already_exists(path, filename)
            } else {
                err.error.into()
            });
        }
        let blob = guard(blob_path, |blob_path| match remove_file(&blob_path) {
            Ok(()) => debug!("removed blob without record"),
            Err(err) => warn!(%err, "failed to remove blob without record"),
        });

        let record = self
            .store
            .create(NewFileMetadata::new(area, path.clone(), filename.clone()))
            .await
            .map_err(|err| match err {
                MetadataError::Conflict => {
                    StorageError::ConflictingWrite(format!("{path}{filename} already has a record"))
                }
                err @ (MetadataError::Unavailable(_)
                | MetadataError::Database(_)
                | MetadataError::Corrupt(_)) => StorageError::Metadata(err),
            })?;
        ScopeGuard::into_inner(blob);
        ScopeGuard::into_inner(new_dirs);
        info!(id = %record.id, "stored file");
        Ok(record)
    }
}

#[cfg(test)]
#[expect(
    clippy::arithmetic_side_effects,
    clippy::as_conversions,
    clippy::mem_forget,
    reason = "test"
)]
mod tests {
    use {
        crate::test_util::{FailingStore, env, env_with, name, path, seed_area},
        crate::{FileStore, Storage, StorageError},
        futures::poll,
        rand::{Rng, rng},
        sharebucket_protocol::AreaId,
        sharebucket_sdk::crypto::{BLOCK_LENGTH, SALT_LENGTH},
        std::{
            mem,
            path::Path,
            pin::Pin,
            sync::Arc,
            task::{Context, Poll},
            time::Duration,
        },
        tokio::io::{AsyncRead, ReadBuf},
    };

    fn temp_file_count(tmp: &Path) -> usize {
        fs_err::read_dir(tmp).unwrap().count()
    }

    #[tokio::test]
    async fn end_to_end_five_mebibytes() {
        let env = env();
        let area = seed_area(env.files.store(), 1);
        let mut content = vec![0u8; 5 * 1024 * 1024];
        rng().fill(&mut content[..]);

        let record = env
            .files
            .upload(area, &path("/"), &name("a.bin"), &content[..])
            .await
            .unwrap();
        assert_eq!(record.path.as_str(), "/");
        assert_eq!(record.filename.as_str(), "a.bin");
        assert_eq!(record.extension, ".bin");
        assert_eq!(record.area_id, area);

        let blob = env.dir.path().join("1").join("a.bin.enc");
        let blob_len = fs_err::metadata(&blob).unwrap().len();
        assert_eq!(
            blob_len,
            (SALT_LENGTH + content.len() + BLOCK_LENGTH) as u64
        );
        assert_ne!(fs_err::read(&blob).unwrap()[SALT_LENGTH..][..64], content[..64]);

        let mut output = Vec::new();
        let len = env
            .files
            .download(area, &path("/"), &name("a.bin"), &mut output)
            .await
            .unwrap();
        assert_eq!(len, content.len() as u64);
        assert_eq!(output, content);
    }

    #[tokio::test]
    async fn unknown_area_has_no_side_effects() {
        let env = env();
        let result = env
            .files
            .upload(AreaId(5), &path("docs"), &name("a.txt"), &b"x"[..])
            .await;
        assert!(matches!(result, Err(StorageError::AreaNotFound(AreaId(5)))));
        assert!(!env.dir.path().join("5").exists());
    }

    #[tokio::test]
    async fn existing_blob_is_never_overwritten() {
        let env = env();
        let area = seed_area(env.files.store(), 3);
        env.files
            .upload(area, &path("docs"), &name("a.txt"), &b"first"[..])
            .await
            .unwrap();
        let blob = env.dir.path().join("3").join("docs").join("a.txt.enc");
        let before = fs_err::read(&blob).unwrap();

        let result = env
            .files
            .upload(area, &path("/docs/"), &name("a.txt"), &b"second"[..])
            .await;
        assert!(matches!(result, Err(StorageError::ConflictingWrite(_))));
        assert_eq!(fs_err::read(&blob).unwrap(), before);

        let mut output = Vec::new();
        env.files
            .download(area, &path("docs"), &name("a.txt"), &mut output)
            .await
            .unwrap();
        assert_eq!(output, b"first");
        assert_eq!(env.files.store().file_count(), 1);
    }

    #[tokio::test]
    async fn metadata_failure_removes_blob() {
        let env = env_with(FailingStore::default());
        let area = seed_area(&env.files.store().inner, 2);
        *env.files.store().fail_create.lock() = true;

        let result = env
            .files
            .upload(area, &path("docs"), &name("a.txt"), &b"content"[..])
            .await;
        assert!(matches!(result, Err(StorageError::Metadata(_))));
        let dir = env.dir.path().join("2").join("docs");
        assert!(!dir.join("a.txt.enc").exists());
        assert!(!env.dir.path().join("2").exists());
        assert_eq!(temp_file_count(env.files.storage().tmp_dir()), 0);
        assert_eq!(env.files.store().inner.file_count(), 0);

        // The destination is usable again.
        *env.files.store().fail_create.lock() = false;
        env.files
            .upload(area, &path("docs"), &name("a.txt"), &b"content"[..])
            .await
            .unwrap();
        assert!(dir.join("a.txt.enc").exists());
    }

    /// Yields some data and then fails.
    struct BrokenReader {
        remaining: usize,
    }

    impl AsyncRead for BrokenReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.remaining == 0 {
                return Poll::Ready(Err(std::io::Error::other("connection reset")));
            }
            let len = self.remaining.min(buf.remaining()).min(1000);
            buf.put_slice(&vec![7u8; len]);
            self.remaining -= len;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn content_failure_removes_blob() {
        let env = env();
        let area = seed_area(env.files.store(), 4);
        let result = env
            .files
            .upload(
                area,
                &path("/"),
                &name("big.iso"),
                BrokenReader { remaining: 3_000_000 },
            )
            .await;
        assert!(matches!(result, Err(StorageError::IoFailure(_))));
        assert!(!env.dir.path().join("4").exists());
        assert_eq!(temp_file_count(env.files.storage().tmp_dir()), 0);
        assert_eq!(env.files.store().file_count(), 0);
    }

    /// Never finishes after the first chunk.
    struct StalledReader {
        sent: bool,
    }

    impl AsyncRead for StalledReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.sent {
                return Poll::Pending;
            }
            buf.put_slice(b"partial");
            self.sent = true;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn dropped_upload_removes_blob() {
        let env = env();
        let area = seed_area(env.files.store(), 6);
        let dir = path("inbox");
        let file = name("x.bin");
        let upload = env.files.upload(area, &dir, &file, StalledReader { sent: false });
        let result =
            tokio::time::timeout(std::time::Duration::from_millis(300), upload).await;
        assert!(result.is_err());
        assert!(!env.dir.path().join("6").join("inbox").join("x.bin.enc").exists());
        assert_eq!(temp_file_count(env.files.storage().tmp_dir()), 0);
        assert_eq!(env.files.store().file_count(), 0);
    }

    #[tokio::test]
    async fn interrupted_upload_leaves_destination_usable() {
        let env = env();
        let area = seed_area(env.files.store(), 6);
        let tmp = env.files.storage().tmp_dir().to_path_buf();
        let (docs, filename) = (path("docs"), name("a.bin"));
        let mut upload = Box::pin(env.files.upload(
            area,
            &docs,
            &filename,
            StalledReader { sent: false },
        ));
        for _ in 0..50 {
            assert!(poll!(upload.as_mut()).is_pending());
            if temp_file_count(&tmp) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        for _ in 0..5 {
            assert!(poll!(upload.as_mut()).is_pending());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(temp_file_count(&tmp), 1);
        // No cleanup runs, like when the process is killed.
        mem::forget(upload);

        let blob = env.dir.path().join("6").join("docs").join("a.bin.enc");
        assert!(!blob.exists());
        let listing = env.files.list(area, &path("/")).await.unwrap();
        assert!(listing.folders.is_empty());

        // The leaked lock dies with the process, so continue with a fresh engine.
        let restarted = FileStore::new(
            Storage::new(env.dir.path().to_path_buf()).unwrap(),
            Arc::clone(env.files.store()),
            1_000_000,
            4,
        );
        restarted
            .upload(area, &docs, &filename, &b"complete"[..])
            .await
            .unwrap();
        let mut output = Vec::new();
        restarted
            .download(area, &docs, &filename, &mut output)
            .await
            .unwrap();
        assert_eq!(output, b"complete");
    }

    #[tokio::test]
    async fn empty_file() {
        let env = env();
        let area = seed_area(env.files.store(), 8);
        env.files
            .upload(area, &path("/"), &name("empty"), &b""[..])
            .await
            .unwrap();
        let blob = env.dir.path().join("8").join("empty.enc");
        assert_eq!(
            fs_err::metadata(&blob).unwrap().len(),
            (SALT_LENGTH + BLOCK_LENGTH) as u64
        );
        let mut output = Vec::new();
        let len = env
            .files
            .download(area, &path("/"), &name("empty"), &mut output)
            .await
            .unwrap();
        assert_eq!(len, 0);
        assert!(output.is_empty());
    }
}
