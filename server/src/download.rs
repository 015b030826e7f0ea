use {
    crate::{
        AreaStore, FileStore, KeyProvider, MetadataStore, StorageError,
        storage::require_directory,
    },
    bytes::Bytes,
    futures::{Stream, TryStreamExt},
    sharebucket_protocol::{AreaId, FileName, LogicalPath},
    sharebucket_sdk::crypto::{Salt, read_salt},
    std::io,
    tokio::{
        fs::File,
        io::{AsyncWrite, BufReader},
    },
    tracing::{debug, instrument},
};

impl<S: MetadataStore + AreaStore> FileStore<S> {
    /// Decrypts a blob into `output` and returns the plaintext length.
    ///
    /// Metadata is not consulted. Plaintext written to `output` before a
    /// [`StorageError::CipherFailure`] can't be taken back.
    #[instrument(skip(self, output), fields(%area, %path, %filename))]
    #[inline]
    pub async fn download<W>(
        &self,
        area: AreaId,
        path: &LogicalPath,
        filename: &FileName,
        output: &mut W,
    ) -> Result<u64, StorageError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let (blob, salt) = self.open_blob(area, path, filename).await?;
        let key = self.store.resolve(area).await?;
        let len = self.cipher.decrypt(blob, output, &key, &salt).await?;
        debug!(len, "file sent");
        Ok(len)
    }

    /// Like [`FileStore::download`], but produces plaintext lazily as a stream of chunks.
    ///
    /// Missing files and unknown areas are reported before the stream is returned. Errors
    /// in the middle of the content end the stream.
    #[instrument(skip(self), fields(%area, %path, %filename))]
    #[inline]
    pub async fn download_stream(
        &self,
        area: AreaId,
        path: &LogicalPath,
        filename: &FileName,
    ) -> Result<impl Stream<Item = Result<Bytes, StorageError>> + Send + 'static, StorageError>
    {
        let (blob, salt) = self.open_blob(area, path, filename).await?;
        let key = self.store.resolve(area).await?;
        Ok(self
            .cipher
            .decrypt_stream(blob, key, salt)
            .map_err(StorageError::from))
    }

    async fn open_blob(
        &self,
        area: AreaId,
        path: &LogicalPath,
        filename: &FileName,
    ) -> Result<(BufReader<File>, Salt), StorageError> {
        let dir = self.storage.directory(area, path)?;
        require_directory(&dir, path).await?;
        let file = match File::open(dir.join(filename.blob_name())).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::BlobNotFound {
                    path: path.clone(),
                    filename: filename.clone(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        let mut blob = BufReader::new(file);
        let salt = read_salt(&mut blob).await?;
        Ok((blob, salt))
    }
}

#[cfg(test)]
#[expect(
    clippy::indexing_slicing,
    clippy::as_conversions,
    clippy::cast_possible_truncation,
    reason = "test"
)]
mod tests {
    use {
        crate::test_util::{env, name, path, seed_area},
        crate::StorageError,
        futures::TryStreamExt,
        sharebucket_protocol::AreaId,
        sharebucket_sdk::crypto::CipherError,
    };

    #[tokio::test]
    async fn missing_directory_and_blob() {
        let env = env();
        let area = seed_area(env.files.store(), 1);
        let result = env
            .files
            .download(area, &path("nope"), &name("a.txt"), &mut Vec::new())
            .await;
        assert!(matches!(result, Err(StorageError::DirectoryNotFound(_))));

        env.files
            .upload(area, &path("docs"), &name("a.txt"), &b"hello"[..])
            .await
            .unwrap();
        let result = env
            .files
            .download(area, &path("docs"), &name("b.txt"), &mut Vec::new())
            .await;
        assert!(matches!(result, Err(StorageError::BlobNotFound { .. })));
    }

    #[tokio::test]
    async fn truncated_blob_is_a_cipher_failure() {
        let env = env();
        let area = seed_area(env.files.store(), 1);
        env.files
            .upload(area, &path("/"), &name("a.txt"), &b"hello world"[..])
            .await
            .unwrap();
        let blob = env.dir.path().join("1").join("a.txt.enc");

        fs_err::write(&blob, &fs_err::read(&blob).unwrap()[..10]).unwrap();
        let result = env
            .files
            .download(area, &path("/"), &name("a.txt"), &mut Vec::new())
            .await;
        assert!(matches!(
            result,
            Err(StorageError::CipherFailure(CipherError::Truncated))
        ));

        fs_err::write(&blob, b"").unwrap();
        let result = env
            .files
            .download(area, &path("/"), &name("a.txt"), &mut Vec::new())
            .await;
        assert!(matches!(result, Err(StorageError::CipherFailure(_))));
    }

    #[tokio::test]
    async fn blob_from_another_area_does_not_decrypt() {
        let env = env();
        let first = seed_area(env.files.store(), 1);
        let second = seed_area(env.files.store(), 2);
        let content = vec![9u8; 4096];
        env.files
            .upload(first, &path("/"), &name("a.bin"), &content[..])
            .await
            .unwrap();
        fs_err::create_dir_all(env.dir.path().join("2")).unwrap();
        fs_err::copy(
            env.dir.path().join("1").join("a.bin.enc"),
            env.dir.path().join("2").join("a.bin.enc"),
        )
        .unwrap();
        let mut output = Vec::new();
        let result = env
            .files
            .download(second, &path("/"), &name("a.bin"), &mut output)
            .await;
        match result {
            Ok(_) => assert_ne!(output, content),
            Err(err) => assert!(matches!(err, StorageError::CipherFailure(_))),
        }
    }

    #[tokio::test]
    async fn stream_download() {
        let env = env();
        let area = seed_area(env.files.store(), 1);
        let content: Vec<u8> = (0..3_000_000_u32).map(|i| (i % 251) as u8).collect();
        env.files
            .upload(area, &path("media"), &name("clip.mp4"), &content[..])
            .await
            .unwrap();
        let chunks: Vec<_> = env
            .files
            .download_stream(area, &path("media"), &name("clip.mp4"))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), content);

        assert!(matches!(
            env.files
                .download_stream(AreaId(42), &path("media"), &name("clip.mp4"))
                .await
                .err(),
            Some(StorageError::DirectoryNotFound(_))
        ));
    }
}
