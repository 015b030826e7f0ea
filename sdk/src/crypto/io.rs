use {
    super::cipher::{BlobKey, CipherError, Decryptor, Encryptor, SALT_LENGTH, Salt},
    crate::pool::BufferPool,
    bytes::Bytes,
    futures::Stream,
    sharebucket_protocol::{AreaKey, util::maybe_block_in_place},
    std::{io, mem, sync::Arc},
    stream_generator::generate_try_stream,
    tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    tracing::{debug, instrument},
};

/// Max length of content that is read and transformed at once.
pub const CHUNK_LENGTH: usize = 1024 * 1024;

/// Streams blob content through the cipher using buffers from a shared pool.
#[derive(Debug, Clone)]
pub struct StreamCipher {
    pool: Arc<BufferPool>,
}

impl StreamCipher {
    #[must_use]
    #[inline]
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self { pool }
    }

    #[must_use]
    #[inline]
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Writes a fresh salt followed by the ciphertext of `input` to `output`.
    ///
    /// Returns the salt. On error, whatever was written to `output` is garbage and must be
    /// discarded by the caller.
    #[instrument(skip_all)]
    #[inline]
    pub async fn encrypt<R, W>(
        &self,
        mut input: R,
        output: &mut W,
        key: &AreaKey,
    ) -> Result<Salt, CipherError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let salt = Salt::generate()?;
        let blob_key = maybe_block_in_place(|| BlobKey::derive(key, &salt));
        let mut encryptor = Encryptor::new(&blob_key)?;
        output.write_all(salt.as_bytes()).await?;

        let mut in_buf = self.pool.get();
        let mut out_buf = self.pool.get();
        let mut plaintext_len = 0_u64;
        let mut len = read_chunk(&mut input, &mut in_buf).await?;
        while len > 0 {
            plaintext_len = plaintext_len.saturating_add(len_u64(len));
            out_buf.clear();
            maybe_block_in_place(|| encryptor.update(&in_buf, &mut out_buf));
            // The next chunk is read while the previous one is being written.
            let ((), next_len) = tokio::try_join!(
                output.write_all(&out_buf),
                read_chunk(&mut input, &mut in_buf),
            )?;
            len = next_len;
        }
        out_buf.clear();
        encryptor.finish(&mut out_buf);
        output.write_all(&out_buf).await?;
        output.flush().await?;
        debug!(plaintext_len, "encrypted");
        Ok(salt)
    }

    /// Decrypts ciphertext (without the salt header) from `input` into `output`.
    ///
    /// Returns the plaintext length. Plaintext that was already written to `output` when an
    /// error occurs can't be taken back.
    #[instrument(skip_all)]
    #[inline]
    pub async fn decrypt<R, W>(
        &self,
        mut input: R,
        output: &mut W,
        key: &AreaKey,
        salt: &Salt,
    ) -> Result<u64, CipherError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let blob_key = maybe_block_in_place(|| BlobKey::derive(key, salt));
        let mut decryptor = Decryptor::new(&blob_key)?;

        let mut in_buf = self.pool.get();
        let mut out_buf = self.pool.get();
        let mut plaintext_len = 0_u64;
        let mut len = read_chunk(&mut input, &mut in_buf).await?;
        while len > 0 {
            out_buf.clear();
            maybe_block_in_place(|| decryptor.update(&in_buf, &mut out_buf));
            plaintext_len = plaintext_len.saturating_add(len_u64(out_buf.len()));
            let ((), next_len) = tokio::try_join!(
                output.write_all(&out_buf),
                read_chunk(&mut input, &mut in_buf),
            )?;
            len = next_len;
        }
        out_buf.clear();
        decryptor.finish(&mut out_buf)?;
        plaintext_len = plaintext_len.saturating_add(len_u64(out_buf.len()));
        output.write_all(&out_buf).await?;
        output.flush().await?;
        debug!(plaintext_len, "decrypted");
        Ok(plaintext_len)
    }

    /// Lazily decrypts ciphertext (without the salt header) from `input`.
    ///
    /// A chunk is only read when the consumer asks for the next item. The last item is an
    /// error if the ciphertext turns out to be invalid.
    #[inline]
    pub fn decrypt_stream<R>(
        &self,
        mut input: R,
        key: AreaKey,
        salt: Salt,
    ) -> impl Stream<Item = Result<Bytes, CipherError>> + Send + 'static
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        generate_try_stream(move |mut y| async move {
            let blob_key = maybe_block_in_place(|| BlobKey::derive(&key, &salt));
            let mut decryptor = Decryptor::new(&blob_key)?;
            let mut in_buf = pool.get();
            let mut out_buf = Vec::with_capacity(CHUNK_LENGTH);
            while read_chunk(&mut input, &mut in_buf).await? > 0 {
                maybe_block_in_place(|| decryptor.update(&in_buf, &mut out_buf));
                if !out_buf.is_empty() {
                    y.send(Ok(Bytes::from(mem::take(&mut out_buf)))).await;
                    out_buf.reserve(CHUNK_LENGTH);
                }
            }
            decryptor.finish(&mut out_buf)?;
            if !out_buf.is_empty() {
                y.send(Ok(Bytes::from(out_buf))).await;
            }
            Ok(())
        })
    }
}

/// Reads the salt header of a blob.
#[inline]
pub async fn read_salt<R: AsyncRead + Unpin>(input: &mut R) -> Result<Salt, CipherError> {
    let mut salt = [0u8; SALT_LENGTH];
    input.read_exact(&mut salt).await.map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            CipherError::Truncated
        } else {
            CipherError::Io(err)
        }
    })?;
    Ok(Salt::from_bytes(salt))
}

/// Fills `buf` with up to [`CHUNK_LENGTH`] bytes. Returns 0 only at the end of input.
async fn read_chunk<R: AsyncRead + Unpin>(input: &mut R, buf: &mut Vec<u8>) -> io::Result<usize> {
    buf.clear();
    (&mut *input)
        .take(len_u64(CHUNK_LENGTH))
        .read_to_end(buf)
        .await
}

fn len_u64(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[expect(
    clippy::default_numeric_fallback,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::as_conversions,
    reason = "test"
)]
mod tests {
    use {
        super::*,
        futures::TryStreamExt,
        rand::{Rng, rng},
        std::{
            io::Cursor,
            pin::Pin,
            task::{Context, Poll},
        },
        tokio::io::ReadBuf,
    };

    fn cipher() -> StreamCipher {
        StreamCipher::new(Arc::new(BufferPool::new(CHUNK_LENGTH, 4)))
    }

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        rng().fill(&mut data[..]);
        data
    }

    async fn encrypt(cipher: &StreamCipher, plaintext: &[u8], key: &AreaKey) -> (Salt, Vec<u8>) {
        let mut blob = Vec::new();
        let salt = cipher.encrypt(plaintext, &mut blob, key).await.unwrap();
        (salt, blob)
    }

    #[tokio::test]
    async fn roundtrip() {
        let cipher = cipher();
        let key = AreaKey::generate().unwrap();
        for len in [0, 1, 15, 16, 17, 1000, CHUNK_LENGTH, 2 * CHUNK_LENGTH + 5] {
            let plaintext = random_bytes(len);
            let (salt, blob) = encrypt(&cipher, &plaintext, &key).await;
            assert_eq!(&blob[..SALT_LENGTH], salt.as_bytes());
            let padded = (len / 16 + 1) * 16;
            assert_eq!(blob.len(), SALT_LENGTH + padded, "len {len}");

            let mut input = Cursor::new(blob);
            let read = read_salt(&mut input).await.unwrap();
            assert_eq!(read, salt);
            let mut output = Vec::new();
            let written = cipher
                .decrypt(&mut input, &mut output, &key, &read)
                .await
                .unwrap();
            assert_eq!(written, len as u64);
            assert_eq!(output, plaintext);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn roundtrip_on_multi_thread_runtime() {
        let cipher = cipher();
        let key = AreaKey::generate().unwrap();
        let plaintext = random_bytes(CHUNK_LENGTH + 100);
        let (salt, blob) = encrypt(&cipher, &plaintext, &key).await;
        let mut output = Vec::new();
        cipher
            .decrypt(&blob[SALT_LENGTH..], &mut output, &key, &salt)
            .await
            .unwrap();
        assert_eq!(output, plaintext);
    }

    #[tokio::test]
    async fn same_content_gets_different_salts() {
        let cipher = cipher();
        let key = AreaKey::generate().unwrap();
        let (salt1, blob1) = encrypt(&cipher, b"same content", &key).await;
        let (salt2, blob2) = encrypt(&cipher, b"same content", &key).await;
        assert_ne!(salt1, salt2);
        assert_ne!(blob1, blob2);
    }

    #[tokio::test]
    async fn wrong_key_never_yields_plaintext() {
        let cipher = cipher();
        let key = AreaKey::generate().unwrap();
        let plaintext = random_bytes(5000);
        let (salt, blob) = encrypt(&cipher, &plaintext, &key).await;
        for _ in 0..8 {
            let other = AreaKey::generate().unwrap();
            let mut output = Vec::new();
            let result = cipher
                .decrypt(&blob[SALT_LENGTH..], &mut output, &other, &salt)
                .await;
            match result {
                Ok(_) => assert_ne!(output, plaintext),
                Err(err) => assert!(matches!(err, CipherError::BadPadding)),
            }
        }
    }

    #[tokio::test]
    async fn truncated_blobs() {
        let cipher = cipher();
        let key = AreaKey::generate().unwrap();
        assert!(matches!(
            read_salt(&mut &[1u8; 10][..]).await,
            Err(CipherError::Truncated)
        ));
        let (salt, blob) = encrypt(&cipher, &random_bytes(100), &key).await;
        let mut output = Vec::new();
        let result = cipher
            .decrypt(&blob[SALT_LENGTH..blob.len() - 3], &mut output, &key, &salt)
            .await;
        assert!(matches!(result, Err(CipherError::Truncated)));
        let result = cipher
            .decrypt(&b""[..], &mut Vec::new(), &key, &salt)
            .await;
        assert!(matches!(result, Err(CipherError::Truncated)));
    }

    #[tokio::test]
    async fn decrypt_stream_yields_plaintext() {
        let cipher = cipher();
        let key = AreaKey::generate().unwrap();
        let plaintext = random_bytes(3 * CHUNK_LENGTH + 1);
        let (salt, blob) = encrypt(&cipher, &plaintext, &key).await;
        let chunks: Vec<Bytes> = cipher
            .decrypt_stream(Cursor::new(blob[SALT_LENGTH..].to_vec()), key.clone(), salt)
            .try_collect()
            .await
            .unwrap();
        assert!(chunks.len() >= 3);
        assert_eq!(chunks.concat(), plaintext);

        let result: Result<Vec<Bytes>, _> = cipher
            .decrypt_stream(Cursor::new(vec![0u8; 7]), key, salt)
            .try_collect()
            .await;
        assert!(matches!(result, Err(CipherError::Truncated)));
    }

    #[tokio::test]
    async fn buffers_return_to_pool() {
        let cipher = cipher();
        let key = AreaKey::generate().unwrap();
        encrypt(&cipher, b"abc", &key).await;
        assert_eq!(cipher.pool().idle_count(), 2);
    }

    /// Yields `remaining` bytes and then fails.
    struct FailingReader {
        remaining: usize,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.remaining == 0 {
                return Poll::Ready(Err(io::Error::other("connection reset")));
            }
            let len = self.remaining.min(buf.remaining()).min(4096);
            buf.put_slice(&vec![3u8; len]);
            self.remaining -= len;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn buffers_return_to_pool_after_errors() {
        let cipher = cipher();
        let key = AreaKey::generate().unwrap();
        let result = cipher
            .encrypt(
                FailingReader {
                    remaining: CHUNK_LENGTH + 10,
                },
                &mut Vec::new(),
                &key,
            )
            .await;
        assert!(matches!(result, Err(CipherError::Io(_))));
        assert_eq!(cipher.pool().idle_count(), 2);

        let (salt, blob) = encrypt(&cipher, &random_bytes(2 * CHUNK_LENGTH), &key).await;
        let result = cipher
            .decrypt(&blob[SALT_LENGTH..blob.len() - 5], &mut Vec::new(), &key, &salt)
            .await;
        assert!(matches!(result, Err(CipherError::Truncated)));
        assert_eq!(cipher.pool().idle_count(), 2);
    }

    #[tokio::test]
    async fn dropped_stream_returns_buffer() {
        let cipher = cipher();
        let key = AreaKey::generate().unwrap();
        let (salt, blob) = encrypt(&cipher, &random_bytes(3 * CHUNK_LENGTH), &key).await;
        assert_eq!(cipher.pool().idle_count(), 2);

        let mut stream = Box::pin(cipher.decrypt_stream(
            Cursor::new(blob[SALT_LENGTH..].to_vec()),
            key,
            salt,
        ));
        let first = stream.try_next().await.unwrap().unwrap();
        assert!(!first.is_empty());
        assert_eq!(cipher.pool().idle_count(), 1);
        drop(stream);
        assert_eq!(cipher.pool().idle_count(), 2);
    }
}
