//! Per-area encrypted file storage.
//!
//! Every storage area has its own key. Files are encrypted on the way to disk and decrypted on
//! the way out (see [`sharebucket_sdk::crypto`] for the blob format). A metadata record is kept
//! for every blob; the two are created and removed together.

#![expect(
    clippy::multiple_inherent_impl,
    reason = "file store operations are split by concern"
)]

mod areas;
pub mod config;
mod delete;
mod download;
mod error;
pub mod keys;
mod listing;
pub mod locks;
pub mod memory;
pub mod metadata;
pub mod postgres;
pub mod storage;
mod upload;
pub mod util;

pub use {
    config::Config,
    error::StorageError,
    keys::KeyProvider,
    memory::MemoryStore,
    metadata::{AreaStore, MetadataError, MetadataStore},
    postgres::PgStore,
    storage::Storage,
};

use {
    crate::locks::DestinationLocks,
    sharebucket_sdk::{
        BufferPool,
        crypto::{CHUNK_LENGTH, StreamCipher},
    },
    std::sync::Arc,
};

/// Buffers of one chunk plus room for a block of padding.
const BUFFER_CAPACITY: usize = CHUNK_LENGTH + 64;

/// Entry point of all storage operations.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
#[derive(Debug)]
pub struct FileStore<S> {
    storage: Storage,
    store: Arc<S>,
    cipher: StreamCipher,
    locks: DestinationLocks,
    default_quota: u64,
}

impl<S: MetadataStore + AreaStore> FileStore<S> {
    #[must_use]
    #[inline]
    pub fn new(storage: Storage, store: Arc<S>, default_quota: u64, max_idle_buffers: usize) -> Self {
        Self {
            storage,
            store,
            cipher: StreamCipher::new(Arc::new(BufferPool::new(BUFFER_CAPACITY, max_idle_buffers))),
            locks: DestinationLocks::default(),
            default_quota,
        }
    }

    #[inline]
    pub fn from_config(config: &Config, store: Arc<S>) -> anyhow::Result<Self> {
        Ok(Self::new(
            Storage::new(config.storage_path.clone())?,
            store,
            config.default_area_quota.as_u64(),
            config.max_idle_buffers,
        ))
    }

    #[must_use]
    #[inline]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[must_use]
    #[inline]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}
