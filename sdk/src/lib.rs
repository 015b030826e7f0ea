//! Encryption layer of the ShareBucket file store: key derivation, the blob format and
//! streaming encryption over async readers and writers.

pub mod crypto;
mod pool;

pub use pool::{BufferPool, PooledBuffer};
