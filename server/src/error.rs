use {
    crate::metadata::MetadataError,
    sharebucket_protocol::{AreaId, FileName, LogicalPath},
    sharebucket_sdk::crypto::CipherError,
    std::io,
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage area {0} not found")]
    AreaNotFound(AreaId),
    #[error("directory {0} not found")]
    DirectoryNotFound(LogicalPath),
    #[error("encrypted file {path}{filename} not found")]
    BlobNotFound {
        path: LogicalPath,
        filename: FileName,
    },
    #[error("no metadata for {path}{filename}")]
    MetadataNotFound {
        path: LogicalPath,
        filename: FileName,
    },
    #[error("cipher failure: {0}")]
    CipherFailure(#[source] CipherError),
    #[error("i/o failure: {0}")]
    IoFailure(#[from] io::Error),
    #[error("conflicting write: {0}")]
    ConflictingWrite(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("metadata store failure: {0}")]
    Metadata(#[from] MetadataError),
}

impl From<CipherError> for StorageError {
    #[inline]
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::Io(err) => Self::IoFailure(err),
            err @ (CipherError::Truncated
            | CipherError::BadPadding
            | CipherError::Random(_)
            | CipherError::InvalidKeyLength) => Self::CipherFailure(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cipher_errors_are_classified() {
        let io_err = io::Error::other("disk on fire");
        assert!(matches!(
            StorageError::from(CipherError::Io(io_err)),
            StorageError::IoFailure(_)
        ));
        assert!(matches!(
            StorageError::from(CipherError::BadPadding),
            StorageError::CipherFailure(CipherError::BadPadding)
        ));
        assert!(matches!(
            StorageError::from(CipherError::Truncated),
            StorageError::CipherFailure(CipherError::Truncated)
        ));
    }
}
