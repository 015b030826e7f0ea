use {
    crate::StorageError,
    anyhow::{Result, bail},
    fs_err::create_dir_all,
    sharebucket_protocol::{AreaId, FileName, LogicalPath},
    std::{
        io,
        path::{Path, PathBuf},
    },
    tempfile::NamedTempFile,
    tokio::fs,
    tracing::debug,
};

/// Maps logical locations inside storage areas to the filesystem.
///
/// Layout: `<root>/<area id>/<path segments>/<file name>.enc`. Blobs being written live in
/// `<root>/tmp` until they are complete.
#[derive(Debug)]
pub struct Storage {
    root: PathBuf,
    tmp: PathBuf,
}

impl Storage {
    #[inline]
    pub fn new(root: PathBuf) -> Result<Self> {
        if !root.try_exists()? {
            bail!("storage root {} doesn't exist", root.display());
        }
        if !root.is_dir() {
            bail!("storage root {} is not a directory", root.display());
        }
        let tmp = root.join("tmp");
        create_dir_all(&tmp)?;
        Ok(Self { root, tmp })
    }

    #[must_use]
    #[inline]
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp
    }

    /// New file outside of all areas. It's removed when dropped unless persisted.
    #[inline]
    pub fn create_temp_file(&self) -> io::Result<NamedTempFile> {
        NamedTempFile::new_in(&self.tmp)
    }

    /// Creates `dir` with its missing parents. Returns the created directories, deepest first.
    pub(crate) async fn create_directories(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut created = Vec::new();
        let mut current = Some(dir);
        while let Some(path) = current {
            if path == self.root.as_path() || fs::try_exists(path).await? {
                break;
            }
            created.push(path.to_path_buf());
            current = path.parent();
        }
        fs::create_dir_all(dir).await?;
        Ok(created)
    }

    #[must_use]
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    #[inline]
    pub fn area_root(&self, area: AreaId) -> PathBuf {
        self.root.join(area.to_string())
    }

    /// Physical directory of `path`. Never creates anything.
    #[inline]
    pub fn directory(&self, area: AreaId, path: &LogicalPath) -> Result<PathBuf, StorageError> {
        let area_root = self.area_root(area);
        let mut dir = area_root.clone();
        dir.extend(path.segments());
        if !dir.starts_with(&area_root) {
            return Err(StorageError::InvalidPath(format!(
                "{path} escapes the storage area"
            )));
        }
        Ok(dir)
    }

    #[inline]
    pub fn blob_path(
        &self,
        area: AreaId,
        path: &LogicalPath,
        filename: &FileName,
    ) -> Result<PathBuf, StorageError> {
        Ok(self.directory(area, path)?.join(filename.blob_name()))
    }
}

/// Normalizes a caller-supplied path.
#[inline]
pub fn parse_path(path: Option<&str>) -> Result<LogicalPath, StorageError> {
    LogicalPath::normalize(path).map_err(|err| StorageError::InvalidPath(err.to_string()))
}

#[inline]
pub fn parse_file_name(name: &str) -> Result<FileName, StorageError> {
    FileName::new(name).map_err(|err| StorageError::InvalidPath(err.to_string()))
}

/// Removes directories returned by [`Storage::create_directories`] if they are still empty.
pub(crate) fn remove_empty_directories(dirs: &[PathBuf]) {
    for dir in dirs {
        if let Err(err) = fs_err::remove_dir(dir) {
            debug!(%err, "kept directory");
            return;
        }
    }
}

/// Fails with `DirectoryNotFound` unless `dir` is an existing directory.
pub(crate) async fn require_directory(dir: &Path, path: &LogicalPath) -> Result<(), StorageError> {
    match fs::metadata(dir).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(StorageError::DirectoryNotFound(path.clone())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            Err(StorageError::DirectoryNotFound(path.clone()))
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    #[test]
    fn layout() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().into()).unwrap();
        let area = AreaId(7);
        assert_eq!(storage.area_root(area), dir.path().join("7"));
        assert_eq!(
            storage
                .directory(area, &LogicalPath::root())
                .unwrap(),
            dir.path().join("7")
        );
        let path = parse_path(Some("docs\\sub")).unwrap();
        assert_eq!(
            storage.directory(area, &path).unwrap(),
            dir.path().join("7").join("docs").join("sub")
        );
        let filename = parse_file_name("report.pdf").unwrap();
        assert_eq!(
            storage.blob_path(area, &path, &filename).unwrap(),
            dir.path()
                .join("7")
                .join("docs")
                .join("sub")
                .join("report.pdf.enc")
        );
    }

    #[test]
    fn equivalent_paths_resolve_to_the_same_directory() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().into()).unwrap();
        let expected = storage
            .directory(AreaId(1), &parse_path(Some("a/b")).unwrap())
            .unwrap();
        for raw in ["a/b/", "a/b\\", "/a/b"] {
            let path = parse_path(Some(raw)).unwrap();
            assert_eq!(storage.directory(AreaId(1), &path).unwrap(), expected);
        }
    }

    #[test]
    fn invalid_input() {
        assert!(matches!(
            parse_path(Some("a/../../etc")),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            parse_file_name(".."),
            Err(StorageError::InvalidPath(_))
        ));
        Storage::new(PathBuf::from("/definitely/not/here")).unwrap_err();
    }

    #[tokio::test]
    async fn created_directories_are_tracked() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().into()).unwrap();
        assert!(storage.tmp_dir().is_dir());

        let target = storage
            .directory(AreaId(1), &parse_path(Some("a/b")).unwrap())
            .unwrap();
        let created = storage.create_directories(&target).await.unwrap();
        assert_eq!(
            created,
            [
                dir.path().join("1").join("a").join("b"),
                dir.path().join("1").join("a"),
                dir.path().join("1"),
            ]
        );
        assert!(target.is_dir());
        assert!(storage.create_directories(&target).await.unwrap().is_empty());

        let sibling = dir.path().join("1").join("a").join("c");
        fs_err::create_dir(&sibling).unwrap();
        remove_empty_directories(&created);
        assert!(!target.exists());
        assert!(sibling.is_dir());
    }
}
