use {
    anyhow::{Result, bail},
    serde::{Deserialize, Serialize, de::Error},
    std::{fmt, str::FromStr},
};

/// Suffix appended to the file name of every blob on disk.
pub const BLOB_SUFFIX: &str = ".enc";

/// Longest file name most filesystems accept for a single component.
const MAX_COMPONENT_LEN: usize = 255;

/// Directory inside a storage area, as seen by clients.
///
/// The canonical form always starts and ends with `/`, and the area root is `/`.
/// Both `\` and `/` are accepted as separators on input, and repeated separators collapse,
/// so `a/b`, `a/b/`, `a/b\` and `/a/b` all name the same directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LogicalPath(String);

impl LogicalPath {
    #[must_use]
    #[inline]
    pub fn root() -> Self {
        Self("/".into())
    }

    /// Normalizes a caller-supplied path. An absent or empty path is the area root.
    ///
    /// Fails on `.` and `..` segments and on embedded NUL bytes, so the result can never
    /// point outside of the area.
    #[inline]
    pub fn normalize(path: Option<&str>) -> Result<Self> {
        let mut normalized = String::from("/");
        for segment in path.unwrap_or_default().split(['/', '\\']) {
            if segment.is_empty() {
                continue;
            }
            check_segment(segment)?;
            normalized.push_str(segment);
            normalized.push('/');
        }
        Ok(Self(normalized))
    }

    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    #[inline]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    #[inline]
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// Returns true if `self` is `prefix` or lies below it.
    ///
    /// Both paths end with `/`, so `/docs/` never matches `/docsX/`.
    #[must_use]
    #[inline]
    pub fn starts_with(&self, prefix: &LogicalPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    #[inline]
    pub fn join(&self, name: &str) -> Result<LogicalPath> {
        if name.is_empty() {
            bail!("folder name cannot be empty");
        }
        if name.contains(['/', '\\']) {
            bail!("folder name cannot contain separators");
        }
        check_segment(name)?;
        Ok(Self(format!("{}{name}/", self.0)))
    }

    #[must_use]
    #[inline]
    pub fn parent(&self) -> Option<LogicalPath> {
        if self.is_root() {
            return None;
        }
        let trimmed = self.0.trim_end_matches('/');
        let pos = trimmed.rfind('/')?;
        trimmed
            .get(..=pos)
            .map(|parent| Self(parent.to_owned()))
    }

    #[must_use]
    #[inline]
    pub fn last_name(&self) -> Option<&str> {
        self.segments().last()
    }
}

fn check_segment(segment: &str) -> Result<()> {
    if segment == "." || segment == ".." {
        bail!("path cannot contain `{segment}` segments");
    }
    if segment.contains('\0') {
        bail!("path cannot contain NUL bytes");
    }
    if segment.len() > MAX_COMPONENT_LEN {
        bail!("path segment is longer than {MAX_COMPONENT_LEN} bytes");
    }
    Ok(())
}

impl FromStr for LogicalPath {
    type Err = anyhow::Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(Some(s))
    }
}

impl<'de> Deserialize<'de> for LogicalPath {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::normalize(Some(&s)).map_err(D::Error::custom)
    }
}

impl fmt::Display for LogicalPath {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a file inside a logical directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FileName(String);

impl FileName {
    #[inline]
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            bail!("file name cannot be empty");
        }
        if name.contains(['/', '\\']) {
            bail!("file name cannot contain separators");
        }
        check_segment(name)?;
        if name.len().saturating_add(BLOB_SUFFIX.len()) > MAX_COMPONENT_LEN {
            bail!("file name is too long");
        }
        Ok(Self(name.to_owned()))
    }

    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extension including the leading dot, or an empty string if there is none.
    #[must_use]
    #[inline]
    pub fn extension(&self) -> &str {
        match self.0.rfind('.') {
            Some(pos) if pos.saturating_add(1) < self.0.len() => {
                self.0.get(pos..).unwrap_or_default()
            }
            _ => "",
        }
    }

    /// Name of the encrypted blob on disk.
    #[must_use]
    #[inline]
    pub fn blob_name(&self) -> String {
        format!("{}{BLOB_SUFFIX}", self.0)
    }
}

impl FromStr for FileName {
    type Err = anyhow::Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for FileName {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::new(&s).map_err(D::Error::custom)
    }
}

impl fmt::Display for FileName {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
