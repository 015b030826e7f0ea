use {
    anyhow::Result,
    byte_unit::Byte,
    serde::{Deserialize, Serialize},
    std::path::{Path, PathBuf},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub database_url: String,
    /// Root directory of all storage areas. Must exist.
    pub storage_path: PathBuf,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Quota assigned to new storage areas.
    #[serde(default = "default_area_quota")]
    pub default_area_quota: Byte,
    /// How many chunk buffers are kept around between requests.
    #[serde(default = "default_max_idle_buffers")]
    pub max_idle_buffers: usize,
}

fn default_log_filter() -> String {
    "info".into()
}

fn default_area_quota() -> Byte {
    Byte::from_u64(30_000_000_000)
}

fn default_max_idle_buffers() -> usize {
    16
}

impl Config {
    #[inline]
    pub fn parse(path: impl AsRef<Path>) -> Result<Self> {
        Ok(json5::from_str(&fs_err::read_to_string(path)?)?)
    }
}
