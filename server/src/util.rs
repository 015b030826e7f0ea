use {
    anyhow::Result,
    sharebucket_protocol::util::log_writer,
    std::{path::Path, path::PathBuf, sync::Mutex},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, registry, util::SubscriberInitExt},
};

/// Installs the global subscriber. Events go to `log_file` or, if it's not set, to stdout.
#[inline]
pub fn setup_logger(log_file: Option<&Path>, log_filter: &str) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_ansi(log_file.is_none())
        .with_writer(Mutex::new(log_writer(log_file)?));
    registry()
        .with(fmt_layer)
        .with(EnvFilter::try_new(log_filter)?)
        .try_init()?;
    Ok(())
}

#[cfg(target_os = "linux")]
#[inline]
pub fn default_config_dir() -> Result<PathBuf> {
    Ok("/etc".into())
}

// Windows: %APPDATA% (%USERPROFILE%\AppData\Roaming);
// macOS: $HOME/Library/Application Support
#[cfg(not(target_os = "linux"))]
#[inline]
pub fn default_config_dir() -> Result<PathBuf> {
    dirs::config_dir().ok_or_else(|| anyhow::anyhow!("failed to get config dir"))
}

/// Config used when the admin tool is started without `--config`.
#[inline]
pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join("sharebucket.conf"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_in_config_dir() {
        let path = default_config_path().unwrap();
        assert!(path.starts_with(default_config_dir().unwrap()));
        assert!(path.ends_with("sharebucket.conf"));
    }
}
