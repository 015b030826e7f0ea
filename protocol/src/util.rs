use {
    anyhow::Result,
    fs_err::{OpenOptions, create_dir_all},
    std::{
        io::{self, Write},
        path::Path,
    },
    tokio::{
        runtime::{Handle, RuntimeFlavor},
        task::block_in_place,
    },
};

/// Runs a CPU-heavy closure without starving other tasks of a multi-threaded runtime.
///
/// `block_in_place` panics on a current-thread runtime, so there the closure runs inline.
#[inline]
pub fn maybe_block_in_place<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => block_in_place(f),
        _ => f(),
    }
}

/// Opens the log destination: `log_file` in append mode, or stdout if it's not set.
#[inline]
pub fn log_writer(log_file: Option<&Path>) -> Result<Box<dyn Write + Send + 'static>> {
    let Some(log_file) = log_file else {
        return Ok(Box::new(io::stdout()));
    };
    if let Some(parent) = log_file.parent() {
        create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;
    Ok(Box::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_without_runtime() {
        assert_eq!(maybe_block_in_place(|| 2 + 2), 4);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn runs_on_current_thread_runtime() {
        assert_eq!(maybe_block_in_place(|| "inline"), "inline");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runs_on_multi_thread_runtime() {
        assert_eq!(maybe_block_in_place(|| 7_u8), 7);
    }

    #[test]
    fn log_writer_appends() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logs").join("admin.log");
        log_writer(Some(&path)).unwrap().write_all(b"one\n").unwrap();
        log_writer(Some(&path)).unwrap().write_all(b"two\n").unwrap();
        assert_eq!(fs_err::read_to_string(&path).unwrap(), "one\ntwo\n");
    }
}
