use {
    anyhow::Result,
    rand::{
        Rng,
        distr::{Alphanumeric, SampleString},
        rng,
        seq::IndexedRandom,
    },
    sharebucket_protocol::{FileName, LogicalPath},
};

/// Folder names overlap on purpose: `docs` is a string prefix of `docsX`.
const FOLDER_NAMES: &[&str] = &["docs", "docsX", "img", "a", "sub"];
const FILE_NAMES: &[&str] = &["a.txt", "b.bin", "report.pdf", "x", ".hidden", "photo.tar.gz"];

pub fn random_dir() -> Result<LogicalPath> {
    let mut path = LogicalPath::root();
    for _ in 0..rng().random_range(0..=2_usize) {
        let Some(name) = FOLDER_NAMES.choose(&mut rng()) else {
            break;
        };
        path = path.join(name)?;
    }
    Ok(path)
}

pub fn random_file_name() -> Result<FileName> {
    if rng().random_bool(0.7) {
        if let Some(name) = FILE_NAMES.choose(&mut rng()) {
            return FileName::new(name);
        }
    }
    let name_len = rng().random_range(1..=12);
    FileName::new(&Alphanumeric.sample_string(&mut rng(), name_len))
}

/// Mostly small files with the occasional one spanning several chunks.
pub fn random_content() -> Vec<u8> {
    let len = if rng().random_bool(0.1) {
        rng().random_range(0..=3_500_000)
    } else {
        rng().random_range(0..=40_000)
    };
    let mut content = vec![0u8; len];
    rng().fill(&mut content[..]);
    content
}
