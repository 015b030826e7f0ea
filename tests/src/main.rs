mod shuffle;

use {
    anyhow::{Result, bail, ensure},
    byte_unit::Byte,
    cadd::{ops::Cadd, prelude::IntoType},
    clap::Parser,
    fs_err::{create_dir_all, write},
    futures::TryStreamExt,
    rand::{
        distr::{Distribution, weighted::WeightedIndex},
        rng,
        seq::IteratorRandom,
    },
    sharebucket_protocol::{AreaId, FileName, LogicalPath, PrincipalId},
    sharebucket_server::{Config, FileStore, PgStore, StorageError, util::setup_logger},
    shuffle::{random_content, random_dir, random_file_name},
    sqlx::query_scalar,
    std::{collections::BTreeMap, sync::Arc},
    tempfile::TempDir,
    tracing::{debug, error, info},
};

const OWNER: PrincipalId = PrincipalId(1);

#[derive(Debug, Parser)]
struct Args {
    database_url: String,
    #[clap(long, default_value_t = 300)]
    rounds: u32,
}

/// Expected contents of one area.
#[derive(Debug, Default)]
struct Model {
    files: BTreeMap<(LogicalPath, FileName), Vec<u8>>,
}

impl Model {
    fn choose(&self) -> Option<(LogicalPath, FileName)> {
        self.files.keys().choose(&mut rng()).cloned()
    }

    fn files_in(&self, dir: &LogicalPath) -> Vec<FileName> {
        self.files
            .keys()
            .filter(|(path, _)| path == dir)
            .map(|(_, name)| name.clone())
            .collect()
    }
}

struct Harness {
    files: FileStore<PgStore>,
    areas: Vec<(AreaId, Model)>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let result = try_main().await;
    if let Err(err) = &result {
        error!("{err:?}");
    }
    result
}

async fn try_main() -> Result<()> {
    let args = Args::parse();
    let dir = TempDir::new()?.keep();
    setup_logger(
        Some(&dir.join("1.log")),
        "info,sqlx=warn,sharebucket_server=debug",
    )?;
    info!("dir: {}", dir.display());

    let storage_path = dir.join("storage");
    create_dir_all(&storage_path)?;
    let config = Config {
        database_url: args.database_url,
        storage_path,
        log_file: None,
        log_filter: String::new(),
        default_area_quota: Byte::from_u64(100_000_000),
        max_idle_buffers: 4,
    };
    let config_path = dir.join("sharebucket.conf");
    write(&config_path, json5::to_string(&config)?)?;
    let config = Config::parse(&config_path)?;

    let store = PgStore::connect(&config.database_url).await?;
    store.migrate().await?;
    let files = FileStore::from_config(&config, Arc::new(store))?;

    let mut areas = Vec::new();
    for index in 0..2_u32 {
        let area = files
            .create_area(OWNER, &format!("harness {index}"), None)
            .await?;
        info!("created area {}", area.id);
        areas.push((area.id, Model::default()));
    }
    let mut harness = Harness { files, areas };

    let operations: &[(Operation, u32)] = &[
        (Operation::Upload, 10),
        (Operation::ConcurrentUpload, 2),
        (Operation::Download, 6),
        (Operation::DownloadStream, 3),
        (Operation::DeleteFile, 4),
        (Operation::DeleteFolder, 1),
        (Operation::List, 3),
    ];
    let distribution = WeightedIndex::new(operations.iter().map(|(_, weight)| weight))?;
    for round in 0..args.rounds {
        let index = distribution.sample(&mut rng());
        let Some((operation, _)) = operations.get(index) else {
            bail!("no operation at {index}");
        };
        let area_index = (0..harness.areas.len()).choose(&mut rng()).unwrap_or(0);
        debug!(round, ?operation, area_index, "next round");
        harness.run(*operation, area_index).await?;
        harness.check_record_count(area_index).await?;
    }

    for (area, _) in &harness.areas {
        harness.files.delete_area(*area).await?;
        ensure!(
            record_count(&harness.files, *area).await? == 0,
            "records left after deleting area {area}"
        );
    }
    info!("all {} rounds passed", args.rounds);
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Upload,
    ConcurrentUpload,
    Download,
    DownloadStream,
    DeleteFile,
    DeleteFolder,
    List,
}

impl Harness {
    async fn run(&mut self, operation: Operation, area_index: usize) -> Result<()> {
        let Some((area, model)) = self.areas.get_mut(area_index) else {
            bail!("no area at {area_index}");
        };
        let area = *area;
        let files = &self.files;
        match operation {
            Operation::Upload => {
                let (path, name) = (random_dir()?, random_file_name()?);
                let content = random_content();
                let result = files.upload(area, &path, &name, &content[..]).await;
                let key = (path, name);
                match result {
                    Ok(record) => {
                        ensure!(
                            !model.files.contains_key(&key),
                            "overwrote {}{}",
                            key.0,
                            key.1
                        );
                        ensure!(record.filename == key.1, "wrong record {record:?}");
                        debug!("uploaded {}{} ({} bytes)", key.0, key.1, content.len());
                        model.files.insert(key, content);
                    }
                    Err(StorageError::ConflictingWrite(_)) => {
                        ensure!(
                            model.files.contains_key(&key),
                            "unexpected conflict for {}{}",
                            key.0,
                            key.1
                        );
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            Operation::ConcurrentUpload => {
                let (path, name) = (random_dir()?, random_file_name()?);
                if model.files.contains_key(&(path.clone(), name.clone())) {
                    return Ok(());
                }
                let first = random_content();
                let second = random_content();
                let (first_result, second_result) = tokio::join!(
                    files.upload(area, &path, &name, &first[..]),
                    files.upload(area, &path, &name, &second[..]),
                );
                let winner = match (first_result, second_result) {
                    (Ok(_), Err(StorageError::ConflictingWrite(_))) => first,
                    (Err(StorageError::ConflictingWrite(_)), Ok(_)) => second,
                    (first_result, second_result) => {
                        bail!("expected exactly one upload to win: {first_result:?}, {second_result:?}");
                    }
                };
                model.files.insert((path, name), winner);
            }
            Operation::Download => {
                let Some((path, name)) = model.choose() else {
                    return Ok(());
                };
                let mut output = Vec::new();
                let len = files.download(area, &path, &name, &mut output).await?;
                let expected = model.files.get(&(path.clone(), name.clone()));
                ensure!(
                    expected == Some(&output),
                    "content mismatch for {path}{name}"
                );
                ensure!(len == output.len().try_into_type::<u64>()?, "wrong length");
            }
            Operation::DownloadStream => {
                let Some((path, name)) = model.choose() else {
                    return Ok(());
                };
                let chunks: Vec<_> = files
                    .download_stream(area, &path, &name)
                    .await?
                    .try_collect()
                    .await?;
                let mut total = 0_usize;
                for chunk in &chunks {
                    total = total.cadd(chunk.len())?;
                }
                let expected = model.files.get(&(path.clone(), name.clone()));
                ensure!(
                    expected.map(Vec::len) == Some(total),
                    "length mismatch for {path}{name}"
                );
                ensure!(
                    expected.is_some_and(|expected| *expected == chunks.concat()),
                    "content mismatch for {path}{name}"
                );
            }
            Operation::DeleteFile => {
                let Some(key) = model.choose() else {
                    return Ok(());
                };
                files.delete_file(area, &key.0, &key.1).await?;
                model.files.remove(&key);
                match files.delete_file(area, &key.0, &key.1).await {
                    Err(StorageError::MetadataNotFound { .. }) => {}
                    other => bail!("second delete of {}{}: {other:?}", key.0, key.1),
                }
            }
            Operation::DeleteFolder => {
                let dir = random_dir()?;
                if dir.is_root() {
                    return Ok(());
                }
                let expected = model
                    .files
                    .keys()
                    .filter(|(path, _)| path.starts_with(&dir))
                    .count()
                    .try_into_type::<u64>()?;
                match files.delete_folder(area, &dir).await {
                    Ok(deleted) => {
                        ensure!(deleted == expected, "deleted {deleted}, expected {expected}");
                        model.files.retain(|(path, _), _| !path.starts_with(&dir));
                        info!("deleted folder {dir} with {deleted} files");
                    }
                    Err(StorageError::DirectoryNotFound(_)) => {
                        ensure!(expected == 0, "{dir} has files but no directory");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            Operation::List => {
                let dir = random_dir()?;
                let expected = model.files_in(&dir);
                match files.list(area, &dir).await {
                    Ok(listing) => {
                        let actual: Vec<_> =
                            listing.files.into_iter().map(|file| file.filename).collect();
                        ensure!(
                            actual == expected,
                            "listing of {dir}: {actual:?}, expected {expected:?}"
                        );
                    }
                    Err(StorageError::DirectoryNotFound(_)) => {
                        ensure!(expected.is_empty(), "{dir} has files but no directory");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(())
    }

    async fn check_record_count(&self, area_index: usize) -> Result<()> {
        let Some((area, model)) = self.areas.get(area_index) else {
            bail!("no area at {area_index}");
        };
        let count = record_count(&self.files, *area).await?;
        ensure!(
            count == model.files.len().try_into_type::<u64>()?,
            "area {area} has {count} records, expected {}",
            model.files.len()
        );
        Ok(())
    }
}

async fn record_count(files: &FileStore<PgStore>, area: AreaId) -> Result<u64> {
    let count: i64 = query_scalar("SELECT COUNT(*) FROM file_metadata WHERE area_id = $1")
        .bind(area.0)
        .fetch_one(files.store().pool())
        .await?;
    Ok(count.try_into_type::<u64>()?)
}
