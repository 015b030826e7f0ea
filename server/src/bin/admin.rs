#![expect(clippy::print_stdout, reason = "command line tool")]

use {
    anyhow::{Context, Result, bail},
    byte_unit::Byte,
    clap::{Parser, Subcommand},
    sharebucket_protocol::{AreaId, PrincipalId},
    sharebucket_server::{
        Config, FileStore, PgStore,
        storage::{parse_file_name, parse_path},
        util::{default_config_path, setup_logger},
    },
    std::{path::PathBuf, sync::Arc},
    tokio::{
        fs::File,
        io::{AsyncWriteExt, BufReader, BufWriter},
    },
};

#[derive(Debug, Parser)]
pub struct Cli {
    /// Defaults to `sharebucket.conf` in the system config directory.
    #[clap(long)]
    pub config: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply pending database migrations.
    Migrate,
    CreateArea {
        owner: i32,
        name: String,
        /// Quota, e.g. "50 GB". Uses the configured default if omitted.
        #[clap(long)]
        max_size: Option<Byte>,
    },
    DeleteArea {
        area: i32,
    },
    /// List areas a principal is a member of.
    Areas {
        principal: i32,
    },
    Grant {
        area: i32,
        principal: i32,
    },
    Revoke {
        area: i32,
        principal: i32,
    },
    Ls {
        area: i32,
        path: Option<String>,
    },
    Mkdir {
        area: i32,
        path: String,
    },
    Rmdir {
        area: i32,
        path: String,
    },
    /// Encrypt a local file into an area.
    Upload {
        area: i32,
        local: PathBuf,
        path: Option<String>,
        /// Stored file name. Defaults to the local file name.
        #[clap(long)]
        name: Option<String>,
    },
    /// Decrypt a stored file into a new local file.
    Download {
        area: i32,
        path: String,
        name: String,
        local: PathBuf,
    },
    Rm {
        area: i32,
        path: String,
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = Config::parse(&config_path)
        .with_context(|| format!("failed to read config {}", config_path.display()))?;
    setup_logger(config.log_file.as_deref(), &config.log_filter)?;

    let store = PgStore::connect(&config.database_url).await?;
    if matches!(cli.command, Command::Migrate) {
        println!("Running migrations...");
        store.migrate().await?;
        println!("Done");
        return Ok(());
    }
    let files = FileStore::from_config(&config, Arc::new(store))?;

    match cli.command {
        Command::Migrate => {}
        Command::CreateArea {
            owner,
            name,
            max_size,
        } => {
            let area = files
                .create_area(PrincipalId(owner), &name, max_size.map(|size| size.as_u64()))
                .await?;
            println!("Created area {} ({})", area.id, area.name);
        }
        Command::DeleteArea { area } => {
            files.delete_area(AreaId(area)).await?;
            println!("Deleted area {area}");
        }
        Command::Areas { principal } => {
            let areas = files.areas_for_member(PrincipalId(principal)).await?;
            if areas.is_empty() {
                println!("No areas.");
            }
            for area in areas {
                println!(
                    "{}\t{}\towner: {}\tquota: {:#}\tcreated: {}",
                    area.id,
                    area.name,
                    area.owner,
                    Byte::from_u64(area.max_size),
                    area.created_at
                );
            }
        }
        Command::Grant { area, principal } => {
            if files
                .grant_access(AreaId(area), PrincipalId(principal))
                .await?
            {
                println!("Access granted");
            } else {
                println!("Already a member");
            }
        }
        Command::Revoke { area, principal } => {
            if files
                .revoke_access(AreaId(area), PrincipalId(principal))
                .await?
            {
                println!("Access revoked");
            } else {
                println!("Not a member or the owner");
            }
        }
        Command::Ls { area, path } => {
            let listing = files
                .list(AreaId(area), &parse_path(path.as_deref())?)
                .await?;
            for folder in listing.folders {
                println!("{folder}/");
            }
            for file in listing.files {
                println!("{}\t{}", file.filename, file.created_at);
            }
        }
        Command::Mkdir { area, path } => {
            files
                .create_folder(AreaId(area), &parse_path(Some(&path))?)
                .await?;
        }
        Command::Rmdir { area, path } => {
            let deleted = files
                .delete_folder(AreaId(area), &parse_path(Some(&path))?)
                .await?;
            println!("Deleted {deleted} files");
        }
        Command::Upload {
            area,
            local,
            path,
            name,
        } => {
            let name = match name {
                Some(name) => name,
                None => match local.file_name().and_then(|name| name.to_str()) {
                    Some(name) => name.to_owned(),
                    None => bail!("can't derive file name from {}", local.display()),
                },
            };
            let input = BufReader::new(File::open(&local).await?);
            let record = files
                .upload(
                    AreaId(area),
                    &parse_path(path.as_deref())?,
                    &parse_file_name(&name)?,
                    input,
                )
                .await?;
            println!("Stored {}{} as file {}", record.path, record.filename, record.id);
        }
        Command::Download {
            area,
            path,
            name,
            local,
        } => {
            let mut output = BufWriter::new(File::create_new(&local).await?);
            let result = files
                .download(
                    AreaId(area),
                    &parse_path(Some(&path))?,
                    &parse_file_name(&name)?,
                    &mut output,
                )
                .await;
            match result {
                Ok(len) => {
                    output.flush().await?;
                    println!("Wrote {len} bytes to {}", local.display());
                }
                Err(err) => {
                    drop(output);
                    fs_err::remove_file(&local)?;
                    return Err(err.into());
                }
            }
        }
        Command::Rm { area, path, name } => {
            files
                .delete_file(
                    AreaId(area),
                    &parse_path(Some(&path))?,
                    &parse_file_name(&name)?,
                )
                .await?;
        }
    }
    Ok(())
}
