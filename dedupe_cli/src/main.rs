//! Reference CLI binary (C10): `<catalog-path> <command> [flags]`, wiring a
//! filesystem blob backend to either a single-catalog `Engine` or, when
//! `--cname` is given, a federated `PoolCatalog`.
//!
//! Exit code policy: operational failures (`NotFound`, `ObjectAlreadyExists`,
//! blob I/O, a corrupt catalog) print a diagnostic to stderr and exit **0**.
//! Only argument-parsing failures — including this binary's own
//! `--key`/`--cname` presence checks, plus whatever `clap` itself rejects
//! before `run` is ever called — exit non-zero. This mirrors the reference
//! implementation's own behavior exactly rather than "fixing" it; the
//! choice is deliberate, not an oversight.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use dedupe_blob::{BlobBackend, FsBlobBackend};
use dedupe_engine::Engine;
use dedupe_federation::PoolCatalog;
use dedupe_types::CatalogConfig;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing required --{flag} for this command")]
    MissingFlag { flag: &'static str },
    #[error("invalid --params value '{value}': expected MIN,MAX,SHIFT,BOUND")]
    InvalidParams { value: String },
    #[error(transparent)]
    Engine(#[from] dedupe_engine::Error),
    #[error(transparent)]
    Federation(#[from] dedupe_federation::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Argument-parsing failures exit non-zero; everything else is an
    /// operational failure per this binary's documented exit code policy.
    fn is_argument_error(&self) -> bool {
        matches!(self, Error::MissingFlag { .. } | Error::InvalidParams { .. })
    }
}

#[derive(Debug, clap::Parser)]
#[command(name = "dedupe", about = "Content-defined deduplication storage engine")]
struct Cli {
    /// Path to the catalog file (the pool catalog, for federated commands)
    catalog_path: PathBuf,

    #[command(subcommand)]
    command: Command,

    /// Directory holding chunk blobs as files
    #[arg(long, global = true, default_value = "chunks")]
    chunks: PathBuf,

    /// Object key, or (for `list`/`olist`) a key prefix filter
    #[arg(long, global = true)]
    key: Option<String>,

    /// Chunker parameters as MIN,MAX,SHIFT,BOUND; only meaningful for `create`
    #[arg(long, global = true)]
    params: Option<String>,

    /// Enumeration start offset
    #[arg(long, global = true, default_value_t = 0)]
    idxstart: u32,

    /// Enumeration page size
    #[arg(long, global = true, default_value_t = 100)]
    results: u32,

    /// Container name; presence switches every command onto the federated path
    #[arg(long, global = true)]
    cname: Option<String>,

    /// Container catalog path, used when registering a new container via `create`
    #[arg(long, global = true)]
    cindex: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Create a new catalog, or (with --cname/--cindex) register a container
    Create,
    Stats,
    Write,
    Get,
    Del,
    Md,
    List,
    Exists,
    Clist,
    Cexists,
    Cdel,
    Olist,
    Oexists,
}

fn main() {
    observability_deps::tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();
    let cli = <Cli as clap::Parser>::parse();
    match run(cli) {
        Ok(()) => {}
        Err(e) if e.is_argument_error() => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("error: {e}");
        }
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Command::Create => cmd_create(&cli),
        Command::Stats => cmd_stats(&cli),
        Command::Write => cmd_write(&cli),
        Command::Get => cmd_get(&cli),
        Command::Del => cmd_del(&cli),
        Command::Md => cmd_md(&cli),
        Command::List => cmd_list(&cli),
        Command::Exists => cmd_exists(&cli),
        Command::Clist => cmd_clist(&cli),
        Command::Cexists => cmd_cexists(&cli),
        Command::Cdel => cmd_cdel(&cli),
        Command::Olist => cmd_olist(&cli),
        Command::Oexists => cmd_oexists(&cli),
    }
}

fn require_key(cli: &Cli) -> Result<String, Error> {
    cli.key.clone().ok_or(Error::MissingFlag { flag: "key" })
}

fn require_cname(cli: &Cli) -> Result<String, Error> {
    cli.cname.clone().ok_or(Error::MissingFlag { flag: "cname" })
}

fn open_blob(cli: &Cli) -> Result<Arc<dyn BlobBackend>, Error> {
    Ok(Arc::new(FsBlobBackend::new(&cli.chunks)?))
}

fn parse_params(raw: Option<&str>) -> Result<Option<CatalogConfig>, Error> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let parts: Vec<&str> = raw.split(',').collect();
    let fields = <[&str; 4]>::try_from(parts.as_slice()).map_err(|_| Error::InvalidParams {
        value: raw.to_string(),
    })?;
    let [min, max, shift, boundary] = fields;
    let parse = |s: &str| {
        s.parse::<u32>().map_err(|_| Error::InvalidParams {
            value: raw.to_string(),
        })
    };
    Ok(Some(CatalogConfig {
        min_chunk_size: parse(min)?,
        max_chunk_size: parse(max)?,
        shift_count: parse(shift)?,
        boundary_check_bytes: parse(boundary)?,
    }))
}

fn cmd_create(cli: &Cli) -> Result<(), Error> {
    let config = parse_params(cli.params.as_deref())?.unwrap_or_else(CatalogConfig::with_defaults);
    let blob = open_blob(cli)?;
    match (&cli.cname, &cli.cindex) {
        (Some(cname), Some(cindex)) => {
            let pool = if cli.catalog_path.exists() {
                PoolCatalog::open(&cli.catalog_path, blob)?
            } else {
                PoolCatalog::create(&cli.catalog_path, config, blob)?
            };
            let index_path = cindex.to_str().ok_or_else(|| Error::InvalidParams {
                value: cindex.display().to_string(),
            })?;
            pool.register_container(cname, index_path)?;
            println!(
                "container '{cname}' registered against pool {}",
                cli.catalog_path.display()
            );
        }
        _ => {
            Engine::create(&cli.catalog_path, config, blob)?;
            println!("catalog created at {}", cli.catalog_path.display());
        }
    }
    Ok(())
}

fn cmd_stats(cli: &Cli) -> Result<(), Error> {
    let blob = open_blob(cli)?;
    let stats = if cli.cname.is_some() {
        PoolCatalog::open(&cli.catalog_path, blob)?.index_stats()?
    } else {
        Engine::open(&cli.catalog_path, blob)?.index_stats()?
    };
    println!(
        "objects={} chunks={} logical_bytes={} physical_bytes={} ratio_x={:.2} ratio_pct={:.1}",
        stats.objects, stats.chunks, stats.logical_bytes, stats.physical_bytes, stats.ratio_x, stats.ratio_pct
    );
    Ok(())
}

fn cmd_write(cli: &Cli) -> Result<(), Error> {
    let key = require_key(cli)?;
    let blob = open_blob(cli)?;
    let mut data = Vec::new();
    std::io::stdin().read_to_end(&mut data)?;
    let meta = match &cli.cname {
        Some(cname) => PoolCatalog::open(&cli.catalog_path, blob)?.write(cname, &key, &data)?,
        None => Engine::open(&cli.catalog_path, blob)?.write(&key, &data)?,
    };
    println!(
        "wrote '{}': {} bytes, {} chunks",
        meta.key, meta.original_length, meta.chunk_count
    );
    Ok(())
}

fn cmd_get(cli: &Cli) -> Result<(), Error> {
    let key = require_key(cli)?;
    let blob = open_blob(cli)?;
    let found = match &cli.cname {
        Some(cname) => {
            let pool = PoolCatalog::open(&cli.catalog_path, blob)?;
            match pool.get(cname, &key)? {
                Some(mut object) => {
                    let mut buf = Vec::new();
                    object.stream.read_to_end(&mut buf)?;
                    Some(buf)
                }
                None => None,
            }
        }
        None => Engine::open(&cli.catalog_path, blob)?.get_full(&key)?,
    };
    match found {
        Some(data) => {
            std::io::stdout().write_all(&data)?;
            Ok(())
        }
        None => {
            eprintln!("object '{key}' not found");
            Ok(())
        }
    }
}

fn cmd_md(cli: &Cli) -> Result<(), Error> {
    let key = require_key(cli)?;
    let blob = open_blob(cli)?;
    let meta = match &cli.cname {
        Some(cname) => PoolCatalog::open(&cli.catalog_path, blob)?.get_metadata(cname, &key)?,
        None => Engine::open(&cli.catalog_path, blob)?.get_metadata(&key)?,
    };
    match meta {
        Some(meta) => println!(
            "{}\t{} bytes\t{} chunks\tcreated {}",
            meta.key, meta.original_length, meta.chunk_count, meta.created_utc
        ),
        None => eprintln!("object '{key}' not found"),
    }
    Ok(())
}

fn cmd_del(cli: &Cli) -> Result<(), Error> {
    let key = require_key(cli)?;
    let blob = open_blob(cli)?;
    match &cli.cname {
        Some(cname) => PoolCatalog::open(&cli.catalog_path, blob)?.delete(cname, &key)?,
        None => Engine::open(&cli.catalog_path, blob)?.delete(&key)?,
    }
    println!("deleted '{key}'");
    Ok(())
}

fn cmd_list(cli: &Cli) -> Result<(), Error> {
    let blob = open_blob(cli)?;
    let objects = match &cli.cname {
        Some(cname) => PoolCatalog::open(&cli.catalog_path, blob)?.list_objects(
            cname,
            cli.key.as_deref(),
            cli.idxstart,
            cli.results,
        )?,
        None => {
            Engine::open(&cli.catalog_path, blob)?
                .list_objects(cli.key.as_deref(), cli.idxstart, cli.results)?
                .objects
        }
    };
    for object in &objects {
        println!("{}\t{} bytes\t{} chunks", object.key, object.original_length, object.chunk_count);
    }
    Ok(())
}

fn cmd_exists(cli: &Cli) -> Result<(), Error> {
    let key = require_key(cli)?;
    let blob = open_blob(cli)?;
    let exists = match &cli.cname {
        Some(cname) => PoolCatalog::open(&cli.catalog_path, blob)?.exists(cname, &key)?,
        None => Engine::open(&cli.catalog_path, blob)?.exists(&key)?,
    };
    println!("{exists}");
    Ok(())
}

fn cmd_clist(cli: &Cli) -> Result<(), Error> {
    let blob = open_blob(cli)?;
    let pool = PoolCatalog::open(&cli.catalog_path, blob)?;
    for name in pool.list_containers()? {
        println!("{name}");
    }
    Ok(())
}

fn cmd_cexists(cli: &Cli) -> Result<(), Error> {
    let cname = require_cname(cli)?;
    let blob = open_blob(cli)?;
    let pool = PoolCatalog::open(&cli.catalog_path, blob)?;
    println!("{}", pool.container_exists(&cname)?);
    Ok(())
}

fn cmd_cdel(cli: &Cli) -> Result<(), Error> {
    let cname = require_cname(cli)?;
    let blob = open_blob(cli)?;
    let pool = PoolCatalog::open(&cli.catalog_path, blob)?;
    pool.delete_container(&cname)?;
    println!("deleted container '{cname}'");
    Ok(())
}

fn cmd_olist(cli: &Cli) -> Result<(), Error> {
    let cname = require_cname(cli)?;
    let blob = open_blob(cli)?;
    let pool = PoolCatalog::open(&cli.catalog_path, blob)?;
    let objects = pool.list_objects(&cname, cli.key.as_deref(), cli.idxstart, cli.results)?;
    for object in &objects {
        println!("{}\t{} bytes\t{} chunks", object.key, object.original_length, object.chunk_count);
    }
    Ok(())
}

fn cmd_oexists(cli: &Cli) -> Result<(), Error> {
    let cname = require_cname(cli)?;
    let key = require_key(cli)?;
    let blob = open_blob(cli)?;
    let pool = PoolCatalog::open(&cli.catalog_path, blob)?;
    println!("{}", pool.object_exists(&cname, &key)?);
    Ok(())
}
