use std::collections::BTreeMap;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use docstore_kernel::config::{BackendConfig, StoreConfig};
use docstore_kernel::manifest::{self, NewAssets};
use docstore_kernel::{
    Change, ChangesLog, Clock, DataStore, Entity, Session, StoreError, SystemClock,
};

/// Attempts at finding a free timestamp for a change record.
const CHANGE_ATTEMPTS: usize = 5;
const CHANGE_RETRY_DELAY: Duration = Duration::from_micros(50);

/// Document Store CLI
#[derive(Parser, Debug)]
#[command(name = "docstore")]
#[command(about = "Versioned document store and changes feed", long_about = None)]
struct Cli {
    /// Path to store config JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory (file backend); overrides the config's backend
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Document,
    DocumentsBundle,
    Journal,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new entity with an empty history
    Create { kind: Kind, id: String },

    /// Add a new version to an entity
    AddVersion {
        kind: Kind,
        id: String,
        /// Locator of the version's primary content
        data: String,
        /// Asset declared by the version, not yet uploaded
        #[arg(long = "asset")]
        assets: Vec<String>,
        /// Asset declared together with its first upload, as ID=LOCATOR
        #[arg(long = "asset-url", value_parser = parse_key_value)]
        asset_urls: Vec<(String, String)>,
    },

    /// Record a new upload of an asset of a document's latest version
    AddAssetVersion {
        id: String,
        asset_id: String,
        locator: String,
    },

    /// Record a new upload of a rendition of a document's latest version
    AddRendition {
        id: String,
        filename: String,
        url: String,
        #[arg(long)]
        mimetype: String,
        #[arg(long)]
        lang: String,
        #[arg(long)]
        size_bytes: u64,
    },

    /// Print an entity's manifest
    Show { kind: Kind, id: String },

    /// Print the changes feed
    Changes {
        #[arg(long, default_value = "")]
        since: String,
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected ID=LOCATOR, got `{raw}`"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // ----------------------------
    // Load config
    // ----------------------------
    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_path(path)?,
        None => StoreConfig::default_config(),
    };
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }
    if config.backend == BackendConfig::Memory {
        warn!("using the in-memory backend: nothing will be persisted");
    }

    let session = config.open_session().context("opening session")?;
    let clock = SystemClock;

    // ----------------------------
    // Run command
    // ----------------------------
    match cli.command {
        Command::Create { kind, id } => match kind {
            Kind::Document => print(&create(session.documents(), &session, &clock, &id)?),
            Kind::DocumentsBundle => {
                print(&create(session.documents_bundles(), &session, &clock, &id)?)
            }
            Kind::Journal => print(&create(session.journals(), &session, &clock, &id)?),
        },

        Command::AddVersion {
            kind,
            id,
            data,
            assets,
            asset_urls,
        } => {
            let assets = new_assets(assets, asset_urls)?;
            match kind {
                Kind::Document => {
                    let store = session.documents();
                    print(&add_version(store, &session, &clock, &id, &data, assets)?)
                }
                Kind::DocumentsBundle => {
                    let store = session.documents_bundles();
                    print(&add_version(store, &session, &clock, &id, &data, assets)?)
                }
                Kind::Journal => {
                    let store = session.journals();
                    print(&add_version(store, &session, &clock, &id, &data, assets)?)
                }
            }
        }

        Command::AddAssetVersion {
            id,
            asset_id,
            locator,
        } => {
            let doc = session
                .documents()
                .fetch(&id)?
                .new_asset_version(&asset_id, &locator, &clock)?;
            save(session.documents(), &session, &clock, &doc)?;
            print(doc.manifest())
        }

        Command::AddRendition {
            id,
            filename,
            url,
            mimetype,
            lang,
            size_bytes,
        } => {
            let doc = session.documents().fetch(&id)?.new_rendition_version(
                &filename, &url, &mimetype, &lang, size_bytes, &clock,
            )?;
            save(session.documents(), &session, &clock, &doc)?;
            print(doc.manifest())
        }

        Command::Show { kind, id } => match kind {
            Kind::Document => print(session.documents().fetch(&id)?.manifest()),
            Kind::DocumentsBundle => print(session.documents_bundles().fetch(&id)?.manifest()),
            Kind::Journal => print(session.journals().fetch(&id)?.manifest()),
        },

        Command::Changes { since, limit } => {
            let limit = limit.unwrap_or(config.changes_page_size);
            print(&session.changes().filter(&since, limit)?)
        }
    }
}

fn new_assets(declared: Vec<String>, located: Vec<(String, String)>) -> Result<NewAssets> {
    match (declared.is_empty(), located.is_empty()) {
        (_, true) => Ok(NewAssets::from(declared)),
        (true, false) => Ok(NewAssets::from(located.into_iter().collect::<BTreeMap<_, _>>())),
        (false, false) => bail!("use either --asset or --asset-url, not both"),
    }
}

fn create<E: Entity>(
    store: &dyn DataStore<E>,
    session: &Session,
    clock: &dyn Clock,
    id: &str,
) -> Result<manifest::Manifest> {
    let entity = E::create(id);
    store.add(&entity)?;
    record_change::<E>(session.changes(), clock, entity.identity())?;
    Ok(entity.into_manifest())
}

fn add_version<E: Entity>(
    store: &dyn DataStore<E>,
    session: &Session,
    clock: &dyn Clock,
    id: &str,
    data: &str,
    assets: NewAssets,
) -> Result<manifest::Manifest> {
    let current = store.fetch(id)?;
    let next = E::from_manifest(manifest::add_version(current.manifest(), data, assets, clock));
    save(store, session, clock, &next)?;
    Ok(next.into_manifest())
}

fn save<E: Entity>(
    store: &dyn DataStore<E>,
    session: &Session,
    clock: &dyn Clock,
    entity: &E,
) -> Result<()> {
    store.update(entity)?;
    record_change::<E>(session.changes(), clock, entity.identity())
}

/// Logs a change for an entity that is already stored. A taken
/// timestamp is retried with a fresh one, so the mutation is not left
/// without a change record.
fn record_change<E: Entity>(changes: &dyn ChangesLog, clock: &dyn Clock, id: &str) -> Result<()> {
    let mut attempt = 1;
    loop {
        match changes.add(&Change::for_entity::<E>(clock.now(), id)) {
            Ok(()) => return Ok(()),
            Err(StoreError::AlreadyExists(timestamp)) if attempt < CHANGE_ATTEMPTS => {
                warn!(%timestamp, attempt, "change timestamp already taken, retrying");
                attempt += 1;
                thread::sleep(CHANGE_RETRY_DELAY);
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("recording change of {} {id}", E::KIND));
            }
        }
    }
}

fn print<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
