//! WhistleDrop administration tool.
//!
//! # Usage
//!
//! ```bash
//! # Create the database and import recipient public keys
//! whistledrop-admin --db pool.redb init
//! whistledrop-admin --db pool.redb import public_keys.json
//!
//! # Or generate key pairs and hand the keystore to the recipient
//! whistledrop-admin --db pool.redb generate --count 20 --keystore keys.json
//!
//! # Inspect the pool
//! whistledrop-admin --db pool.redb status
//! whistledrop-admin --db pool.redb list
//!
//! # Recover keys stranded by a crash mid-upload
//! whistledrop-admin --db pool.redb reset --all
//! ```

#![allow(clippy::print_stdout, reason = "CLI output")]

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use whistledrop_core::{KeyId, Keystore, SubmissionId};
use whistledrop_server::{
    Intake, KeyPool, KeyState, RedbStorage, ServerConfig, SubmissionStore, SystemEnv,
};

/// WhistleDrop administration tool
#[derive(Parser, Debug)]
#[command(name = "whistledrop-admin")]
#[command(about = "Manage the WhistleDrop recipient key pool and submissions")]
#[command(version)]
struct Args {
    /// Database file (overrides the config file)
    #[arg(long)]
    db: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database
    Init,

    /// Import public keys from a JSON key file or PEM file
    Import {
        /// Key file
        file: PathBuf,
    },

    /// Import one public key
    Add {
        /// PEM text
        #[arg(long, conflicts_with = "key_file", required_unless_present = "key_file")]
        key: Option<String>,

        /// PEM file
        #[arg(long)]
        key_file: Option<PathBuf>,
    },

    /// List keys with state and allocation time
    List,

    /// Generate key pairs, import the public halves, write a keystore
    Generate {
        /// Number of key pairs
        #[arg(long, default_value = "10")]
        count: usize,

        /// Modulus size (overrides the config file)
        #[arg(long)]
        bits: Option<usize>,

        /// Keystore file for the private halves
        #[arg(long)]
        keystore: PathBuf,
    },

    /// Return a key to the pool
    Reset {
        /// Key id
        #[arg(required_unless_present = "all")]
        id: Option<KeyId>,

        /// Reset every allocated key no submission references
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },

    /// Delete an unreferenced key
    Delete {
        /// Key id
        id: KeyId,
    },

    /// Pool status
    Status,

    /// Encrypt and store a local file
    Submit {
        /// File to upload
        file: PathBuf,
    },

    /// List submissions
    Submissions,

    /// Write a submission record as JSON
    Export {
        /// Submission id
        id: SubmissionId,

        /// Output file
        #[arg(long)]
        out: PathBuf,
    },

    /// Delete a submission and return its key to the pool
    Purge {
        /// Submission id
        id: SubmissionId,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(db) = args.db {
        config.db_path = db;
    }

    let storage = RedbStorage::open(&config.db_path)?;
    let env = SystemEnv::new();
    let pool = KeyPool::new(storage.clone(), env).with_low_watermark(config.low_key_watermark);
    let store = SubmissionStore::new(storage.clone(), env);

    match args.command {
        Command::Init => {
            println!("database ready at {}", config.db_path.display());
        },
        Command::Import { file } => {
            let report = pool.import_file(&file)?;
            println!(
                "imported {} keys ({} duplicates, {} invalid)",
                report.imported.len(),
                report.duplicates,
                report.invalid
            );
        },
        Command::Add { key, key_file } => {
            let pem = match (key, key_file) {
                (Some(pem), _) => pem,
                (None, Some(path)) => std::fs::read_to_string(path)?,
                (None, None) => return Err("either --key or --key-file is required".into()),
            };
            let key_id = pool.import_pem(&pem)?;
            println!("imported key {key_id}");
        },
        Command::List => {
            println!("{:>6}  {:<10}  {:>12}", "id", "state", "allocated");
            for record in pool.list()? {
                let (state, allocated) = match record.state {
                    KeyState::Available => ("available", String::from("-")),
                    KeyState::Allocated { at_secs } => ("allocated", at_secs.to_string()),
                };
                println!("{:>6}  {:<10}  {:>12}", record.id, state, allocated);
            }
        },
        Command::Generate { count, bits, keystore } => {
            generate(&pool, count, bits.unwrap_or(config.modulus_bits), &keystore)?;
        },
        Command::Reset { id: Some(id), .. } => {
            pool.reset(id)?;
            println!("key {id} is available");
        },
        Command::Reset { id: None, .. } => {
            let reset = pool.reset_all()?;
            println!("reset {} unreferenced allocated keys", reset.len());
        },
        Command::Delete { id } => {
            pool.delete(id)?;
            println!("deleted key {id}");
        },
        Command::Status => {
            let status = pool.status()?;
            println!("total:     {}", status.total_keys);
            println!("available: {}", status.available_keys);
            println!("used:      {}", status.used_keys);
            if status.available_keys <= config.low_key_watermark {
                println!("warning: key pool is running low");
            }
        },
        Command::Submit { file } => {
            let contents = std::fs::read(&file)?;
            let filename = file.to_string_lossy();
            let intake = Intake::new(storage, env, config.intake_config());
            let receipt = intake.submit(&filename, &contents)?;
            println!("stored submission {} (key {})", receipt.submission_id, receipt.key_id);
        },
        Command::Submissions => {
            println!("{:>6}  {:>6}  {:>12}  filename", "id", "key", "created");
            for meta in store.list()? {
                println!(
                    "{:>6}  {:>6}  {:>12}  {}",
                    meta.id, meta.key_id, meta.created_at, meta.filename
                );
            }
        },
        Command::Export { id, out } => {
            let submission = store.fetch(id)?;
            std::fs::write(&out, serde_json::to_string_pretty(&submission)?)?;
            println!("wrote submission {id} to {}", out.display());
        },
        Command::Purge { id } => {
            let key_id = store.purge(id)?;
            println!("purged submission {id}, key {key_id} is available");
        },
    }

    Ok(())
}

/// Provision key pairs, merging the private halves into `keystore_path`.
fn generate(
    pool: &KeyPool<RedbStorage, SystemEnv>,
    count: usize,
    bits: usize,
    keystore_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut keystore =
        if keystore_path.exists() { Keystore::load(keystore_path)? } else { Keystore::new() };

    tracing::info!(count, bits, "generating key pairs");
    let provisioned = pool.provision(count, bits)?;
    for (key_id, private_key) in provisioned {
        keystore.insert(key_id, private_key);
    }
    keystore.save(keystore_path)?;

    println!("generated {count} keys, keystore written to {}", keystore_path.display());
    Ok(())
}
