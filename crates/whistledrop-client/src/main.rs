//! WhistleDrop recipient tool.
//!
//! # Usage
//!
//! ```bash
//! whistledrop-journalist list --db pool.redb
//! whistledrop-journalist retrieve --db pool.redb --keys keys.json --file-id 3 --output memo.pdf
//!
//! # Decrypt a record exported with `whistledrop-admin export`
//! whistledrop-journalist open --record submission-3.json --keys keys.json --output memo.pdf
//! ```

#![allow(clippy::print_stdout, reason = "CLI output")]

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use whistledrop_client::{Keystore, Submission, SubmissionId, open, retrieve};
use whistledrop_server::{KeyPool, RedbStorage, SubmissionStore, SystemEnv};

/// WhistleDrop recipient tool
#[derive(Parser, Debug)]
#[command(name = "whistledrop-journalist")]
#[command(about = "List and decrypt WhistleDrop submissions")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List submissions
    List {
        /// Database file
        #[arg(long)]
        db: PathBuf,
    },

    /// Key pool status
    Status {
        /// Database file
        #[arg(long)]
        db: PathBuf,
    },

    /// Decrypt a stored submission
    Retrieve {
        /// Database file
        #[arg(long)]
        db: PathBuf,

        /// Keystore file
        #[arg(long)]
        keys: PathBuf,

        /// Submission id
        #[arg(long)]
        file_id: SubmissionId,

        /// Output file (defaults to the original filename)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Decrypt an exported submission record
    Open {
        /// JSON submission record
        #[arg(long)]
        record: PathBuf,

        /// Keystore file
        #[arg(long)]
        keys: PathBuf,

        /// Output file (defaults to the original filename)
        #[arg(long)]
        output: Option<PathBuf>,
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

    match args.command {
        Command::List { db } => {
            let store = SubmissionStore::new(RedbStorage::open_existing(db)?, SystemEnv::new());
            println!("{:>6}  {:>6}  {:>12}  filename", "id", "key", "created");
            for meta in store.list()? {
                println!(
                    "{:>6}  {:>6}  {:>12}  {}",
                    meta.id, meta.key_id, meta.created_at, meta.filename
                );
            }
        },
        Command::Status { db } => {
            let pool = KeyPool::new(RedbStorage::open_existing(db)?, SystemEnv::new());
            let status = pool.status()?;
            println!("total:     {}", status.total_keys);
            println!("available: {}", status.available_keys);
            println!("used:      {}", status.used_keys);
        },
        Command::Retrieve { db, keys, file_id, output } => {
            let keystore = Keystore::load(keys)?;
            let store = SubmissionStore::new(RedbStorage::open_existing(db)?, SystemEnv::new());

            let plaintext = retrieve(&store, file_id, &keystore)?;
            let filename = store.fetch(file_id)?.filename;
            write_output(output.as_deref(), &filename, &plaintext)?;
        },
        Command::Open { record, keys, output } => {
            let keystore = Keystore::load(keys)?;
            let submission: Submission = serde_json::from_str(&std::fs::read_to_string(record)?)?;

            let plaintext = open(&submission, &keystore)?;
            write_output(output.as_deref(), &submission.filename, &plaintext)?;
        },
    }

    Ok(())
}

/// Write `plaintext` to `output`, or to the stored filename's final
/// component in the current directory.
fn write_output(output: Option<&Path>, filename: &str, plaintext: &[u8]) -> std::io::Result<()> {
    let fallback = Path::new(filename).file_name().map_or_else(
        || PathBuf::from("submission.bin"),
        PathBuf::from,
    );
    let path = output.map_or(fallback, Path::to_path_buf);

    std::fs::write(&path, plaintext)?;
    println!("wrote {} bytes to {}", plaintext.len(), path.display());
    Ok(())
}
