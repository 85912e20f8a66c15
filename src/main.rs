// HandInHand Store CLI - inspect and edit a file-backed entity store
use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use handinhand_store::{
    create_store, init_logging_for_level, open_backend, with_trace_id, BackendKind, Codec,
    CodecKind, FindOne, StoreConfig, StoreError,
};

// Macro for conditional printing based on quiet flag
macro_rules! qprintln {
    ($quiet:expr, $($arg:tt)*) => {
        if !$quiet {
            println!($($arg)*);
        }
    };
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "HandInHand Store - inspect the persisted player aggregates",
    long_about = None,
    after_help = "EXAMPLES:
  handinhand-store put user:abc '{\"name\":\"abc\",\"gold\":1000,\"version\":1}'
  handinhand-store get user:abc
  handinhand-store find user abc
  handinhand-store delete user:abc"
)]
struct Cli {
    /// Enable verbose logging (DEBUG level)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only print command results and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// TOML configuration file
    #[arg(short, long, env = "HANDINHAND_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (overrides the configuration file)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the raw value stored at a key
    Get { key: String },

    /// Store a JSON document at a key, replacing any existing value
    Put { key: String, json: String },

    /// Remove a key
    Delete { key: String },

    /// Decode the entity stored under a prefix and id
    Find { prefix: String, id: String },
}

/// Codec for untyped JSON documents; bincode needs the entity type and is refused
fn document_codec(config: &StoreConfig) -> Result<CodecKind> {
    anyhow::ensure!(
        config.codec.is_self_describing(),
        "The {:?} codec cannot be read or written without the entity type; \
         configure codec = \"json\" or \"message_pack\" to use this command",
        config.codec
    );
    Ok(config.codec)
}

fn load_config(cli: &Cli) -> Result<StoreConfig> {
    let mut config = StoreConfig::load(cli.config.as_deref())?;
    config.backend.kind = BackendKind::File;
    if let Some(dir) = &cli.data_dir {
        config.backend.data_dir = dir.to_string_lossy().into_owned();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let _ = init_logging_for_level(&config.logging.level, cli.verbose, cli.quiet);
    let quiet = cli.quiet;

    with_trace_id("handinhand-cli", async move {
        let backend = open_backend(&config).await?;

        match cli.command {
            Commands::Get { key } => {
                let Some(raw) = backend.get(&key).await? else {
                    anyhow::bail!("No value stored at {key}");
                };
                let decoded = if config.codec.is_self_describing() {
                    Codec::<serde_json::Value>::decode(&config.codec, &raw).ok()
                } else {
                    None
                };
                match decoded {
                    Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                    None => println!("{}", hex::encode(&raw)),
                }
            }

            Commands::Put { key, json } => {
                let codec = document_codec(&config)?;
                let value: serde_json::Value =
                    serde_json::from_str(&json).context("Value must be valid JSON")?;
                let encoded = Codec::<serde_json::Value>::encode(&codec, &value)?;
                backend.set(&key, Bytes::from(encoded)).await?;
                qprintln!(quiet, "Stored {key}");
            }

            Commands::Delete { key } => {
                if backend.delete(&key).await? {
                    qprintln!(quiet, "Deleted {key}");
                } else {
                    anyhow::bail!("No value stored at {key}");
                }
            }

            Commands::Find { prefix, id } => {
                let config = StoreConfig {
                    key_prefix: prefix,
                    ..config
                };
                config.validate()?;
                document_codec(&config)?;
                let store = create_store::<serde_json::Value>(backend, &config);

                match store.find_one(&id).await {
                    Ok(entity) => println!("{}", serde_json::to_string_pretty(&entity)?),
                    Err(StoreError::NotFound { id }) => {
                        anyhow::bail!("No {} entity with id {id}", config.key_prefix)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok(())
    })
    .await
}
