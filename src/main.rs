use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use galaxy_fds::cli::commands;
use galaxy_fds::config;
use galaxy_fds::fds::{FdsClient, MultipartConfig};

#[derive(Parser)]
#[command(name = "fds")]
#[command(version, about = "Command-line client for Galaxy FDS object storage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (falls back to GALAXY_FDS_* environment variables)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Profile to use from config
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List objects and common prefixes
    Ls {
        bucket: String,

        #[arg(long, default_value = "")]
        prefix: String,

        /// Roll keys up into common prefixes at this delimiter
        #[arg(long, default_value = "/")]
        delimiter: String,

        /// Page size (0 = server default)
        #[arg(long, default_value = "0")]
        max_keys: u32,
    },

    /// Upload a file (multipart above the threshold)
    Put {
        bucket: String,

        file: PathBuf,

        /// Object key (default: the file name)
        #[arg(long)]
        key: Option<String>,

        #[arg(long)]
        content_type: Option<String>,

        /// Part size in bytes for multipart uploads
        #[arg(long, default_value = "5242880")]
        part_size: usize,

        /// Parallel part uploads
        #[arg(long, default_value = "10")]
        workers: usize,
    },

    /// Download an object
    Get {
        bucket: String,

        key: String,

        /// Output file ("-" for stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Remove an object
    Rm {
        bucket: String,

        key: String,

        /// Remove everything under the key as a prefix
        #[arg(short, long)]
        recursive: bool,
    },

    /// Print a presigned URL
    Presign {
        bucket: String,

        key: String,

        #[arg(long, default_value = "GET")]
        method: String,

        #[arg(long, default_value = "3600")]
        expires_secs: u64,

        /// Extra query parameter, `name` or `name=value` (repeatable)
        #[arg(long = "sub-resource")]
        sub_resources: Vec<String>,
    },

    /// Make bucket
    Mb { bucket: String },

    /// Remove bucket
    Rb {
        bucket: String,

        /// Delete all objects first
        #[arg(long)]
        force: bool,
    },

    /// List in-progress multipart uploads
    Uploads {
        bucket: String,

        #[arg(long, default_value = "")]
        prefix: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Part uploads fan out over the pool, so use the multi-threaded runtime.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config = config::load_config(cli.config.as_deref(), cli.profile.as_deref())?;
    let profile = config
        .get_profile(cli.profile.as_deref())
        .context("No FDS profile configured")?;
    let client = FdsClient::from_profile(profile, &config.client)
        .context("Failed to build FDS client")?;

    match cli.command {
        Commands::Ls {
            bucket,
            prefix,
            delimiter,
            max_keys,
        } => {
            commands::cmd_ls(&client, &bucket, &prefix, &delimiter, max_keys).await?;
        }
        Commands::Put {
            bucket,
            file,
            key,
            content_type,
            part_size,
            workers,
        } => {
            let multipart = MultipartConfig::default()
                .with_part_size(part_size)
                .with_concurrency(workers);
            commands::cmd_put(
                &client,
                &bucket,
                &file,
                key.as_deref(),
                content_type.as_deref(),
                &multipart,
            )
            .await?;
        }
        Commands::Get { bucket, key, output } => {
            commands::cmd_get(&client, &bucket, &key, output.as_deref()).await?;
        }
        Commands::Rm {
            bucket,
            key,
            recursive,
        } => {
            commands::cmd_rm(&client, &bucket, &key, recursive).await?;
        }
        Commands::Presign {
            bucket,
            key,
            method,
            expires_secs,
            sub_resources,
        } => {
            commands::cmd_presign(&client, &bucket, &key, &method, expires_secs, &sub_resources)?;
        }
        Commands::Mb { bucket } => {
            commands::cmd_mb(&client, &bucket).await?;
        }
        Commands::Rb { bucket, force } => {
            commands::cmd_rb(&client, &bucket, force).await?;
        }
        Commands::Uploads { bucket, prefix } => {
            commands::cmd_uploads(&client, &bucket, &prefix).await?;
        }
    }

    Ok(())
}
