//! 🚀 rowdex-cli: load the config, index the rows, print what happened.
//!
//! 📦 Thin on purpose. Logging, arguments and the error report live here; everything
//! else is in the `rowdex` library.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use rowdex::app_config::{InMemoryConfig, StoreConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 📥 Index newline-delimited JSON rows into Elasticsearch in bounded bulk batches.
#[derive(Debug, Parser)]
#[command(name = "rowdex-cli", version)]
struct Cli {
    /// 🔧 TOML config file. Env vars prefixed `ROWDEX_` fill in whatever it leaves out.
    #[arg(default_value = "rowdex.toml")]
    config: PathBuf,

    /// 🧪 Use the in-memory store instead of the configured one. Nothing leaves the process.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // 🔒 a missing file is fine, env vars alone may be enough
    let config_file = cli.config.as_path();
    let config_file_if_it_exists = match config_file.try_exists().context(format!(
        "💀 Couldn't check whether the configuration file exists. If this is a relative path, \
         try an absolute one. Was checking here: '{}'",
        config_file.display()
    ))? {
        true => Some(config_file),
        false => None,
    };

    let mut app_config = rowdex::app_config::load_config(config_file_if_it_exists)
        .context("💀 In rowdex-cli, main, we couldn't load the config. Take a look at the file and the ROWDEX_* variables.")?;

    if cli.dry_run {
        info!("🧪 Dry run: documents go to the in-memory store");
        app_config.store = StoreConfig::InMemory(InMemoryConfig::default());
    }

    let started = Instant::now();
    match rowdex::run(app_config).await {
        Ok(result) => {
            println!("{}", rowdex::progress::summary_table(&result, started.elapsed()));
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the chain, and sniff each layer for a connection problem
            let mut looks_like_connection_trouble = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                let cause_str = cause.to_string();
                if cause_str.contains("No Elasticsearch node available")
                    || cause_str.contains("error sending request")
                    || cause_str.contains("onnection refused")
                    || cause_str.contains("tcp connect error")
                    || cause_str.contains("dns error")
                {
                    looks_like_connection_trouble = true;
                }
            }

            if looks_like_connection_trouble {
                error!(
                    "🔧 hint: Elasticsearch doesn't seem to be reachable. Check that the hosts in \
                     [store.Elasticsearch] are right and the cluster is actually up. \
                     With Docker, `docker ps` shows what's running. \
                     `--dry-run` will run everything against the in-memory store instead."
                );
            }

            std::process::exit(1);
        }
    }
}
