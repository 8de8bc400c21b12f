//! 🔧 App configuration: a TOML file, `ROWDEX_*` environment variables, and Figment in between.
//!
//! ```toml
//! [input]
//! file_name = "rows.ndjson"
//!
//! [store.Elasticsearch]
//! hosts = ["localhost:9200"]
//! index = "people"
//!
//! [indexer]
//! id_column = "id"
//! values = ["first", "last"]
//! fields = ["name", "name"]
//! document_type = "person"
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::ElasticsearchConfig;
use crate::indexer::IndexerConfig;

/// 📦 Everything one run needs.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    pub store: StoreConfig,
    pub indexer: IndexerConfig,
}

/// 📂 Where the rows come from: one JSON object per line.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct InputConfig {
    pub file_name: PathBuf,
}

/// 🗄️ Which store the documents go to.
#[derive(Debug, Deserialize, Clone)]
pub enum StoreConfig {
    Elasticsearch(ElasticsearchConfig),
    /// 🧪 Nothing leaves the process. The dry run.
    InMemory(InMemoryConfig),
}

/// 🧪 The in-memory store takes no settings. `[store.InMemory]` on its own is enough.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct InMemoryConfig {}

/// 🚀 Load the config. Env vars (`ROWDEX_*`) first, then the TOML file on top if one was given.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("ROWDEX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (ROWDEX_*). \
             Check the [input], [store.*] and [indexer] tables.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (ROWDEX_*). \
                 No file was provided, so everything has to come from the environment."
            .to_string(),
    };

    config.extract().context(context_msg)
}
