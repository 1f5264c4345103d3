//! Layered configuration
//!
//! Merge order, lowest precedence first:
//! 1. Built-in defaults
//! 2. Host config (~/.config/cachegate/config.toml)
//! 3. Repo config (<source-root>/.cachegate.toml, or --config)
//! 4. Environment (GITHUB_REPOSITORY, CACHEGATE_*)
//! 5. CLI flags

mod defaults;
mod effective;
mod env;
mod merge;
mod settings;

use std::path::{Path, PathBuf};

pub use defaults::BuiltinDefaults;
pub use effective::{new_run_id, ConfigError, ConfigLayers, ConfigOrigin, ConfigSource, EffectiveConfig};
pub use env::{env_overrides, process_env_overrides};
pub use merge::{deep_merge, merge_layers};
pub use settings::{RepositorySettings, Settings, StoreBackend, StoreSettings};

/// Repo config file name, relative to the source root
pub const REPO_CONFIG_FILE: &str = ".cachegate.toml";

/// Host config location, if `HOME` is set.
pub fn default_host_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(".config/cachegate/config.toml"))
}

/// Repo config location for a source root.
pub fn default_repo_config_path(source_root: &Path) -> PathBuf {
    source_root.join(REPO_CONFIG_FILE)
}
