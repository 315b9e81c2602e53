use std::path::Path;

use relgrid_core::RelgridConfig;
use tracing::info;

use super::Context;

/// Write a relgrid.toml scaffold at `config_path` (unless one exists) and
/// create the store it points at.
pub fn init(config_path: &Path, store_path: &Path, actor: &str) -> anyhow::Result<RelgridConfig> {
    let config = if config_path.exists() {
        info!(path = %config_path.display(), "config already present");
        RelgridConfig::from_file(config_path)?
    } else {
        let config = RelgridConfig::scaffold(store_path);
        std::fs::write(config_path, config.to_toml_string()?)?;
        info!(path = %config_path.display(), "wrote config scaffold");
        config
    };

    Context::open(&config, actor.to_string())?;
    info!(store = %config.store.path.display(), "store ready");
    Ok(config)
}
