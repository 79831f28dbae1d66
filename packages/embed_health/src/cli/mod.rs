mod watch;

use anyhow::{Context, Result};

use embed_health::config::FileConfig;

pub use watch::watch_command;

/// Print the resolved configuration as TOML
pub fn config_command(file_config: &FileConfig) -> Result<()> {
    let rendered =
        toml::to_string_pretty(file_config).context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}
