//! Config subcommands

use anyhow::{Context, Result, bail};
use std::path::Path;
use storesync_core::EngineConfig;

pub fn cmd_config_show(config: &EngineConfig) -> Result<()> {
  let rendered = toml::to_string_pretty(config).context("failed to render config")?;
  print!("{rendered}");
  Ok(())
}

pub fn cmd_config_init(output: Option<&Path>, force: bool) -> Result<()> {
  let path = output.unwrap_or_else(|| Path::new("storesync.toml"));
  if path.exists() && !force {
    bail!("{} already exists (use --force to overwrite)", path.display());
  }

  let rendered = toml::to_string_pretty(&EngineConfig::default()).context("failed to render config")?;
  std::fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))?;
  println!("Wrote {}", path.display());
  Ok(())
}
