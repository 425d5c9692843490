//! Server configuration: an optional TOML file layered under `GID_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use gid_core::policy::ValidationPolicy;
use gid_store_sqlite::DEFAULT_ALLOCATION_RETRIES;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:               String,
  pub port:               u16,
  pub store_path:         PathBuf,
  pub allocation_retries: u32,
  pub policy:             ValidationPolicy,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:               "127.0.0.1".to_string(),
      port:               8080,
      store_path:         PathBuf::from("gid.db"),
      allocation_retries: DEFAULT_ALLOCATION_RETRIES,
      policy:             ValidationPolicy::default(),
    }
  }
}

impl ServerConfig {
  /// Read `path` (if it exists) and apply environment overrides such as
  /// `GID_PORT=9000` or `GID_POLICY__REQUIRE_IDENTIFIER=false`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("GID")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .context("failed to read config file")?;

    let mut cfg: ServerConfig = settings
      .try_deserialize()
      .context("failed to deserialise ServerConfig")?;
    cfg.store_path = expand_tilde(&cfg.store_path);
    Ok(cfg)
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_yields_defaults() {
    let cfg = ServerConfig::load(Path::new("does-not-exist.toml")).unwrap();
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.allocation_retries, DEFAULT_ALLOCATION_RETRIES);
    assert!(cfg.policy.require_identifier);
  }

  #[test]
  fn tilde_expands_to_home() {
    let Ok(home) = std::env::var("HOME") else { return };
    assert_eq!(expand_tilde(Path::new("~/x/gid.db")), PathBuf::from(home).join("x/gid.db"));
    assert_eq!(expand_tilde(Path::new("/abs/gid.db")), PathBuf::from("/abs/gid.db"));
  }
}
