use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

fn default_auto_dequeue() -> bool {
  true
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL of the API server, e.g. `https://api.example.com`.
  /// Relative resource paths are resolved against it.
  pub base_url: String,
  /// Replay queued offline mutations automatically when connectivity
  /// returns.
  #[serde(default = "default_auto_dequeue")]
  pub auto_dequeue: bool,
}

impl Config {
  pub fn new(base_url: impl Into<String>) -> Self {
    Config {
      base_url: base_url.into(),
      auto_dequeue: true,
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./formio.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/formio/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(Error::Config(format!(
          "Config file not found: {}",
          p.display()
        )));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(Error::Config(
        "No configuration file found. Create one at ~/.config/formio/config.yaml".to_string(),
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("formio.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("formio").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| Error::Config(format!("Failed to read config file {}: {e}", path.display())))?;

    serde_yaml::from_str(&contents)
      .map_err(|e| Error::Config(format!("Failed to parse config file {}: {e}", path.display())))
  }
}
