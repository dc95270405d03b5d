//! Library configuration.
//!
//! A home directory holds everything: `shelf.toml` (optional), the channel
//! databases and the content-copy store. Relative paths in `shelf.toml` are
//! resolved against the home directory.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the optional configuration file inside the home directory.
pub const CONFIG_FILE: &str = "shelf.toml";

/// How `set_prerequisite` detects cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePolicy {
    /// Reject self references and 2-cycles only. Longer cycles are accepted.
    #[default]
    Immediate,
    /// Reject any edge that would close a cycle.
    Transitive,
}

/// Resolved library configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryConfig {
    pub home: PathBuf,
    /// Root of the content-copy store.
    pub content_copy_dir: PathBuf,
    /// Directory holding one `<channel_id>.sqlite3` per channel.
    pub channel_dir: PathBuf,
    pub prerequisite_cycles: CyclePolicy,
}

/// On-disk form of `shelf.toml`; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    content_copy_dir: Option<PathBuf>,
    channel_dir: Option<PathBuf>,
    prerequisite_cycles: Option<CyclePolicy>,
}

impl LibraryConfig {
    /// Default layout under `home`, ignoring any configuration file.
    pub fn for_home(home: impl AsRef<Path>) -> Self {
        let home = home.as_ref().to_path_buf();
        let content = home.join("content");
        Self {
            content_copy_dir: content.join("storage"),
            channel_dir: content.join("databases"),
            prerequisite_cycles: CyclePolicy::default(),
            home,
        }
    }

    /// Defaults for `home`, overridden by `home/shelf.toml` when present.
    pub fn load(home: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::for_home(home);
        let path = config.home.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(config);
        }

        let text = fs::read_to_string(&path)?;
        config.apply(&text)?;
        Ok(config)
    }

    fn apply(&mut self, text: &str) -> Result<()> {
        let file: ConfigFile = toml::from_str(text)?;

        if let Some(dir) = file.content_copy_dir {
            self.content_copy_dir = self.resolve(dir)?;
        }
        if let Some(dir) = file.channel_dir {
            self.channel_dir = self.resolve(dir)?;
        }
        if let Some(policy) = file.prerequisite_cycles {
            self.prerequisite_cycles = policy;
        }
        Ok(())
    }

    fn resolve(&self, dir: PathBuf) -> Result<PathBuf> {
        if dir.as_os_str().is_empty() {
            return Err(Error::invalid_config("directory paths cannot be empty"));
        }
        if dir.is_absolute() {
            Ok(dir)
        } else {
            Ok(self.home.join(dir))
        }
    }

    /// Database file for a channel.
    pub fn channel_path(&self, channel_id: &crate::model::ChannelId) -> PathBuf {
        self.channel_dir.join(format!("{}.sqlite3", channel_id))
    }
}
