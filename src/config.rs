// Configuration loaded from TOML

use crate::consensus::{DEFAULT_DIFFICULTY_BITS, Target};
use crate::{LedgerError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the config file looked up inside the data directory
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the block store and the wallet file
    pub data_dir: PathBuf,
    /// Difficulty used when a new ledger is created
    pub difficulty_bits: u32,
    /// Wallet file name, relative to `data_dir`
    pub keystore_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            difficulty_bits: DEFAULT_DIFFICULTY_BITS,
            keystore_file: default_keystore_file(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_keystore_file() -> String {
    "wallet.json".to_string()
}

impl Config {
    /// Parse and validate a config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| {
            LedgerError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the effective config.
    ///
    /// An explicit file must exist. Without one, `<data_dir>/config.toml` is
    /// used when present, otherwise the defaults. `data_dir` always wins
    /// over the file's value.
    pub fn load(explicit: Option<&Path>, data_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let dir = data_dir.clone().unwrap_or_else(default_data_dir);
                let candidate = dir.join(CONFIG_FILE);
                if candidate.exists() {
                    log::debug!("Using config file {}", candidate.display());
                    Self::from_file(candidate)?
                } else {
                    Self::default()
                }
            }
        };

        if let Some(dir) = data_dir {
            config.data_dir = dir;
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        Target::from_bits(self.difficulty_bits)?;
        if self.keystore_file.is_empty() {
            return Err(LedgerError::Config("keystore_file must not be empty".into()));
        }
        Ok(())
    }

    pub fn blocks_path(&self) -> PathBuf {
        self.data_dir.join("blocks")
    }

    pub fn keystore_path(&self) -> PathBuf {
        self.data_dir.join(&self.keystore_file)
    }
}
