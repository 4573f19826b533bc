//! Daemon configuration, read from a JSON5 file and overridden from the
//! command line.

use std::{
    io,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::cli::resolve_path;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// The configuration file as written by the user. Every field is optional
/// here; [`Config::resolve`] decides what is required.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Path to the synced text file, absolute or relative to the working
    /// directory.
    pub file_path: Option<PathBuf>,

    /// Port to listen on. Defaults to [`DEFAULT_PORT`].
    pub port: Option<u16>,

    /// Level for the rolling file log, or `"none"` to disable it. Read
    /// separately by [`crate::logging::quick_read_file_log_level`] before
    /// logging starts.
    pub file_log_level: Option<String>,
}

/// Configuration after defaults and command line overrides are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub file_path: PathBuf,
    pub port: u16,
}

impl Config {
    pub fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        json5::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs_err::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(source) => return Err(ConfigError::Io { source }),
        };

        Self::parse(&contents, path)
    }

    /// Loads the config file if one exists. A missing file is only an
    /// error when `required` is set.
    pub fn load_optional(path: &Path, required: bool) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::NotFound { .. }) if !required => {
                log::debug!("No config file at {}", path.display());
                Ok(Self::default())
            }
            result => result,
        }
    }

    /// Applies overrides and defaults. A missing `filePath` is fatal.
    pub fn resolve(
        self,
        file_override: Option<&Path>,
        port_override: Option<u16>,
    ) -> Result<ResolvedConfig, ConfigError> {
        let file_path = file_override
            .map(Path::to_path_buf)
            .or(self.file_path)
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or(ConfigError::MissingFilePath)?;

        Ok(ResolvedConfig {
            file_path: resolve_path(&file_path).into_owned(),
            port: port_override.or(self.port).unwrap_or(DEFAULT_PORT),
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "Config file {} was not found. Create one with a \"filePath\" entry, or pass --file.",
        path.display()
    )]
    NotFound { path: PathBuf },

    #[error("No file path is configured. Set \"filePath\" in the config file or pass --file.")]
    MissingFilePath,

    #[error("Could not parse config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: json5::Error,
    },

    #[error(transparent)]
    Io {
        #[from]
        source: io::Error,
    },
}
