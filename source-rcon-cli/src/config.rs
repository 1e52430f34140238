use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 27015;

/// Name of the config file looked up in the home directory.
const FILE_NAME: &str = ".neb-rcon.yml";

/// Connection settings read from a YAML config file. Every key is optional.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub password: Option<String>,
}

/// Where to connect, after flags, environment and config file have been merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl FileConfig {
    /// Values given on the command line or through `RCON_*` variables win over the file,
    /// which wins over the built-in defaults.
    pub fn overlay(self, host: Option<String>, port: Option<u16>, password: Option<String>) -> Target {
        Target {
            host: host
                .or(self.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: port.or(self.port).unwrap_or(DEFAULT_PORT),
            password: password.or(self.password),
        }
    }
}

pub fn default_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(FILE_NAME))
}

/// Load `explicit`, or the file in the home directory if there is one.
///
/// A missing file at the default location is not an error; a missing explicit file is.
pub fn load(explicit: Option<&Path>) -> Result<Option<(PathBuf, FileConfig)>, ConfigError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_path() {
            Some(path) if path.is_file() => path,
            _ => return Ok(None),
        },
    };

    let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let config = parse(&text).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;

    Ok(Some((path, config)))
}

pub fn parse(text: &str) -> Result<FileConfig, serde_yaml::Error> {
    // An empty YAML document has no mapping to deserialize
    if text.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    serde_yaml::from_str(text)
}
