//! The per-user client configuration, read from `$HOME/upspin/config`.
//!
//! The file is line-oriented `key: value` text. Unrecognised keys are
//! ignored so configs can be shared with tools this build does not carry.

use std::path::{Path, PathBuf};

use crate::endpoint::Endpoint;
use crate::entry::Packing;
use crate::errors::{Error, Result};
use crate::user::{self, UserName};

/// Default size of a file block: 1 MiB.
pub const DEFAULT_BLOCK_SIZE: usize = 1 << 20;

/// Default bound on cached Access/Group entries.
pub const DEFAULT_CACHE_SIZE: usize = 1000;

#[derive(Clone, Debug)]
pub struct Config {
    pub user_name: UserName,
    /// Directory holding the key files; `None` means no factotum.
    pub secrets: Option<PathBuf>,
    pub key_endpoint: Endpoint,
    pub store_endpoint: Endpoint,
    pub dir_endpoint: Endpoint,
    pub packing: Packing,
    pub block_size: usize,
    pub cache_size: usize,
    /// Careful mode: writes require the sequence observed by the
    /// preceding lookup.
    pub prudent: bool,
    pub write_through: bool,
}

impl Config {
    pub fn new(user_name: UserName) -> Self {
        Config {
            user_name,
            secrets: None,
            key_endpoint: Endpoint::unassigned(),
            store_endpoint: Endpoint::unassigned(),
            dir_endpoint: Endpoint::unassigned(),
            packing: Packing::Ee,
            block_size: DEFAULT_BLOCK_SIZE,
            cache_size: DEFAULT_CACHE_SIZE,
            prudent: false,
            write_through: false,
        }
    }

    /// Parses config text. `username` is required; everything else has a
    /// default.
    pub fn parse(text: &str) -> Result<Config> {
        let mut user_name: Option<UserName> = None;
        let mut config = Config::new(UserName::from(""));
        for (i, raw) in text.lines().enumerate() {
            let line = match raw.find('#') {
                Some(h) => &raw[..h],
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            let colon = line.find(':').ok_or_else(|| {
                Error::invalid(format!("config line {}: missing colon", i + 1))
            })?;
            let key = line[..colon].trim();
            let value = line[colon + 1..].trim();
            match key {
                "username" => user_name = Some(user::clean(value)?),
                "secrets" => config.secrets = Some(PathBuf::from(value)),
                "keyserver" => config.key_endpoint = value.parse()?,
                "storeserver" => config.store_endpoint = value.parse()?,
                "dirserver" => config.dir_endpoint = value.parse()?,
                "packing" => config.packing = value.parse()?,
                // Unrecognised keys are ignored.
                _ => {}
            }
        }
        match user_name {
            Some(u) => {
                config.user_name = u;
                Ok(config)
            }
            None => Err(Error::invalid("config has no username")),
        }
    }

    pub fn from_file(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::from(e).op("config.FromFile").msg(path.display().to_string()))?;
        Config::parse(&text)
    }

    /// The secrets directory, defaulting to `$HOME/.ssh`.
    pub fn secrets_dir(&self) -> Option<PathBuf> {
        match &self.secrets {
            Some(dir) => Some(dir.clone()),
            None => default_secrets_dir(),
        }
    }
}

/// `$HOME/upspin/config`.
pub fn default_config_path() -> Option<PathBuf> {
    let dirs = directories::BaseDirs::new()?;
    Some(dirs.home_dir().join("upspin").join("config"))
}

/// `$HOME/.ssh`.
pub fn default_secrets_dir() -> Option<PathBuf> {
    let dirs = directories::BaseDirs::new()?;
    Some(dirs.home_dir().join(".ssh"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Transport;

    #[test]
    fn parse_full() {
        let text = "\
# comment
username: ann@example.com
secrets: /home/ann/.ssh
keyserver: inprocess,main
storeserver: inprocess,main
dirserver: inprocess,main
packing: eeintegrity
unknownkey: ignored
";
        let c = Config::parse(text).unwrap();
        assert_eq!(c.user_name.as_str(), "ann@example.com");
        assert_eq!(c.secrets.as_deref(), Some(Path::new("/home/ann/.ssh")));
        assert_eq!(c.dir_endpoint.transport, Transport::InProcess);
        assert_eq!(c.packing, Packing::EeIntegrity);
        assert_eq!(c.block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn username_required() {
        assert!(Config::parse("packing: ee\n").is_err());
    }

    #[test]
    fn default_packing_is_ee() {
        let c = Config::parse("username: ann@example.com\n").unwrap();
        assert_eq!(c.packing, Packing::Ee);
    }
}
