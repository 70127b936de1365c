//! Shared helpers for subcommands: `@` expansion, glob handling,
//! local-versus-upspin path classification, and error reporting that
//! collects per-item failures instead of stopping.

use anyhow::{Context, Result};
use upspin_core::entry::DirEntry;
use upspin_core::{Kind, PathName};

use crate::cmd::Session;

/// Where an argument points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Upspin(PathName),
    Local(std::path::PathBuf),
}

impl Session {
    /// Expands a leading `@` to the current user's root: `@/a/b` becomes
    /// `user@domain/a/b`, and `@+s/a` the suffixed variant's.
    pub fn expand_at(&self, arg: &str) -> Result<PathName> {
        let user = self.config.user_name.as_str();
        let expanded = if arg == "@" {
            format!("{user}/")
        } else if let Some(rest) = arg.strip_prefix("@/") {
            format!("{user}/{rest}")
        } else if let Some(rest) = arg.strip_prefix("@+") {
            // "@+suffix" or "@+suffix/path".
            let (suffix, path) = match rest.find('/') {
                Some(i) => (&rest[..i], &rest[i..]),
                None => (rest, ""),
            };
            let parsed = upspin_core::user::parse(user)?;
            format!("{}{}", parsed.with_suffix(suffix), path)
        } else {
            arg.to_string()
        };
        Ok(upspin_core::path::clean(&expanded)?)
    }

    /// True if the argument names an upspin path rather than a local file.
    pub fn is_upspin(&self, arg: &str) -> bool {
        if arg.starts_with('@') {
            return true;
        }
        match arg.find('/') {
            Some(slash) => arg[..slash].contains('@'),
            None => arg.contains('@'),
        }
    }

    pub fn classify(&self, arg: &str) -> Result<Target> {
        if self.is_upspin(arg) {
            Ok(Target::Upspin(self.expand_at(arg)?))
        } else {
            Ok(Target::Local(std::path::PathBuf::from(arg)))
        }
    }

    /// Expands one argument to concrete path names: glob expansion when
    /// enabled and the argument has metacharacters, a plain `@` expansion
    /// otherwise. Glob patterns that match nothing are an error.
    pub async fn expand_upspin(&self, arg: &str, glob: bool) -> Result<Vec<PathName>> {
        let name = self.expand_at(arg)?;
        if !glob || !upspin_core::path::pattern_has_meta(&name) {
            return Ok(vec![name]);
        }
        let entries = self.client.glob(name.as_str()).await?;
        if entries.is_empty() {
            anyhow::bail!("no path matches {arg}");
        }
        Ok(entries.into_iter().map(|e| e.name).collect())
    }
}

/// Prints one error the way the CLI reports per-item failures. Permission
/// and privacy failures collapse to one message so callers cannot probe
/// for existence.
pub fn report(err: &upspin_core::Error) {
    if err.is(Kind::Permission) || err.is(Kind::Private) {
        match err.path_name() {
            Some(path) => eprintln!("upspin: {path}: information withheld"),
            None => eprintln!("upspin: information withheld"),
        }
        return;
    }
    eprintln!("upspin: {err}");
}

pub fn report_anyhow(err: &anyhow::Error) {
    match err.downcast_ref::<upspin_core::Error>() {
        Some(e) => report(e),
        None => eprintln!("upspin: {err:#}"),
    }
}

/// One `ls -l` line: attributes, size, packing, time, location, name.
pub fn long_line(entry: &DirEntry) -> String {
    let attr = match entry.attr {
        upspin_core::Attribute::Directory => "d",
        upspin_core::Attribute::Link => "l",
        upspin_core::Attribute::Incomplete => "?",
        upspin_core::Attribute::None => "-",
    };
    let size = entry.size().unwrap_or(0);
    let time = chrono::DateTime::from_timestamp(entry.time, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    let location = entry
        .blocks
        .first()
        .map(|b| b.location.endpoint.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{attr} {:>5} {:>12} {} {}\t{}",
        entry.sequence,
        size,
        entry.packing,
        format!("{time} {location}"),
        entry.name
    );
    if let Some(target) = &entry.link {
        line.push_str(&format!(" -> {target}"));
    }
    line
}

/// Reads all of an upspin file or a local file.
pub async fn read_target(session: &Session, target: &Target) -> Result<Vec<u8>> {
    match target {
        Target::Upspin(name) => Ok(session.client.get(name).await?),
        Target::Local(path) => {
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upspin_client::Client;
    use upspin_core::Config;
    use upspin_factotum::{Curve, Factotum, keygen};

    fn session() -> Session {
        let config = Config::new("ann@example.com".into());
        let g = keygen::from_seed(Curve::P256, &[1; 16]).unwrap();
        let factotum =
            Factotum::from_keys(g.pair.public().text(), &g.pair.secret_decimal()).unwrap();
        Session {
            client: Client::new(config.clone(), factotum),
            config,
        }
    }

    #[test]
    fn at_expansion() {
        let s = session();
        assert_eq!(s.expand_at("@").unwrap().as_str(), "ann@example.com/");
        assert_eq!(s.expand_at("@/a/b").unwrap().as_str(), "ann@example.com/a/b");
        assert_eq!(
            s.expand_at("@+snapshot").unwrap().as_str(),
            "ann+snapshot@example.com/"
        );
        assert_eq!(
            s.expand_at("@+snapshot/x").unwrap().as_str(),
            "ann+snapshot@example.com/x"
        );
        assert_eq!(
            s.expand_at("bob@x.org/f").unwrap().as_str(),
            "bob@x.org/f"
        );
    }

    #[test]
    fn classification() {
        let s = session();
        assert!(s.is_upspin("@/a"));
        assert!(s.is_upspin("ann@example.com/a"));
        assert!(!s.is_upspin("/tmp/file"));
        assert!(!s.is_upspin("relative/path"));
    }
}
