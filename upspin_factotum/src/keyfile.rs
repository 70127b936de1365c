//! The on-disk key files.
//!
//! A secrets directory holds `public.upspinkey` (the current public key
//! text), `secret.upspinkey` (the private scalar D in decimal, with the
//! proquint seed as a trailing comment), and `secret2.upspinkey`, an
//! append-only archive of rotated-out pairs.

use std::fs;
use std::io::Write;
use std::path::Path;

use upspin_core::{Error, Kind, Result};

pub const PUBLIC_FILE: &str = "public.upspinkey";
pub const SECRET_FILE: &str = "secret.upspinkey";
pub const ARCHIVE_FILE: &str = "secret2.upspinkey";

/// One rotated-out keypair in `secret2.upspinkey`.
#[derive(Clone, Debug)]
pub struct ArchiveEntry {
    /// RFC3339 timestamp from the stanza header, if present.
    pub time: Option<String>,
    pub public_text: String,
    pub secret_decimal: String,
}

pub fn read_public(dir: &Path) -> Result<String> {
    let path = dir.join(PUBLIC_FILE);
    fs::read_to_string(&path)
        .map_err(|e| Error::from(e).op("ReadPublic").msg(path.display().to_string()))
}

/// Reads the private scalar and the optional proquint comment.
pub fn read_secret(dir: &Path) -> Result<(String, Option<String>)> {
    let path = dir.join(SECRET_FILE);
    let text = fs::read_to_string(&path)
        .map_err(|e| Error::from(e).op("ReadSecret").msg(path.display().to_string()))?;
    let line = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| Error::invalid("empty secret key file").msg(path.display().to_string()))?;
    match line.find('#') {
        Some(h) => {
            let d = line[..h].trim().to_string();
            let comment = line[h + 1..].trim().to_string();
            let proquint = if comment.is_empty() { None } else { Some(comment) };
            Ok((d, proquint))
        }
        None => Ok((line.trim().to_string(), None)),
    }
}

/// Reads the rotation archive; an absent file is an empty archive.
pub fn read_archive(dir: &Path) -> Result<Vec<ArchiveEntry>> {
    let path = dir.join(ARCHIVE_FILE);
    let text = match fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::from(e).op("ReadArchive")),
    };

    let mut entries = Vec::new();
    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("# EE") else {
            continue;
        };
        let time = {
            let t = rest.trim().trim_matches(['[', ']']).trim();
            if t.is_empty() { None } else { Some(t.to_string()) }
        };
        let mut body: Vec<&str> = Vec::new();
        while body.len() < 4 {
            match lines.peek() {
                Some(l) if l.trim_start().starts_with("# EE") => break,
                Some(l) if l.trim().is_empty() => {
                    lines.next();
                }
                Some(l) => {
                    body.push(l.trim());
                    lines.next();
                }
                None => break,
            }
        }
        if body.len() != 4 {
            return Err(Error::invalid("truncated stanza in key archive"));
        }
        let secret = match body[3].find('#') {
            Some(h) => body[3][..h].trim(),
            None => body[3],
        };
        entries.push(ArchiveEntry {
            time,
            public_text: format!("{}\n{}\n{}\n", body[0], body[1], body[2]),
            secret_decimal: secret.to_string(),
        });
    }
    Ok(entries)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| Error::from(e).op("WriteKeys"))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| Error::from(e).op("WriteKeys"))?;
        f.write_all(contents.as_bytes())
            .map_err(|e| Error::from(e).op("WriteKeys"))?;
        f.sync_all().map_err(|e| Error::from(e).op("WriteKeys"))?;
    }
    fs::rename(&tmp, path).map_err(|e| Error::from(e).op("WriteKeys"))
}

/// Writes a fresh keypair into `dir`, creating it mode 0700. The secret
/// file lands mode 0600.
pub fn write_keypair(dir: &Path, public_text: &str, secret_line: &str) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::from(e).op("WriteKeys"))?;
    set_mode(dir, 0o700)?;

    let public_path = dir.join(PUBLIC_FILE);
    write_atomic(&public_path, public_text)?;
    set_mode(&public_path, 0o644)?;

    let secret_path = dir.join(SECRET_FILE);
    let mut contents = secret_line.to_string();
    if !contents.ends_with('\n') {
        contents.push('\n');
    }
    write_atomic(&secret_path, &contents)?;
    set_mode(&secret_path, 0o600)
}

/// Appends a rotated-out pair to the archive.
pub fn append_archive(
    dir: &Path,
    timestamp_rfc3339: &str,
    public_text: &str,
    secret_decimal: &str,
) -> Result<()> {
    let path = dir.join(ARCHIVE_FILE);
    let mut f = fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(&path)
        .map_err(|e| Error::from(e).op("Keygen"))?;
    set_mode(&path, 0o600)?;
    let mut stanza = format!("# EE {timestamp_rfc3339}\n{public_text}");
    if !stanza.ends_with('\n') {
        stanza.push('\n');
    }
    stanza.push_str(secret_decimal);
    stanza.push('\n');
    f.write_all(stanza.as_bytes())
        .map_err(|e| Error::from(e).op("Keygen"))
}

/// True if `dir` already holds a keypair.
pub fn keys_exist(dir: &Path) -> bool {
    dir.join(PUBLIC_FILE).exists() || dir.join(SECRET_FILE).exists()
}

/// Fails unless the secrets directory exists with owner-only permissions.
pub fn check_dir_mode(dir: &Path) -> Result<()> {
    let meta = fs::metadata(dir).map_err(|e| {
        Error::from(e)
            .op("Factotum")
            .msg(format!("secrets directory {}", dir.display()))
    })?;
    if !meta.is_dir() {
        return Err(Error::new(Kind::NotDir).msg(dir.display().to_string()));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = meta.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            return Err(Error::new(Kind::Permission).op("Factotum").msg(format!(
                "secrets directory {} must be mode 0700, is {:o}",
                dir.display(),
                mode
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_comment_split() {
        let dir = tempfile::tempdir().unwrap();
        write_keypair(
            dir.path(),
            "p256\n1\n2\n",
            "12345 # lusab-babad-lusab-babad.lusab-babad-lusab-babad",
        )
        .unwrap();
        let (d, pq) = read_secret(dir.path()).unwrap();
        assert_eq!(d, "12345");
        assert!(pq.unwrap().starts_with("lusab"));
        check_dir_mode(dir.path()).unwrap();
    }

    #[test]
    fn archive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        append_archive(dir.path(), "2026-01-02T03:04:05Z", "p256\n11\n22\n", "333").unwrap();
        append_archive(dir.path(), "2026-06-07T08:09:10Z", "p256\n44\n55\n", "666").unwrap();
        let entries = read_archive(dir.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].time.as_deref(), Some("2026-01-02T03:04:05Z"));
        assert_eq!(entries[1].public_text, "p256\n44\n55\n");
        assert_eq!(entries[1].secret_decimal, "666");
    }

    #[test]
    fn missing_archive_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_archive(dir.path()).unwrap().is_empty());
    }
}
