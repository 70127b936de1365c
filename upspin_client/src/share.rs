//! The share engine: keeping wrapped-key sets in step with Access files.
//!
//! For every regular file under its inputs, the engine computes who the
//! governing Access file says may read, diffs that set against the key
//! hashes actually wrapped in the file's packdata, and (with `fix`)
//! rewraps and rewrites the entry. Per-file failures are collected, never
//! retried silently; Access files and reader sets are cached for the
//! duration of one run.

use std::collections::HashMap;

use futures::StreamExt;
use futures::stream;
use tracing::debug;

use upspin_core::access::{Access, UsersResult};
use upspin_core::entry::{DirEntry, Packing};
use upspin_core::path::Parsed;
use upspin_core::{Error, Kind, PathName, Result, UserName};
use upspin_factotum::PublicKey;
use upspin_pack::Packer as _;

use crate::client::Client;

/// Bound on concurrent rewrap/put operations.
const SHARE_JOBS: usize = 4;

pub struct Sharer {
    client: Client,
    pub fix: bool,
    pub force: bool,
    pub recursive: bool,
    pub unencrypt_for_all: bool,
}

#[derive(Debug, Default)]
pub struct ShareReport {
    /// Files inspected.
    pub checked: usize,
    /// Files whose wrapped keys were rewritten.
    pub repacked: Vec<PathName>,
    /// Files rewritten with `eeintegrity` under `-unencryptforall`.
    pub unencrypted: Vec<PathName>,
    /// Files whose key sets disagree with Access but were left alone
    /// (no `fix`), plus other advisory notes.
    pub warnings: Vec<String>,
    pub errors: Vec<(PathName, Error)>,
}

impl ShareReport {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// The readers of one directory, resolved to keys.
#[derive(Clone, Default)]
struct ReaderSet {
    keys: Vec<PublicKey>,
    hashes: Vec<[u8; 32]>,
    has_all: bool,
    notes: Vec<String>,
}

impl Sharer {
    pub fn new(client: Client) -> Sharer {
        Sharer {
            client,
            fix: false,
            force: false,
            recursive: false,
            unencrypt_for_all: false,
        }
    }

    pub async fn share(&self, roots: &[PathName]) -> ShareReport {
        let mut report = ShareReport::default();

        // Flatten the inputs to regular entries, depth-first.
        let mut entries: Vec<DirEntry> = Vec::new();
        for root in roots {
            match self.client.lookup(root, false).await {
                Ok(top) if top.is_dir() => {
                    let walked = if self.recursive {
                        self.client.walk_tree(root).await
                    } else {
                        self.client.glob(&format!("{root}/*")).await
                    };
                    match walked {
                        Ok(found) => entries.extend(found),
                        Err(e) => report.errors.push((root.clone(), e)),
                    }
                }
                Ok(top) => entries.push(top),
                Err(e) => report.errors.push((root.clone(), e)),
            }
        }
        entries.retain(|e| e.is_regular());

        // Resolve the reader set per governing Access file, once.
        let mut access_of_dir: HashMap<PathName, Option<PathName>> = HashMap::new();
        let mut readers_of_access: HashMap<Option<PathName>, ReaderSet> = HashMap::new();
        let mut jobs = Vec::new();
        for entry in entries {
            report.checked += 1;
            let dir = match Parsed::parse(&entry.name) {
                Ok(p) => p.dir().path(),
                Err(e) => {
                    report.errors.push((entry.name.clone(), e));
                    continue;
                }
            };
            let access_path = match access_of_dir.get(&dir) {
                Some(known) => known.clone(),
                None => {
                    let found = match self.client.which_access(&entry.name).await {
                        Ok(found) => found.map(|e| e.name),
                        Err(e) => {
                            report.errors.push((entry.name.clone(), e));
                            continue;
                        }
                    };
                    access_of_dir.insert(dir, found.clone());
                    found
                }
            };
            if !readers_of_access.contains_key(&access_path) {
                let owner = match Parsed::parse(&entry.name) {
                    Ok(p) => p.user().clone(),
                    Err(e) => {
                        report.errors.push((entry.name.clone(), e));
                        continue;
                    }
                };
                match self.resolve_readers(access_path.as_ref(), &owner).await {
                    Ok(set) => {
                        report.warnings.extend(set.notes.iter().cloned());
                        readers_of_access.insert(access_path.clone(), set);
                    }
                    Err(e) => {
                        report.errors.push((entry.name.clone(), e));
                        continue;
                    }
                }
            }
            let readers = readers_of_access[&access_path].clone();
            jobs.push((entry, readers));
        }

        // Rewraps are independent per entry; run them with bounded
        // parallelism.
        let outcomes: Vec<Outcome> = stream::iter(jobs)
            .map(|(entry, readers)| self.fix_entry(entry, readers))
            .buffer_unordered(SHARE_JOBS)
            .collect()
            .await;
        for outcome in outcomes {
            match outcome {
                Outcome::Unchanged => {}
                Outcome::Repacked(name) => report.repacked.push(name),
                Outcome::Unencrypted(name) => report.unencrypted.push(name),
                Outcome::Warning(text) => report.warnings.push(text),
                Outcome::Failed(name, err) => report.errors.push((name, err)),
            }
        }
        report.repacked.sort();
        report.unencrypted.sort();
        report
    }

    /// Expands one Access file (or the owner-only default) into a
    /// resolved reader set.
    async fn resolve_readers(
        &self,
        access_path: Option<&PathName>,
        owner: &UserName,
    ) -> Result<ReaderSet> {
        let access = match access_path {
            None => Access::owner_only(owner),
            Some(path) => {
                let bytes = self.client.get(path).await?;
                Access::parse(path.clone(), &bytes)?
            }
        };

        // Group loading loop, as in server-side evaluation. The bound
        // only guards against cycles of unreadable files.
        let mut expansion = None;
        for _ in 0..20 {
            match access.users(upspin_core::Right::Read, &self.client.groups)? {
                UsersResult::Users {
                    users,
                    has_all,
                    wildcard_domains,
                } => {
                    expansion = Some((users, has_all, wildcard_domains));
                    break;
                }
                UsersResult::NeedGroups(missing) => {
                    for group in missing {
                        let loaded = match self.client.get(&group).await {
                            Ok(bytes) => self.client.groups.add(&group, &bytes),
                            Err(e) => Err(e),
                        };
                        if let Err(e) = loaded {
                            // An unreadable or unparseable group grants
                            // nothing.
                            debug!("unreadable group {group}: {e}");
                            self.client.groups.add(&group, b"")?;
                        }
                    }
                }
            }
        }
        let Some((users, has_all, wildcard_domains)) = expansion else {
            return Err(Error::new(Kind::Internal)
                .op("Share")
                .msg("group expansion did not converge"));
        };

        let mut set = ReaderSet {
            has_all,
            ..Default::default()
        };
        for domain in wildcard_domains {
            // A wildcard names no concrete key; nothing can be wrapped
            // for it.
            set.notes.push(format!(
                "cannot wrap keys for wildcard *@{domain}; grant users individually"
            ));
        }
        for user in users {
            match self.client.writer_key(&user).await {
                Ok(key) => {
                    let hash = key.key_hash();
                    if !set.hashes.contains(&hash) {
                        set.hashes.push(hash);
                        set.keys.push(key);
                    }
                }
                Err(e) => {
                    set.notes
                        .push(format!("skipping reader {user}: no public key ({e})"));
                }
            }
        }
        set.hashes.sort();
        Ok(set)
    }

    /// Diffs one entry's wrapped keys against the reader set and, with
    /// `fix`, rewraps and stores it.
    async fn fix_entry(&self, mut entry: DirEntry, readers: ReaderSet) -> Outcome {
        let packer = upspin_pack::lookup(entry.packing);

        if readers.has_all && entry.packing == Packing::Ee {
            if !self.unencrypt_for_all {
                return Outcome::Warning(format!(
                    "{}: Access grants read:all but the file is encrypted; \
                     use unencryptforall to rewrite it with eeintegrity",
                    entry.name
                ));
            }
            // Rewrite the file in the clear (integrity-signed).
            let name = entry.name.clone();
            let content = match self.client.open_entry(entry).await {
                Ok(mut reader) => match reader.read_all().await {
                    Ok(content) => content,
                    Err(e) => return Outcome::Failed(name, e),
                },
                Err(e) => return Outcome::Failed(name, e),
            };
            return match self
                .client
                .put_packed(&name, &content, Packing::EeIntegrity)
                .await
            {
                Ok(_) => Outcome::Unencrypted(name),
                Err(e) => Outcome::Failed(name, e),
            };
        }

        let current = match packer.reader_hashes(&entry.packdata) {
            Ok(mut hashes) => {
                hashes.sort();
                hashes
            }
            Err(e) => return Outcome::Failed(entry.name.clone(), e),
        };
        if entry.packing != Packing::Ee {
            // Nothing is wrapped for cleartext packings.
            return Outcome::Unchanged;
        }
        if current == readers.hashes && !self.force {
            return Outcome::Unchanged;
        }
        if !self.fix {
            return Outcome::Warning(format!(
                "{}: wrapped keys do not match the readers of its Access file \
                 (run share -fix)",
                entry.name
            ));
        }

        let mut slots = vec![Some(std::mem::take(&mut entry.packdata))];
        packer.share(self.client.factotum(), &readers.keys, &mut slots);
        match slots.pop().flatten() {
            Some(packdata) => entry.packdata = packdata,
            None => {
                return Outcome::Failed(
                    entry.name.clone(),
                    Error::new(Kind::CannotDecrypt)
                        .op("Share")
                        .path(entry.name.clone())
                        .msg("cannot unwrap keys; writer must countersign first"),
                );
            }
        }

        let parsed = match Parsed::parse(&entry.name) {
            Ok(p) => p,
            Err(e) => return Outcome::Failed(entry.name.clone(), e),
        };
        let dir = match self.client.dir_for(parsed.user()).await {
            Ok(d) => d,
            Err(e) => return Outcome::Failed(entry.name.clone(), e),
        };
        // The entry's sequence pins this write to the version we read;
        // a concurrent writer surfaces as an error, never a retry.
        match dir.put(&entry).await {
            Ok(_) => Outcome::Repacked(entry.name),
            Err(e) => Outcome::Failed(entry.name, e),
        }
    }
}

enum Outcome {
    Unchanged,
    Repacked(PathName),
    Unencrypted(PathName),
    Warning(String),
    Failed(PathName, Error),
}
