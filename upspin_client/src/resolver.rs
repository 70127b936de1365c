//! Name resolution: the client side of link following and globbing.
//!
//! Servers take exactly one link hop per call; the loops here own the hop
//! budget (`MAX_LINK_HOPS`) so a cycle of links fails with `LinkLoop`
//! instead of recursing.

use upspin_core::entry::DirEntry;
use upspin_core::path::{self, Parsed};
use upspin_core::{Error, Kind, PathName, Result, MAX_LINK_HOPS};

use crate::client::Client;

impl Client {
    /// Looks up `name`, following mid-path links and, when `follow_final`
    /// is set, a link at the final element too.
    ///
    /// With `follow_final` unset, a final link is returned as itself. A
    /// followed link whose target cannot be resolved yields `BrokenLink`
    /// carrying the link's entry.
    pub async fn lookup(&self, name: &PathName, follow_final: bool) -> Result<DirEntry> {
        let mut current = Parsed::parse(name)?;
        let mut last_link: Option<DirEntry> = None;
        for _ in 0..MAX_LINK_HOPS {
            let dir = self.dir_for(current.user()).await?;
            match dir.lookup(&current.path()).await {
                Ok(entry) => return Ok(entry),
                Err(e) if e.is(Kind::FollowLink) => {
                    let link = e
                        .into_link_entry()
                        .ok_or_else(|| Error::new(Kind::Internal).msg("FollowLink without entry"))?;
                    let next = rebase_through_link(&current, &link)?;
                    match next {
                        Some(target) => current = target,
                        // The link is the final element: a target that
                        // fails to resolve makes the link broken.
                        None if follow_final => {
                            let target = link.link.clone().ok_or_else(|| {
                                Error::new(Kind::Internal).msg("link entry has no target")
                            })?;
                            last_link = Some(link);
                            current = Parsed::parse(&target)?;
                        }
                        None => return Ok(link),
                    }
                }
                Err(e) if e.is(Kind::NotExist) && last_link.is_some() => {
                    let mut broken = Error::new(Kind::BrokenLink)
                        .op("Lookup")
                        .path(name.clone());
                    if let Some(link) = last_link {
                        broken = broken.entry(link);
                    }
                    return Err(broken);
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::new(Kind::LinkLoop).op("Lookup").path(name.clone()))
    }

    /// The Access file governing `name`, following links, or `None` for
    /// an owner-only tree.
    pub async fn which_access(&self, name: &PathName) -> Result<Option<DirEntry>> {
        let mut current = Parsed::parse(name)?;
        for _ in 0..MAX_LINK_HOPS {
            let dir = self.dir_for(current.user()).await?;
            match dir.which_access(&current.path()).await {
                Ok(entry) => return Ok(entry),
                Err(e) if e.is(Kind::FollowLink) => {
                    let link = e
                        .into_link_entry()
                        .ok_or_else(|| Error::new(Kind::Internal).msg("FollowLink without entry"))?;
                    match rebase_through_link(&current, &link)? {
                        Some(target) => current = target,
                        None => {
                            let target = link.link.clone().ok_or_else(|| {
                                Error::new(Kind::Internal).msg("link entry has no target")
                            })?;
                            current = Parsed::parse(&target)?;
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::new(Kind::LinkLoop).op("WhichAccess").path(name.clone()))
    }

    /// Expands a glob pattern: literal elements advance by name, the
    /// first metacharacter element in a prefix expands via a one-level
    /// directory glob filtered by element match.
    pub async fn glob(&self, pattern: &str) -> Result<Vec<DirEntry>> {
        let parsed = Parsed::parse(pattern)?;

        let mut any_meta = false;
        for i in 0..parsed.nelem() {
            if path::has_meta(parsed.elem(i)) {
                any_meta = true;
                break;
            }
        }
        if !any_meta {
            return Ok(vec![self.lookup(&parsed.path(), false).await?]);
        }

        let mut frontier: Vec<Parsed> = vec![parsed.first(0)];
        for i in 0..parsed.nelem() {
            let elem = parsed.elem(i);
            let mut next: Vec<Parsed> = Vec::new();
            if !path::has_meta(elem) {
                for cur in &frontier {
                    next.push(cur.child(elem));
                }
            } else {
                for cur in &frontier {
                    let dir = self.dir_for(cur.user()).await?;
                    let one_level = format!("{}/*", cur);
                    let mut hops = 0;
                    let mut at = cur.clone();
                    let entries = loop {
                        match dir.glob(&format!("{}/*", at)).await {
                            Ok(entries) => break entries,
                            Err(e) if e.is(Kind::FollowLink) && hops < MAX_LINK_HOPS => {
                                // Resolve the link in the prefix, retry
                                // the expansion from the resolved path.
                                hops += 1;
                                let resolved = self.lookup(&at.path(), true).await?;
                                at = Parsed::parse(&resolved.name)?;
                            }
                            Err(e) if e.is(Kind::NotExist) => break Vec::new(),
                            Err(e) => return Err(e.op("Glob").path(one_level.as_str())),
                        }
                    };
                    for entry in entries {
                        let p = Parsed::parse(&entry.name)?;
                        if path::match_elem(elem, &p.base()) {
                            next.push(p);
                        }
                    }
                }
            }
            frontier = next;
        }

        let mut results: Vec<DirEntry> = Vec::new();
        for candidate in frontier {
            match self.lookup(&candidate.path(), false).await {
                Ok(entry) => results.push(entry),
                Err(e) if e.is(Kind::NotExist) || e.is(Kind::Private) => continue,
                Err(e) if e.is(Kind::BrokenLink) => {
                    if let Some(link) = e.into_link_entry() {
                        results.push(link);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));
        results.dedup_by(|a, b| a.name == b.name);
        Ok(results)
    }

    /// Walks the tree under `root` breadth-first, returning every entry
    /// reachable without following links. `root` itself is included.
    pub async fn walk_tree(&self, root: &PathName) -> Result<Vec<DirEntry>> {
        let top = self.lookup(root, false).await?;
        let mut out = Vec::new();
        let mut pending = Vec::new();
        if top.is_dir() {
            pending.push(Parsed::parse(&top.name)?);
        }
        out.push(top);
        while let Some(dir) = pending.pop() {
            let dir_server = self.dir_for(dir.user()).await?;
            let children = match dir_server.glob(&format!("{}/*", dir)).await {
                Ok(c) => c,
                Err(e) if e.is(Kind::NotExist) => continue,
                Err(e) => return Err(e),
            };
            for child in children {
                if child.is_dir() {
                    pending.push(Parsed::parse(&child.name)?);
                }
                out.push(child);
            }
        }
        Ok(out)
    }
}

/// Rewrites `current` through a link discovered at `link.name`:
/// `Some(target + remainder)` for a mid-path link, `None` when the link
/// is the final element.
fn rebase_through_link(current: &Parsed, link: &DirEntry) -> Result<Option<Parsed>> {
    let link_parsed = Parsed::parse(&link.name)?;
    if !current.has_prefix(&link_parsed) {
        return Err(Error::new(Kind::Internal)
            .msg(format!("server returned link {} outside {}", link.name, current)));
    }
    if link_parsed.nelem() == current.nelem() {
        return Ok(None);
    }
    let target = link
        .link
        .clone()
        .ok_or_else(|| Error::new(Kind::Internal).msg("link entry has no target"))?;
    let mut next = Parsed::parse(&target)?;
    for i in link_parsed.nelem()..current.nelem() {
        next = next.child(current.elem(i));
    }
    Ok(Some(next))
}
