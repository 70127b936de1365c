//! The in-memory directory server.
//!
//! One `DirInner` holds every user tree in its world, guarded by an async
//! RwLock. Sessions are per-user facades carrying the authenticated
//! requester, the way a dialed connection does.
//!
//! Link handling follows the one-hop contract: any link met while walking
//! a path (including a final link on `lookup`) surfaces as a `FollowLink`
//! error carrying the link's entry; the client-side resolver owns the hop
//! loop. `delete` and `put` act on a final link itself.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use upspin_core::access::{self, Access, CanResult, Right};
use upspin_core::entry::{Packing, SEQ_IGNORE, SEQ_NOT_EXIST};
use upspin_core::path::{self, Parsed};
use upspin_core::user::SNAPSHOT_SUFFIX;
use upspin_core::{
    DirEntry, DirServer, Endpoint, Error, GroupCache, Kind, PathName, Result, UserName,
    WatchEvent,
};

use crate::store::InprocessStore;

struct Node {
    entry: DirEntry,
    children: BTreeMap<String, Node>,
}

impl Node {
    fn new(entry: DirEntry) -> Node {
        Node {
            entry,
            children: BTreeMap::new(),
        }
    }
}

struct Tree {
    root: Node,
    next_seq: i64,
}

struct Watcher {
    prefix: Parsed,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

pub(crate) struct DirInner {
    endpoint: Endpoint,
    store: Arc<InprocessStore>,
    trees: RwLock<HashMap<String, Tree>>,
    watchers: Mutex<Vec<Watcher>>,
    groups: GroupCache,
}

impl DirInner {
    pub(crate) fn new(endpoint: Endpoint, store: Arc<InprocessStore>) -> Self {
        DirInner {
            endpoint,
            store,
            trees: RwLock::new(HashMap::new()),
            watchers: Mutex::new(Vec::new()),
            groups: GroupCache::default(),
        }
    }
}

/// A per-user session on the directory server.
pub struct InprocessDir {
    inner: Arc<DirInner>,
    user: UserName,
}

impl InprocessDir {
    pub(crate) fn new(inner: Arc<DirInner>, user: UserName) -> Self {
        InprocessDir { inner, user }
    }
}

/// A user and their suffixed variants are owner-equivalent on each other's
/// trees; this is what lets a user read their own `+snapshot` tree.
fn owner_equiv(requester: &UserName, owner: &UserName) -> bool {
    if requester == owner {
        return true;
    }
    match (
        upspin_core::user::parse(requester.as_str()),
        upspin_core::user::parse(owner.as_str()),
    ) {
        (Ok(a), Ok(b)) => a.base() == b.base(),
        _ => false,
    }
}

fn withheld(op: &str, name: &PathName) -> Error {
    Error::new(Kind::Private).op(op).path(name.clone())
}

fn not_exist(op: &str, name: &PathName) -> Error {
    Error::new(Kind::NotExist).op(op).path(name.clone())
}

/// The directory whose Access file governs rights on `parsed`.
fn access_scope(parsed: &Parsed, is_dir: bool) -> Parsed {
    if is_dir { parsed.clone() } else { parsed.dir() }
}

/// What resolving a path against one tree produced.
enum Resolve {
    /// The entry, and whether it is the final element of the path.
    Found(DirEntry),
    /// A link met before the final element.
    MidLink(DirEntry),
    /// The walk stopped: elements `[0..depth)` exist, `depth` does not.
    Missing(usize),
    /// An intermediate element is not a directory.
    NotDirAt(usize),
}

fn resolve(tree: &Tree, parsed: &Parsed) -> Resolve {
    let mut node = &tree.root;
    for i in 0..parsed.nelem() {
        if !node.entry.is_dir() {
            return Resolve::NotDirAt(i);
        }
        match node.children.get(parsed.elem(i)) {
            Some(child) => {
                if child.entry.is_link() && i + 1 < parsed.nelem() {
                    return Resolve::MidLink(child.entry.clone());
                }
                node = child;
            }
            None => return Resolve::Missing(i),
        }
    }
    Resolve::Found(node.entry.clone())
}

impl DirInner {
    /// Reads the raw bytes of a stored file by concatenating its blocks
    /// from the sibling store. Internal: no access checks. Refuses
    /// encrypted content, which the server cannot interpret.
    async fn read_file_bytes(&self, name: &PathName) -> Result<Vec<u8>> {
        let parsed = Parsed::parse(name)?;
        let blocks = {
            let trees = self.trees.read().await;
            let tree = trees
                .get(parsed.user().as_str())
                .ok_or_else(|| not_exist("read", name))?;
            match resolve(tree, &parsed) {
                Resolve::Found(entry) => {
                    if !entry.is_regular() {
                        return Err(Error::new(Kind::IsDir).path(name.clone()));
                    }
                    if entry.packing == Packing::Ee {
                        return Err(Error::new(Kind::CannotDecrypt)
                            .path(name.clone())
                            .msg("server cannot read encrypted content"));
                    }
                    entry.blocks.clone()
                }
                _ => return Err(not_exist("read", name)),
            }
        };
        let mut bytes = Vec::new();
        for block in &blocks {
            let data = self
                .store
                .get_local(&block.location.reference)
                .ok_or_else(|| {
                    Error::new(Kind::Io)
                        .path(name.clone())
                        .msg("referenced block missing from store")
                })?;
            bytes.extend_from_slice(&data);
        }
        Ok(bytes)
    }

    /// The path of the Access file governing `dir` within its tree, if any.
    async fn governing_access_path(&self, dir: &Parsed) -> Option<Parsed> {
        let trees = self.trees.read().await;
        let tree = trees.get(dir.user().as_str())?;
        let mut node = &tree.root;
        let mut deepest: Option<Parsed> = None;
        let mut here = dir.first(0);
        for i in 0..=dir.nelem() {
            if let Some(acc) = node.children.get(access::ACCESS_FILE) {
                if acc.entry.is_regular() {
                    deepest = Some(here.child(access::ACCESS_FILE));
                }
            }
            if i == dir.nelem() {
                break;
            }
            match node.children.get(dir.elem(i)) {
                Some(child) if child.entry.is_dir() => {
                    node = child;
                    here = here.child(dir.elem(i));
                }
                _ => break,
            }
        }
        deepest
    }

    /// Loads and parses the Access policy for `dir`, falling back to the
    /// owner-only policy.
    async fn access_for(&self, dir: &Parsed) -> Access {
        if let Some(access_path) = self.governing_access_path(dir).await {
            let name = access_path.path();
            match self.read_file_bytes(&name).await {
                Ok(bytes) => match Access::parse(name.clone(), &bytes) {
                    Ok(a) => return a,
                    Err(e) => debug!("unparseable Access file {name}: {e}"),
                },
                Err(e) => debug!("unreadable Access file {name}: {e}"),
            }
        }
        Access::owner_only(dir.user())
    }

    /// Evaluates one right for `user` on the directory `scope`, loading
    /// Group files as the evaluation asks for them.
    async fn check(&self, user: &UserName, right: Right, scope: &Parsed) -> bool {
        if owner_equiv(user, scope.user()) {
            return true;
        }
        let access = self.access_for(scope).await;
        // Group chains are short; the bound only guards against cycles of
        // unreadable files.
        for _ in 0..20 {
            match access.can(user, right, &self.groups) {
                Ok(CanResult::Granted) => return true,
                Ok(CanResult::Denied) => return false,
                Ok(CanResult::NeedGroups(missing)) => {
                    for group_path in missing {
                        match self.read_file_bytes(&group_path).await {
                            Ok(bytes) => {
                                if let Err(e) = self.groups.add(&group_path, &bytes) {
                                    debug!("bad Group file {group_path}: {e}");
                                    self.groups.add(&group_path, b"").ok();
                                }
                            }
                            Err(_) => {
                                // Unreadable group grants nothing.
                                self.groups.add(&group_path, b"").ok();
                            }
                        }
                    }
                }
                Err(_) => return false,
            }
        }
        false
    }

    async fn notify(&self, entry: &DirEntry, delete: bool) {
        let parsed = match Parsed::parse(&entry.name) {
            Ok(p) => p,
            Err(_) => return,
        };
        let mut watchers = self.watchers.lock().await;
        watchers.retain(|w| {
            if !parsed.has_prefix(&w.prefix) {
                return !w.tx.is_closed();
            }
            w.tx.send(WatchEvent {
                entry: entry.clone(),
                delete,
                error: None,
            })
            .is_ok()
        });
    }

    /// Copies the base user's tree into a dated subtree of the snapshot
    /// user's tree. DirEntries are shared by value: block references are
    /// never duplicated in the store.
    async fn take_snapshot(&self, base: &UserName, snapshot_user: &UserName) -> Result<()> {
        let now = chrono::Utc::now();
        let mut trees = self.trees.write().await;

        let base_root = Parsed::parse(format!("{base}/"))?;
        let snap_root = Parsed::parse(format!("{snapshot_user}/"))?;

        // Destination path: YYYY/MM/DD/HH:MM under the snapshot root, the
        // time element uniquified if that minute already holds one.
        let date_elems = [
            now.format("%Y").to_string(),
            now.format("%m").to_string(),
            now.format("%d").to_string(),
            now.format("%H:%M").to_string(),
        ];
        let final_elem = {
            let mut name = date_elems[3].clone();
            if let Some(snap_tree) = trees.get(snapshot_user.as_str()) {
                let mut node = Some(&snap_tree.root);
                for elem in &date_elems[..3] {
                    node = node.and_then(|n| n.children.get(elem.as_str()));
                }
                if let Some(day) = node {
                    let mut n = 0;
                    while day.children.contains_key(&name) {
                        n += 1;
                        name = format!("{}.{n}", date_elems[3]);
                    }
                }
            }
            name
        };
        let mut dest = snap_root.clone();
        for elem in &date_elems[..3] {
            dest = dest.child(elem);
        }
        dest = dest.child(&final_elem);

        let copied = {
            let Some(base_tree) = trees.get(base.as_str()) else {
                return Err(not_exist("Snapshot", &PathName::from(format!("{base}/"))));
            };
            clone_renamed(&base_tree.root, &base_root, &dest)
        };

        let tree = trees.entry(snapshot_user.as_str().to_string()).or_insert_with(|| Tree {
            root: Node::new(DirEntry::new_directory(
                snap_root.path(),
                snapshot_user.clone(),
            )),
            next_seq: upspin_core::SEQ_BASE,
        });

        let mut node = &mut tree.root;
        let mut here = snap_root.clone();
        for elem in &date_elems[..3] {
            here = here.child(elem);
            let path = here.path();
            node = node.children.entry(elem.clone()).or_insert_with(|| {
                Node::new(DirEntry::new_directory(path, snapshot_user.clone()))
            });
        }
        node.children.insert(final_elem, copied);
        Ok(())
    }
}

/// Deep-copies `node`, rewriting entry names from under `from` to under
/// `to`. Writers, signed names, blocks, and packdata are untouched: the
/// original signatures still verify, and the store keeps a single copy of
/// every block.
fn clone_renamed(node: &Node, from: &Parsed, to: &Parsed) -> Node {
    let renamed = |name: &PathName| -> PathName {
        match Parsed::parse(name) {
            Ok(p) if p.has_prefix(from) => {
                let mut out = to.clone();
                for i in from.nelem()..p.nelem() {
                    out = out.child(p.elem(i));
                }
                out.path()
            }
            _ => name.clone(),
        }
    };
    let mut entry = node.entry.clone();
    entry.name = renamed(&entry.name);
    let mut copy = Node::new(entry);
    for (name, child) in &node.children {
        copy.children
            .insert(name.clone(), clone_renamed(child, from, to));
    }
    copy
}

#[async_trait]
impl DirServer for InprocessDir {
    async fn lookup(&self, name: &PathName) -> Result<DirEntry> {
        let parsed = Parsed::parse(name)?;
        let hit = {
            let trees = self.inner.trees.read().await;
            let Some(tree) = trees.get(parsed.user().as_str()) else {
                return Err(not_exist("Lookup", name));
            };
            resolve(tree, &parsed)
        };
        match hit {
            Resolve::MidLink(entry) => Err(Error::follow_link(entry).op("Lookup")),
            Resolve::NotDirAt(i) => Err(Error::new(Kind::NotDir)
                .op("Lookup")
                .path(parsed.first(i + 1).path())),
            Resolve::Missing(i) => {
                let parent = parsed.first(i);
                if self.inner.check(&self.user, Right::List, &parent).await
                    || self.inner.check(&self.user, Right::Read, &parent).await
                {
                    Err(not_exist("Lookup", name))
                } else {
                    Err(withheld("Lookup", name))
                }
            }
            Resolve::Found(mut entry) => {
                if entry.is_link() {
                    return Err(Error::follow_link(entry).op("Lookup"));
                }
                let scope = access_scope(&parsed, entry.is_dir());
                if self.inner.check(&self.user, Right::Read, &scope).await {
                    Ok(entry)
                } else if self.inner.check(&self.user, Right::List, &scope).await {
                    entry.mark_incomplete();
                    Ok(entry)
                } else {
                    Err(withheld("Lookup", name))
                }
            }
        }
    }

    async fn put(&self, entry: &DirEntry) -> Result<DirEntry> {
        let parsed = Parsed::parse(&entry.name)?;
        if parsed.path() != entry.name {
            return Err(Error::invalid("name is not clean").op("Put").path(entry.name.clone()));
        }

        // The snapshot trigger: a plain put of TakeSnapshot in a
        // +snapshot tree. The server owns when and how.
        if let Ok(owner) = upspin_core::user::parse(parsed.user().as_str()) {
            if owner.suffix == SNAPSHOT_SUFFIX
                && parsed.nelem() == 1
                && parsed.elem(0) == "TakeSnapshot"
                && entry.packing == Packing::Plain
            {
                if !owner_equiv(&self.user, parsed.user()) {
                    return Err(withheld("Put", &entry.name));
                }
                self.inner
                    .take_snapshot(&owner.base(), parsed.user())
                    .await?;
                return Ok(entry.clone());
            }
        }

        if parsed.is_root() {
            if !entry.is_dir() {
                return Err(Error::new(Kind::NotDir)
                    .op("Put")
                    .path(entry.name.clone())
                    .msg("root must be a directory"));
            }
            if !owner_equiv(&self.user, parsed.user()) {
                return Err(withheld("Put", &entry.name));
            }
            let mut trees = self.inner.trees.write().await;
            if trees.contains_key(parsed.user().as_str()) {
                return Err(Error::new(Kind::Exist).op("Put").path(entry.name.clone()));
            }
            let mut stored = entry.clone();
            stored.sequence = upspin_core::SEQ_BASE;
            trees.insert(
                parsed.user().as_str().to_string(),
                Tree {
                    root: Node::new(stored.clone()),
                    next_seq: upspin_core::SEQ_BASE + 1,
                },
            );
            return Ok(stored);
        }

        // Phase 1: inspect parent and any existing entry.
        let parent = parsed.dir();
        let existing = {
            let trees = self.inner.trees.read().await;
            let tree = trees
                .get(parsed.user().as_str())
                .ok_or_else(|| not_exist("Put", &entry.name))?;
            match resolve(tree, &parent) {
                Resolve::Found(p) if p.is_dir() => {}
                Resolve::Found(_) => {
                    return Err(Error::new(Kind::NotDir).op("Put").path(parent.path()));
                }
                Resolve::MidLink(link) => return Err(Error::follow_link(link).op("Put")),
                Resolve::Missing(_) => return Err(not_exist("Put", &parent.path())),
                Resolve::NotDirAt(i) => {
                    return Err(Error::new(Kind::NotDir)
                        .op("Put")
                        .path(parsed.first(i + 1).path()));
                }
            }
            match resolve(tree, &parsed) {
                Resolve::Found(e) => Some(e),
                _ => None,
            }
        };

        // Phase 2: rights.
        let right = if existing.is_some() { Right::Write } else { Right::Create };
        if !self.inner.check(&self.user, right, &parent).await {
            return Err(withheld("Put", &entry.name));
        }

        // Phase 3: apply under the write lock.
        match &existing {
            Some(old) if old.is_link() => {
                return Err(Error::follow_link(old.clone()).op("Put"));
            }
            Some(old) if old.is_dir() => {
                return if entry.is_dir() {
                    Err(Error::new(Kind::Exist).op("Put").path(entry.name.clone()))
                } else {
                    Err(Error::new(Kind::IsDir).op("Put").path(entry.name.clone()))
                };
            }
            Some(old) => {
                if entry.is_dir() {
                    return Err(Error::new(Kind::Exist).op("Put").path(entry.name.clone()));
                }
                if entry.sequence == SEQ_NOT_EXIST {
                    return Err(Error::new(Kind::Exist)
                        .op("Put")
                        .path(entry.name.clone())
                        .msg("file already exists"));
                }
                if entry.sequence != SEQ_IGNORE && entry.sequence != old.sequence {
                    return Err(Error::invalid("sequence number mismatch")
                        .op("Put")
                        .path(entry.name.clone()));
                }
            }
            None => {}
        }

        let stored = {
            let mut trees = self.inner.trees.write().await;
            let tree = trees
                .get_mut(parsed.user().as_str())
                .ok_or_else(|| not_exist("Put", &entry.name))?;
            let seq = tree.next_seq;
            let mut node = &mut tree.root;
            for i in 0..parsed.nelem() - 1 {
                node = node
                    .children
                    .get_mut(parsed.elem(i))
                    .ok_or_else(|| not_exist("Put", &parent.path()))?;
            }
            let mut stored = entry.clone();
            stored.sequence = seq;
            let base = parsed.elem(parsed.nelem() - 1).to_string();
            match node.children.get_mut(&base) {
                Some(child) => child.entry = stored.clone(),
                None => {
                    node.children.insert(base, Node::new(stored.clone()));
                }
            }
            tree.next_seq += 1;
            stored
        };

        if access::is_group_file(&entry.name) {
            self.inner.groups.remove(&entry.name);
        }
        self.inner.notify(&stored, false).await;
        Ok(stored)
    }

    async fn glob(&self, pattern: &str) -> Result<Vec<DirEntry>> {
        let parsed = Parsed::parse(pattern)?;
        let matched: Vec<DirEntry> = {
            let trees = self.inner.trees.read().await;
            let Some(tree) = trees.get(parsed.user().as_str()) else {
                return Err(not_exist("Glob", &PathName::from(pattern)));
            };
            let mut frontier: Vec<&Node> = vec![&tree.root];
            for i in 0..parsed.nelem() {
                let elem = parsed.elem(i);
                let mut next: Vec<&Node> = Vec::new();
                let mut links: Vec<DirEntry> = Vec::new();
                for node in frontier {
                    if node.entry.is_link() {
                        // The client must follow and re-glob below links.
                        links.push(node.entry.clone());
                        continue;
                    }
                    if !node.entry.is_dir() {
                        continue;
                    }
                    if path::has_meta(elem) {
                        for child in node.children.values() {
                            let name = match Parsed::parse(&child.entry.name) {
                                Ok(p) => p.base(),
                                Err(_) => continue,
                            };
                            if path::match_elem(elem, &name) {
                                next.push(child);
                            }
                        }
                    } else if let Some(child) = node.children.get(elem) {
                        next.push(child);
                    }
                }
                if !links.is_empty() {
                    // Surface the first link; the resolver restarts there.
                    return Err(Error::follow_link(links.remove(0)).op("Glob"));
                }
                frontier = next;
            }
            frontier.into_iter().map(|n| n.entry.clone()).collect()
        };

        // Filter by rights, marking readable-but-not listable entries.
        let mut results = Vec::with_capacity(matched.len());
        for mut entry in matched {
            let Ok(p) = Parsed::parse(&entry.name) else {
                continue;
            };
            let scope = access_scope(&p, entry.is_dir());
            if self.inner.check(&self.user, Right::Read, &scope).await {
                results.push(entry);
            } else if self.inner.check(&self.user, Right::List, &scope).await {
                entry.mark_incomplete();
                results.push(entry);
            }
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }

    async fn delete(&self, name: &PathName) -> Result<DirEntry> {
        let parsed = Parsed::parse(name)?;

        if !parsed.is_root() {
            let parent = parsed.dir();
            if !self.inner.check(&self.user, Right::Delete, &parent).await {
                return Err(withheld("Delete", name));
            }
        } else if !owner_equiv(&self.user, parsed.user()) {
            return Err(withheld("Delete", name));
        }

        let removed = {
            let mut trees = self.inner.trees.write().await;
            let tree = trees
                .get_mut(parsed.user().as_str())
                .ok_or_else(|| not_exist("Delete", name))?;

            if parsed.is_root() {
                if !tree.root.children.is_empty() {
                    return Err(Error::new(Kind::NotEmpty).op("Delete").path(name.clone()));
                }
                let removed = tree.root.entry.clone();
                trees.remove(parsed.user().as_str());
                removed
            } else {
                let mut node = &mut tree.root;
                for i in 0..parsed.nelem() - 1 {
                    let child = node
                        .children
                        .get_mut(parsed.elem(i))
                        .ok_or_else(|| not_exist("Delete", name))?;
                    if child.entry.is_link() {
                        return Err(Error::follow_link(child.entry.clone()).op("Delete"));
                    }
                    node = child;
                }
                let base = parsed.elem(parsed.nelem() - 1);
                let target = node
                    .children
                    .get(base)
                    .ok_or_else(|| not_exist("Delete", name))?;
                if target.entry.is_dir() && !target.children.is_empty() {
                    return Err(Error::new(Kind::NotEmpty).op("Delete").path(name.clone()));
                }
                match node.children.remove(base) {
                    Some(n) => n.entry,
                    None => return Err(not_exist("Delete", name)),
                }
            }
        };

        if access::is_group_file(name) {
            self.inner.groups.remove(name);
        }
        self.inner.notify(&removed, true).await;
        Ok(removed)
    }

    async fn which_access(&self, name: &PathName) -> Result<Option<DirEntry>> {
        let parsed = Parsed::parse(name)?;
        let has_any = {
            let mut any = owner_equiv(&self.user, parsed.user());
            for right in access::ALL_RIGHTS {
                if any {
                    break;
                }
                any = self.inner.check(&self.user, right, &parsed).await;
            }
            any
        };
        if !has_any {
            return Err(withheld("WhichAccess", name));
        }
        // Rights on a file come from its directory's policy.
        let is_dir = {
            let trees = self.inner.trees.read().await;
            match trees.get(parsed.user().as_str()).map(|t| resolve(t, &parsed)) {
                Some(Resolve::Found(e)) => e.is_dir(),
                _ => false,
            }
        };
        let scope = access_scope(&parsed, is_dir);
        let Some(access_path) = self.inner.governing_access_path(&scope).await else {
            return Ok(None);
        };
        let trees = self.inner.trees.read().await;
        let tree = trees
            .get(parsed.user().as_str())
            .ok_or_else(|| not_exist("WhichAccess", name))?;
        match resolve(tree, &access_path) {
            Resolve::Found(entry) => Ok(Some(entry)),
            _ => Ok(None),
        }
    }

    async fn watch(
        &self,
        name: &PathName,
        sequence: i64,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<WatchEvent>> {
        let parsed = Parsed::parse(name)?;
        if !self.inner.check(&self.user, Right::Read, &parsed).await {
            return Err(withheld("Watch", name));
        }

        let (tx_out, rx_out) = mpsc::channel(64);
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();

        // Snapshot the subtree and register the live feed under one lock
        // acquisition, so no event falls between replay and stream.
        let replay: Vec<DirEntry> = {
            let trees = self.inner.trees.read().await;
            let tree = trees
                .get(parsed.user().as_str())
                .ok_or_else(|| not_exist("Watch", name))?;
            let mut entries = Vec::new();
            if sequence < 0 {
                if !matches!(resolve(tree, &parsed), Resolve::Found(_)) {
                    return Err(not_exist("Watch", name));
                }
                collect_subtree(tree, &parsed, &mut entries);
            }
            let mut watchers = self.inner.watchers.lock().await;
            watchers.push(Watcher {
                prefix: parsed.clone(),
                tx: tx_live,
            });
            entries
        };

        tokio::spawn(async move {
            for entry in replay {
                let event = WatchEvent {
                    entry,
                    delete: false,
                    error: None,
                };
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx_out.send(event) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = rx_live.recv() => {
                        match event {
                            Some(event) => {
                                if tx_out.send(event).await.is_err() {
                                    return;
                                }
                            }
                            None => return,
                        }
                    }
                }
            }
        });
        Ok(rx_out)
    }

    fn endpoint(&self) -> Endpoint {
        self.inner.endpoint.clone()
    }
}

/// Collects every entry at or under `at`, depth-first in name order.
fn collect_subtree(tree: &Tree, at: &Parsed, out: &mut Vec<DirEntry>) {
    fn walk(node: &Node, out: &mut Vec<DirEntry>) {
        out.push(node.entry.clone());
        for child in node.children.values() {
            walk(child, out);
        }
    }
    let mut node = &tree.root;
    for i in 0..at.nelem() {
        match node.children.get(at.elem(i)) {
            Some(child) => node = child,
            None => return,
        }
    }
    walk(node, out);
}
