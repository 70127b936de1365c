//! Parsing and evaluation of Access and Group files.
//!
//! An Access file is a text file named `Access` whose rules grant rights to
//! principals. Its effect extends from its directory downward until shadowed
//! by a deeper Access file. Group files are named sets of principals,
//! referenced from Access files by path; a bare name resolves under the
//! owner's `Group` directory.
//!
//! Evaluation is CPU-only: when a rule references a Group file whose
//! contents are not yet cached, [`Access::can`] returns
//! [`CanResult::NeedGroups`] and the caller fetches the bytes and feeds
//! them to the [`GroupCache`] before retrying.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::errors::{Error, Result};
use crate::path::{Parsed, PathName};
use crate::user::{self, UserName};

/// The base name of every access file.
pub const ACCESS_FILE: &str = "Access";

/// The directory under a user root where bare group names resolve.
pub const GROUP_DIR: &str = "Group";

/// The rights a rule can grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Right {
    Read,
    Write,
    List,
    Create,
    Delete,
}

/// All rights, in rule order.
pub const ALL_RIGHTS: [Right; 5] = [
    Right::Read,
    Right::Write,
    Right::List,
    Right::Create,
    Right::Delete,
];

impl Right {
    fn index(self) -> usize {
        match self {
            Right::Read => 0,
            Right::Write => 1,
            Right::List => 2,
            Right::Create => 3,
            Right::Delete => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Right::Read => "read",
            Right::Write => "write",
            Right::List => "list",
            Right::Create => "create",
            Right::Delete => "delete",
        }
    }
}

/// One grantee in an access rule or group file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Principal {
    User(UserName),
    /// `*@domain`: any user in the domain, honoured for read and list.
    Wildcard(String),
    /// The literal `all`: every user.
    All,
    /// A reference to a Group file by path.
    Group(PathName),
}

/// True if `name` is an Access file.
pub fn is_access_file(name: &PathName) -> bool {
    match Parsed::parse(name) {
        Ok(p) => !p.is_root() && p.base() == ACCESS_FILE,
        Err(_) => false,
    }
}

/// True if `name` lies under a user's `Group` directory.
pub fn is_group_file(name: &PathName) -> bool {
    match Parsed::parse(name) {
        Ok(p) => p.nelem() >= 2 && p.elem(0) == GROUP_DIR,
        Err(_) => false,
    }
}

/// A parsed Access file.
#[derive(Clone, Debug)]
pub struct Access {
    path: PathName,
    owner: UserName,
    lists: [Vec<Principal>; 5],
}

/// The outcome of a rights check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CanResult {
    Granted,
    Denied,
    /// Evaluation needs these Group files loaded into the cache first.
    NeedGroups(Vec<PathName>),
}

/// The expansion of one right's user set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UsersResult {
    Users {
        /// Concrete users, owner first, deduplicated.
        users: Vec<UserName>,
        /// The rule granted the literal `all`.
        has_all: bool,
        /// Domains granted by wildcard.
        wildcard_domains: Vec<String>,
    },
    NeedGroups(Vec<PathName>),
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    }
}

fn parse_principal(token: &str, owner: &UserName) -> Result<Principal> {
    if token.eq_ignore_ascii_case("all") || token.eq_ignore_ascii_case("allusers") {
        return Ok(Principal::All);
    }
    if token.contains('@') {
        if token.contains('/') {
            // A full path to a Group file in some user's tree.
            let parsed = Parsed::parse(token)?;
            return Ok(Principal::Group(parsed.path()));
        }
        let parsed = user::parse(token)?;
        if parsed.wildcard() {
            return Ok(Principal::Wildcard(parsed.domain));
        }
        return Ok(Principal::User(parsed.user_name()));
    }
    // A bare or owner-relative group name.
    let rel = if token.starts_with(&format!("{GROUP_DIR}/")) {
        token.to_string()
    } else {
        format!("{GROUP_DIR}/{token}")
    };
    let path = crate::path::join(&PathName::from(format!("{owner}/")), &[rel.as_str()])?;
    Ok(Principal::Group(path))
}

fn parse_rights(field: &str, line_no: usize) -> Result<Vec<Right>> {
    let mut rights = Vec::new();
    for token in field.split([',', ' ', '\t']).filter(|t| !t.is_empty()) {
        let token = token.to_ascii_lowercase();
        match token.as_str() {
            "r" | "read" => rights.push(Right::Read),
            "w" | "write" => rights.push(Right::Write),
            "l" | "list" => rights.push(Right::List),
            "c" | "create" => rights.push(Right::Create),
            "d" | "delete" => rights.push(Right::Delete),
            "*" | "all" => rights.extend(ALL_RIGHTS),
            other => {
                return Err(Error::invalid(format!(
                    "line {line_no}: invalid right {other:?}"
                )));
            }
        }
    }
    Ok(rights)
}

impl Access {
    /// Parses the contents of the Access file at `name`.
    pub fn parse(name: impl Into<PathName>, data: &[u8]) -> Result<Access> {
        let name = name.into();
        let parsed = Parsed::parse(&name).map_err(|e| e.op("access.Parse"))?;
        if !is_access_file(&name) {
            return Err(Error::invalid("not an Access file").path(name));
        }
        let owner = parsed.user().clone();
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::invalid("Access file is not valid UTF-8").path(name.clone()))?;

        let mut lists: [Vec<Principal>; 5] = std::array::from_fn(|_| Vec::new());
        for (i, raw) in text.lines().enumerate() {
            let line_no = i + 1;
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            let colon = line.find(':').ok_or_else(|| {
                Error::invalid(format!("line {line_no}: no colon in rule"))
                    .path(name.clone())
            })?;
            let rights =
                parse_rights(&line[..colon], line_no).map_err(|e| e.path(name.clone()))?;
            for token in line[colon + 1..]
                .split([',', ' ', '\t'])
                .filter(|t| !t.is_empty())
            {
                let principal = parse_principal(token, &owner).map_err(|e| {
                    Error::invalid(format!("line {line_no}: bad user {token:?}"))
                        .path(name.clone())
                        .cause(e)
                })?;
                for right in &rights {
                    lists[right.index()].push(principal.clone());
                }
            }
        }
        Ok(Access {
            path: name,
            owner,
            lists,
        })
    }

    /// An Access file granting the owner everything and nobody else
    /// anything: the policy in force where no Access file exists.
    pub fn owner_only(root_owner: &UserName) -> Access {
        Access {
            path: PathName::from(format!("{root_owner}/{ACCESS_FILE}")),
            owner: root_owner.clone(),
            lists: std::array::from_fn(|_| Vec::new()),
        }
    }

    pub fn path(&self) -> &PathName {
        &self.path
    }

    pub fn owner(&self) -> &UserName {
        &self.owner
    }

    /// True if the given right is granted to the literal `all`.
    pub fn has_all_users(&self, right: Right) -> bool {
        self.lists[right.index()]
            .iter()
            .any(|p| matches!(p, Principal::All))
    }

    /// Reports whether `user` holds `right` here.
    ///
    /// The owner always holds every right. `read:all` implies `list:all`.
    /// Wildcards are honoured for read and list only.
    pub fn can(
        &self,
        user: &UserName,
        right: Right,
        groups: &GroupCache,
    ) -> Result<CanResult> {
        if *user == self.owner {
            return Ok(CanResult::Granted);
        }
        let user_domain = match user.as_str().rfind('@') {
            Some(at) => &user.as_str()[at + 1..],
            None => "",
        };
        let wildcard_applies = matches!(right, Right::Read | Right::List);

        let mut candidates: Vec<&Principal> = self.lists[right.index()].iter().collect();
        if right == Right::List {
            // read:all implies list:all, and read grants generally imply
            // the ability to list the items themselves.
            candidates.extend(self.lists[Right::Read.index()].iter());
        }

        let mut missing = Vec::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<Principal> = candidates.into_iter().cloned().collect();
        while let Some(principal) = stack.pop() {
            match principal {
                Principal::All => return Ok(CanResult::Granted),
                Principal::User(u) => {
                    if u == *user {
                        return Ok(CanResult::Granted);
                    }
                }
                Principal::Wildcard(domain) => {
                    if wildcard_applies && domain == user_domain {
                        return Ok(CanResult::Granted);
                    }
                }
                Principal::Group(path) => {
                    if !seen.insert(path.clone()) {
                        continue;
                    }
                    match groups.get(&path) {
                        Some(members) => stack.extend(members.iter().cloned()),
                        None => missing.push(path),
                    }
                }
            }
        }
        if missing.is_empty() {
            Ok(CanResult::Denied)
        } else {
            Ok(CanResult::NeedGroups(missing))
        }
    }

    /// Expands the set of users holding `right`, for the share engine.
    pub fn users(&self, right: Right, groups: &GroupCache) -> Result<UsersResult> {
        let mut users = vec![self.owner.clone()];
        let mut has_all = false;
        let mut wildcard_domains = Vec::new();
        let mut missing = Vec::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<Principal> = self.lists[right.index()].clone();
        while let Some(principal) = stack.pop() {
            match principal {
                Principal::All => has_all = true,
                Principal::User(u) => {
                    if !users.contains(&u) {
                        users.push(u);
                    }
                }
                Principal::Wildcard(domain) => {
                    if !wildcard_domains.contains(&domain) {
                        wildcard_domains.push(domain);
                    }
                }
                Principal::Group(path) => {
                    if !seen.insert(path.clone()) {
                        continue;
                    }
                    match groups.get(&path) {
                        Some(members) => stack.extend(members.iter().cloned()),
                        None => missing.push(path),
                    }
                }
            }
        }
        if !missing.is_empty() {
            return Ok(UsersResult::NeedGroups(missing));
        }
        Ok(UsersResult::Users {
            users,
            has_all,
            wildcard_domains,
        })
    }
}

/// Parses a Group file's contents into principals.
///
/// Bare names inside a group resolve relative to the group file's owner.
pub fn parse_group(name: &PathName, data: &[u8]) -> Result<Vec<Principal>> {
    let parsed = Parsed::parse(name).map_err(|e| e.op("access.ParseGroup"))?;
    let owner = parsed.user().clone();
    let text = std::str::from_utf8(data)
        .map_err(|_| Error::invalid("Group file is not valid UTF-8").path(name.clone()))?;
    let mut members = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        for token in line.split([',', ' ', '\t']).filter(|t| !t.is_empty()) {
            let principal = parse_principal(token, &owner).map_err(|e| {
                Error::invalid(format!("line {}: bad member {token:?}", i + 1))
                    .path(name.clone())
                    .cause(e)
            })?;
            members.push(principal);
        }
    }
    Ok(members)
}

/// A write-through cache of parsed Group files, shared across workers.
pub struct GroupCache {
    groups: DashMap<PathName, Arc<Vec<Principal>>>,
    cap: usize,
}

impl GroupCache {
    pub fn new(cap: usize) -> Self {
        GroupCache {
            groups: DashMap::new(),
            cap: cap.max(1),
        }
    }

    pub fn get(&self, path: &PathName) -> Option<Arc<Vec<Principal>>> {
        self.groups.get(path).map(|g| g.clone())
    }

    /// Parses and caches the bytes of the Group file at `path`.
    pub fn add(&self, path: &PathName, data: &[u8]) -> Result<()> {
        let members = parse_group(path, data)?;
        if self.groups.len() >= self.cap {
            // Wholesale eviction keeps the cache bounded without
            // tracking recency.
            self.groups.clear();
        }
        self.groups.insert(path.clone(), Arc::new(members));
        Ok(())
    }

    /// Drops a cached group, e.g. after its file is rewritten.
    pub fn remove(&self, path: &PathName) {
        self.groups.remove(path);
    }

    pub fn clear(&self) {
        self.groups.clear();
    }
}

impl Default for GroupCache {
    fn default() -> Self {
        GroupCache::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: &str = "ann@example.com";

    fn access(body: &str) -> Access {
        Access::parse(
            PathName::from("ann@example.com/Friends/Access"),
            body.as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn owner_holds_all_rights() {
        let a = access("");
        let cache = GroupCache::default();
        for right in ALL_RIGHTS {
            assert_eq!(
                a.can(&OWNER.into(), right, &cache).unwrap(),
                CanResult::Granted
            );
        }
    }

    #[test]
    fn rights_parse_forms() {
        let a = access("r,l: bob@example.com\nWrite, Create: carol@x.org # note\n");
        let cache = GroupCache::default();
        let bob = UserName::from("bob@example.com");
        let carol = UserName::from("carol@x.org");
        assert_eq!(a.can(&bob, Right::Read, &cache).unwrap(), CanResult::Granted);
        assert_eq!(a.can(&bob, Right::Write, &cache).unwrap(), CanResult::Denied);
        assert_eq!(
            a.can(&carol, Right::Create, &cache).unwrap(),
            CanResult::Granted
        );
        assert_eq!(a.can(&carol, Right::Read, &cache).unwrap(), CanResult::Denied);
    }

    #[test]
    fn read_all_implies_list_all() {
        let a = access("read: all\n");
        let cache = GroupCache::default();
        let stranger = UserName::from("zed@other.org");
        assert!(a.has_all_users(Right::Read));
        assert_eq!(
            a.can(&stranger, Right::List, &cache).unwrap(),
            CanResult::Granted
        );
        assert_eq!(
            a.can(&stranger, Right::Delete, &cache).unwrap(),
            CanResult::Denied
        );
    }

    #[test]
    fn wildcard_read_and_list_only() {
        let a = access("r,w,l: *@example.com\n");
        let cache = GroupCache::default();
        let bob = UserName::from("bob@example.com");
        assert_eq!(a.can(&bob, Right::Read, &cache).unwrap(), CanResult::Granted);
        assert_eq!(a.can(&bob, Right::List, &cache).unwrap(), CanResult::Granted);
        assert_eq!(a.can(&bob, Right::Write, &cache).unwrap(), CanResult::Denied);
    }

    #[test]
    fn group_reference_round_trip() {
        let a = access("r: friends\n");
        let cache = GroupCache::default();
        let kelly = UserName::from("kelly@example.com");
        let group_path = PathName::from("ann@example.com/Group/friends");

        match a.can(&kelly, Right::Read, &cache).unwrap() {
            CanResult::NeedGroups(paths) => assert_eq!(paths, vec![group_path.clone()]),
            other => panic!("expected NeedGroups, got {other:?}"),
        }

        cache.add(&group_path, b"bob@example.com\n").unwrap();
        assert_eq!(a.can(&kelly, Right::Read, &cache).unwrap(), CanResult::Denied);

        cache
            .add(&group_path, b"bob@example.com kelly@example.com\n")
            .unwrap();
        assert_eq!(
            a.can(&kelly, Right::Read, &cache).unwrap(),
            CanResult::Granted
        );
    }

    #[test]
    fn nested_groups_terminate() {
        let a = access("r: team\n");
        let cache = GroupCache::default();
        let team = PathName::from("ann@example.com/Group/team");
        let inner = PathName::from("ann@example.com/Group/inner");
        // Mutually recursive groups must not loop.
        cache.add(&team, b"inner\n").unwrap();
        cache.add(&inner, b"team bob@example.com\n").unwrap();
        let bob = UserName::from("bob@example.com");
        assert_eq!(a.can(&bob, Right::Read, &cache).unwrap(), CanResult::Granted);
        let zed = UserName::from("zed@example.com");
        assert_eq!(a.can(&zed, Right::Read, &cache).unwrap(), CanResult::Denied);
    }

    #[test]
    fn users_expansion() {
        let a = access("r: friends, *@corp.com, all\n");
        let cache = GroupCache::default();
        let group_path = PathName::from("ann@example.com/Group/friends");
        cache.add(&group_path, b"kelly@example.com").unwrap();
        match a.users(Right::Read, &cache).unwrap() {
            UsersResult::Users {
                users,
                has_all,
                wildcard_domains,
            } => {
                assert_eq!(users[0].as_str(), OWNER);
                assert!(users.contains(&"kelly@example.com".into()));
                assert!(has_all);
                assert_eq!(wildcard_domains, vec!["corp.com".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_rules() {
        for body in ["read bob@example.com\n", "banana: bob@example.com\n"] {
            assert!(
                Access::parse(
                    PathName::from("ann@example.com/Access"),
                    body.as_bytes()
                )
                .is_err(),
                "expected failure for {body:?}"
            );
        }
    }

    #[test]
    fn file_kind_predicates() {
        assert!(is_access_file(&"ann@example.com/a/Access".into()));
        assert!(!is_access_file(&"ann@example.com/a/access".into()));
        assert!(is_group_file(&"ann@example.com/Group/friends".into()));
        assert!(!is_group_file(&"ann@example.com/Other/friends".into()));
    }
}
