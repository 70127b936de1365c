//! Path names: `user@domain/elem/elem`.
//!
//! [`Parsed`] is the canonical, cleaned form of a path: no empty elements,
//! no `.` or `..`, case preserved. The string form of a user root carries a
//! trailing slash (`ann@example.com/`); all other paths do not.

use std::fmt;

use crate::errors::{Error, Kind, Result};
use crate::user::{self, UserName};

/// Maximum number of link hops a resolver will follow before giving up
/// with `LinkLoop`.
pub const MAX_LINK_HOPS: usize = 20;

/// An Upspin path name. Not necessarily clean; see [`Parsed`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathName(String);

impl PathName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PathName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PathName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathName({})", self.0)
    }
}

impl From<&str> for PathName {
    fn from(s: &str) -> Self {
        PathName(s.to_string())
    }
}

impl From<String> for PathName {
    fn from(s: String) -> Self {
        PathName(s)
    }
}

impl From<&PathName> for PathName {
    fn from(p: &PathName) -> Self {
        p.clone()
    }
}

impl AsRef<str> for PathName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for PathName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

/// A parsed, cleaned path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parsed {
    user: UserName,
    elems: Vec<String>,
}

impl Parsed {
    /// Parses and cleans `name`.
    ///
    /// The user part must be a valid non-wildcard user. Empty elements and
    /// `.` are dropped; `..` consumes the previous element and is an error
    /// at the root.
    pub fn parse(name: impl AsRef<str>) -> Result<Parsed> {
        let name = name.as_ref();
        let (user_part, rest) = match name.find('/') {
            Some(slash) => (&name[..slash], &name[slash + 1..]),
            None => (name, ""),
        };
        let user = user::clean(user_part).map_err(|e| e.path(name))?;

        let mut elems: Vec<String> = Vec::new();
        for elem in rest.split('/') {
            match elem {
                "" | "." => {}
                ".." => {
                    if elems.pop().is_none() {
                        return Err(Error::new(Kind::Invalid)
                            .path(name)
                            .msg(".. escapes the user root"));
                    }
                }
                _ => elems.push(elem.to_string()),
            }
        }
        Ok(Parsed { user, elems })
    }

    pub fn user(&self) -> &UserName {
        &self.user
    }

    pub fn nelem(&self) -> usize {
        self.elems.len()
    }

    pub fn elem(&self, i: usize) -> &str {
        &self.elems[i]
    }

    pub fn is_root(&self) -> bool {
        self.elems.is_empty()
    }

    /// The path without the user prefix; empty for the root.
    pub fn file_path(&self) -> String {
        self.elems.join("/")
    }

    /// The prefix holding only the first `n` elements.
    pub fn first(&self, n: usize) -> Parsed {
        Parsed {
            user: self.user.clone(),
            elems: self.elems[..n.min(self.elems.len())].to_vec(),
        }
    }

    /// The prefix missing the last `n` elements; clamped at the root.
    pub fn drop(&self, n: usize) -> Parsed {
        let keep = self.elems.len().saturating_sub(n);
        self.first(keep)
    }

    /// The parent directory. At the root, the root itself.
    pub fn dir(&self) -> Parsed {
        self.drop(1)
    }

    /// The last element, or the user root string for the root.
    pub fn base(&self) -> String {
        match self.elems.last() {
            Some(e) => e.clone(),
            None => self.user.as_str().to_string(),
        }
    }

    /// Appends one element, returning the extended path.
    pub fn child(&self, elem: &str) -> Parsed {
        let mut elems = self.elems.clone();
        elems.push(elem.to_string());
        Parsed {
            user: self.user.clone(),
            elems,
        }
    }

    /// True if `self` is `ancestor` or lies beneath it.
    pub fn has_prefix(&self, ancestor: &Parsed) -> bool {
        self.user == ancestor.user
            && self.elems.len() >= ancestor.elems.len()
            && self.elems[..ancestor.elems.len()] == ancestor.elems[..]
    }

    pub fn path(&self) -> PathName {
        PathName(self.to_string())
    }
}

impl fmt::Display for Parsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/", self.user)?;
        let mut sep = "";
        for elem in &self.elems {
            write!(f, "{sep}{elem}")?;
            sep = "/";
        }
        Ok(())
    }
}

/// Cleans a path name lexically, without requiring it to parse as a user
/// path beyond the basic shape. Equivalent to `Parsed::parse(name)?.path()`.
pub fn clean(name: impl AsRef<str>) -> Result<PathName> {
    Ok(Parsed::parse(name)?.path())
}

/// Textually joins path elements onto `base`, cleaning the result.
pub fn join(base: &PathName, elems: &[&str]) -> Result<PathName> {
    let mut s = base.as_str().to_string();
    for elem in elems {
        s.push('/');
        s.push_str(elem);
    }
    clean(&s)
}

/// Reports whether `elem` contains glob metacharacters (`*`, `?`, `[`,
/// or a backslash escape).
pub fn has_meta(elem: &str) -> bool {
    elem.contains(['*', '?', '[', '\\'])
}

/// Reports whether any element of `pattern` contains glob metacharacters.
pub fn pattern_has_meta(pattern: &str) -> bool {
    has_meta(pattern)
}

/// Matches a single path element against a single pattern element using
/// `*`, `?`, and `[...]`.
pub fn match_elem(pattern: &str, elem: &str) -> bool {
    match glob::Pattern::new(pattern) {
        Ok(p) => {
            // Path separators never appear inside one element, so the
            // default options suffice.
            p.matches(elem)
        }
        Err(_) => pattern == elem,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_print() {
        let p = Parsed::parse("ann@example.com/a/b/c").unwrap();
        assert_eq!(p.user().as_str(), "ann@example.com");
        assert_eq!(p.nelem(), 3);
        assert_eq!(p.elem(1), "b");
        assert_eq!(p.to_string(), "ann@example.com/a/b/c");
        assert_eq!(p.file_path(), "a/b/c");
    }

    #[test]
    fn root_forms() {
        for root in ["ann@example.com", "ann@example.com/", "ann@example.com//."] {
            let p = Parsed::parse(root).unwrap();
            assert!(p.is_root());
            assert_eq!(p.to_string(), "ann@example.com/");
        }
    }

    #[test]
    fn cleaning() {
        let cases = [
            ("ann@example.com/a//b", "ann@example.com/a/b"),
            ("ann@example.com/a/./b", "ann@example.com/a/b"),
            ("ann@example.com/a/b/..", "ann@example.com/a"),
            ("ann@example.com/a/../b", "ann@example.com/b"),
            ("ann@example.com/a/b/../..", "ann@example.com/"),
        ];
        for (input, want) in cases {
            assert_eq!(clean(input).unwrap().as_str(), want, "clean({input})");
        }
    }

    #[test]
    fn dotdot_escape_rejected() {
        assert!(Parsed::parse("ann@example.com/..").is_err());
        assert!(Parsed::parse("ann@example.com/a/../..").is_err());
    }

    #[test]
    fn parse_idempotent() {
        for name in [
            "ann@example.com/",
            "ann@example.com/a/b",
            "ann@Example.com//x/./y/../z",
        ] {
            let p = Parsed::parse(name).unwrap();
            let again = Parsed::parse(p.to_string()).unwrap();
            assert_eq!(p, again);
            let c = clean(name).unwrap();
            assert_eq!(clean(c.as_str()).unwrap(), c);
        }
    }

    #[test]
    fn prefix_and_drop() {
        let p = Parsed::parse("ann@example.com/a/b/c").unwrap();
        assert_eq!(p.drop(2).to_string(), "ann@example.com/a");
        assert_eq!(p.first(1).to_string(), "ann@example.com/a");
        assert_eq!(p.drop(9).to_string(), "ann@example.com/");
        assert!(p.has_prefix(&p.dir()));
        assert!(!p.dir().has_prefix(&p));
    }

    #[test]
    fn join_cleans() {
        let base = PathName::from("ann@example.com/a");
        assert_eq!(
            join(&base, &["b", "../c"]).unwrap().as_str(),
            "ann@example.com/a/c"
        );
    }

    #[test]
    fn case_preserved() {
        let p = Parsed::parse("ann@example.com/Photo/IMG.jpg").unwrap();
        assert_eq!(p.to_string(), "ann@example.com/Photo/IMG.jpg");
    }

    #[test]
    fn meta_detection_and_matching() {
        assert!(has_meta("a*b"));
        assert!(has_meta("a[1]b"));
        assert!(!has_meta("plain"));
        assert!(match_elem("a?1?b", "a[1]b"));
        assert!(match_elem("*.jpg", "pic.jpg"));
        assert!(!match_elem("*.jpg", "pic.png"));
    }
}
