//! User identities of the form `name[+suffix]@domain`.
//!
//! Parsing accepts the wildcard form `*@domain`, which is only meaningful
//! inside Access and Group files; callers validating an owner reject it via
//! [`ParsedUser::wildcard`].

use std::fmt;

use crate::errors::{Error, Kind, Result};

/// A user name of the form `name[+suffix]@domain`, held in cleaned form.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserName(String);

impl UserName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserName({})", self.0)
    }
}

impl From<&str> for UserName {
    fn from(s: &str) -> Self {
        UserName(s.to_string())
    }
}

impl From<String> for UserName {
    fn from(s: String) -> Self {
        UserName(s)
    }
}

impl AsRef<str> for UserName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The suffix that marks a user's snapshot tree.
pub const SNAPSHOT_SUFFIX: &str = "snapshot";

/// The components of a parsed user name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedUser {
    pub name: String,
    pub suffix: String,
    pub domain: String,
}

impl ParsedUser {
    /// True for the wildcard form `*@domain`.
    pub fn wildcard(&self) -> bool {
        self.name == "*"
    }

    pub fn is_snapshot(&self) -> bool {
        self.suffix == SNAPSHOT_SUFFIX
    }

    /// Reassembles the cleaned user name.
    pub fn user_name(&self) -> UserName {
        let mut s = String::with_capacity(
            self.name.len() + self.suffix.len() + self.domain.len() + 2,
        );
        s.push_str(&self.name);
        if !self.suffix.is_empty() {
            s.push('+');
            s.push_str(&self.suffix);
        }
        s.push('@');
        s.push_str(&self.domain);
        UserName(s)
    }

    /// The base user, with any suffix removed.
    pub fn base(&self) -> UserName {
        UserName(format!("{}@{}", self.name, self.domain))
    }

    /// The same user with the given suffix.
    pub fn with_suffix(&self, suffix: &str) -> UserName {
        UserName(format!("{}+{}@{}", self.name, suffix, self.domain))
    }
}

// Characters allowed in the name and suffix atoms, RFC 5322 style minus
// the path separator.
fn atom_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*=?^_`{|}~.-".contains(c)
}

fn parse_domain(domain: &str) -> Result<String> {
    if domain.is_empty() || domain.len() > 254 {
        return Err(Error::invalid("bad domain length"));
    }
    let mut labels = 0;
    for label in domain.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(Error::invalid("bad domain label"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(Error::invalid("domain label begins or ends with hyphen"));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(Error::invalid("bad character in domain"));
        }
        labels += 1;
    }
    if labels < 2 {
        return Err(Error::invalid("domain must contain a period"));
    }
    Ok(domain.to_ascii_lowercase())
}

/// Parses a user name into its components.
///
/// The domain is lowercased; name and suffix are preserved as written.
/// Wildcards are accepted here and rejected by owner-context callers.
pub fn parse(user: impl AsRef<str>) -> Result<ParsedUser> {
    let user = user.as_ref();
    let err = |msg: &str| Error::new(Kind::Invalid).path(user).msg(msg);

    let at = user.find('@').ok_or_else(|| err("user name must contain @"))?;
    if user[at + 1..].contains('@') {
        return Err(err("user name must contain exactly one @"));
    }
    let (local, domain) = (&user[..at], &user[at + 1..]);
    if local.is_empty() {
        return Err(err("missing user name before @"));
    }

    let (name, suffix) = match local.find('+') {
        Some(plus) => {
            let (n, s) = (&local[..plus], &local[plus + 1..]);
            if s.is_empty() || s.contains('+') {
                return Err(err("bad user name suffix"));
            }
            (n, s)
        }
        None => (local, ""),
    };
    if name.is_empty() {
        return Err(err("missing user name before suffix"));
    }
    let is_wildcard = name == "*" && suffix.is_empty();
    if !is_wildcard {
        if !name.chars().all(atom_char) || !suffix.chars().all(atom_char) {
            return Err(err("bad character in user name"));
        }
    }

    let domain = parse_domain(domain).map_err(|e| e.path(user))?;

    Ok(ParsedUser {
        name: name.to_string(),
        suffix: suffix.to_string(),
        domain,
    })
}

/// Validates and normalises a user name for use as an owner.
///
/// Rejects the wildcard form; lowercases the domain.
pub fn clean(user: impl AsRef<str>) -> Result<UserName> {
    let parsed = parse(user.as_ref())?;
    if parsed.wildcard() {
        return Err(Error::new(Kind::Invalid)
            .path(user.as_ref())
            .msg("wildcard user cannot own a path"));
    }
    Ok(parsed.user_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple() {
        let p = parse("ann@example.com").unwrap();
        assert_eq!(p.name, "ann");
        assert_eq!(p.suffix, "");
        assert_eq!(p.domain, "example.com");
        assert!(!p.wildcard());
    }

    #[test]
    fn parse_suffixed() {
        let p = parse("ann+snapshot@Example.COM").unwrap();
        assert_eq!(p.suffix, "snapshot");
        assert!(p.is_snapshot());
        assert_eq!(p.user_name().as_str(), "ann+snapshot@example.com");
        assert_eq!(p.base().as_str(), "ann@example.com");
    }

    #[test]
    fn parse_wildcard() {
        let p = parse("*@example.com").unwrap();
        assert!(p.wildcard());
        assert!(clean("*@example.com").is_err());
    }

    #[test]
    fn bad_users() {
        for bad in [
            "",
            "ann",
            "@example.com",
            "ann@",
            "ann@@example.com",
            "ann@com",
            "ann+@example.com",
            "ann+a+b@example.com",
            "a n@example.com",
            "a/b@example.com",
            "ann@-example.com",
            "ann@exa mple.com",
        ] {
            assert!(parse(bad).is_err(), "expected parse failure for {bad:?}");
        }
    }

    #[test]
    fn clean_is_idempotent() {
        let once = clean("Ann@Example.Com").err();
        // Name case is preserved, only the domain is folded.
        let u = clean("Ann@Example.Com").unwrap();
        assert!(once.is_none());
        assert_eq!(u.as_str(), "Ann@example.com");
        assert_eq!(clean(u.as_str()).unwrap(), u);
    }
}
