//! Directory entries: the signed records that name, attribute, and locate
//! files, directories, and links.

use std::fmt;

use crate::endpoint::Endpoint;
use crate::errors::{Error, Kind, Result};
use crate::path::PathName;
use crate::user::UserName;

/// An opaque content-addressed identifier for one block within one store.
/// Equality is textual; clients never parse it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference(String);

impl Reference {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({})", self.0)
    }
}

impl From<&str> for Reference {
    fn from(s: &str) -> Self {
        Reference(s.to_string())
    }
}

impl From<String> for Reference {
    fn from(s: String) -> Self {
        Reference(s)
    }
}

/// One copy of one block: which store, and which reference within it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub endpoint: Endpoint,
    pub reference: Reference,
}

/// One contiguous range of a file's bytes.
///
/// `offset` and `size` describe the cleartext; `packdata` is packer-private
/// per-block metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirBlock {
    pub location: Location,
    pub offset: u64,
    pub size: u64,
    pub packdata: Vec<u8>,
}

/// What kind of item a [`DirEntry`] names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attribute {
    /// A regular file.
    None,
    /// A directory; `blocks` is empty.
    Directory,
    /// A link; `blocks` is empty and `link` holds the target.
    Link,
    /// Metadata withheld or not yet filled in; blocks are absent.
    Incomplete,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Attribute::None => "file",
            Attribute::Directory => "directory",
            Attribute::Link => "link",
            Attribute::Incomplete => "incomplete",
        };
        f.write_str(s)
    }
}

/// The codec used for an entry's blocks. All blocks of one entry share it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Packing {
    /// Cleartext blocks, no signature.
    Plain,
    /// Cleartext blocks, signed; integrity without confidentiality.
    EeIntegrity,
    /// End-to-end encrypted blocks with per-reader wrapped keys.
    Ee,
}

impl Packing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Packing::Plain => "plain",
            Packing::EeIntegrity => "eeintegrity",
            Packing::Ee => "ee",
        }
    }

    /// True if block bodies are encrypted.
    pub fn is_confidential(&self) -> bool {
        matches!(self, Packing::Ee)
    }
}

impl fmt::Display for Packing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Packing {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plain" => Ok(Packing::Plain),
            "eeintegrity" => Ok(Packing::EeIntegrity),
            "ee" => Ok(Packing::Ee),
            other => Err(Error::invalid(format!("unknown packing {other:?}"))),
        }
    }
}

/// Seconds since the Unix epoch.
pub type Time = i64;

/// The current time, truncated to seconds.
pub fn now() -> Time {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => d.as_secs() as Time,
        Err(_) => 0,
    }
}

/// Writer-requested sequence: the put succeeds regardless of the entry's
/// current sequence.
pub const SEQ_IGNORE: i64 = 0;
/// Require that the entry not exist: the put is a create.
pub const SEQ_NOT_EXIST: i64 = -1;
/// The first sequence number assigned to a new entry.
pub const SEQ_BASE: i64 = 1;

/// An ECDSA signature, as the R and S big-endian integers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub r: Vec<u8>,
    pub s: Vec<u8>,
}

/// The signed record describing one name in the namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// The full path, after any link evaluation.
    pub name: PathName,
    /// The path covered by the writer's signature, before link evaluation.
    pub signed_name: PathName,
    pub packing: Packing,
    /// The user that signed this entry.
    pub writer: UserName,
    /// Monotonic per path, except `SEQ_IGNORE` and `SEQ_NOT_EXIST` on put.
    pub sequence: i64,
    pub time: Time,
    pub attr: Attribute,
    /// Target path for `Attribute::Link` entries.
    pub link: Option<PathName>,
    pub blocks: Vec<DirBlock>,
    /// Packer-private per-entry metadata (signatures, wrapped keys).
    pub packdata: Vec<u8>,
}

impl DirEntry {
    pub fn new(name: PathName, packing: Packing, writer: UserName) -> Self {
        DirEntry {
            signed_name: name.clone(),
            name,
            packing,
            writer,
            sequence: SEQ_IGNORE,
            time: now(),
            attr: Attribute::None,
            link: None,
            blocks: Vec::new(),
            packdata: Vec::new(),
        }
    }

    pub fn new_directory(name: PathName, writer: UserName) -> Self {
        let mut e = DirEntry::new(name, Packing::Plain, writer);
        e.attr = Attribute::Directory;
        e
    }

    pub fn new_link(name: PathName, target: PathName, writer: UserName) -> Self {
        let mut e = DirEntry::new(name, Packing::Plain, writer);
        e.attr = Attribute::Link;
        e.link = Some(target);
        e
    }

    pub fn is_dir(&self) -> bool {
        self.attr == Attribute::Directory
    }

    pub fn is_link(&self) -> bool {
        self.attr == Attribute::Link
    }

    pub fn is_incomplete(&self) -> bool {
        self.attr == Attribute::Incomplete
    }

    pub fn is_regular(&self) -> bool {
        self.attr == Attribute::None
    }

    /// The file size: the sum of the block sizes.
    ///
    /// Directories have size zero. Fails with `Invalid` if the block
    /// offsets are not contiguous from zero.
    pub fn size(&self) -> Result<u64> {
        let mut offset = 0u64;
        for block in &self.blocks {
            if block.offset != offset {
                return Err(Error::new(Kind::Invalid)
                    .path(self.name.clone())
                    .msg("blocks are not contiguous"));
            }
            offset += block.size;
        }
        Ok(offset)
    }

    /// Strips blocks and packdata, marking the entry `Incomplete`.
    /// Used by servers answering a user with list but not read rights.
    pub fn mark_incomplete(&mut self) {
        self.attr = Attribute::Incomplete;
        self.blocks.clear();
        self.packdata.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(offset: u64, size: u64) -> DirBlock {
        DirBlock {
            location: Location {
                endpoint: Endpoint::inprocess("test"),
                reference: Reference::from("ref"),
            },
            offset,
            size,
            packdata: Vec::new(),
        }
    }

    #[test]
    fn size_sums_contiguous_blocks() {
        let mut e = DirEntry::new(
            "ann@example.com/f".into(),
            Packing::Plain,
            "ann@example.com".into(),
        );
        e.blocks = vec![block(0, 10), block(10, 5)];
        assert_eq!(e.size().unwrap(), 15);
    }

    #[test]
    fn size_rejects_gaps() {
        let mut e = DirEntry::new(
            "ann@example.com/f".into(),
            Packing::Plain,
            "ann@example.com".into(),
        );
        e.blocks = vec![block(0, 10), block(11, 5)];
        assert!(e.size().is_err());
    }

    #[test]
    fn packing_names_round_trip() {
        for p in [Packing::Plain, Packing::EeIntegrity, Packing::Ee] {
            assert_eq!(p.as_str().parse::<Packing>().unwrap(), p);
        }
        assert!("symm".parse::<Packing>().is_err());
    }
}
