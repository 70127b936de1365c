//! The Factotum holds a user's private key material and performs every
//! operation that touches it: signing, verification, and the ECDH half of
//! per-reader key wrapping. Nothing outside this crate sees a private
//! scalar.
//!
//! A Factotum optionally carries the *previous* keypair (read from the
//! rotation archive), exposed through [`Factotum::pop`]. During rotation
//! the old key authenticates the new one to the key server, and the share
//! engine uses [`Factotum::public_key_from_hash`] to recognise the user's
//! own superseded keys inside wrapped-key sets.

pub mod keyfile;
pub mod keygen;
pub mod keypair;
pub mod proquint;

use std::path::Path;
use std::sync::Arc;

use upspin_core::entry::{Attribute, Packing, Time};
use upspin_core::{Error, PathName, Result, Signature};

pub use keypair::{Curve, KeyPair, PublicKey, ephemeral_ecdh};

struct Inner {
    current: KeyPair,
    previous: Option<KeyPair>,
    /// Public halves of every archived pair, oldest first.
    archived: Vec<PublicKey>,
}

/// The key holder. Cheap to clone; read-only after construction and shared
/// across worker tasks.
#[derive(Clone)]
pub struct Factotum {
    inner: Arc<Inner>,
}

impl Factotum {
    /// Loads keys from a secrets directory, including the rotation archive.
    pub fn from_dir(dir: &Path) -> Result<Factotum> {
        keyfile::check_dir_mode(dir)?;
        let public_text = keyfile::read_public(dir)?;
        let (secret, _) = keyfile::read_secret(dir)?;
        let public = PublicKey::parse(&public_text)?;
        let current = KeyPair::from_secret(public.curve(), &secret)?;
        if current.public().text() != public.text() {
            return Err(Error::invalid("public key does not match secret key").op("Factotum"));
        }

        let archive = keyfile::read_archive(dir)?;
        let mut archived = Vec::with_capacity(archive.len());
        let mut previous = None;
        for entry in &archive {
            let public = PublicKey::parse(&entry.public_text)
                .map_err(|e| e.op("Factotum").msg("bad archived public key"))?;
            archived.push(public.clone());
            previous = Some(KeyPair::from_secret(public.curve(), &entry.secret_decimal)?);
        }
        Ok(Factotum {
            inner: Arc::new(Inner {
                current,
                previous,
                archived,
            }),
        })
    }

    /// Builds a Factotum from key text: the public key file contents and
    /// the private scalar D in decimal.
    pub fn from_keys(public_text: &str, secret_decimal: &str) -> Result<Factotum> {
        let public = PublicKey::parse(public_text)?;
        let pair = KeyPair::from_secret(public.curve(), secret_decimal)?;
        if pair.public().text() != public.text() {
            return Err(Error::invalid("public key does not match secret key").op("Factotum"));
        }
        Ok(Factotum {
            inner: Arc::new(Inner {
                current: pair,
                previous: None,
                archived: Vec::new(),
            }),
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        self.inner.current.public()
    }

    /// Signs `data` with the current key.
    pub fn sign(&self, data: &[u8]) -> Result<Signature> {
        self.inner.current.sign(data)
    }

    /// ECDH between the current private key and an ephemeral public point.
    pub fn ecdh(&self, ephemeral_sec1: &[u8]) -> Result<Vec<u8>> {
        self.inner.current.ecdh(ephemeral_sec1)
    }

    /// A Factotum whose current key is this one's previous key.
    ///
    /// With no previous key, returns a clone of `self`: callers detect the
    /// end of the chain by comparing public keys.
    pub fn pop(&self) -> Factotum {
        match &self.inner.previous {
            Some(prev) => Factotum {
                inner: Arc::new(Inner {
                    current: prev.clone(),
                    previous: None,
                    archived: self.inner.archived.clone(),
                }),
            },
            None => self.clone(),
        }
    }

    /// True if `pop` would yield a different key.
    pub fn has_previous(&self) -> bool {
        self.inner.previous.is_some()
    }

    /// Finds a currently or previously held public key by its hash.
    pub fn public_key_from_hash(&self, hash: &[u8]) -> Option<PublicKey> {
        if self.public_key().key_hash() == hash {
            return Some(self.public_key().clone());
        }
        self.inner
            .archived
            .iter()
            .rev()
            .find(|k| k.key_hash() == hash)
            .cloned()
    }
}

impl std::fmt::Debug for Factotum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Factotum({:?}, previous: {})",
            self.public_key(),
            self.inner.previous.is_some()
        )
    }
}

fn attr_byte(attr: Attribute) -> u8 {
    match attr {
        Attribute::None => 0,
        Attribute::Directory => 1,
        Attribute::Link => 2,
        Attribute::Incomplete => 3,
    }
}

/// The canonical signable digest of a directory entry.
///
/// Fields are length-prefixed so no two entries collide, and the digest is
/// domain-separated from every other BLAKE3 use in the system.
pub fn dir_entry_hash(
    signed_name: &PathName,
    link: Option<&PathName>,
    attr: Attribute,
    packing: Packing,
    time: Time,
    dkey: &[u8],
    cipher_sum: &[u8],
) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key("upspin dirEntryHash");
    let mut field = |bytes: &[u8]| {
        hasher.update(&(bytes.len() as u64).to_be_bytes());
        hasher.update(bytes);
    };
    field(signed_name.as_str().as_bytes());
    field(link.map(|l| l.as_str()).unwrap_or("").as_bytes());
    field(&[attr_byte(attr)]);
    field(packing.as_str().as_bytes());
    field(&time.to_be_bytes());
    field(dkey);
    field(cipher_sum);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_factotum() -> Factotum {
        let g = keygen::from_seed(Curve::P256, &[9u8; 16]).unwrap();
        Factotum::from_keys(
            g.pair.public().text(),
            &g.pair.secret_decimal(),
        )
        .unwrap()
    }

    #[test]
    fn sign_and_verify() {
        let f = test_factotum();
        let sig = f.sign(b"payload").unwrap();
        f.public_key().verify(b"payload", &sig).unwrap();
    }

    #[test]
    fn mismatched_keys_rejected() {
        let a = keygen::from_seed(Curve::P256, &[1u8; 16]).unwrap();
        let b = keygen::from_seed(Curve::P256, &[2u8; 16]).unwrap();
        assert!(
            Factotum::from_keys(a.pair.public().text(), &b.pair.secret_decimal()).is_err()
        );
    }

    #[test]
    fn pop_without_previous_is_identity() {
        let f = test_factotum();
        assert!(!f.has_previous());
        assert_eq!(f.pop().public_key(), f.public_key());
    }

    #[test]
    fn rotation_archive_feeds_pop() {
        let dir = tempfile::tempdir().unwrap();
        let first = keygen::generate(Curve::P256, None).unwrap();
        keygen::save(dir.path(), &first, keygen::SaveMode::Fresh).unwrap();
        let second = keygen::generate(Curve::P256, None).unwrap();
        keygen::save(dir.path(), &second, keygen::SaveMode::Rotate).unwrap();

        let f = Factotum::from_dir(dir.path()).unwrap();
        assert_eq!(f.public_key().text(), second.pair.public().text());
        assert!(f.has_previous());
        let old = f.pop();
        assert_eq!(old.public_key().text(), first.pair.public().text());

        let hash = first.pair.public().key_hash();
        let found = f.public_key_from_hash(&hash).unwrap();
        assert_eq!(found.text(), first.pair.public().text());
    }

    #[test]
    fn entry_hash_sensitivity() {
        let name = PathName::from("ann@example.com/f");
        let base = dir_entry_hash(
            &name,
            None,
            Attribute::None,
            Packing::Ee,
            42,
            b"dkey",
            b"sum",
        );
        let differing = [
            dir_entry_hash(&name, None, Attribute::None, Packing::Ee, 43, b"dkey", b"sum"),
            dir_entry_hash(&name, None, Attribute::None, Packing::Plain, 42, b"dkey", b"sum"),
            dir_entry_hash(&name, None, Attribute::Link, Packing::Ee, 42, b"dkey", b"sum"),
            dir_entry_hash(&name, None, Attribute::None, Packing::Ee, 42, b"", b"dkeysum"),
        ];
        for other in differing {
            assert_ne!(base, other);
        }
    }
}
