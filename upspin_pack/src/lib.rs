//! Block packing.
//!
//! A packer turns cleartext blocks into stored blocks and back, and owns
//! the per-entry metadata (`DirEntry.packdata`) that makes the entry
//! verifiable. Three packings exist:
//!
//! - `plain`: cleartext, no signature;
//! - `eeintegrity`: cleartext blocks signed by the writer;
//! - `ee`: blocks encrypted under a random data key, wrapped once per
//!   authorized reader.
//!
//! The set is closed, so the registry is a total function over
//! [`Packing`]; it is filled at compile time and read-only ever after.
//! Packing and unpacking are CPU-bound and never block: anything needing
//! the network (fetching the writer's public key, reading blocks) happens
//! in the caller before these run.

pub mod ee;
pub mod eeintegrity;
pub mod plain;

mod wire;

use bytes::Bytes;

use upspin_core::entry::{DirBlock, DirEntry, Packing};
use upspin_core::{Error, Kind, Result};
use upspin_factotum::{Factotum, PublicKey};

/// Accepts cleartext blocks in order and finalises the entry's packdata.
pub trait BlockPacker: Send {
    /// Packs one cleartext block, returning the bytes to store and the
    /// block's packdata.
    fn pack(&mut self, cleartext: &[u8]) -> Result<(Bytes, Vec<u8>)>;

    /// Finalises the entry: computes the cipher sum over `entry.blocks`,
    /// signs, and writes `entry.packdata`. The entry's blocks must already
    /// be in place. Every exit path of a create must call this or abandon
    /// the entry; an unclosed entry carries no valid signature.
    fn close(self: Box<Self>, entry: &mut DirEntry) -> Result<()>;
}

/// Verifies and unpacks stored blocks in any order.
pub trait BlockUnpacker: Send {
    /// Verifies one block against its packdata and yields the cleartext.
    fn unpack(&mut self, ciphertext: &[u8], block: &DirBlock) -> Result<Bytes>;
}

/// One packing implementation. Stateless; all per-file state lives in the
/// block packer/unpacker handles.
pub trait Packer: Send + Sync {
    fn packing(&self) -> Packing;

    /// Starts packing a new entry written by the factotum's owner.
    fn pack(&self, factotum: &Factotum, entry: &DirEntry) -> Result<Box<dyn BlockPacker>>;

    /// Starts unpacking `entry`. `writer_key` is the public key of
    /// `entry.writer`, fetched by the caller; signature verification
    /// happens here, before any block is accepted.
    fn unpack(
        &self,
        factotum: &Factotum,
        writer_key: &PublicKey,
        entry: &DirEntry,
    ) -> Result<Box<dyn BlockUnpacker>>;

    /// The public-key hashes holding wrapped keys in `packdata`.
    /// Empty for packings without confidentiality.
    fn reader_hashes(&self, packdata: &[u8]) -> Result<Vec<[u8; 32]>>;

    /// Rewraps each packdata's data key for exactly `readers`.
    ///
    /// A slot the factotum cannot unwrap (the writer rotated keys without
    /// countersigning) is set to `None` to signal "cannot repack".
    fn share(&self, factotum: &Factotum, readers: &[PublicKey], packdatas: &mut [Option<Vec<u8>>]);

    /// Adds a signature under the factotum's current key without
    /// disturbing wrapped keys or ciphertext. `old_key` must verify the
    /// existing signature. Idempotent.
    fn countersign(
        &self,
        old_key: &PublicKey,
        factotum: &Factotum,
        entry: &mut DirEntry,
    ) -> Result<()>;
}

/// Looks up the packer for a packing. Total: every packing has one.
pub fn lookup(packing: Packing) -> &'static dyn Packer {
    static PLAIN: plain::PlainPack = plain::PlainPack;
    static EEINTEGRITY: eeintegrity::IntegrityPack = eeintegrity::IntegrityPack;
    static EE: ee::EePack = ee::EePack;
    match packing {
        Packing::Plain => &PLAIN,
        Packing::EeIntegrity => &EEINTEGRITY,
        Packing::Ee => &EE,
    }
}

/// The digest over an entry's block metadata that the entry signature
/// covers: offsets, sizes, and per-block content hashes.
pub(crate) fn cipher_sum(blocks: &[DirBlock], block_hash: impl Fn(&DirBlock) -> Result<[u8; 32]>) -> Result<[u8; 32]> {
    let mut hasher = blake3::Hasher::new_derive_key("upspin cipherSum");
    for block in blocks {
        hasher.update(&block.offset.to_be_bytes());
        hasher.update(&block.size.to_be_bytes());
        hasher.update(&block_hash(block)?);
    }
    Ok(hasher.finalize().into())
}

pub(crate) fn verify_error(entry: &DirEntry) -> Error {
    Error::new(Kind::Invalid)
        .path(entry.name.clone())
        .msg("entry signature does not verify")
}

#[cfg(test)]
pub(crate) mod testutil {
    use upspin_core::entry::{DirEntry, Packing};
    use upspin_core::{Endpoint, Location, Reference};
    use upspin_factotum::{Curve, Factotum, keygen};

    pub fn factotum(seed: u8) -> Factotum {
        let g = keygen::from_seed(Curve::P256, &[seed; 16]).unwrap();
        Factotum::from_keys(g.pair.public().text(), &g.pair.secret_decimal()).unwrap()
    }

    pub fn entry(name: &str, packing: Packing) -> DirEntry {
        let writer = name.split('/').next().unwrap();
        let mut e = DirEntry::new(name.into(), packing, writer.into());
        e.sequence = 7;
        e.time = 1_700_000_000;
        e
    }

    /// Packs `chunks` through the packer, filling the entry's blocks the
    /// way the client orchestrator does, and closes it.
    pub fn pack_blocks(
        factotum: &Factotum,
        entry: &mut DirEntry,
        chunks: &[&[u8]],
    ) -> Vec<bytes::Bytes> {
        let packer = super::lookup(entry.packing);
        let mut bp = packer.pack(factotum, entry).unwrap();
        let mut stored = Vec::new();
        let mut offset = 0u64;
        for chunk in chunks {
            let (ciphertext, packdata) = bp.pack(chunk).unwrap();
            entry.blocks.push(upspin_core::entry::DirBlock {
                location: Location {
                    endpoint: Endpoint::inprocess("test"),
                    reference: Reference::from(format!("ref{offset}")),
                },
                offset,
                size: chunk.len() as u64,
                packdata,
            });
            offset += chunk.len() as u64;
            stored.push(ciphertext);
        }
        bp.close(entry).unwrap();
        stored
    }

    /// Unpacks every stored block and concatenates the cleartext.
    pub fn unpack_blocks(
        factotum: &Factotum,
        writer_key: &upspin_factotum::PublicKey,
        entry: &DirEntry,
        stored: &[bytes::Bytes],
    ) -> upspin_core::Result<Vec<u8>> {
        let packer = super::lookup(entry.packing);
        let mut bu = packer.unpack(factotum, writer_key, entry)?;
        let mut out = Vec::new();
        for (block, ciphertext) in entry.blocks.iter().zip(stored) {
            out.extend_from_slice(&bu.unpack(ciphertext, block)?);
        }
        Ok(out)
    }
}
