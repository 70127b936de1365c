//! The `plain` packing: cleartext blocks, no signatures.
//!
//! Suitable for content whose integrity is guaranteed elsewhere, and for
//! the `TakeSnapshot` trigger entries the directory requires to be plain.

use bytes::Bytes;

use upspin_core::Result;
use upspin_core::entry::{DirBlock, DirEntry, Packing};
use upspin_factotum::{Factotum, PublicKey};

use crate::{BlockPacker, BlockUnpacker, Packer};

pub struct PlainPack;

struct PlainBlocks;

impl BlockPacker for PlainBlocks {
    fn pack(&mut self, cleartext: &[u8]) -> Result<(Bytes, Vec<u8>)> {
        Ok((Bytes::copy_from_slice(cleartext), Vec::new()))
    }

    fn close(self: Box<Self>, entry: &mut DirEntry) -> Result<()> {
        entry.packdata.clear();
        Ok(())
    }
}

impl BlockUnpacker for PlainBlocks {
    fn unpack(&mut self, ciphertext: &[u8], _block: &DirBlock) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(ciphertext))
    }
}

impl Packer for PlainPack {
    fn packing(&self) -> Packing {
        Packing::Plain
    }

    fn pack(&self, _factotum: &Factotum, _entry: &DirEntry) -> Result<Box<dyn BlockPacker>> {
        Ok(Box::new(PlainBlocks))
    }

    fn unpack(
        &self,
        _factotum: &Factotum,
        _writer_key: &PublicKey,
        _entry: &DirEntry,
    ) -> Result<Box<dyn BlockUnpacker>> {
        Ok(Box::new(PlainBlocks))
    }

    fn reader_hashes(&self, _packdata: &[u8]) -> Result<Vec<[u8; 32]>> {
        Ok(Vec::new())
    }

    fn share(
        &self,
        _factotum: &Factotum,
        _readers: &[PublicKey],
        _packdatas: &mut [Option<Vec<u8>>],
    ) {
        // No keys to rewrap.
    }

    fn countersign(
        &self,
        _old_key: &PublicKey,
        _factotum: &Factotum,
        _entry: &mut DirEntry,
    ) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn round_trip() {
        let f = testutil::factotum(1);
        let mut entry = testutil::entry("ann@example.com/plain", Packing::Plain);
        let stored = testutil::pack_blocks(&f, &mut entry, &[b"hello ", b"world"]);
        assert_eq!(stored[0].as_ref(), b"hello ");
        let got = testutil::unpack_blocks(&f, f.public_key(), &entry, &stored).unwrap();
        assert_eq!(got, b"hello world");
        assert!(entry.packdata.is_empty());
    }
}
