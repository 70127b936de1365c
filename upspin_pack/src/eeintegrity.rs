//! The `eeintegrity` packing: cleartext blocks under a writer signature.
//!
//! Integrity without confidentiality, the packing for `read:all` content
//! and for Access and Group files, which servers must be able to read.

use bytes::Bytes;

use upspin_core::entry::{DirBlock, DirEntry, Packing};
use upspin_core::{Error, Kind, Result};
use upspin_factotum::{Factotum, PublicKey, dir_entry_hash};

use crate::wire::{self, IntegrityBlockData, IntegrityEntryData, WireSig};
use crate::{BlockPacker, BlockUnpacker, Packer, cipher_sum, verify_error};

pub struct IntegrityPack;

fn block_sum(block: &DirBlock) -> Result<[u8; 32]> {
    let data: IntegrityBlockData = wire::decode(&block.packdata)?;
    Ok(data.sum)
}

fn entry_hash(entry: &DirEntry, sum: &[u8; 32]) -> [u8; 32] {
    dir_entry_hash(
        &entry.signed_name,
        entry.link.as_ref(),
        entry.attr,
        entry.packing,
        entry.time,
        &[],
        sum,
    )
}

/// Verifies an entry's signature (or countersignature) under `key`.
fn verify_entry(entry: &DirEntry, data: &IntegrityEntryData, key: &PublicKey) -> Result<()> {
    let sum = cipher_sum(&entry.blocks, block_sum)?;
    if sum != data.cipher_sum {
        return Err(verify_error(entry).msg("block digest does not match signed digest"));
    }
    let hash = entry_hash(entry, &sum);
    let sig = upspin_core::Signature::from(&data.sig);
    if key.verify(&hash, &sig).is_ok() {
        return Ok(());
    }
    if let Some(sig2) = &data.sig2 {
        let sig2 = upspin_core::Signature::from(sig2);
        if key.verify(&hash, &sig2).is_ok() {
            return Ok(());
        }
    }
    Err(verify_error(entry))
}

struct IntegrityBlockPacker {
    factotum: Factotum,
}

impl BlockPacker for IntegrityBlockPacker {
    fn pack(&mut self, cleartext: &[u8]) -> Result<(Bytes, Vec<u8>)> {
        let sum: [u8; 32] = blake3::hash(cleartext).into();
        let packdata = wire::to_vec(&IntegrityBlockData { sum })?;
        Ok((Bytes::copy_from_slice(cleartext), packdata))
    }

    fn close(self: Box<Self>, entry: &mut DirEntry) -> Result<()> {
        let sum = cipher_sum(&entry.blocks, block_sum)?;
        let hash = entry_hash(entry, &sum);
        let sig = self.factotum.sign(&hash)?;
        entry.packdata = wire::to_vec(&IntegrityEntryData {
            sig: WireSig::from(&sig),
            sig2: None,
            cipher_sum: sum,
        })?;
        Ok(())
    }
}

struct IntegrityBlockUnpacker;

impl BlockUnpacker for IntegrityBlockUnpacker {
    fn unpack(&mut self, ciphertext: &[u8], block: &DirBlock) -> Result<Bytes> {
        let data: IntegrityBlockData = wire::decode(&block.packdata)?;
        let sum: [u8; 32] = blake3::hash(ciphertext).into();
        if sum != data.sum {
            return Err(Error::new(Kind::Invalid).msg("block does not match its signed hash"));
        }
        Ok(Bytes::copy_from_slice(ciphertext))
    }
}

impl Packer for IntegrityPack {
    fn packing(&self) -> Packing {
        Packing::EeIntegrity
    }

    fn pack(&self, factotum: &Factotum, _entry: &DirEntry) -> Result<Box<dyn BlockPacker>> {
        Ok(Box::new(IntegrityBlockPacker {
            factotum: factotum.clone(),
        }))
    }

    fn unpack(
        &self,
        _factotum: &Factotum,
        writer_key: &PublicKey,
        entry: &DirEntry,
    ) -> Result<Box<dyn BlockUnpacker>> {
        let data: IntegrityEntryData = wire::decode(&entry.packdata)?;
        verify_entry(entry, &data, writer_key)?;
        Ok(Box::new(IntegrityBlockUnpacker))
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
        // Content is cleartext; there are no keys to rewrap.
    }

    fn countersign(
        &self,
        old_key: &PublicKey,
        factotum: &Factotum,
        entry: &mut DirEntry,
    ) -> Result<()> {
        let mut data: IntegrityEntryData = wire::decode(&entry.packdata)?;
        let hash = entry_hash(entry, &data.cipher_sum);
        if let Some(sig2) = &data.sig2 {
            let sig2 = upspin_core::Signature::from(sig2);
            if factotum.public_key().verify(&hash, &sig2).is_ok() {
                return Ok(()); // Already countersigned under this key.
            }
        }
        let sig = upspin_core::Signature::from(&data.sig);
        old_key
            .verify(&hash, &sig)
            .map_err(|_| verify_error(entry).op("Countersign"))?;
        let sig2 = factotum.sign(&hash)?;
        data.sig2 = Some(WireSig::from(&sig2));
        entry.packdata = wire::to_vec(&data)?;
        Ok(())
    }
}
