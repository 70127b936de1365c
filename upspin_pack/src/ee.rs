//! The `ee` packing: end-to-end encryption with per-reader key wrapping.
//!
//! Blocks are sealed with XChaCha20-Poly1305 under a random 32-byte data
//! key. The data key is wrapped once per authorized reader: an ephemeral
//! ECDH agreement against the reader's public key yields a wrapping key,
//! and the wrap record carries the reader's key hash so readers find their
//! slot without trial decryption. The writer always wraps for themselves.

use bytes::Bytes;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{KeyInit, XChaCha20Poly1305};
use rand::RngCore;
use zeroize::Zeroize;

use upspin_core::entry::{DirBlock, DirEntry, Packing};
use upspin_core::{Error, Kind, Result};
use upspin_factotum::{Factotum, PublicKey, dir_entry_hash, ephemeral_ecdh};

use crate::wire::{self, EeBlockData, EeEntryData, WireSig, WrappedKey};
use crate::{BlockPacker, BlockUnpacker, Packer, cipher_sum, verify_error};

pub struct EePack;

const WRAP_CONTEXT: &str = "upspin ee wrap";

fn block_sum(block: &DirBlock) -> Result<[u8; 32]> {
    let data: EeBlockData = wire::decode(&block.packdata)?;
    Ok(data.sum)
}

fn entry_hash(entry: &DirEntry, dkey: &[u8; 32], sum: &[u8; 32]) -> [u8; 32] {
    dir_entry_hash(
        &entry.signed_name,
        entry.link.as_ref(),
        entry.attr,
        entry.packing,
        entry.time,
        dkey,
        sum,
    )
}

fn random_nonce() -> [u8; 24] {
    let mut nonce = [0u8; 24];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Wraps `dkey` for one reader.
fn wrap(reader: &PublicKey, dkey: &[u8; 32]) -> Result<WrappedKey> {
    let (ephemeral, shared) = ephemeral_ecdh(reader)?;
    let mut wrap_key = blake3::derive_key(WRAP_CONTEXT, &shared);
    let cipher = XChaCha20Poly1305::new((&wrap_key).into());
    let nonce = random_nonce();
    let sealed = cipher
        .encrypt((&nonce).into(), dkey.as_slice())
        .map_err(|_| Error::new(Kind::Internal).msg("key wrap failed"))?;
    wrap_key.zeroize();
    Ok(WrappedKey {
        key_hash: reader.key_hash(),
        ephemeral,
        nonce,
        sealed,
    })
}

/// Unwraps one slot with the private half held by `factotum`.
fn unwrap(factotum: &Factotum, wrapped: &WrappedKey) -> Result<[u8; 32]> {
    let shared = factotum.ecdh(&wrapped.ephemeral)?;
    let mut wrap_key = blake3::derive_key(WRAP_CONTEXT, &shared);
    let cipher = XChaCha20Poly1305::new((&wrap_key).into());
    let opened = cipher
        .decrypt((&wrapped.nonce).into(), wrapped.sealed.as_slice())
        .map_err(|_| Error::new(Kind::CannotDecrypt).msg("cannot unwrap data key"));
    wrap_key.zeroize();
    let opened = opened?;
    let dkey: [u8; 32] = opened
        .as_slice()
        .try_into()
        .map_err(|_| Error::new(Kind::CannotDecrypt).msg("unwrapped key has wrong size"))?;
    Ok(dkey)
}

/// Finds the wrap slot this factotum can open: the one matching its
/// current key, or its previous key after a rotation.
fn unwrap_for_self(factotum: &Factotum, wraps: &[WrappedKey]) -> Result<[u8; 32]> {
    let mut hashes = vec![(factotum.clone(), factotum.public_key().key_hash())];
    let popped = factotum.pop();
    if popped.public_key() != factotum.public_key() {
        let hash = popped.public_key().key_hash();
        hashes.push((popped, hash));
    }
    for (holder, hash) in &hashes {
        if let Some(wrapped) = wraps.iter().find(|w| w.key_hash == *hash) {
            return unwrap(holder, wrapped);
        }
    }
    Err(Error::new(Kind::CannotDecrypt).msg("no wrapped key for user"))
}

fn verify_entry(
    entry: &DirEntry,
    data: &EeEntryData,
    dkey: &[u8; 32],
    key: &PublicKey,
) -> Result<()> {
    let sum = cipher_sum(&entry.blocks, block_sum)?;
    if sum != data.cipher_sum {
        return Err(verify_error(entry).msg("block digest does not match signed digest"));
    }
    let hash = entry_hash(entry, dkey, &sum);
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

struct EeBlockPacker {
    factotum: Factotum,
    cipher: XChaCha20Poly1305,
    dkey: [u8; 32],
}

impl Drop for EeBlockPacker {
    fn drop(&mut self) {
        self.dkey.zeroize();
    }
}

impl BlockPacker for EeBlockPacker {
    fn pack(&mut self, cleartext: &[u8]) -> Result<(Bytes, Vec<u8>)> {
        let nonce = random_nonce();
        let ciphertext = self
            .cipher
            .encrypt((&nonce).into(), cleartext)
            .map_err(|_| Error::new(Kind::Internal).msg("block encryption failed"))?;
        let sum: [u8; 32] = blake3::hash(&ciphertext).into();
        let packdata = wire::to_vec(&EeBlockData { nonce, sum })?;
        Ok((ciphertext.into(), packdata))
    }

    fn close(self: Box<Self>, entry: &mut DirEntry) -> Result<()> {
        let sum = cipher_sum(&entry.blocks, block_sum)?;
        let hash = entry_hash(entry, &self.dkey, &sum);
        let sig = self.factotum.sign(&hash)?;
        // The writer's own slot: without it the entry is unreadable by
        // its creator, which the data model forbids.
        let own = wrap(self.factotum.public_key(), &self.dkey)?;
        entry.packdata = wire::to_vec(&EeEntryData {
            sig: WireSig::from(&sig),
            sig2: None,
            wraps: vec![own],
            cipher_sum: sum,
        })?;
        Ok(())
    }
}

struct EeBlockUnpacker {
    cipher: XChaCha20Poly1305,
}

impl BlockUnpacker for EeBlockUnpacker {
    fn unpack(&mut self, ciphertext: &[u8], block: &DirBlock) -> Result<Bytes> {
        let data: EeBlockData = wire::decode(&block.packdata)?;
        let sum: [u8; 32] = blake3::hash(ciphertext).into();
        if sum != data.sum {
            return Err(Error::new(Kind::Invalid).msg("block does not match its signed hash"));
        }
        let cleartext = self
            .cipher
            .decrypt((&data.nonce).into(), ciphertext)
            .map_err(|_| Error::new(Kind::CannotDecrypt).msg("block decryption failed"))?;
        Ok(cleartext.into())
    }
}

impl Packer for EePack {
    fn packing(&self) -> Packing {
        Packing::Ee
    }

    fn pack(&self, factotum: &Factotum, _entry: &DirEntry) -> Result<Box<dyn BlockPacker>> {
        let mut dkey = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut dkey);
        let cipher = XChaCha20Poly1305::new((&dkey).into());
        Ok(Box::new(EeBlockPacker {
            factotum: factotum.clone(),
            cipher,
            dkey,
        }))
    }

    fn unpack(
        &self,
        factotum: &Factotum,
        writer_key: &PublicKey,
        entry: &DirEntry,
    ) -> Result<Box<dyn BlockUnpacker>> {
        let data: EeEntryData = wire::decode(&entry.packdata)?;
        let mut dkey = unwrap_for_self(factotum, &data.wraps)
            .map_err(|e| e.path(entry.name.clone()))?;
        let verified = verify_entry(entry, &data, &dkey, writer_key);
        let cipher = XChaCha20Poly1305::new((&dkey).into());
        dkey.zeroize();
        verified?;
        Ok(Box::new(EeBlockUnpacker { cipher }))
    }

    fn reader_hashes(&self, packdata: &[u8]) -> Result<Vec<[u8; 32]>> {
        let data: EeEntryData = wire::decode(packdata)?;
        Ok(data.wraps.iter().map(|w| w.key_hash).collect())
    }

    fn share(&self, factotum: &Factotum, readers: &[PublicKey], packdatas: &mut [Option<Vec<u8>>]) {
        for slot in packdatas.iter_mut() {
            let Some(packdata) = slot.take() else {
                continue;
            };
            *slot = rewrap(factotum, readers, &packdata);
        }
    }

    fn countersign(
        &self,
        old_key: &PublicKey,
        factotum: &Factotum,
        entry: &mut DirEntry,
    ) -> Result<()> {
        let mut data: EeEntryData = wire::decode(&entry.packdata)?;
        let mut dkey =
            unwrap_for_self(factotum, &data.wraps).map_err(|e| e.path(entry.name.clone()))?;
        let hash = entry_hash(entry, &dkey, &data.cipher_sum);
        dkey.zeroize();
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

/// Rewraps one packdata for exactly `readers`. `None` means the factotum
/// holds no key that can open any slot.
fn rewrap(factotum: &Factotum, readers: &[PublicKey], packdata: &[u8]) -> Option<Vec<u8>> {
    let mut data: EeEntryData = wire::decode(packdata).ok()?;
    let mut dkey = unwrap_for_self(factotum, &data.wraps).ok()?;
    let mut wraps: Vec<WrappedKey> = Vec::with_capacity(readers.len());
    for reader in readers {
        let hash = reader.key_hash();
        if wraps.iter().any(|w| w.key_hash == hash) {
            continue; // The slot set is a set; drop duplicates.
        }
        match wrap(reader, &dkey) {
            Ok(w) => wraps.push(w),
            Err(_) => {
                dkey.zeroize();
                return None;
            }
        }
    }
    dkey.zeroize();
    data.wraps = wraps;
    wire::to_vec(&data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn writer_round_trip() {
        let f = testutil::factotum(10);
        let mut entry = testutil::entry("ann@example.com/secret", Packing::Ee);
        let stored = testutil::pack_blocks(&f, &mut entry, &[b"block one ", b"block two"]);
        // Ciphertext differs from cleartext and carries the AEAD tag.
        assert_ne!(stored[0].as_ref(), b"block one ");
        assert_eq!(stored[0].len(), b"block one ".len() + 16);
        let got = testutil::unpack_blocks(&f, f.public_key(), &entry, &stored).unwrap();
        assert_eq!(got, b"block one block two");
        assert_eq!(entry.sequence, 7);
        assert_eq!(entry.time, 1_700_000_000);
    }

    #[test]
    fn unauthorized_reader_has_no_slot() {
        let writer = testutil::factotum(10);
        let reader = testutil::factotum(11);
        let mut entry = testutil::entry("ann@example.com/secret", Packing::Ee);
        let stored = testutil::pack_blocks(&writer, &mut entry, &[b"secret"]);
        let err = testutil::unpack_blocks(&reader, writer.public_key(), &entry, &stored)
            .unwrap_err();
        assert!(err.is(Kind::CannotDecrypt));
        assert!(err.to_string().contains("no wrapped key for user"));
    }

    #[test]
    fn share_grants_and_revokes() {
        let writer = testutil::factotum(10);
        let reader = testutil::factotum(11);
        let mut entry = testutil::entry("ann@example.com/secret", Packing::Ee);
        let stored = testutil::pack_blocks(&writer, &mut entry, &[b"secret"]);

        let packer = EePack;
        let mut slots = vec![Some(entry.packdata.clone())];
        packer.share(
            &writer,
            &[writer.public_key().clone(), reader.public_key().clone()],
            &mut slots,
        );
        entry.packdata = slots[0].take().unwrap();

        let mut hashes = packer.reader_hashes(&entry.packdata).unwrap();
        hashes.sort();
        let mut want = vec![writer.public_key().key_hash(), reader.public_key().key_hash()];
        want.sort();
        assert_eq!(hashes, want);

        let got =
            testutil::unpack_blocks(&reader, writer.public_key(), &entry, &stored).unwrap();
        assert_eq!(got, b"secret");

        // Revocation: rewrap for the writer alone.
        let mut slots = vec![Some(entry.packdata.clone())];
        packer.share(&writer, &[writer.public_key().clone()], &mut slots);
        entry.packdata = slots[0].take().unwrap();
        assert!(
            testutil::unpack_blocks(&reader, writer.public_key(), &entry, &stored).is_err()
        );
    }

    #[test]
    fn share_without_unwrappable_slot_yields_none() {
        let writer = testutil::factotum(10);
        let stranger = testutil::factotum(12);
        let mut entry = testutil::entry("ann@example.com/secret", Packing::Ee);
        testutil::pack_blocks(&writer, &mut entry, &[b"secret"]);

        let packer = EePack;
        let mut slots = vec![Some(entry.packdata.clone())];
        packer.share(&stranger, &[stranger.public_key().clone()], &mut slots);
        assert!(slots[0].is_none());
    }

    #[test]
    fn duplicate_readers_collapse() {
        let writer = testutil::factotum(10);
        let mut entry = testutil::entry("ann@example.com/secret", Packing::Ee);
        testutil::pack_blocks(&writer, &mut entry, &[b"secret"]);
        let packer = EePack;
        let mut slots = vec![Some(entry.packdata.clone())];
        packer.share(
            &writer,
            &[writer.public_key().clone(), writer.public_key().clone()],
            &mut slots,
        );
        let hashes = packer.reader_hashes(slots[0].as_ref().unwrap()).unwrap();
        assert_eq!(hashes.len(), 1);
    }

    #[test]
    fn tampered_ciphertext_detected() {
        let f = testutil::factotum(10);
        let mut entry = testutil::entry("ann@example.com/secret", Packing::Ee);
        let mut stored = testutil::pack_blocks(&f, &mut entry, &[b"secret"]);
        let mut bad = stored[0].to_vec();
        let last = bad.len() - 1;
        bad[last] ^= 1;
        stored[0] = bad.into();
        assert!(testutil::unpack_blocks(&f, f.public_key(), &entry, &stored).is_err());
    }
}
