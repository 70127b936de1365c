//! CBOR schemas for packer-private metadata.

use minicbor::{Decode, Encode};

use upspin_core::{Error, Result, Signature};

/// An ECDSA signature on the wire.
#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
#[cbor(array)]
pub struct WireSig {
    #[n(0)]
    #[cbor(with = "minicbor::bytes")]
    pub r: Vec<u8>,
    #[n(1)]
    #[cbor(with = "minicbor::bytes")]
    pub s: Vec<u8>,
}

impl From<&Signature> for WireSig {
    fn from(sig: &Signature) -> Self {
        WireSig {
            r: sig.r.clone(),
            s: sig.s.clone(),
        }
    }
}

impl From<&WireSig> for Signature {
    fn from(sig: &WireSig) -> Self {
        Signature {
            r: sig.r.clone(),
            s: sig.s.clone(),
        }
    }
}

/// One reader's wrapped data key.
#[derive(Encode, Decode, Clone, Debug)]
#[cbor(array)]
pub struct WrappedKey {
    /// SHA-256 of the reader's public key text: the slot index.
    #[n(0)]
    #[cbor(with = "minicbor::bytes")]
    pub key_hash: [u8; 32],
    /// Ephemeral ECDH point, SEC1 uncompressed.
    #[n(1)]
    #[cbor(with = "minicbor::bytes")]
    pub ephemeral: Vec<u8>,
    #[n(2)]
    #[cbor(with = "minicbor::bytes")]
    pub nonce: [u8; 24],
    /// The data key sealed under the derived wrapping key.
    #[n(3)]
    #[cbor(with = "minicbor::bytes")]
    pub sealed: Vec<u8>,
}

/// Entry packdata for the `ee` packing.
#[derive(Encode, Decode, Clone, Debug)]
#[cbor(array)]
pub struct EeEntryData {
    #[n(0)]
    pub sig: WireSig,
    /// Countersignature slot, filled during key rotation.
    #[n(1)]
    pub sig2: Option<WireSig>,
    #[n(2)]
    pub wraps: Vec<WrappedKey>,
    #[n(3)]
    #[cbor(with = "minicbor::bytes")]
    pub cipher_sum: [u8; 32],
}

/// Entry packdata for the `eeintegrity` packing.
#[derive(Encode, Decode, Clone, Debug)]
#[cbor(array)]
pub struct IntegrityEntryData {
    #[n(0)]
    pub sig: WireSig,
    #[n(1)]
    pub sig2: Option<WireSig>,
    #[n(2)]
    #[cbor(with = "minicbor::bytes")]
    pub cipher_sum: [u8; 32],
}

/// Block packdata for the `ee` packing.
#[derive(Encode, Decode, Clone, Debug)]
#[cbor(array)]
pub struct EeBlockData {
    #[n(0)]
    #[cbor(with = "minicbor::bytes")]
    pub nonce: [u8; 24],
    /// BLAKE3 of the ciphertext as stored.
    #[n(1)]
    #[cbor(with = "minicbor::bytes")]
    pub sum: [u8; 32],
}

/// Block packdata for the `eeintegrity` packing: BLAKE3 of the cleartext.
#[derive(Encode, Decode, Clone, Debug)]
#[cbor(array)]
pub struct IntegrityBlockData {
    #[n(0)]
    #[cbor(with = "minicbor::bytes")]
    pub sum: [u8; 32],
}

pub fn to_vec<T: Encode<()>>(value: &T) -> Result<Vec<u8>> {
    minicbor::to_vec(value).map_err(|e| Error::invalid(format!("packdata encode: {e}")))
}

pub fn decode<'b, T: Decode<'b, ()>>(bytes: &'b [u8]) -> Result<T> {
    minicbor::decode(bytes).map_err(|e| Error::invalid(format!("packdata decode: {e}")))
}
