//! ECDSA keypairs over the NIST curves.
//!
//! Public keys are self-describing text: the curve name on the first line,
//! then the X and Y affine coordinates as decimal integers. The key hash
//! (the index readers use to find their wrapped-key slot) is the SHA-256
//! of that canonical text.

use ecdsa::signature::{Signer, Verifier};
use elliptic_curve::sec1::ToEncodedPoint;
use num_bigint::BigUint;
use sha2::{Digest, Sha256};

use upspin_core::{Error, Kind, Result, Signature};

/// The supported curves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Curve {
    P256,
    P384,
    P521,
}

impl Curve {
    pub fn name(self) -> &'static str {
        match self {
            Curve::P256 => "p256",
            Curve::P384 => "p384",
            Curve::P521 => "p521",
        }
    }

    pub fn from_name(name: &str) -> Result<Curve> {
        match name {
            "p256" => Ok(Curve::P256),
            "p384" => Ok(Curve::P384),
            "p521" => Ok(Curve::P521),
            other => Err(Error::invalid(format!("unknown curve {other:?}"))),
        }
    }

    /// Width of one field element in bytes.
    pub fn field_bytes(self) -> usize {
        match self {
            Curve::P256 => 32,
            Curve::P384 => 48,
            Curve::P521 => 66,
        }
    }

    /// Bits of the scalar field; used to mask derived key material.
    pub(crate) fn scalar_bits(self) -> usize {
        match self {
            Curve::P256 => 256,
            Curve::P384 => 384,
            Curve::P521 => 521,
        }
    }
}

#[derive(Clone)]
enum VerifyingKeyInner {
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
    P521(p521::ecdsa::VerifyingKey),
}

/// A parsed public key, kept alongside its canonical text.
#[derive(Clone)]
pub struct PublicKey {
    text: String,
    curve: Curve,
    inner: VerifyingKeyInner,
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({}, {})", self.curve.name(), hex::encode(&self.key_hash()[..5]))
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for PublicKey {}

fn pad_left(bytes: &[u8], width: usize) -> Result<Vec<u8>> {
    let bytes = strip_leading_zeros(bytes);
    if bytes.len() > width {
        return Err(Error::invalid("integer too large for curve field"));
    }
    let mut out = vec![0u8; width];
    out[width - bytes.len()..].copy_from_slice(bytes);
    Ok(out)
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn decimal(bytes: &[u8]) -> String {
    BigUint::from_bytes_be(bytes).to_str_radix(10)
}

fn parse_decimal(s: &str) -> Result<Vec<u8>> {
    let n = s
        .trim()
        .parse::<BigUint>()
        .map_err(|_| Error::invalid(format!("bad integer in key: {s:?}")))?;
    Ok(n.to_bytes_be())
}

fn canonical_text(curve: Curve, x: &[u8], y: &[u8]) -> String {
    format!("{}\n{}\n{}\n", curve.name(), decimal(x), decimal(y))
}

impl PublicKey {
    /// Parses public key text: curve name then decimal X and Y.
    pub fn parse(text: &str) -> Result<PublicKey> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        let curve_name = lines
            .next()
            .ok_or_else(|| Error::invalid("empty public key"))?;
        let curve = Curve::from_name(curve_name)?;
        let x = parse_decimal(lines.next().ok_or_else(|| Error::invalid("public key missing X"))?)?;
        let y = parse_decimal(lines.next().ok_or_else(|| Error::invalid("public key missing Y"))?)?;

        let width = curve.field_bytes();
        let mut sec1 = Vec::with_capacity(1 + 2 * width);
        sec1.push(0x04);
        sec1.extend_from_slice(&pad_left(&x, width)?);
        sec1.extend_from_slice(&pad_left(&y, width)?);

        let inner = match curve {
            Curve::P256 => VerifyingKeyInner::P256(
                p256::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)
                    .map_err(|_| bad_point(curve))?,
            ),
            Curve::P384 => VerifyingKeyInner::P384(
                p384::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)
                    .map_err(|_| bad_point(curve))?,
            ),
            Curve::P521 => VerifyingKeyInner::P521(
                p521::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)
                    .map_err(|_| bad_point(curve))?,
            ),
        };
        Ok(PublicKey {
            text: canonical_text(curve, &x, &y),
            curve,
            inner,
        })
    }

    /// The canonical text form, as stored in `public.upspinkey`.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    /// SHA-256 of the canonical text; the wrapped-key slot index.
    pub fn key_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        hasher.finalize().into()
    }

    /// The uncompressed SEC1 encoding of the point.
    pub fn sec1_bytes(&self) -> Vec<u8> {
        match &self.inner {
            VerifyingKeyInner::P256(vk) => vk.to_encoded_point(false).as_bytes().to_vec(),
            VerifyingKeyInner::P384(vk) => vk.to_encoded_point(false).as_bytes().to_vec(),
            VerifyingKeyInner::P521(vk) => vk.to_encoded_point(false).as_bytes().to_vec(),
        }
    }

    /// Verifies `sig` over `data`.
    pub fn verify(&self, data: &[u8], sig: &Signature) -> Result<()> {
        let width = self.curve.field_bytes();
        let mut rs = pad_left(&sig.r, width).map_err(|e| e.op("Verify"))?;
        rs.extend_from_slice(&pad_left(&sig.s, width).map_err(|e| e.op("Verify"))?);
        let verified = match &self.inner {
            VerifyingKeyInner::P256(vk) => p256::ecdsa::Signature::from_slice(&rs)
                .map(|s| vk.verify(data, &s).is_ok())
                .unwrap_or(false),
            VerifyingKeyInner::P384(vk) => p384::ecdsa::Signature::from_slice(&rs)
                .map(|s| vk.verify(data, &s).is_ok())
                .unwrap_or(false),
            VerifyingKeyInner::P521(vk) => p521::ecdsa::Signature::from_slice(&rs)
                .map(|s| vk.verify(data, &s).is_ok())
                .unwrap_or(false),
        };
        if verified {
            Ok(())
        } else {
            Err(Error::new(Kind::Invalid).op("Verify").msg("signature does not verify"))
        }
    }
}

fn bad_point(curve: Curve) -> Error {
    Error::invalid(format!("point is not on curve {}", curve.name()))
}

#[derive(Clone)]
enum SigningKeyInner {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
    P521(p521::ecdsa::SigningKey),
}

/// A private/public keypair on one curve.
#[derive(Clone)]
pub struct KeyPair {
    public: PublicKey,
    secret: SigningKeyInner,
}

impl KeyPair {
    /// Builds a keypair from the curve and the private scalar D (decimal).
    /// The public half is derived, not trusted from the caller.
    pub fn from_secret(curve: Curve, d_decimal: &str) -> Result<KeyPair> {
        let d = parse_decimal(d_decimal)?;
        let d = pad_left(&d, curve.field_bytes())?;
        KeyPair::from_scalar_bytes(curve, &d)
    }

    /// Builds a keypair from a fixed-width big-endian scalar.
    pub(crate) fn from_scalar_bytes(curve: Curve, scalar: &[u8]) -> Result<KeyPair> {
        let invalid = || Error::invalid("private key scalar out of range");
        let (secret, sec1) = match curve {
            Curve::P256 => {
                let sk = p256::ecdsa::SigningKey::from_slice(scalar).map_err(|_| invalid())?;
                let pt = sk.verifying_key().to_encoded_point(false);
                (SigningKeyInner::P256(sk), pt.as_bytes().to_vec())
            }
            Curve::P384 => {
                let sk = p384::ecdsa::SigningKey::from_slice(scalar).map_err(|_| invalid())?;
                let pt = sk.verifying_key().to_encoded_point(false);
                (SigningKeyInner::P384(sk), pt.as_bytes().to_vec())
            }
            Curve::P521 => {
                let sk = p521::ecdsa::SigningKey::from_slice(scalar).map_err(|_| invalid())?;
                let pt = p521::ecdsa::VerifyingKey::from(&sk).to_encoded_point(false);
                (SigningKeyInner::P521(sk), pt.as_bytes().to_vec())
            }
        };
        let width = curve.field_bytes();
        let (x, y) = (&sec1[1..1 + width], &sec1[1 + width..]);
        let text = canonical_text(curve, x, y);
        let public = PublicKey::parse(&text)?;
        Ok(KeyPair { public, secret })
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn curve(&self) -> Curve {
        self.public.curve
    }

    /// The private scalar D as a decimal string, for `secret.upspinkey`.
    pub fn secret_decimal(&self) -> String {
        let bytes = match &self.secret {
            SigningKeyInner::P256(sk) => sk.to_bytes().to_vec(),
            SigningKeyInner::P384(sk) => sk.to_bytes().to_vec(),
            SigningKeyInner::P521(sk) => sk.to_bytes().to_vec(),
        };
        decimal(&bytes)
    }

    /// Signs `data` with the curve's standard digest, returning (R, S).
    pub fn sign(&self, data: &[u8]) -> Result<Signature> {
        let (r, s) = match &self.secret {
            SigningKeyInner::P256(sk) => {
                let sig: p256::ecdsa::Signature = sk.sign(data);
                let (r, s) = sig.split_bytes();
                (r.to_vec(), s.to_vec())
            }
            SigningKeyInner::P384(sk) => {
                let sig: p384::ecdsa::Signature = sk.sign(data);
                let (r, s) = sig.split_bytes();
                (r.to_vec(), s.to_vec())
            }
            SigningKeyInner::P521(sk) => {
                let sig: p521::ecdsa::Signature = sk.sign(data);
                let (r, s) = sig.split_bytes();
                (r.to_vec(), s.to_vec())
            }
        };
        Ok(Signature {
            r: strip_leading_zeros(&r).to_vec(),
            s: strip_leading_zeros(&s).to_vec(),
        })
    }

    /// ECDH between this key and a peer point in SEC1 encoding on the same
    /// curve. Returns the raw shared secret bytes.
    pub fn ecdh(&self, peer_sec1: &[u8]) -> Result<Vec<u8>> {
        let err = || Error::new(Kind::CannotDecrypt).msg("bad ephemeral public key");
        let shared = match &self.secret {
            SigningKeyInner::P256(sk) => {
                let peer = p256::PublicKey::from_sec1_bytes(peer_sec1).map_err(|_| err())?;
                elliptic_curve::ecdh::diffie_hellman(sk.as_nonzero_scalar(), peer.as_affine())
                    .raw_secret_bytes()
                    .to_vec()
            }
            SigningKeyInner::P384(sk) => {
                let peer = p384::PublicKey::from_sec1_bytes(peer_sec1).map_err(|_| err())?;
                elliptic_curve::ecdh::diffie_hellman(sk.as_nonzero_scalar(), peer.as_affine())
                    .raw_secret_bytes()
                    .to_vec()
            }
            SigningKeyInner::P521(sk) => {
                let peer = p521::PublicKey::from_sec1_bytes(peer_sec1).map_err(|_| err())?;
                elliptic_curve::ecdh::diffie_hellman(sk.as_nonzero_scalar(), peer.as_affine())
                    .raw_secret_bytes()
                    .to_vec()
            }
        };
        Ok(shared)
    }
}

/// ECDH with a fresh ephemeral key against `reader`'s curve and point.
/// Returns the ephemeral public point (SEC1) and the raw shared secret.
pub fn ephemeral_ecdh(reader: &PublicKey) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut rng = rand::rngs::OsRng;
    let sec1 = reader.sec1_bytes();
    let err = || Error::invalid("bad reader public key");
    match reader.curve {
        Curve::P256 => {
            let eph = p256::ecdh::EphemeralSecret::random(&mut rng);
            let peer = p256::PublicKey::from_sec1_bytes(&sec1).map_err(|_| err())?;
            let shared = eph.diffie_hellman(&peer).raw_secret_bytes().to_vec();
            let public = eph.public_key().to_encoded_point(false).as_bytes().to_vec();
            Ok((public, shared))
        }
        Curve::P384 => {
            let eph = p384::ecdh::EphemeralSecret::random(&mut rng);
            let peer = p384::PublicKey::from_sec1_bytes(&sec1).map_err(|_| err())?;
            let shared = eph.diffie_hellman(&peer).raw_secret_bytes().to_vec();
            let public = eph.public_key().to_encoded_point(false).as_bytes().to_vec();
            Ok((public, shared))
        }
        Curve::P521 => {
            let eph = p521::ecdh::EphemeralSecret::random(&mut rng);
            let peer = p521::PublicKey::from_sec1_bytes(&sec1).map_err(|_| err())?;
            let shared = eph.diffie_hellman(&peer).raw_secret_bytes().to_vec();
            let public = eph.public_key().to_encoded_point(false).as_bytes().to_vec();
            Ok((public, shared))
        }
    }
}
