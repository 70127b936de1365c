//! Key generation and rotation.
//!
//! Keys are derived deterministically from a 128-bit proquint seed, so a
//! user holding the transcribed seed can regenerate the same pair. Scalars
//! come from a BLAKE3 XOF keyed by a per-curve context; out-of-range draws
//! continue the stream.

use rand::RngCore;
use zeroize::Zeroize;

use upspin_core::{Error, Kind, Result};

use crate::keyfile;
use crate::keypair::{Curve, KeyPair};
use crate::proquint;

/// A freshly generated keypair plus the seed it derives from.
pub struct Generated {
    pub pair: KeyPair,
    pub proquint: String,
}

/// Derives the keypair for `curve` from a 128-bit seed.
pub fn from_seed(curve: Curve, seed: &[u8; 16]) -> Result<Generated> {
    let context = format!("upspin keygen {}", curve.name());
    let mut hasher = blake3::Hasher::new_derive_key(&context);
    hasher.update(seed);
    let mut xof = hasher.finalize_xof();

    let width = curve.field_bytes();
    let excess_bits = width * 8 - curve.scalar_bits();
    let mut scalar = vec![0u8; width];
    let pair = loop {
        xof.fill(&mut scalar);
        if excess_bits > 0 {
            scalar[0] &= 0xff >> excess_bits;
        }
        match KeyPair::from_scalar_bytes(curve, &scalar) {
            Ok(pair) => break pair,
            // Zero or >= group order; take the next draw from the stream.
            Err(_) => continue,
        }
    };
    scalar.zeroize();
    Ok(Generated {
        pair,
        proquint: proquint::encode(seed),
    })
}

/// Generates a keypair from a fresh OS-random seed, or from `seed_text`
/// (a proquint string) when the user supplies one.
pub fn generate(curve: Curve, seed_text: Option<&str>) -> Result<Generated> {
    let mut seed = match seed_text {
        Some(text) => proquint::decode(text)?,
        None => {
            let mut seed = [0u8; 16];
            rand::rngs::OsRng.fill_bytes(&mut seed);
            seed
        }
    };
    let generated = from_seed(curve, &seed);
    seed.zeroize();
    generated
}

/// How [`save`] treats keys already on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveMode {
    /// Refuse to disturb existing keys.
    Fresh,
    /// Archive the existing pair to `secret2.upspinkey`, then replace it.
    Rotate,
    /// Overwrite without archiving.
    Force,
}

/// Writes the generated pair into the secrets directory.
pub fn save(dir: &std::path::Path, generated: &Generated, mode: SaveMode) -> Result<()> {
    let exist = keyfile::keys_exist(dir);
    match mode {
        SaveMode::Fresh if exist => {
            return Err(Error::new(Kind::Exist)
                .op("Keygen")
                .msg(format!(
                    "keys already exist in {}; use rotate or force",
                    dir.display()
                )));
        }
        SaveMode::Rotate if !exist => {
            return Err(Error::new(Kind::NotExist)
                .op("Keygen")
                .msg("no existing keys to rotate"));
        }
        SaveMode::Rotate => {
            let public = keyfile::read_public(dir)?;
            let (secret, _) = keyfile::read_secret(dir)?;
            let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
            keyfile::append_archive(dir, &now, &public, &secret)?;
        }
        _ => {}
    }
    let secret_line = format!(
        "{} # {}",
        generated.pair.secret_decimal(),
        generated.proquint
    );
    keyfile::write_keypair(dir, generated.pair.public().text(), &secret_line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_from_seed() {
        let seed = [7u8; 16];
        for curve in [Curve::P256, Curve::P384, Curve::P521] {
            let a = from_seed(curve, &seed).unwrap();
            let b = from_seed(curve, &seed).unwrap();
            assert_eq!(a.pair.public().text(), b.pair.public().text());
            assert_eq!(a.proquint, b.proquint);
        }
    }

    #[test]
    fn distinct_seeds_distinct_keys() {
        let a = from_seed(Curve::P256, &[1u8; 16]).unwrap();
        let b = from_seed(Curve::P256, &[2u8; 16]).unwrap();
        assert_ne!(a.pair.public().text(), b.pair.public().text());
    }

    #[test]
    fn generate_from_proquint_round_trips() {
        let first = generate(Curve::P256, None).unwrap();
        let again = generate(Curve::P256, Some(&first.proquint)).unwrap();
        assert_eq!(first.pair.public().text(), again.pair.public().text());
    }

    #[test]
    fn save_modes() {
        let dir = tempfile::tempdir().unwrap();
        let first = generate(Curve::P256, None).unwrap();

        // Rotate with nothing on disk fails.
        assert!(save(dir.path(), &first, SaveMode::Rotate).is_err());
        save(dir.path(), &first, SaveMode::Fresh).unwrap();

        // A second fresh save is refused.
        let second = generate(Curve::P256, None).unwrap();
        let err = save(dir.path(), &second, SaveMode::Fresh).unwrap_err();
        assert!(err.is(Kind::Exist));

        // Rotation archives the first pair.
        save(dir.path(), &second, SaveMode::Rotate).unwrap();
        let archive = keyfile::read_archive(dir.path()).unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive[0].public_text, first.pair.public().text());
        assert_eq!(
            keyfile::read_public(dir.path()).unwrap(),
            second.pair.public().text()
        );
    }
}
