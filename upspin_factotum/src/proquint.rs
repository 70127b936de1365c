//! Proquint encoding: readable five-letter words for 16-bit values.
//!
//! A 128-bit secret seed is written as eight proquints in the shape
//! `xxxxx-xxxxx-xxxxx-xxxxx.xxxxx-xxxxx-xxxxx-xxxxx`, 47 characters that
//! survive being read over the phone.

use upspin_core::{Error, Result};

const CONSONANTS: &[u8; 16] = b"bdfghjklmnprstvz";
const VOWELS: &[u8; 4] = b"aiou";

fn encode_word(word: u16) -> [u8; 5] {
    [
        CONSONANTS[((word >> 12) & 0xf) as usize],
        VOWELS[((word >> 10) & 0x3) as usize],
        CONSONANTS[((word >> 6) & 0xf) as usize],
        VOWELS[((word >> 4) & 0x3) as usize],
        CONSONANTS[(word & 0xf) as usize],
    ]
}

fn decode_word(text: &[u8]) -> Result<u16> {
    if text.len() != 5 {
        return Err(Error::invalid("proquint word must be five letters"));
    }
    let con = |b: u8| {
        CONSONANTS
            .iter()
            .position(|&c| c == b)
            .ok_or_else(|| Error::invalid("bad proquint consonant"))
    };
    let vow = |b: u8| {
        VOWELS
            .iter()
            .position(|&c| c == b)
            .ok_or_else(|| Error::invalid("bad proquint vowel"))
    };
    Ok(((con(text[0])? as u16) << 12)
        | ((vow(text[1])? as u16) << 10)
        | ((con(text[2])? as u16) << 6)
        | ((vow(text[3])? as u16) << 4)
        | con(text[4])? as u16)
}

/// Encodes a 128-bit seed as its 47-character proquint form.
pub fn encode(seed: &[u8; 16]) -> String {
    let mut out = String::with_capacity(47);
    for i in 0..8 {
        if i > 0 {
            out.push(if i == 4 { '.' } else { '-' });
        }
        let word = u16::from_be_bytes([seed[2 * i], seed[2 * i + 1]]);
        for b in encode_word(word) {
            out.push(b as char);
        }
    }
    out
}

/// Decodes the 47-character proquint form back to the 128-bit seed.
/// Separators may be `-` or `.` interchangeably.
pub fn decode(text: &str) -> Result<[u8; 16]> {
    let words: Vec<&str> = text
        .split(['-', '.'])
        .filter(|w| !w.is_empty())
        .collect();
    if words.len() != 8 {
        return Err(Error::invalid(format!(
            "proquint seed must have 8 words, got {}",
            words.len()
        )));
    }
    let mut seed = [0u8; 16];
    for (i, word) in words.iter().enumerate() {
        let value = decode_word(word.as_bytes())?;
        seed[2 * i..2 * i + 2].copy_from_slice(&value.to_be_bytes());
    }
    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn published_vectors() {
        // From the proquint proposal: 127.0.0.1 -> lusab-babad.
        assert_eq!(std::str::from_utf8(&encode_word(0x7f00)).unwrap(), "lusab");
        assert_eq!(std::str::from_utf8(&encode_word(0x0001)).unwrap(), "babad");
        assert_eq!(decode_word(b"lusab").unwrap(), 0x7f00);
    }

    #[test]
    fn round_trip() {
        let seed = [
            0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x00, 0x01, 0x7f, 0xff, 0xa5, 0x5a,
            0xc3, 0x3c,
        ];
        let text = encode(&seed);
        assert_eq!(text.len(), 47);
        assert_eq!(text.as_bytes()[23], b'.');
        assert_eq!(decode(&text).unwrap(), seed);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode("hello").is_err());
        assert!(decode("xxxxx-xxxxx-xxxxx-xxxxx.xxxxx-xxxxx-xxxxx-xxxxx").is_err());
    }
}
