//! Recovery phrase generation.
//!
//! Entropy always comes from a cryptographically secure source. When that
//! source fails there is no fallback: the error surfaces as
//! [`MaspError::InsufficientEntropy`].

use crate::error::{MaspError, MaspResult};
use bip39::Mnemonic;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

/// 256 bits of entropy, encoded as 24 words.
pub const ENTROPY_BYTES: usize = 32;
pub const WORD_COUNT: usize = 24;


pub fn generate() -> MaspResult<Mnemonic> {
    generate_with(&mut OsRng)
}


pub fn generate_with<R: RngCore + CryptoRng>(rng: &mut R) -> MaspResult<Mnemonic> {
    let mut entropy = Zeroizing::new([0u8; ENTROPY_BYTES]);
    rng.try_fill_bytes(&mut entropy[..])
        .map_err(|e| MaspError::InsufficientEntropy(e.to_string()))?;

    let mnemonic = Mnemonic::from_entropy(&entropy[..])?;
    tracing::debug!(words = mnemonic.word_count(), "generated recovery phrase");
    Ok(mnemonic)
}

/// Parses a user supplied phrase, tolerating extra whitespace and capitals.
pub fn parse(phrase: &str) -> MaspResult<Mnemonic> {
    let normalized = Zeroizing::new(
        phrase
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" "),
    );
    if normalized.is_empty() {
        return Err(MaspError::InvalidMnemonic("empty recovery phrase".to_string()));
    }
    Ok(Mnemonic::parse_normalized(&normalized)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DrainedRng;

    impl RngCore for DrainedRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, _dest: &mut [u8]) {}

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "entropy source unavailable",
            )))
        }
    }

    impl CryptoRng for DrainedRng {}

    #[test]
    fn test_generates_24_words() {
        let mnemonic = generate().unwrap();
        assert_eq!(mnemonic.word_count(), WORD_COUNT);
        assert_eq!(mnemonic.to_string().split(' ').count(), WORD_COUNT);
    }

    #[test]
    fn test_two_phrases_differ() {
        let a = generate().unwrap();
        let b = generate().unwrap();
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_failing_source_is_fatal() {
        let err = generate_with(&mut DrainedRng).unwrap_err();
        assert!(matches!(err, MaspError::InsufficientEntropy(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_parse_normalizes() {
        let phrase = "  Abandon abandon abandon abandon abandon abandon\nabandon abandon abandon abandon abandon ABOUT ";
        let mnemonic = parse(phrase).unwrap();
        assert_eq!(mnemonic.word_count(), 12);
    }

    #[test]
    fn test_parse_rejects_bad_checksum() {
        let phrase = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon";
        assert!(matches!(parse(phrase), Err(MaspError::InvalidMnemonic(_))));
        assert!(matches!(parse("   "), Err(MaspError::InvalidMnemonic(_))));
        assert!(matches!(parse("notaword ".repeat(24).as_str()), Err(MaspError::InvalidMnemonic(_))));
    }
}
