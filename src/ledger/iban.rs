//! IBAN value type and generator
//!
//! Only the shape is enforced on parse (country letters, two check digits,
//! alphanumeric BBAN). Check digits are verified separately because accounts
//! created by older tooling carry random check digits.

use std::fmt;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_IBAN_LEN: usize = 15;
pub const MAX_IBAN_LEN: usize = 34;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IbanError {
    #[error("IBAN length {0} outside {MIN_IBAN_LEN}..={MAX_IBAN_LEN}")]
    Length(usize),

    #[error("IBAN must start with a two-letter country code")]
    CountryCode,

    #[error("IBAN check digits must be numeric")]
    CheckDigits,

    #[error("IBAN contains invalid character '{0}'")]
    InvalidCharacter(char),
}

/// Normalized IBAN (no spaces, upper case)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Iban(String);

impl Iban {
    pub fn parse(raw: &str) -> Result<Self, IbanError> {
        let normalized: String = raw
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if !(MIN_IBAN_LEN..=MAX_IBAN_LEN).contains(&normalized.len()) {
            return Err(IbanError::Length(normalized.len()));
        }

        if let Some(c) = normalized.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(IbanError::InvalidCharacter(c));
        }

        let bytes = normalized.as_bytes();
        if !bytes[..2].iter().all(u8::is_ascii_alphabetic) {
            return Err(IbanError::CountryCode);
        }
        if !bytes[2..4].iter().all(u8::is_ascii_digit) {
            return Err(IbanError::CheckDigits);
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Normalized form of `raw` when it parses, `raw` itself otherwise
    pub fn canonical(raw: &str) -> String {
        Self::parse(raw).map_or_else(|_| raw.to_string(), |iban| iban.0)
    }

    pub fn country_code(&self) -> &str {
        &self.0[..2]
    }

    /// ISO 13616 mod-97 verification
    pub fn has_valid_checksum(&self) -> bool {
        let rearranged = format!("{}{}", &self.0[4..], &self.0[..4]);
        mod97(&rearranged) == 1
    }
}

impl fmt::Display for Iban {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Iban {
    type Error = IbanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Iban::parse(&value)
    }
}

impl From<Iban> for String {
    fn from(iban: Iban) -> Self {
        iban.0
    }
}

/// Remainder of the IBAN numeric expansion (A=10 .. Z=35) modulo 97
fn mod97(s: &str) -> u32 {
    s.chars().fold(0u32, |acc, c| {
        if let Some(d) = c.to_digit(10) {
            (acc * 10 + d) % 97
        } else {
            let v = c as u32 - 'A' as u32 + 10;
            (acc * 100 + v) % 97
        }
    })
}

/// Random IBAN generator with real check digits
pub struct IbanGenerator {
    rng: Mutex<StdRng>,
}

impl IbanGenerator {
    pub const DEFAULT_COUNTRY: &'static str = "TR";
    pub const DEFAULT_BANK_CODE_LEN: usize = 5;
    pub const DEFAULT_ACCOUNT_LEN: usize = 16;

    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic generator for tests and fixtures
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// `CC` + check digits + bank code + account number
    pub fn generate(
        &self,
        country: &str,
        bank_code_len: usize,
        account_len: usize,
    ) -> Result<Iban, IbanError> {
        let country = country.to_ascii_uppercase();
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(IbanError::CountryCode);
        }

        let bban: String = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            (0..bank_code_len + account_len)
                .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
                .collect()
        };

        let check = 98 - mod97(&format!("{}{}00", bban, country));
        Iban::parse(&format!("{}{:02}{}", country, check, bban))
    }

    pub fn generate_default(&self) -> Result<Iban, IbanError> {
        self.generate(
            Self::DEFAULT_COUNTRY,
            Self::DEFAULT_BANK_CODE_LEN,
            Self::DEFAULT_ACCOUNT_LEN,
        )
    }
}

impl Default for IbanGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes() {
        let iban = Iban::parse("gb82 west 1234 5698 7654 32").unwrap();
        assert_eq!(iban.as_str(), "GB82WEST12345698765432");
        assert_eq!(iban.country_code(), "GB");
        assert!(iban.has_valid_checksum());
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert_eq!(Iban::parse("GB82"), Err(IbanError::Length(4)));
        assert_eq!(
            Iban::parse("1282WEST12345698765432"),
            Err(IbanError::CountryCode)
        );
        assert_eq!(
            Iban::parse("GBX2WEST12345698765432"),
            Err(IbanError::CheckDigits)
        );
        assert_eq!(
            Iban::parse("GB82WEST1234569876543-"),
            Err(IbanError::InvalidCharacter('-'))
        );
    }

    #[test]
    fn test_bad_checksum_still_parses() {
        let iban = Iban::parse("GB00WEST12345698765432").unwrap();
        assert!(!iban.has_valid_checksum());
    }

    #[test]
    fn test_generated_ibans_validate() {
        let generator = IbanGenerator::with_seed(7);
        for _ in 0..50 {
            let iban = generator.generate_default().unwrap();
            assert_eq!(iban.as_str().len(), 2 + 2 + 5 + 16);
            assert!(iban.as_str().starts_with("TR"));
            assert!(iban.has_valid_checksum(), "{} should validate", iban);
        }
    }

    #[test]
    fn test_serde_roundtrip_through_string() {
        let iban = Iban::parse("GB82WEST12345698765432").unwrap();
        let json = serde_json::to_string(&iban).unwrap();
        assert_eq!(json, "\"GB82WEST12345698765432\"");
        let back: Iban = serde_json::from_str(&json).unwrap();
        assert_eq!(back, iban);
        assert!(serde_json::from_str::<Iban>("\"nope\"").is_err());
    }
}
