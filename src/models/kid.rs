//! Kommet record identifiers.
//!
//! Every record in a Kommet environment is addressed by a 13-character opaque ID.
//! The first three characters are the key prefix naming the record kind, the
//! remaining ten encode a sequence number.
//!
//! | Kind | Prefix | Example |
//! |------|--------|---------|
//! | Environment | `001` | `0010000000001` |
//! | User | `004` | `0040000000002` |
//! | Profile | `006` | `0060000000001` |
//! | User group | `010` | `0100000000003` |
//!
//! Parsing is strict: malformed strings are rejected rather than normalized, so
//! callers always get a [`KidError`] carrying the raw input to echo back.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// A parsed Kommet ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Kid(String);

impl Kid {
    /// Length of every ID.
    pub const LENGTH: usize = 13;

    /// Length of the key prefix.
    pub const PREFIX_LENGTH: usize = 3;

    pub const ENV_PREFIX: &'static str = "001";
    pub const USER_PREFIX: &'static str = "004";
    pub const PROFILE_PREFIX: &'static str = "006";
    pub const USER_GROUP_PREFIX: &'static str = "010";

    /// Parse an ID from its string form.
    pub fn parse(s: &str) -> Result<Self, KidError> {
        if s.is_empty() {
            return Err(KidError::Empty);
        }
        if s.len() != Self::LENGTH {
            return Err(KidError::InvalidLength {
                input: s.to_string(),
                length: s.len(),
            });
        }
        if !s.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(KidError::InvalidCharacter {
                input: s.to_string(),
            });
        }
        Ok(Self(s.to_string()))
    }

    /// Build an ID from a key prefix and a sequence number.
    ///
    /// The sequence is rendered in base 36 and left-padded with zeros.
    pub fn from_sequence(prefix: &str, sequence: u64) -> Result<Self, KidError> {
        let digits = to_base36(sequence);
        let width = Self::LENGTH - Self::PREFIX_LENGTH;
        Self::parse(&format!("{prefix}{digits:0>width$}"))
    }

    /// The three-character key prefix.
    pub fn key_prefix(&self) -> &str {
        &self.0[..Self::PREFIX_LENGTH]
    }

    /// Whether this ID has the given key prefix.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.key_prefix() == prefix
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

impl fmt::Display for Kid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Kid {
    type Err = KidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Kid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Kid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(de::Error::custom)
    }
}

/// Error type for ID parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KidError {
    #[error("ID is empty")]
    Empty,

    #[error("invalid ID '{input}': length {length} instead of expected {}", Kid::LENGTH)]
    InvalidLength { input: String, length: usize },

    #[error("invalid ID '{input}': only ASCII letters and digits are allowed")]
    InvalidCharacter { input: String },
}

impl KidError {
    /// The raw input that failed to parse.
    pub fn input(&self) -> &str {
        match self {
            Self::Empty => "",
            Self::InvalidLength { input, .. } | Self::InvalidCharacter { input } => input,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_parse_valid() {
        let kid = Kid::parse("0010000000001").unwrap();
        assert_eq!(kid.as_str(), "0010000000001");
        assert_eq!(kid.key_prefix(), Kid::ENV_PREFIX);
        assert!(kid.has_prefix("001"));
        assert!(!kid.has_prefix("004"));
    }

    #[rstest]
    #[case("")]
    #[case("001abc")]
    #[case("00100000000012")]
    #[case("001000000000!")]
    #[case("001 000000001")]
    #[case("001000000000ą")]
    fn test_parse_rejects_malformed(#[case] input: &str) {
        assert!(Kid::parse(input).is_err());
    }

    #[test]
    fn test_error_keeps_raw_input() {
        let err = Kid::parse("001abc").unwrap_err();
        assert_eq!(err.input(), "001abc");
        assert!(err.to_string().contains("001abc"));
    }

    #[test]
    fn test_from_sequence_pads() {
        let kid = Kid::from_sequence(Kid::USER_PREFIX, 42).unwrap();
        assert_eq!(kid.as_str(), "0040000000016");
        assert_eq!(kid.key_prefix(), "004");

        let zero = Kid::from_sequence(Kid::ENV_PREFIX, 0).unwrap();
        assert_eq!(zero.as_str(), "0010000000000");
    }

    #[test]
    fn test_serde_as_plain_string() {
        let kid = Kid::parse("0060000000001").unwrap();
        let json = serde_json::to_string(&kid).unwrap();
        assert_eq!(json, "\"0060000000001\"");

        let back: Kid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kid);

        let bad: Result<Kid, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }
}
