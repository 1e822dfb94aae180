//! Transfer code generation and validation.
//!
//! A transfer code is the shared secret both parties hand to the relay tool
//! to find each other. Codes are exchanged out-of-band, so they are meant to
//! be easy to read aloud and type.
//!
//! ## Code Format
//!
//! Generated codes are a mnemonic word, a dash, and a random suffix of
//! lowercase letters and digits:
//!
//! - Prefixes: `send`, `data`, `blue`, `red`, `fast`
//! - Suffix alphabet: `a-z`, `0-9`
//! - Suffix length: 4 to 20 characters (default 6)
//!
//! Parsing is more lenient than generation because codes typed by a peer
//! may come from another client.
//!
//! ## Example
//!
//! ```rust,ignore
//! use packrelay_core::code::TransferCode;
//!
//! let code = TransferCode::generate(6)?;
//! println!("Generated code: {}", code);
//!
//! let code = TransferCode::parse("fast-9q2xk")?;
//! ```

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The character set used for the random suffix.
pub const CODE_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Mnemonic words a generated code starts with.
pub const CODE_PREFIXES: &[&str] = &["send", "data", "blue", "red", "fast"];

/// Allowed suffix lengths for generated codes.
pub const SUFFIX_LENGTH_RANGE: RangeInclusive<usize> = 4..=20;

/// Shortest code accepted by [`TransferCode::parse`].
pub const MIN_CODE_LENGTH: usize = 4;

/// A validated transfer code.
///
/// Uniqueness across concurrently running sessions is the operator's
/// responsibility; nothing here tracks codes in use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransferCode {
    code: String,
}

impl TransferCode {
    /// Parse and validate a transfer code from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the code is empty, too short, or contains
    /// whitespace or control characters.
    pub fn parse(input: &str) -> Result<Self> {
        let code = input.trim();

        if code.is_empty() {
            return Err(Error::InvalidCode("code is empty".to_string()));
        }

        if let Some(c) = code.chars().find(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::InvalidCode(format!(
                "invalid character {c:?} in code"
            )));
        }

        if code.chars().count() < MIN_CODE_LENGTH {
            return Err(Error::InvalidCode(format!(
                "code must be at least {MIN_CODE_LENGTH} characters"
            )));
        }

        Ok(Self {
            code: code.to_string(),
        })
    }

    /// Generate a new random code with a suffix of `length` characters.
    ///
    /// # Errors
    ///
    /// Returns an error if `length` is outside [`SUFFIX_LENGTH_RANGE`].
    pub fn generate(length: usize) -> Result<Self> {
        use rand::seq::SliceRandom;
        use rand::Rng;

        if !SUFFIX_LENGTH_RANGE.contains(&length) {
            return Err(Error::InvalidCode(format!(
                "code length must be between {} and {}, got {length}",
                SUFFIX_LENGTH_RANGE.start(),
                SUFFIX_LENGTH_RANGE.end()
            )));
        }

        let mut rng = rand::thread_rng();
        let prefix = CODE_PREFIXES.choose(&mut rng).copied().unwrap_or("send");
        let suffix: String = (0..length)
            .map(|_| {
                let idx = rng.gen_range(0..CODE_CHARSET.len());
                CODE_CHARSET[idx] as char
            })
            .collect();

        Self::parse(&format!("{prefix}-{suffix}"))
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.code
    }
}

impl std::fmt::Display for TransferCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code)
    }
}

impl std::str::FromStr for TransferCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TransferCode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TransferCode> for String {
    fn from(code: TransferCode) -> Self {
        code.code
    }
}
