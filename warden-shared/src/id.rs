//! Primary key and random token generation
//!
//! Identifiers are drawn from the OS-seeded thread RNG over `[A-Za-z0-9]`.
//! At the default length of 17 characters that is just over 100 bits of
//! entropy, which keeps collisions out of reach for any realistic collection.
//!
//! # Example
//!
//! ```
//! use warden_shared::id::IdGenerator;
//!
//! let users = IdGenerator::with_prefix("usr_");
//! let id = users.generate();
//! assert!(id.starts_with("usr_"));
//! assert_eq!(id.len(), 4 + 17);
//! ```

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Default number of random characters in a primary key
pub const DEFAULT_ID_LENGTH: usize = 17;

/// Number of random characters in reset, enrollment and verification tokens
pub const TOKEN_LENGTH: usize = 40;

/// Returns `length` random alphanumeric characters
pub fn random_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Returns a numeric code of `length` digits, leading zeros allowed
pub fn random_digits(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Generates optionally prefixed primary keys
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    prefix: String,
    length: usize,
}

impl IdGenerator {
    /// Generator without a prefix
    pub fn new() -> Self {
        Self {
            prefix: String::new(),
            length: DEFAULT_ID_LENGTH,
        }
    }

    /// Generator whose ids start with `prefix`, e.g. `usr_`
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            length: DEFAULT_ID_LENGTH,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn generate(&self) -> String {
        let length = if self.length == 0 { DEFAULT_ID_LENGTH } else { self.length };
        format!("{}{}", self.prefix, random_string(length))
    }
}
