/// Password credential normalization, hashing and verification
///
/// Passwords reach the service either as plaintext or as a SHA-256 digest
/// computed on the client. Both forms are normalized to the same canonical
/// string (lowercase hex SHA-256 of the plaintext) before they touch a hash
/// function, so a client may switch between the two without breaking logins.
///
/// # Algorithms
///
/// - **Argon2id** for everything this service writes. Parameters default to
///   64 MB memory, 3 iterations and 4 lanes.
/// - **bcrypt** is verify-only, for credentials imported from older systems.
///
/// Hashing runs on tokio's blocking pool so concurrent requests keep moving.
///
/// # Example
///
/// ```
/// use warden_shared::auth::password::{HashParams, PasswordCredential, PasswordInput, StoredPassword};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let credential = PasswordCredential::new(HashParams::low_cost());
/// let input = PasswordInput::from("hunter2");
///
/// let argon = credential.hash(&input).await?;
/// let stored = StoredPassword { argon: Some(&argon), bcrypt: None };
/// assert!(credential.verify(&input, stored).await);
/// # Ok(())
/// # }
/// ```

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, ParamsBuilder, Version,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Error type for password operations
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    /// Failed to hash password
    #[error("Failed to hash password: {0}")]
    HashError(String),

    /// Invalid Argon2 parameters
    #[error("Invalid hash parameters: {0}")]
    InvalidParams(String),

    /// The blocking hash task did not complete
    #[error("Hash task failed: {0}")]
    TaskFailed(String),
}

/// Lowercase hex SHA-256 of `input`
///
/// Also used to store reset, verification and refresh tokens as one-way hashes.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Client-side digest algorithms accepted in place of plaintext
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    #[serde(rename = "sha-256")]
    Sha256,
}

/// Password as presented by a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PasswordInput {
    /// Plaintext password
    Plain(String),

    /// Digest computed by the client before transit
    Hashed {
        algorithm: DigestAlgorithm,
        digest: String,
    },
}

impl PasswordInput {
    /// Canonical string that is fed to the hash functions
    pub fn canonical(&self) -> String {
        match self {
            PasswordInput::Plain(plain) => sha256_hex(plain),
            PasswordInput::Hashed {
                algorithm: DigestAlgorithm::Sha256,
                digest,
            } => digest.trim().to_ascii_lowercase(),
        }
    }

    /// True when nothing usable was provided
    pub fn is_empty(&self) -> bool {
        match self {
            PasswordInput::Plain(plain) => plain.is_empty(),
            PasswordInput::Hashed { digest, .. } => digest.trim().is_empty(),
        }
    }
}

impl Default for PasswordInput {
    fn default() -> Self {
        PasswordInput::Plain(String::new())
    }
}

impl From<&str> for PasswordInput {
    fn from(plain: &str) -> Self {
        PasswordInput::Plain(plain.to_string())
    }
}

impl From<String> for PasswordInput {
    fn from(plain: String) -> Self {
        PasswordInput::Plain(plain)
    }
}

/// Hashes stored on a user record
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredPassword<'a> {
    pub argon: Option<&'a str>,
    pub bcrypt: Option<&'a str>,
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    /// Memory in KiB
    pub m_cost: u32,
    /// Iterations
    pub t_cost: u32,
    /// Parallel lanes
    pub p_cost: u32,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            m_cost: 65536,
            t_cost: 3,
            p_cost: 4,
        }
    }
}

impl HashParams {
    /// Minimal cost, for tests and local development only
    pub fn low_cost() -> Self {
        Self {
            m_cost: 8,
            t_cost: 1,
            p_cost: 1,
        }
    }
}

/// Hashes and verifies password credentials
#[derive(Debug, Clone, Default)]
pub struct PasswordCredential {
    params: HashParams,
}

impl PasswordCredential {
    pub fn new(params: HashParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> HashParams {
        self.params
    }

    /// Hashes the canonical form of `input` with Argon2id
    pub async fn hash(&self, input: &PasswordInput) -> Result<String, PasswordError> {
        let canonical = input.canonical();
        let params = self.params;

        tokio::task::spawn_blocking(move || hash_canonical(&canonical, params))
            .await
            .map_err(|e| PasswordError::TaskFailed(e.to_string()))?
    }

    /// Verifies `input` against the stored hashes
    ///
    /// Tries Argon2 first and falls back to bcrypt. Missing or unparsable
    /// hashes count as a mismatch.
    pub async fn verify(&self, input: &PasswordInput, stored: StoredPassword<'_>) -> bool {
        if input.is_empty() || (stored.argon.is_none() && stored.bcrypt.is_none()) {
            return false;
        }

        let canonical = input.canonical();
        let argon = stored.argon.map(str::to_string);
        let bcrypt = stored.bcrypt.map(str::to_string);

        let outcome = tokio::task::spawn_blocking(move || {
            if let Some(hash) = argon.as_deref() {
                if verify_argon(&canonical, hash) {
                    return true;
                }
            }
            match bcrypt.as_deref() {
                Some(hash) => verify_bcrypt(&canonical, hash),
                None => false,
            }
        })
        .await;

        match outcome {
            Ok(valid) => valid,
            Err(e) => {
                tracing::error!(error = %e, "Password verification task failed");
                false
            }
        }
    }
}

fn hash_canonical(canonical: &str, params: HashParams) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    let params = ParamsBuilder::new()
        .m_cost(params.m_cost)
        .t_cost(params.t_cost)
        .p_cost(params.p_cost)
        .output_len(32)
        .build()
        .map_err(|e| PasswordError::InvalidParams(e.to_string()))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let hash = argon2
        .hash_password(canonical.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashError(e.to_string()))?;

    Ok(hash.to_string())
}

fn verify_argon(canonical: &str, hash: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "Stored argon2 hash is malformed");
            return false;
        }
    };

    // Parameters are embedded in the hash
    Argon2::default()
        .verify_password(canonical.as_bytes(), &parsed)
        .is_ok()
}

fn verify_bcrypt(canonical: &str, hash: &str) -> bool {
    match bcrypt::verify(canonical, hash) {
        Ok(valid) => valid,
        Err(e) => {
            tracing::warn!(error = %e, "Stored bcrypt hash is malformed");
            false
        }
    }
}
