/// Signed token encoding and verification
///
/// Tokens are JWTs signed with HS256. The payload carries a compact view of
/// the user plus two binding claims:
///
/// - `sub`: the user id
/// - `prm`: a random nonce shared by an access token and the refresh token
///   issued alongside it
///
/// Password hashes and stored tokens never enter the payload.
///
/// # Security
///
/// - **Algorithm**: HS256 only; tokens signed with anything else are rejected
/// - **Expiration**: checked with zero leeway unless explicitly ignored
/// - **Secret Management**: secrets should be at least 32 bytes
///
/// # Example
///
/// ```
/// use warden_shared::auth::jwt::{Claims, TokenCodec};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let codec = TokenCodec::new("a-secret-of-at-least-32-characters!!");
/// let claims = Claims {
///     user_id: "usr_1".into(),
///     username: Some("hunter".into()),
///     email: None,
///     name: None,
///     roles: vec![],
///     sub: "usr_1".into(),
///     prm: "nonce".into(),
///     iat: chrono::Utc::now().timestamp(),
///     exp: chrono::Utc::now().timestamp() + 60,
/// };
///
/// let token = codec.encode(&claims)?;
/// assert_eq!(codec.decode(&token)?.prm, "nonce");
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error type for token operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Failed to sign a token
    #[error("Failed to create token: {0}")]
    Encode(String),

    /// Token has expired
    #[error("Token has expired")]
    Expired,

    /// Bad signature, wrong algorithm or malformed payload
    #[error("Invalid token: {0}")]
    Invalid(String),
}

/// Token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub roles: Vec<String>,

    /// Subject, the user id
    pub sub: String,

    /// Pairing nonce shared with the sibling token
    pub prm: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }

    /// Seconds left until expiry relative to `now`, negative once expired
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        self.exp - now.timestamp()
    }
}

/// Signs and verifies tokens with a shared secret
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn encode(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| TokenError::Encode(e.to_string()))
    }

    /// Verifies signature and expiry
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, true)
    }

    /// Verifies the signature only
    ///
    /// Used for the access token presented during a refresh, which is
    /// routinely expired by then.
    pub fn decode_ignoring_expiration(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, false)
    }

    fn verify(&self, token: &str, validate_exp: bool) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = validate_exp;

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-at-least-32-bytes-long";

    fn claims(exp_offset: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            user_id: "usr_abc".to_string(),
            username: Some("hunter".to_string()),
            email: Some("hunter@example.com".to_string()),
            name: None,
            roles: vec!["admin".to_string()],
            sub: "usr_abc".to_string(),
            prm: "prm123".to_string(),
            iat: now,
            exp: now + exp_offset,
        }
    }

    #[test]
    fn test_encode_decode() {
        let codec = TokenCodec::new(SECRET);
        let original = claims(60);
        let token = codec.encode(&original).unwrap();

        assert_eq!(token.split('.').count(), 3);
        assert_eq!(codec.decode(&token).unwrap(), original);
    }

    #[test]
    fn test_payload_uses_user_id_key() {
        let json = serde_json::to_value(claims(60)).unwrap();
        assert_eq!(json["userId"], "usr_abc");
        assert!(json.get("name").is_none());
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = TokenCodec::new(SECRET).encode(&claims(60)).unwrap();
        let result = TokenCodec::new("another-secret-key-that-is-also-long").decode(&token);
        assert!(matches!(result, Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_expired_token() {
        let codec = TokenCodec::new(SECRET);
        let token = codec.encode(&claims(-10)).unwrap();

        assert_eq!(codec.decode(&token), Err(TokenError::Expired));
        assert_eq!(codec.decode_ignoring_expiration(&token).unwrap().prm, "prm123");
    }

    #[test]
    fn test_malformed_token() {
        let codec = TokenCodec::new(SECRET);
        assert!(matches!(codec.decode("not.a.token"), Err(TokenError::Invalid(_))));
        assert!(matches!(codec.decode(""), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let codec = TokenCodec::new(SECRET);
        let token = codec.encode(&claims(60)).unwrap();
        let other = codec
            .encode(&Claims {
                roles: vec!["root".to_string()],
                ..claims(60)
            })
            .unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        let other_parts: Vec<&str> = other.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], other_parts[1], parts[2]);

        assert!(codec.decode(&forged).is_err());
    }

    #[test]
    fn test_seconds_remaining() {
        let c = claims(100);
        let remaining = c.seconds_remaining(Utc::now());
        assert!((99..=100).contains(&remaining));
        assert!(c.expires_at().is_some());
    }
}
