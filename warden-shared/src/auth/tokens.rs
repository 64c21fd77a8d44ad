/// Paired access/refresh token issuance
///
/// Every issuance mints a fresh `prm` nonce and signs it into both tokens,
/// which is what later proves that a presented pair belongs together.
/// Lifetimes are clamped to their ceilings, so neither configuration nor a
/// caller-supplied refresh lifetime can exceed policy.

use super::jwt::{Claims, TokenCodec, TokenError};
use crate::id::random_string;
use crate::models::user::{AuthTokenResult, PublicUser};
use chrono::{DateTime, Utc};

/// Default access token lifetime (1 day)
pub const ACCESS_TOKEN_EXPIRY_SECONDS: i64 = 86_400;

/// Upper bound for the access token lifetime (30 days)
pub const ACCESS_TOKEN_MAX_EXPIRY_SECONDS: i64 = 2_592_000;

/// Default refresh token lifetime (30 days). Rotation never extends it.
pub const REFRESH_TOKEN_EXPIRY_SECONDS: i64 = 2_592_000;

/// Upper bound for the refresh token lifetime (1 year)
pub const REFRESH_TOKEN_MAX_EXPIRY_SECONDS: i64 = 31_557_600;

const NONCE_LENGTH: usize = 10;

/// Token lifetimes in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenConfig {
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub access_max_seconds: i64,
    pub refresh_max_seconds: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_ttl_seconds: ACCESS_TOKEN_EXPIRY_SECONDS,
            refresh_ttl_seconds: REFRESH_TOKEN_EXPIRY_SECONDS,
            access_max_seconds: ACCESS_TOKEN_MAX_EXPIRY_SECONDS,
            refresh_max_seconds: REFRESH_TOKEN_MAX_EXPIRY_SECONDS,
        }
    }
}

impl TokenConfig {
    /// Effective access token lifetime
    pub fn access_lifetime(&self) -> i64 {
        self.access_ttl_seconds.min(self.access_max_seconds).max(1)
    }

    /// Effective refresh token lifetime
    pub fn refresh_lifetime(&self) -> i64 {
        self.refresh_ttl_seconds.min(self.refresh_max_seconds).max(1)
    }
}

/// Builds token pairs for users
#[derive(Debug, Clone)]
pub struct AuthTokenService {
    codec: TokenCodec,
    config: TokenConfig,
}

impl AuthTokenService {
    pub fn new(codec: TokenCodec, config: TokenConfig) -> Self {
        Self { codec, config }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Issues a token pair for `user`
    ///
    /// `refresh_lifetime` overrides the configured refresh lifetime and is
    /// used during rotation to carry over the remaining time of the
    /// consumed token. It is still clamped to the configured lifetime.
    pub fn issue(&self, user: &PublicUser, refresh_lifetime: Option<i64>) -> Result<AuthTokenResult, TokenError> {
        self.issue_at(user, refresh_lifetime, Utc::now())
    }

    pub fn issue_at(
        &self,
        user: &PublicUser,
        refresh_lifetime: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<AuthTokenResult, TokenError> {
        let configured = self.config.refresh_lifetime();
        let refresh_lifetime = refresh_lifetime.map_or(configured, |seconds| seconds.clamp(1, configured));

        let iat = now.timestamp();
        let claims = Claims {
            user_id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            roles: user.roles.clone(),
            sub: user.id.clone(),
            prm: random_string(NONCE_LENGTH),
            iat,
            exp: iat + self.config.access_lifetime(),
        };

        let access_token = self.codec.encode(&claims)?;
        let refresh_token = self.codec.encode(&Claims {
            exp: iat + refresh_lifetime,
            ..claims
        })?;

        Ok(AuthTokenResult {
            user: user.clone(),
            access_token,
            refresh_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(config: TokenConfig) -> AuthTokenService {
        AuthTokenService::new(TokenCodec::new("test-secret-that-is-long-enough-000"), config)
    }

    fn user() -> PublicUser {
        PublicUser {
            id: "usr_1".to_string(),
            username: Some("hunter".to_string()),
            email: Some("hunter@example.com".to_string()),
            name: None,
            roles: vec!["admin".to_string()],
        }
    }

    #[test]
    fn test_pair_shares_nonce() {
        let service = service(TokenConfig::default());
        let result = service.issue(&user(), None).unwrap();

        let access = service.codec().decode(&result.access_token).unwrap();
        let refresh = service.codec().decode(&result.refresh_token).unwrap();

        assert_eq!(access.prm, refresh.prm);
        assert_eq!(access.sub, "usr_1");
        assert_eq!(access.user_id, "usr_1");
        assert_eq!(access.roles, vec!["admin".to_string()]);
        assert_eq!(access.exp - access.iat, ACCESS_TOKEN_EXPIRY_SECONDS);
        assert_eq!(refresh.exp - refresh.iat, REFRESH_TOKEN_EXPIRY_SECONDS);
    }

    #[test]
    fn test_issuances_use_fresh_nonces() {
        let service = service(TokenConfig::default());
        let first = service.issue(&user(), None).unwrap();
        let second = service.issue(&user(), None).unwrap();

        assert_ne!(first.access_token, second.access_token);
        assert_ne!(first.refresh_token, second.refresh_token);
    }

    #[test]
    fn test_lifetimes_are_clamped() {
        let service = service(TokenConfig {
            access_ttl_seconds: 10 * ACCESS_TOKEN_MAX_EXPIRY_SECONDS,
            refresh_ttl_seconds: 10 * REFRESH_TOKEN_MAX_EXPIRY_SECONDS,
            ..Default::default()
        });
        let result = service.issue(&user(), Some(i64::MAX)).unwrap();

        let access = service.codec().decode(&result.access_token).unwrap();
        let refresh = service.codec().decode(&result.refresh_token).unwrap();
        assert_eq!(access.exp - access.iat, ACCESS_TOKEN_MAX_EXPIRY_SECONDS);
        assert_eq!(refresh.exp - refresh.iat, REFRESH_TOKEN_MAX_EXPIRY_SECONDS);
    }

    #[test]
    fn test_remaining_lifetime_is_inherited() {
        let service = service(TokenConfig::default());
        let result = service.issue(&user(), Some(120)).unwrap();

        let refresh = service.codec().decode(&result.refresh_token).unwrap();
        assert_eq!(refresh.exp - refresh.iat, 120);
    }
}
