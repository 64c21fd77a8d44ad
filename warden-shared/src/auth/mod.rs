/// Authentication primitives
///
/// # Modules
///
/// - [`password`]: password input normalization, Argon2id hashing and
///   verification with bcrypt fallback
/// - [`jwt`]: HS256 token signing and verification
/// - [`tokens`]: paired access/refresh token issuance
///
/// # Security Features
///
/// - **Password Hashing**: Argon2id with 64 MB memory, 3 iterations, off the async runtime
/// - **Legacy Hashes**: bcrypt hashes are still accepted until the next password change
/// - **JWT Tokens**: HS256 with zero leeway; refresh rotation never extends a session
///
/// # Example
///
/// ```
/// use warden_shared::auth::jwt::TokenCodec;
/// use warden_shared::auth::tokens::{AuthTokenService, TokenConfig};
/// use warden_shared::models::user::PublicUser;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let service = AuthTokenService::new(
///     TokenCodec::new("a-secret-of-at-least-32-characters!!"),
///     TokenConfig::default(),
/// );
/// let user = PublicUser {
///     id: "usr_1".into(),
///     username: None,
///     email: Some("a@example.com".into()),
///     name: None,
///     roles: vec![],
/// };
///
/// let pair = service.issue(&user, None)?;
/// let access = service.codec().decode(&pair.access_token)?;
/// let refresh = service.codec().decode(&pair.refresh_token)?;
/// assert_eq!(access.prm, refresh.prm);
/// # Ok(())
/// # }
/// ```

pub mod jwt;
pub mod password;
pub mod tokens;
