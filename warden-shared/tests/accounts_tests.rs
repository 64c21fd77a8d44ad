//! Registration, email management and password reset against the memory store

mod common;

use common::TestContext;
use serde_json::json;
use warden_shared::accounts::{CreatedUser, Credentials, Enrollment, NewUser};
use warden_shared::auth::password::sha256_hex;
use warden_shared::db::query::{Filter, Update};
use warden_shared::error::Error;
use warden_shared::models::user::fields;

fn new_user(email: Option<&str>, username: Option<&str>, password: Option<&str>) -> NewUser {
    NewUser {
        email: email.map(str::to_string),
        username: username.map(str::to_string),
        password: password.map(Into::into),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_signup_returns_tokens_and_public_user() {
    let ctx = TestContext::new().await.unwrap();
    let tokens = ctx.signup("Jane@Example.com", "hunter2").await;

    assert!(tokens.user.id.starts_with("usr_"));
    assert_eq!(tokens.user.email.as_deref(), Some("jane@example.com"));
    assert!(!tokens.access_token.is_empty());
    assert_ne!(tokens.access_token, tokens.refresh_token);

    let stored = ctx.user(&tokens.user.id).await;
    assert_eq!(stored.emails[0].address, "jane@example.com");
    assert!(!stored.emails[0].verified);
    assert_eq!(stored.refresh_tokens().len(), 1);
    assert_eq!(stored.refresh_tokens()[0].token, sha256_hex(&tokens.refresh_token));
}

#[tokio::test]
async fn test_signup_rejects_taken_email() {
    let ctx = TestContext::new().await.unwrap();
    ctx.signup("jane@example.com", "hunter2").await;

    let err = ctx
        .accounts
        .create_user(new_user(Some("JANE@example.com"), None, Some("other")))
        .await
        .unwrap_err();
    assert_eq!(err, Error::user_input("Email is invalid or already taken."));
}

#[tokio::test]
async fn test_create_user_argument_checks() {
    let ctx = TestContext::new().await.unwrap();

    let err = ctx.accounts.create_user(new_user(None, None, Some("pw"))).await.unwrap_err();
    assert_eq!(err, Error::user_input("Either email or username should be provided."));

    let err = ctx
        .accounts
        .create_user(new_user(Some("not-an-email"), None, Some("pw")))
        .await
        .unwrap_err();
    assert_eq!(err, Error::user_input("Email is invalid or already taken."));

    let err = ctx.accounts.create_user(new_user(None, Some("jane"), None)).await.unwrap_err();
    assert_eq!(err, Error::user_input("Password should be provided if email is not given."));

    let err = ctx
        .accounts
        .create_user(new_user(None, Some("admin"), Some("pw")))
        .await
        .unwrap_err();
    assert_eq!(err, Error::user_input("Username admin is unavailable."));
}

#[tokio::test]
async fn test_username_handles_collide() {
    let ctx = TestContext::new().await.unwrap();
    ctx.accounts
        .create_user(new_user(None, Some("hunter"), Some("pw")))
        .await
        .unwrap();

    for taken in ["Hunter", "hun-ter", "HUN-TER"] {
        let err = ctx
            .accounts
            .create_user(new_user(None, Some(taken), Some("pw")))
            .await
            .unwrap_err();
        assert_eq!(err, Error::user_input(format!("Username {taken} is unavailable.")));
    }

    ctx.accounts
        .create_user(new_user(None, Some("hunter2"), Some("pw")))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_invite_and_enroll() {
    let ctx = TestContext::new().await.unwrap();
    let created = ctx
        .accounts
        .create_user(new_user(Some("invitee@example.com"), None, None))
        .await
        .unwrap();
    let CreatedUser::Invite { user_id, email } = created else {
        panic!("user without a password is invited");
    };
    assert_eq!(email, "invitee@example.com");
    assert!(ctx.user(&user_id).await.refresh_tokens().is_empty());

    ctx.accounts.send_enrollment_email(&email).await.unwrap();
    let message = ctx.mailer.last().await.unwrap();
    assert_eq!(message.to, "invitee@example.com");
    assert!(message.text.contains("/auth/enroll-account/"));

    let token = ctx.last_link_token().await;
    let tokens = ctx
        .accounts
        .enroll_user(Enrollment {
            token: token.clone(),
            password: "s3cret".into(),
            name: Some("Ivy".to_string()),
            username: Some("ivy".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(tokens.user.id, user_id);
    assert_eq!(tokens.user.username.as_deref(), Some("ivy"));

    let stored = ctx.user(&user_id).await;
    assert!(stored.emails[0].verified);
    assert_eq!(stored.name.as_deref(), Some("Ivy"));
    assert_eq!(stored.refresh_tokens().len(), 1);

    ctx.accounts
        .login(Credentials::new("ivy", "s3cret"))
        .await
        .unwrap();

    let err = ctx
        .accounts
        .enroll_user(Enrollment {
            token,
            password: "again".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err, Error::user_input("Invalid token provided."));
}

#[tokio::test]
async fn test_reset_token_cannot_enroll() {
    let ctx = TestContext::new().await.unwrap();
    ctx.accounts
        .create_user(new_user(Some("invitee@example.com"), None, None))
        .await
        .unwrap();

    let issued = ctx.accounts.create_password_reset_token("invitee@example.com").await.unwrap();
    let err = ctx
        .accounts
        .enroll_user(Enrollment {
            token: issued.token,
            password: "s3cret".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err, Error::user_input("Invalid token provided."));
}

#[tokio::test]
async fn test_add_and_remove_email() {
    let ctx = TestContext::new().await.unwrap();
    let jane = ctx.signup("jane@example.com", "pw").await.user;
    ctx.signup("joe@example.com", "pw").await;

    ctx.accounts.add_email(&jane.id, "Jane.Work@Example.com", false).await.unwrap();
    assert_eq!(ctx.user(&jane.id).await.emails.len(), 2);

    let err = ctx.accounts.add_email(&jane.id, "joe@example.com", false).await.unwrap_err();
    assert_eq!(err, Error::user_input("Email is invalid or already taken."));

    let err = ctx.accounts.add_email(&jane.id, "jane@example.com", false).await.unwrap_err();
    assert_eq!(err, Error::user_input("Incorrect userId provided or email already taken."));

    ctx.accounts.remove_email(&jane.id, "jane@example.com").await.unwrap();
    let stored = ctx.user(&jane.id).await;
    assert_eq!(stored.emails.len(), 1);
    assert_eq!(stored.emails[0].address, "jane.work@example.com");

    // The last address of a user without a username stays
    let err = ctx.accounts.remove_email(&jane.id, "jane.work@example.com").await.unwrap_err();
    assert_eq!(err, Error::user_input("Incorrect userId provided or email is unknown."));

    ctx.accounts.set_username(&jane.id, "jane").await.unwrap();
    ctx.accounts.remove_email(&jane.id, "jane.work@example.com").await.unwrap();
    assert!(ctx.user(&jane.id).await.emails.is_empty());
}

#[tokio::test]
async fn test_set_username() {
    let ctx = TestContext::new().await.unwrap();
    let jane = ctx.signup("jane@example.com", "pw").await.user;
    let joe = ctx.signup("joe@example.com", "pw").await.user;

    ctx.accounts.set_username(&jane.id, "Jane-Doe").await.unwrap();
    let stored = ctx.user(&jane.id).await;
    assert_eq!(stored.username.as_deref(), Some("Jane-Doe"));
    assert_eq!(stored.handle.as_deref(), Some("janedoe"));

    let err = ctx.accounts.set_username(&joe.id, "janedoe").await.unwrap_err();
    assert_eq!(err, Error::user_input("Username janedoe is unavailable."));

    let err = ctx.accounts.set_username(&joe.id, "root").await.unwrap_err();
    assert_eq!(err, Error::user_input("Username root is unavailable."));

    let err = ctx.accounts.set_username("usr_missing", "someone").await.unwrap_err();
    assert_eq!(err, Error::user_input("Incorrect userId provided."));
}

#[tokio::test]
async fn test_email_verification() {
    let ctx = TestContext::new().await.unwrap();
    let jane = ctx.signup("jane@example.com", "pw").await.user;

    let issued = ctx.accounts.create_email_verification_token("jane@example.com").await.unwrap();
    let digits = issued.digits.clone().unwrap();
    assert_eq!(digits.len(), 6);
    assert!(digits.chars().all(|c| c.is_ascii_digit()));

    let stored = ctx.user(&jane.id).await;
    assert_eq!(stored.emails[0].token.as_deref(), Some(sha256_hex(&issued.token).as_str()));

    let tokens = ctx.accounts.verify_email(&issued.token).await.unwrap();
    assert_eq!(tokens.user.id, jane.id);

    let stored = ctx.user(&jane.id).await;
    assert!(stored.emails[0].verified);
    assert!(stored.emails[0].token.is_none());
    assert!(stored.emails[0].digits.is_none());
    assert_eq!(stored.refresh_tokens().len(), 2);

    let err = ctx.accounts.verify_email(&issued.token).await.unwrap_err();
    assert_eq!(err, Error::user_input("Invalid or expired token provided."));

    let err = ctx.accounts.create_email_verification_token("nobody@example.com").await.unwrap_err();
    assert_eq!(err, Error::user_input("Email is unknown."));
}

#[tokio::test]
async fn test_verification_mail_links_to_verify_route() {
    let ctx = TestContext::new().await.unwrap();
    ctx.signup("jane@example.com", "pw").await;

    ctx.accounts.send_verification_email("jane@example.com").await.unwrap();
    let message = ctx.mailer.last().await.unwrap();
    assert_eq!(message.subject, "Warden - Confirm your email");
    assert!(message.html.contains("http://localhost:3000/auth/verify-email/"));

    let token = ctx.last_link_token().await;
    ctx.accounts.verify_email(&token).await.unwrap();
}

#[tokio::test]
async fn test_password_reset() {
    let ctx = TestContext::new().await.unwrap();
    let jane = ctx.signup("jane@example.com", "old-password").await.user;

    ctx.accounts.send_reset_password_email("jane@example.com").await.unwrap();
    let token = ctx.last_link_token().await;

    let tokens = ctx.accounts.reset_password(&token, &"new-password".into()).await.unwrap();
    assert_eq!(tokens.user.id, jane.id);

    let stored = ctx.user(&jane.id).await;
    assert!(stored.services.password.as_ref().unwrap().reset.is_none());

    let err = ctx
        .accounts
        .login(Credentials::new("jane@example.com", "old-password"))
        .await
        .unwrap_err();
    assert_eq!(err, Error::user_input("Incorrect credentials provided."));
    ctx.accounts
        .login(Credentials::new("jane@example.com", "new-password"))
        .await
        .unwrap();

    let err = ctx.accounts.reset_password(&token, &"again".into()).await.unwrap_err();
    assert_eq!(err, Error::user_input("Invalid or expired token provided."));
}

#[tokio::test]
async fn test_expired_reset_token_is_rejected() {
    let ctx = TestContext::new().await.unwrap();
    let jane = ctx.signup("jane@example.com", "pw").await.user;

    let issued = ctx.accounts.create_password_reset_token("jane@example.com").await.unwrap();
    assert!(issued.expires.is_some());

    let two_days_ago = chrono::Utc::now().timestamp_millis() - 2 * 86_400_000;
    ctx.accounts
        .users()
        .update_one(&Filter::by_id(&jane.id), &Update::new().set(fields::RESET_WHEN, two_days_ago))
        .await
        .unwrap();

    let err = ctx.accounts.reset_password(&issued.token, &"new".into()).await.unwrap_err();
    assert_eq!(err, Error::user_input("Invalid or expired token provided."));
}

#[tokio::test]
async fn test_reset_token_argument_checks() {
    let ctx = TestContext::new().await.unwrap();

    let err = ctx.accounts.create_password_reset_token("nope").await.unwrap_err();
    assert_eq!(err, Error::user_input("Email is invalid."));

    let err = ctx.accounts.create_password_reset_token("ghost@example.com").await.unwrap_err();
    assert_eq!(err, Error::user_input("Email is unknown."));

    let err = ctx.accounts.reset_password("", &"pw".into()).await.unwrap_err();
    assert_eq!(err, Error::user_input("Invalid token or password provided."));
}

#[tokio::test]
async fn test_reset_drops_legacy_bcrypt_hash() {
    let ctx = TestContext::new().await.unwrap();
    let jane = ctx.signup("jane@example.com", "pw").await.user;

    let legacy = bcrypt::hash(sha256_hex("pw"), 4).unwrap();
    ctx.accounts
        .users()
        .update_one(&Filter::by_id(&jane.id), &Update::new().set(fields::BCRYPT, json!(legacy)))
        .await
        .unwrap();

    let issued = ctx.accounts.create_password_reset_token("jane@example.com").await.unwrap();
    ctx.accounts.reset_password(&issued.token, &"fresh".into()).await.unwrap();

    let stored = ctx.user(&jane.id).await;
    let password = stored.services.password.unwrap();
    assert!(password.bcrypt.is_none());
    assert!(password.argon.is_some());
}
