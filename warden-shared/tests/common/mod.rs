//! Shared helpers for the integration tests
#![allow(dead_code)]

use std::sync::Arc;
use warden_shared::accounts::{Accounts, AccountsConfig, CreatedUser, NewUser};
use warden_shared::auth::jwt::TokenCodec;
use warden_shared::auth::password::HashParams;
use warden_shared::db::query::Filter;
use warden_shared::db::Db;
use warden_shared::mail::MemoryMailer;
use warden_shared::models::user::{AuthTokenResult, UserDocument};

pub const TEST_SECRET: &str = "integration-test-secret-at-least-32-chars";

/// Accounts over an in-memory store with a capturing mailer
pub struct TestContext {
    pub db: Db,
    pub accounts: Accounts,
    pub mailer: MemoryMailer,
}

impl TestContext {
    pub async fn new() -> anyhow::Result<Self> {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AccountsConfig) -> anyhow::Result<Self> {
        let db = Db::memory();
        let mailer = MemoryMailer::new();
        let accounts = Accounts::new(&db, TokenCodec::new(TEST_SECRET), Arc::new(mailer.clone()), config);
        accounts.ensure_indexes().await?;

        Ok(Self { db, accounts, mailer })
    }

    /// Signs up a user with an email and password
    pub async fn signup(&self, email: &str, password: &str) -> AuthTokenResult {
        let created = self
            .accounts
            .create_user(NewUser {
                email: Some(email.to_string()),
                password: Some(password.into()),
                ..Default::default()
            })
            .await
            .expect("signup");

        match created {
            CreatedUser::Account(tokens) => tokens,
            CreatedUser::Invite { .. } => panic!("signup with a password should start a session"),
        }
    }

    pub async fn user(&self, id: &str) -> UserDocument {
        self.accounts
            .users()
            .find_one(&Filter::by_id(id))
            .await
            .expect("find user")
            .expect("user exists")
    }

    /// Token from the magic link in the most recent mail
    pub async fn last_link_token(&self) -> String {
        let message = self.mailer.last().await.expect("a mail was sent");
        let link = message
            .text
            .lines()
            .find(|line| line.starts_with("http"))
            .expect("mail carries a link")
            .to_string();
        link.rsplit('/').next().unwrap_or_default().to_string()
    }
}

pub fn test_config() -> AccountsConfig {
    AccountsConfig {
        hash_params: HashParams::low_cost(),
        ..Default::default()
    }
}

/// Connects to PostgreSQL when DATABASE_URL is set
pub async fn postgres() -> Option<Db> {
    let url = std::env::var("DATABASE_URL").ok()?;
    Some(Db::open(Some(&url), 5).await.expect("connect to DATABASE_URL"))
}

/// Collection name that does not collide across test runs
pub fn unique_collection(prefix: &str) -> String {
    format!("{}_{}", prefix, warden_shared::id::random_string(8).to_lowercase())
}
