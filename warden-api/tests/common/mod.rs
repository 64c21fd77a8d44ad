//! Common test utilities for the API integration tests
//!
//! Builds the router over an in-memory store with a capturing mailer and
//! drives it in-process.
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use warden_api::app::{build_router, AppState};
use warden_api::config::{AccountSettings, ApiConfig, Config, DatabaseConfig, JwtConfig};
use warden_shared::accounts::Accounts;
use warden_shared::auth::jwt::TokenCodec;
use warden_shared::auth::password::HashParams;
use warden_shared::db::Db;
use warden_shared::mail::MemoryMailer;

pub const TEST_SECRET: &str = "api-test-secret-key-at-least-32-chars";

pub fn test_config() -> Config {
    Config {
        api: ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
        },
        database: DatabaseConfig {
            url: None,
            max_connections: 1,
        },
        jwt: JwtConfig {
            secret: TEST_SECRET.to_string(),
        },
        accounts: AccountSettings::default(),
    }
}

/// Test context containing the router and its collaborators
pub struct TestContext {
    pub db: Db,
    pub accounts: Accounts,
    pub mailer: MemoryMailer,
    pub app: axum::Router,
}

impl TestContext {
    pub async fn new() -> anyhow::Result<Self> {
        let config = test_config();
        let db = Db::memory();
        let mailer = MemoryMailer::new();

        let mut accounts_config = config.accounts_config();
        accounts_config.hash_params = HashParams::low_cost();
        let accounts = Accounts::new(
            &db,
            TokenCodec::new(&config.jwt.secret),
            Arc::new(mailer.clone()),
            accounts_config,
        );
        accounts.ensure_indexes().await?;

        let app = build_router(AppState::new(db.clone(), accounts.clone(), config));

        Ok(Self {
            db,
            accounts,
            mailer,
            app,
        })
    }

    /// Sends a request and returns the status with the parsed JSON body
    pub async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, json)
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send("POST", uri, Some(body)).await
    }

    /// Token from the magic link of the last mail
    pub async fn last_link_token(&self) -> String {
        let message = self.mailer.last().await.expect("no mail was sent");
        let link = message
            .text
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with("http"))
            .expect("mail has no link")
            .to_string();
        link.rsplit('/').next().unwrap().to_string()
    }

    /// Signs up through the API and returns the session body
    pub async fn signup(&self, email: &str, password: &str) -> Value {
        let (status, body) = self
            .post("/auth/create-account", json!({ "email": email, "password": password }))
            .await;
        assert_eq!(status, StatusCode::OK, "signup failed: {}", body);
        body
    }
}
