//! # Warden Shared Library
//!
//! Core of the Warden account service, used by the API server and the
//! job worker.
//!
//! ## Module Organization
//!
//! - `error`: caller-facing error taxonomy with status codes
//! - `id`: prefixed primary keys and random tokens
//! - `auth`: password credentials, token codec and token pair issuance
//! - `db`: document store capability (memory and PostgreSQL), typed
//!   collections and cursor pagination
//! - `models`: user and job documents
//! - `mail`: outgoing mail capability
//! - `accounts`: registration, credentials and the session lifecycle

pub mod accounts;
pub mod auth;
pub mod db;
pub mod error;
pub mod id;
pub mod mail;
pub mod models;

/// Current version of the Warden shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
