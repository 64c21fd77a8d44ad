/// API route handlers
///
/// - `health`: Health check endpoint
/// - `auth`: Account and session endpoints

pub mod auth;
pub mod health;
