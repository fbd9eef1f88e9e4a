//! Selah - Bible Study Backend
//!
//! LLM study-guide generation behind a content-addressed cache, a token
//! economy with daily and purchased balances, payment-gateway subscription
//! reconciliation, and SM-2 spaced repetition for memorized verses.

pub mod auth;
pub mod billing;
pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod fingerprint;
pub mod guides;
pub mod jobs;
pub mod llm;
pub mod memory;
pub mod middleware;
pub mod server;
pub mod sessions;
pub mod tokens;

// Re-export main types
pub use config::Config;
pub use database::Database;
pub use error::{Error, Result};
pub use server::AppState;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.0");
    }
}
