//! Request middleware: principal extraction.

pub mod auth;

pub use auth::{OptionalPrincipal, RequirePrincipal, RequireUser};
