//! HTTP handlers for broker-auth.

pub mod account;
pub mod auth;
pub mod user;

pub use account::*;
pub use auth::*;
pub use user::*;
