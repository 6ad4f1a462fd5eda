pub mod auth;

pub use auth::{CurrentBroker, CurrentIdentity};
