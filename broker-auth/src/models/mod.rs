pub mod identity;
pub mod permission;
pub mod service_account;
pub mod token;

pub use identity::{
    normalize_email, Identity, IdentityProfile, IdentityRow, IdentityScope, Role,
};
pub use permission::{ClientPermissions, Permission, PermissionEntry};
pub use service_account::{ServiceAccount, ServiceAccountRef};
pub use token::TokenType;
