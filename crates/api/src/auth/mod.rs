//! Credential validation: JWT user tokens and the service API key.

pub mod jwt;

/// Role name carried by administrator tokens.
pub const ROLE_ADMIN: &str = "admin";

/// Role name carried by regular user tokens.
pub const ROLE_USER: &str = "user";
