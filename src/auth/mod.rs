//! Authentication: token issuance/verification and password hashing.

mod middleware;
mod token;

pub use middleware::{auth_middleware, ensure_owner, AuthUser};
pub use token::TokenHandler;

use crate::errors::{Result, ServiceError};

/// Bcrypt hash of a password.
pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(ServiceError::transient)
}

/// Checks a password against its stored hash; a mismatch is `NotAuthorized`.
pub fn verify_password(password: &str, hashed: &str) -> Result<()> {
    match bcrypt::verify(password, hashed) {
        Ok(true) => Ok(()),
        Ok(false) => Err(ServiceError::NotAuthorized),
        Err(e) => Err(ServiceError::transient(e)),
    }
}
