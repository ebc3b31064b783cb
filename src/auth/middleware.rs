//! Bearer-token middleware for the private alert routes.

use crate::auth::TokenHandler;
use crate::errors::{Result, ServiceError};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

/// Authenticated caller, inserted into request extensions by the middleware.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub i64);

/// Validates the `Authorization: Bearer <token>` header and exposes the
/// token subject to handlers.
pub async fn auth_middleware(
    State(tokens): State<Arc<TokenHandler>>,
    mut req: Request,
    next: Next,
) -> std::result::Result<Response, ServiceError> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or(ServiceError::NotAuthorized)?;

    let user_id = tokens.verify_token(token)?;
    req.extensions_mut().insert(AuthUser(user_id));

    Ok(next.run(req).await)
}

/// Requests name the user they act for; the token subject must match.
pub fn ensure_owner(caller: AuthUser, user_id: i64) -> Result<()> {
    if caller.0 != user_id {
        return Err(ServiceError::NotAuthorized);
    }
    Ok(())
}
