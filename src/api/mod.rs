//! Alert admin API: signup/login plus authenticated CRUD over alerts.
//!
//! Handlers go through the durable store first and mirror `created` rows into
//! the live index, so the index only ever lags the store, never leads it.

mod logging;

use crate::auth::{auth_middleware, ensure_owner, AuthUser, TokenHandler};
use crate::errors::{Result, ServiceError};
use crate::index::PriceIndex;
use crate::models::{Alert, AlertStatus, Direction, Symbol};
use crate::store::AlertRepo;
use async_trait::async_trait;
use axum::extract::{FromRequest, FromRequestParts, Query, Request, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

#[derive(Clone)]
pub struct ApiState {
    pub repo: Arc<dyn AlertRepo>,
    pub index: Arc<dyn PriceIndex>,
    pub tokens: Arc<TokenHandler>,
}

pub fn router(state: ApiState) -> Router {
    let public = Router::new()
        .route("/", get(root))
        .route("/health", get(root))
        .route("/signup", post(sign_up))
        .route("/login", get(login));

    let private = Router::new()
        .route("/alerts/create", post(create_alert))
        .route("/alerts/read", get(read_alerts))
        .route("/alerts/read/filter", get(read_alerts_filtered))
        .route("/alerts/update", put(update_alert))
        .route("/alerts/delete", delete(delete_alert))
        .route_layer(middleware::from_fn_with_state(
            state.tokens.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public)
        .merge(private)
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(logging::request_logging))
        .with_state(state)
}

// Centralized domain-error -> status-code mapping.
impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::BadRequest
            | ServiceError::Validation(_)
            | ServiceError::Duplicate(_)
            | ServiceError::NotFound(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotAuthorized => StatusCode::UNAUTHORIZED,
            ServiceError::SubscriptionFailed | ServiceError::Transient(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "internal server error");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ApiError { error: message })).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

/// `Json` with the rejection downgraded to a plain 400, matching the rest of
/// the boundary errors.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(_) => Err(ServiceError::BadRequest),
        }
    }
}

/// Same for query strings.
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ApiQuery(value)),
            Err(_) => Err(ServiceError::BadRequest),
        }
    }
}

// ---- request / response shapes ----

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SignUpResponse {
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub user_id: i64,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub user: SignUpResponse,
}

#[derive(Debug, Deserialize)]
pub struct CreateAlertRequest {
    pub user_id: i64,
    pub symbol: Symbol,
    pub target_price: Decimal,
    pub direction: Direction,
}

#[derive(Debug, Deserialize)]
pub struct ReadAlertsQuery {
    pub user_id: i64,
    pub limit: i64,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ReadFilteredQuery {
    pub user_id: i64,
    pub status: String,
    pub limit: i64,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAlertRequest {
    pub alert_id: i64,
    pub user_id: i64,
    pub symbol: Symbol,
    pub target_price: Decimal,
    pub direction: Direction,
}

#[derive(Debug, Deserialize)]
pub struct DeleteAlertRequest {
    pub alert_id: i64,
    pub user_id: i64,
}

// ---- validation ----

fn validate_email(email: &str) -> Result<()> {
    if email.contains('@') && email.contains('.') && !email.starts_with('@') {
        Ok(())
    } else {
        Err(ServiceError::validation("invalid email address"))
    }
}

fn validate_password(password: &str) -> Result<()> {
    if password.len() < 7 {
        return Err(ServiceError::validation(
            "password must be at least 7 characters",
        ));
    }
    Ok(())
}

fn validate_price(price: Decimal) -> Result<()> {
    if price < Decimal::ZERO {
        return Err(ServiceError::validation("target price must be non-negative"));
    }
    Ok(())
}

fn validate_page(limit: i64, offset: i64) -> Result<()> {
    if !(1..=100).contains(&limit) {
        return Err(ServiceError::validation("limit must be between 1 and 100"));
    }
    if offset < 0 {
        return Err(ServiceError::validation("offset must be non-negative"));
    }
    Ok(())
}

// ---- handlers ----

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "ok" }))
}

async fn sign_up(
    State(state): State<ApiState>,
    ApiJson(req): ApiJson<SignUpRequest>,
) -> Result<Json<SignUpResponse>> {
    validate_email(&req.email)?;
    validate_password(&req.password)?;

    let hashed = crate::auth::hash_password(&req.password)?;
    let user = state.repo.create_user(&req.email, &hashed).await?;

    Ok(Json(SignUpResponse {
        user_id: user.id,
        created_at: user.created_at,
    }))
}

async fn login(
    State(state): State<ApiState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    validate_email(&req.email)?;
    validate_password(&req.password)?;

    // An unknown user and a wrong password look the same to the caller.
    let user = state.repo.get_user(req.user_id).await.map_err(|e| match e {
        ServiceError::NotFound(_) => ServiceError::NotAuthorized,
        other => other,
    })?;

    crate::auth::verify_password(&req.password, &user.hashed_password)?;

    let (access_token, access_token_expires_at) = state.tokens.create_token(user.id)?;

    Ok(Json(LoginResponse {
        access_token,
        access_token_expires_at,
        user: SignUpResponse {
            user_id: user.id,
            created_at: user.created_at,
        },
    }))
}

async fn create_alert(
    State(state): State<ApiState>,
    Extension(caller): Extension<AuthUser>,
    ApiJson(req): ApiJson<CreateAlertRequest>,
) -> Result<Json<Alert>> {
    ensure_owner(caller, req.user_id)?;
    validate_price(req.target_price)?;

    let alert = state
        .repo
        .create_alert(req.user_id, req.symbol, req.target_price, req.direction)
        .await?;

    // The row is durable either way; a missed index add is rolled forward by
    // the startup reconciliation pass.
    if let Err(e) = state
        .index
        .add(alert.id, alert.symbol, alert.target_price, alert.direction)
        .await
    {
        warn!(alert_id = alert.id, error = %e, "alert stored but not indexed");
    }

    Ok(Json(alert))
}

async fn read_alerts(
    State(state): State<ApiState>,
    Extension(caller): Extension<AuthUser>,
    ApiQuery(query): ApiQuery<ReadAlertsQuery>,
) -> Result<Json<Vec<Alert>>> {
    ensure_owner(caller, query.user_id)?;
    let offset = query.offset.unwrap_or(0);
    validate_page(query.limit, offset)?;

    let alerts = state.repo.list_alerts(query.user_id, query.limit, offset).await?;
    Ok(Json(alerts))
}

async fn read_alerts_filtered(
    State(state): State<ApiState>,
    Extension(caller): Extension<AuthUser>,
    ApiQuery(query): ApiQuery<ReadFilteredQuery>,
) -> Result<Json<Vec<Alert>>> {
    ensure_owner(caller, query.user_id)?;
    let offset = query.offset.unwrap_or(0);
    validate_page(query.limit, offset)?;

    let status = AlertStatus::from_str(&query.status)
        .ok_or_else(|| ServiceError::validation(format!("unknown status: {}", query.status)))?;

    let alerts = state
        .repo
        .list_alerts_by_status(query.user_id, status, query.limit, offset)
        .await?;
    Ok(Json(alerts))
}

async fn update_alert(
    State(state): State<ApiState>,
    Extension(caller): Extension<AuthUser>,
    ApiJson(req): ApiJson<UpdateAlertRequest>,
) -> Result<Json<Alert>> {
    ensure_owner(caller, req.user_id)?;
    validate_price(req.target_price)?;

    let existing = state.repo.get_alert(req.alert_id).await?;
    if existing.user_id != caller.0 {
        return Err(ServiceError::NotAuthorized);
    }

    let updated = state
        .repo
        .update_alert(req.alert_id, req.symbol, req.target_price, req.direction)
        .await?;

    // Keep the live index in step: drop the stale entry, insert the new one.
    if let Err(e) = state
        .index
        .remove(existing.id, existing.symbol, existing.direction)
        .await
    {
        warn!(alert_id = existing.id, error = %e, "stale index entry not removed");
    }
    if let Err(e) = state
        .index
        .add(updated.id, updated.symbol, updated.target_price, updated.direction)
        .await
    {
        warn!(alert_id = updated.id, error = %e, "updated alert not re-indexed");
    }

    Ok(Json(updated))
}

async fn delete_alert(
    State(state): State<ApiState>,
    Extension(caller): Extension<AuthUser>,
    ApiJson(req): ApiJson<DeleteAlertRequest>,
) -> Result<Json<serde_json::Value>> {
    ensure_owner(caller, req.user_id)?;

    let existing = state.repo.get_alert(req.alert_id).await?;
    if existing.user_id != caller.0 {
        return Err(ServiceError::NotAuthorized);
    }

    state
        .repo
        .update_status(req.alert_id, AlertStatus::Deleted)
        .await?;

    if let Err(e) = state
        .index
        .remove(existing.id, existing.symbol, existing.direction)
        .await
    {
        warn!(alert_id = existing.id, error = %e, "deleted alert left in index");
    }

    Ok(Json(serde_json::json!({ "message": "ok" })))
}
