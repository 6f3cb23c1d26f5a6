use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use intake_types::api::Claims;
use intake_types::models::Role;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Extract and validate the bearer JWT, then make its claims available to
/// handlers as `Extension<Claims>`.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(ApiError::Unauthorized)?;

    let token_data = decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        debug!("Rejected token: {}", e);
        ApiError::Unauthorized
    })?;

    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}

/// Role guard for handlers behind `require_auth`.
pub fn require_role(claims: &Claims, allowed: &[Role]) -> ApiResult<()> {
    if allowed.contains(&claims.role) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("You do not have access to this resource"))
    }
}

pub fn require_staff(claims: &Claims) -> ApiResult<()> {
    require_role(claims, &[Role::Reviewer, Role::Admin])
}

pub fn require_admin(claims: &Claims) -> ApiResult<()> {
    require_role(claims, &[Role::Admin])
}

pub fn require_client(claims: &Claims) -> ApiResult<()> {
    require_role(claims, &[Role::Client])
}
