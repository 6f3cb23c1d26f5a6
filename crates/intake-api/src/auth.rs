use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use intake_types::api::{
    AuthResponse, Claims, LoginRequest, SignupRequest, UpdateProfileRequest, UpdateRoleRequest,
    UserProfile,
};
use intake_types::models::Role;

use crate::convert;
use crate::error::{ApiError, ApiResult};
use crate::middleware::require_admin;
use crate::state::{AppState, blocking};

const TOKEN_LIFETIME_DAYS: i64 = 30;

/// POST /auth/signup. New accounts are always clients; staff roles are
/// granted by an admin afterwards.
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let email = req.email.trim().to_lowercase();
    let name = req.name.trim().to_string();

    let lookup = email.clone();
    if blocking(&state, move |s| s.db.get_user_by_email(&lookup))
        .await?
        .is_some()
    {
        return Err(duplicate_email());
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?
        .to_string();

    let user_id = Uuid::new_v4();
    let row = {
        let (email, name) = (email.clone(), name.clone());
        blocking(&state, move |s| {
            let id = user_id.to_string();
            // A concurrent signup can take the email between lookup and insert
            match s.db.create_user(&id, &email, &name, Role::Client.as_str(), &password_hash) {
                Err(e) if intake_db::is_unique_violation(&e) => return Ok(None),
                other => other?,
            }
            let row = s
                .db
                .get_user_by_id(&id)?
                .ok_or_else(|| anyhow::anyhow!("user {id} vanished after insert"))?;
            Ok(Some(row))
        })
        .await?
        .ok_or_else(duplicate_email)?
    };

    info!("New account {} ({})", user_id, email);
    let user = convert::profile(&row)?;
    let token = create_token(&state.jwt_secret, &user)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            redirect: user.role.home_path().to_string(),
            user,
        }),
    ))
}

/// POST /auth/login. The response tells the front end which dashboard the
/// role lands on.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let email = req.email.trim().to_lowercase();
    let row = blocking(&state, move |s| s.db.get_user_by_email(&email))
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&row.password)
        .map_err(|e| anyhow::anyhow!("stored hash for {} is invalid: {e}", row.id))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| {
            warn!("Failed login for {}", row.email);
            ApiError::InvalidCredentials
        })?;

    let user = convert::profile(&row)?;
    let token = create_token(&state.jwt_secret, &user)?;

    Ok(Json(AuthResponse {
        token,
        redirect: user.role.home_path().to_string(),
        user,
    }))
}

/// GET /me
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UserProfile>> {
    let id = claims.sub.to_string();
    let row = blocking(&state, move |s| s.db.get_user_by_id(&id))
        .await?
        .ok_or(ApiError::NotFound("User"))?;
    Ok(Json(convert::profile(&row)?))
}

/// PATCH /me
pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<UserProfile>> {
    req.validate()?;

    let id = claims.sub.to_string();
    let name = req.name.map(|n| n.trim().to_string());
    let row = blocking(&state, move |s| {
        s.db.update_profile(&id, name.as_deref(), req.avatar_url.as_deref())
    })
    .await?
    .ok_or(ApiError::NotFound("User"))?;
    Ok(Json(convert::profile(&row)?))
}

/// PUT /admin/users/{id}/role. Takes effect at the user's next login, since
/// the role travels in the token.
pub async fn set_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateRoleRequest>,
) -> ApiResult<Json<UserProfile>> {
    require_admin(&claims)?;
    if user_id == claims.sub && req.role != Role::Admin {
        return Err(ApiError::BadRequest(
            "Admins cannot remove their own admin role".into(),
        ));
    }

    let id = user_id.to_string();
    let row = blocking(&state, move |s| {
        if !s.db.set_user_role(&id, req.role.as_str())? {
            return Ok(None);
        }
        s.db.get_user_by_id(&id)
    })
    .await?
    .ok_or(ApiError::NotFound("User"))?;

    info!("{} set role of {} to {}", claims.sub, user_id, req.role);
    Ok(Json(convert::profile(&row)?))
}

fn duplicate_email() -> ApiError {
    ApiError::Conflict("An account with this email already exists".into())
}

pub fn create_token(secret: &str, user: &UserProfile) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        name: user.name.clone(),
        role: user.role,
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_LIFETIME_DAYS)).timestamp()
            as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
