use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            ChangePasswordRequest, ForgotPasswordRequest, ForgotPasswordResponse, LoginRequest,
            MessageResponse, RefreshRequest, RegisterRequest, ResetPasswordRequest, TokenPair,
            UserResponse,
        },
        repo_types::NewUser,
        services::{
            generate_reset_token, hash_password, is_valid_email, issue_token_pair,
            verify_password, AuthUser, JwtKeys, TokenKind,
        },
    },
    error::AuthError,
    state::AppState,
};

const RESET_MESSAGE: &str = "If the email exists, a reset token has been generated";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/me", get(me))
        .route("/auth/change-password", post(change_password))
        .route("/auth/logout", post(logout))
}

fn check_password_strength(password: &str) -> Result<(), AuthError> {
    if password.len() < 8 {
        warn!("password too short");
        return Err(AuthError::Validation("Password too short".into()));
    }
    Ok(())
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<TokenPair>), AuthError> {
    payload.email = payload.email.trim().to_lowercase();
    payload.username = payload.username.trim().to_string();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(AuthError::Validation("Invalid email".into()));
    }
    if payload.username.is_empty() {
        return Err(AuthError::Validation("Username required".into()));
    }
    check_password_strength(&payload.password)?;

    // Fast-path duplicate checks; the store's unique index stays the
    // source of truth when two registrations race.
    if state.store.find_by_email(&payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(AuthError::DuplicateIdentity("email"));
    }
    if state
        .store
        .find_by_username(&payload.username)
        .await?
        .is_some()
    {
        warn!(username = %payload.username, "username already taken");
        return Err(AuthError::DuplicateIdentity("username"));
    }

    let hash = hash_password(&payload.password)?;
    let user = state
        .store
        .insert(NewUser {
            email: payload.email,
            username: payload.username,
            password_hash: hash,
        })
        .await?;

    let keys = JwtKeys::from_ref(&state);
    let tokens = issue_token_pair(&keys, user.id)?;
    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((StatusCode::CREATED, Json(tokens)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<TokenPair>, AuthError> {
    payload.email = payload.email.trim().to_lowercase();

    let user = state
        .store
        .find_by_email(&payload.email)
        .await?
        .ok_or_else(|| {
            warn!(email = %payload.email, "login unknown email");
            AuthError::InvalidCredentials
        })?;

    if !verify_password(&payload.password, &user.password_hash) {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AuthError::InvalidCredentials);
    }

    let keys = JwtKeys::from_ref(&state);
    let tokens = issue_token_pair(&keys, user.id)?;
    info!(user_id = %user.id, "user logged in");
    Ok(Json(tokens))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, AuthError> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_kind(&payload.refresh_token, TokenKind::Refresh)?;

    // The subject may have vanished since the token was issued.
    let user = state
        .store
        .find_by_id(claims.sub)
        .await?
        .ok_or(AuthError::InvalidToken)?;

    let tokens = issue_token_pair(&keys, user.id)?;
    debug!(user_id = %user.id, "token pair refreshed");
    Ok(Json(tokens))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<ForgotPasswordResponse>, AuthError> {
    let email = payload.email.trim().to_lowercase();

    // Uniform response whether or not the account exists, so the
    // endpoint cannot be used to enumerate emails.
    let Some(user) = state.store.find_by_email(&email).await? else {
        return Ok(Json(ForgotPasswordResponse {
            message: RESET_MESSAGE.into(),
            reset_token: None,
        }));
    };

    let token = generate_reset_token();
    let expires_at =
        OffsetDateTime::now_utc() + TimeDuration::hours(state.config.reset.token_ttl_hours);
    state
        .store
        .set_reset_token(user.id, &token, expires_at)
        .await?;
    info!(user_id = %user.id, "reset token issued");

    // In production the token goes out by email, never in the response.
    let reset_token = state.config.reset.expose_token.then_some(token);
    Ok(Json(ForgotPasswordResponse {
        message: RESET_MESSAGE.into(),
        reset_token,
    }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    check_password_strength(&payload.new_password)?;

    let user = state
        .store
        .find_by_reset_token(&payload.token)
        .await?
        .ok_or(AuthError::InvalidResetToken)?;

    let hash = hash_password(&payload.new_password)?;
    // One update: new hash in, token gone. The token is single-use.
    state.store.reset_password(user.id, &hash).await?;

    info!(user_id = %user.id, "password reset");
    Ok(Json(MessageResponse::new("Password reset successful")))
}

#[instrument(skip(state))]
pub async fn me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UserResponse>, AuthError> {
    let user = state
        .store
        .find_by_id(user_id)
        .await?
        .ok_or(AuthError::NotFound)?;
    Ok(Json(UserResponse::from(user)))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    let user = state
        .store
        .find_by_id(user_id)
        .await?
        .ok_or(AuthError::NotFound)?;

    if !verify_password(&payload.old_password, &user.password_hash) {
        warn!(user_id = %user.id, "change password with wrong old password");
        return Err(AuthError::Validation("Invalid old password".into()));
    }
    check_password_strength(&payload.new_password)?;

    let hash = hash_password(&payload.new_password)?;
    state.store.update_password(user.id, &hash).await?;

    info!(user_id = %user.id, "password changed");
    Ok(Json(MessageResponse::new("Password changed successfully")))
}

/// Tokens are stateless, so there is nothing to revoke server-side;
/// the client discards its pair.
#[instrument(skip_all)]
pub async fn logout(AuthUser(user_id): AuthUser) -> Json<MessageResponse> {
    debug!(user_id = %user_id, "logout");
    Json(MessageResponse::new("Logged out successfully"))
}
