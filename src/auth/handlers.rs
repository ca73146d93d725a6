use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, instrument};

use crate::{
    auth::{
        dto::{
            ForgotPasswordRequest, LoginRequest, LoginResponse, MessageResponse, RegisterRequest,
            RegisterResponse, ResetPasswordRequest, ResetTokenResponse, ValidateResetQuery,
        },
        extractors::{limit_by_ip, require_session, AuthUser, ClientIp, JsonBody},
        repo_types::PublicUser,
    },
    error::{AppError, AppResult},
    state::AppState,
};

pub const FORGOT_PASSWORD_REPLY: &str =
    "If your email is registered, you will receive a password reset link shortly.";
pub const RESET_DONE_REPLY: &str =
    "Password reset successful. Please login with your new password.";

/// Public routes, each spending the caller's per-IP request budget.
pub fn auth_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/validate-reset-token", get(validate_reset_token))
        .route("/auth/reset-password", post(reset_password))
        .route_layer(middleware::from_fn_with_state(state, limit_by_ip))
}

/// Routes behind the session gate.
pub fn session_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/logout", post(logout))
        .route("/profile", get(profile))
        .route_layer(middleware::from_fn_with_state(state, require_session))
}

#[instrument(skip(state, ip, payload))]
pub async fn register(
    State(state): State<AppState>,
    ip: ClientIp,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let user = state
        .auth
        .register(
            &payload.username,
            &payload.email,
            &payload.password,
            ip.as_deref(),
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "user registered successfully",
            user,
        }),
    ))
}

#[instrument(skip(state, ip, payload))]
pub async fn login(
    State(state): State<AppState>,
    ip: ClientIp,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let (token, user) = state
        .auth
        .login(&payload.username, &payload.password, ip.as_deref())
        .await?;
    Ok(Json(LoginResponse { token, user }))
}

#[instrument(skip_all, fields(user_id = user.user_id))]
pub async fn logout(
    State(state): State<AppState>,
    ip: ClientIp,
    user: AuthUser,
) -> Json<MessageResponse> {
    state.auth.logout(&user, ip.as_deref());
    Json(MessageResponse {
        message: "logout successful",
    })
}

#[instrument(skip_all, fields(user_id = user.user_id))]
pub async fn profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<PublicUser>> {
    Ok(Json(state.auth.profile(user.user_id).await?))
}

/// Replies identically whether or not the email is registered; only a
/// malformed address is reported.
#[instrument(skip(state, ip, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    ip: ClientIp,
    JsonBody(payload): JsonBody<ForgotPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    match state
        .auth
        .request_password_reset(&payload.email, ip.as_deref())
        .await
    {
        Ok(()) => {}
        Err(e @ AppError::Validation(_)) => return Err(e),
        Err(e) => error!(error = %e, "password reset request failed"),
    }
    Ok(Json(MessageResponse {
        message: FORGOT_PASSWORD_REPLY,
    }))
}

#[instrument(skip_all)]
pub async fn validate_reset_token(
    State(state): State<AppState>,
    ip: ClientIp,
    Query(query): Query<ValidateResetQuery>,
) -> AppResult<Json<ResetTokenResponse>> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::validation("reset token is required"))?;
    let email = state
        .auth
        .validate_reset_token(&token, ip.as_deref())
        .await?;
    Ok(Json(ResetTokenResponse { email }))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    ip: ClientIp,
    JsonBody(payload): JsonBody<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    if payload.token.is_empty()
        || payload.new_password.is_empty()
        || payload.confirm_password.is_empty()
    {
        return Err(AppError::validation("all fields are required"));
    }
    if payload.new_password != payload.confirm_password {
        return Err(AppError::validation("passwords do not match"));
    }
    state
        .auth
        .reset_password(&payload.token, &payload.new_password, ip.as_deref())
        .await?;
    Ok(Json(MessageResponse {
        message: RESET_DONE_REPLY,
    }))
}
