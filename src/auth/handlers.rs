use axum::{
    extract::{multipart::Field, DefaultBodyLimit, FromRef, Multipart, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::auth::cookies;
use crate::auth::dto::{
    AuthResponse, ChangePasswordRequest, LoginRequest, PublicUser, RefreshRequest,
    TokenPairResponse, UpdateProfileRequest,
};
use crate::auth::extractors::AuthUser;
use crate::auth::jwt::JwtKeys;
use crate::auth::services::{self, RegisterProfile};
use crate::errors::{ApiError, ApiResult};
use crate::media::UploadItem;
use crate::state::AppState;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/refresh", post(refresh))
        .route("/auth/change-password", post(change_password))
        // register carries image files
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me).patch(update_profile))
}

/// POST /auth/register (multipart)
/// Text parts: full_name, username, email, password.
/// File parts: avatar (required), cover_image (optional).
#[instrument(skip(state, multipart))]
pub async fn register(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<PublicUser>)> {
    let mut full_name = String::new();
    let mut username = String::new();
    let mut email = String::new();
    let mut password = String::new();
    let mut avatar: Option<UploadItem> = None;
    let mut cover_image: Option<UploadItem> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("full_name") => full_name = read_text(field).await?,
            Some("username") => username = read_text(field).await?,
            Some("email") => email = read_text(field).await?,
            Some("password") => password = read_text(field).await?,
            Some("avatar") => avatar = read_file(field).await?,
            Some("cover_image") => cover_image = read_file(field).await?,
            _ => {} // unknown parts are ignored
        }
    }

    let avatar = avatar.ok_or_else(|| ApiError::Validation("avatar file is required".into()))?;

    let user = services::register(
        &state,
        RegisterProfile {
            full_name,
            username,
            email,
            password,
        },
        avatar,
        cover_image,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<(HeaderMap, Json<AuthResponse>)> {
    let (user, tokens) =
        services::login(&state, payload.username, payload.email, &payload.password).await?;

    let keys = JwtKeys::from_ref(&state);
    let headers = cookies::session_cookies(&keys, &tokens);
    Ok((
        headers,
        Json(AuthResponse {
            user,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<(StatusCode, HeaderMap)> {
    services::logout(&state, user_id).await?;
    Ok((StatusCode::NO_CONTENT, cookies::clear_session_cookies()))
}

/// POST /auth/refresh — the token comes from the refresh cookie or, failing
/// that, the JSON body.
#[instrument(skip(state, headers, body))]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> ApiResult<(HeaderMap, Json<TokenPairResponse>)> {
    let incoming = cookies::refresh_token_from_headers(&headers)
        .or_else(|| body.map(|Json(b)| b.refresh_token))
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::Auth("unauthorized request".into()))?;

    let tokens = services::refresh(&state, &incoming).await?;

    let keys = JwtKeys::from_ref(&state);
    let cookie_headers = cookies::session_cookies(&keys, &tokens);
    Ok((
        cookie_headers,
        Json(TokenPairResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> ApiResult<StatusCode> {
    services::change_password(&state, user_id, &payload.old_password, &payload.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<PublicUser>> {
    let user = services::current_user(&state, user_id).await?;
    Ok(Json(user))
}

#[instrument(skip(state, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> ApiResult<Json<PublicUser>> {
    let user =
        services::update_profile(&state, user_id, payload.full_name, payload.email).await?;
    Ok(Json(user))
}

async fn read_text(field: Field<'_>) -> ApiResult<String> {
    field
        .text()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid form field: {e}")))
}

/// An empty file part counts as absent, so a blank cover upload does not
/// overwrite a deliberate omission.
async fn read_file(field: Field<'_>) -> ApiResult<Option<UploadItem>> {
    let content_type = field
        .content_type()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "application/octet-stream".into());
    let body = field
        .bytes()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid file field: {e}")))?;
    if body.is_empty() {
        return Ok(None);
    }
    Ok(Some(UploadItem { body, content_type }))
}
