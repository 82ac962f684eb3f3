use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::dto::PublicUser;
use crate::auth::jwt::JwtKeys;
use crate::auth::password::{hash_password, verify_password};
use crate::auth::repo::NewUser;
use crate::auth::repo_types::User;
use crate::errors::{ApiError, ApiResult};
use crate::media::{self, UploadItem};
use crate::state::AppState;

const MIN_PASSWORD_LEN: usize = 8;

/// Profile fields collected from the registration form, pre-validation.
#[derive(Debug)]
pub struct RegisterProfile {
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

/// The access/refresh pair issued to a user at login or refresh.
#[derive(Debug)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn require_field(value: &str, name: &str) -> ApiResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::Validation(format!("{name} is required")));
    }
    Ok(trimmed.to_string())
}

fn validate_new_password(password: &str) -> ApiResult<()> {
    if password.trim().is_empty() {
        return Err(ApiError::Validation("password is required".into()));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation("password too short".into()));
    }
    Ok(())
}

/// Reuse/replay defense: a presented refresh token must exactly match the one
/// currently stored on the user row. Anything else (cleared by logout, rotated
/// away, never issued) is treated as consumed.
pub(crate) fn ensure_refresh_matches(stored: Option<&str>, presented: &str) -> ApiResult<()> {
    match stored {
        Some(current) if current == presented => Ok(()),
        _ => Err(ApiError::Auth(
            "refresh token is expired or already used".into(),
        )),
    }
}

async fn issue_session(st: &AppState, user_id: Uuid) -> ApiResult<SessionTokens> {
    let keys = JwtKeys::from_ref(st);
    let access_token = keys.sign_access(user_id)?;
    let refresh_token = keys.sign_refresh(user_id)?;
    User::set_refresh_token(&st.db, user_id, Some(&refresh_token)).await?;
    Ok(SessionTokens {
        access_token,
        refresh_token,
    })
}

/// Create a user account.
///
/// Order matters: field validation, then the uniqueness check, then the media
/// uploads, then a single insert. A failed required upload or a taken
/// username/email aborts with no row written.
pub async fn register(
    st: &AppState,
    profile: RegisterProfile,
    avatar: UploadItem,
    cover_image: Option<UploadItem>,
) -> ApiResult<PublicUser> {
    let full_name = require_field(&profile.full_name, "full_name")?;
    let username = require_field(&profile.username, "username")?.to_lowercase();
    let email = require_field(&profile.email, "email")?.to_lowercase();
    if !is_valid_email(&email) {
        return Err(ApiError::Validation("invalid email".into()));
    }
    validate_new_password(&profile.password)?;

    if User::username_or_email_taken(&st.db, &username, &email).await? {
        warn!(%username, %email, "registration conflict");
        return Err(ApiError::Conflict("username or email already in use".into()));
    }

    // Avatar is required; the cover image is best-effort. The two uploads are
    // independent, so run them concurrently when both are present.
    let (avatar_url, cover_image_url) = match cover_image {
        Some(cover) => {
            let (avatar_res, cover_res) = tokio::join!(
                media::upload_image(st, "avatars", avatar),
                media::upload_image(st, "covers", cover),
            );
            let avatar_url = avatar_res?;
            let cover_image_url = match cover_res {
                Ok(url) => Some(url),
                Err(err) => {
                    warn!(error = %err, "cover image upload failed, continuing without one");
                    None
                }
            };
            (avatar_url, cover_image_url)
        }
        None => (media::upload_image(st, "avatars", avatar).await?, None),
    };

    let password_hash = hash_password(&profile.password)?;
    let user = User::create(
        &st.db,
        NewUser {
            username: &username,
            email: &email,
            full_name: &full_name,
            password_hash: &password_hash,
            avatar_url: &avatar_url,
            cover_image_url: cover_image_url.as_deref(),
        },
    )
    .await?;

    info!(user_id = %user.id, %username, "user registered");
    Ok(user.into())
}

/// Verify credentials and open a session: NONE -> ACTIVE.
///
/// The freshly signed refresh token overwrites whatever was stored, so any
/// previously issued refresh token for this user stops being valid.
pub async fn login(
    st: &AppState,
    username: Option<String>,
    email: Option<String>,
    password: &str,
) -> ApiResult<(PublicUser, SessionTokens)> {
    let username = username
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);
    let email = email
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);
    if username.is_none() && email.is_none() {
        return Err(ApiError::Validation("username or email is required".into()));
    }

    let user = User::find_by_username_or_email(&st.db, username.as_deref(), email.as_deref())
        .await?
        .ok_or_else(|| ApiError::NotFound("user does not exist".into()))?;

    if !verify_password(password, &user.password_hash)? {
        warn!(user_id = %user.id, "login with invalid password");
        return Err(ApiError::Auth("invalid user credentials".into()));
    }

    let tokens = issue_session(st, user.id).await?;
    info!(user_id = %user.id, "user logged in");
    Ok((user.into(), tokens))
}

/// Close the session: ACTIVE -> NONE. Safe to call repeatedly.
pub async fn logout(st: &AppState, user_id: Uuid) -> ApiResult<()> {
    User::set_refresh_token(&st.db, user_id, None).await?;
    info!(%user_id, "user logged out");
    Ok(())
}

/// Rotate the session: ACTIVE -> ACTIVE' with a new token pair.
///
/// The incoming token must verify against the refresh secret AND equal the
/// stored value; a token that was already rotated away fails the second check.
pub async fn refresh(st: &AppState, incoming: &str) -> ApiResult<SessionTokens> {
    let keys = JwtKeys::from_ref(st);
    let claims = keys
        .verify_refresh(incoming)
        .map_err(|_| ApiError::Auth("invalid refresh token".into()))?;

    let user = User::find_by_id(&st.db, claims.sub)
        .await?
        .ok_or_else(|| ApiError::Auth("invalid refresh token".into()))?;

    ensure_refresh_matches(user.refresh_token.as_deref(), incoming)?;

    let tokens = issue_session(st, user.id).await?;
    info!(user_id = %user.id, "refresh token rotated");
    Ok(tokens)
}

pub async fn change_password(
    st: &AppState,
    user_id: Uuid,
    old_password: &str,
    new_password: &str,
) -> ApiResult<()> {
    let user = User::find_by_id(&st.db, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user does not exist".into()))?;

    if !verify_password(old_password, &user.password_hash)? {
        return Err(ApiError::Auth("invalid old password".into()));
    }
    validate_new_password(new_password)?;

    let hash = hash_password(new_password)?;
    User::set_password_hash(&st.db, user_id, &hash).await?;
    info!(%user_id, "password changed");
    Ok(())
}

pub async fn update_profile(
    st: &AppState,
    user_id: Uuid,
    full_name: Option<String>,
    email: Option<String>,
) -> ApiResult<PublicUser> {
    if full_name.is_none() && email.is_none() {
        return Err(ApiError::Validation(
            "at least one of full_name or email is required".into(),
        ));
    }

    let full_name = full_name
        .map(|f| require_field(&f, "full_name"))
        .transpose()?;
    let email = email
        .map(|e| {
            let email = require_field(&e, "email")?.to_lowercase();
            if !is_valid_email(&email) {
                return Err(ApiError::Validation("invalid email".into()));
            }
            Ok(email)
        })
        .transpose()?;

    if let Some(email) = email.as_deref() {
        if let Some(other) = User::find_by_username_or_email(&st.db, None, Some(email)).await? {
            if other.id != user_id {
                return Err(ApiError::Conflict("email already in use".into()));
            }
        }
    }

    let user = User::update_profile(&st.db, user_id, full_name.as_deref(), email.as_deref()).await?;
    info!(%user_id, "profile updated");
    Ok(user.into())
}

pub async fn current_user(st: &AppState, user_id: Uuid) -> ApiResult<PublicUser> {
    let user = User::find_by_id(&st.db, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user does not exist".into()))?;
    Ok(user.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation_accepts_ordinary_addresses() {
        assert!(is_valid_email("ann@x.com"));
        assert!(is_valid_email("a.b+tag@sub.domain.io"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("spaces in@x.com"));
        assert!(!is_valid_email("ann@nodot"));
    }

    #[test]
    fn require_field_trims_and_rejects_blank() {
        assert_eq!(require_field("  ann  ", "username").unwrap(), "ann");
        assert!(matches!(
            require_field("   ", "username"),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn new_password_rules() {
        assert!(validate_new_password("longenough").is_ok());
        assert!(matches!(
            validate_new_password("short"),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            validate_new_password("        "),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn refresh_match_accepts_only_the_stored_token() {
        assert!(ensure_refresh_matches(Some("tok-a"), "tok-a").is_ok());
    }

    #[test]
    fn refresh_match_rejects_rotated_or_cleared_tokens() {
        // Rotated: store holds the newer token.
        assert!(matches!(
            ensure_refresh_matches(Some("tok-b"), "tok-a"),
            Err(ApiError::Auth(_))
        ));
        // Cleared by logout.
        assert!(matches!(
            ensure_refresh_matches(None, "tok-a"),
            Err(ApiError::Auth(_))
        ));
    }
}
