//! services/api/src/web/auth.rs
//!
//! Identity endpoints: registration, login, profile read/modify/delete,
//! secret generation and the health probe.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use hbd_core::auth::MAX_TOKEN_HOURS;
use hbd_core::{Credentials, DateRecord, IssuedToken, Profile, ProfileChanges, Registration, User};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::state::AppState;

/// Requested session lifetime in hours.
pub const TOKEN_DURATION_HEADER: &str = "x-jwt-token-duration";

const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";
static EMAIL_REGEX: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    /// Local reminder time, `HH:MM`.
    pub reminder_time: String,
    /// IANA timezone name, e.g. `Europe/Madrid`.
    pub timezone: String,
    pub telegram_bot_api_key: String,
    pub telegram_user_id: String,
}

/// Either email and password, or the password alone.
#[derive(Deserialize, ToSchema)]
#[serde(untagged)]
pub enum LoginRequest {
    EmailAndPassword { email: String, password: String },
    PasswordOnly { password: String },
}

impl From<LoginRequest> for Credentials {
    fn from(req: LoginRequest) -> Self {
        match req {
            LoginRequest::EmailAndPassword { email, password } => Credentials::EmailAndSecret {
                email,
                secret: password,
            },
            LoginRequest::PasswordOnly { password } => Credentials::SecretOnly { secret: password },
        }
    }
}

#[derive(Deserialize, ToSchema, Default)]
pub struct ModifyUserRequest {
    /// Required when changing email or password.
    pub current_password: Option<String>,
    pub new_email: Option<String>,
    pub new_password: Option<String>,
    pub new_reminder_time: Option<String>,
    pub new_timezone: Option<String>,
    pub new_telegram_bot_api_key: Option<String>,
    pub new_telegram_user_id: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq, Eq)]
pub struct BirthdayResponse {
    pub id: Uuid,
    pub name: String,
    /// `YYYY-MM-DD`; `0000` stands for an unknown year.
    pub date: String,
}

impl From<&DateRecord> for BirthdayResponse {
    fn from(record: &DateRecord) -> Self {
        Self {
            id: record.id,
            name: record.label.clone(),
            date: record.date.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ProfileResponse {
    pub user_id: Uuid,
    pub telegram_bot_api_key: String,
    pub telegram_user_id: String,
    pub reminder_time: String,
    pub timezone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub birthdays: Vec<BirthdayResponse>,
    pub birthdays_today: Vec<BirthdayResponse>,
}

impl From<Profile> for ProfileResponse {
    fn from(p: Profile) -> Self {
        Self {
            user_id: p.user_id,
            telegram_bot_api_key: p.contact_token,
            telegram_user_id: p.contact_id,
            reminder_time: p.reminder_time,
            timezone: p.timezone,
            password: p.secret,
            birthdays: p.dates.iter().map(BirthdayResponse::from).collect(),
            birthdays_today: p.due_today.iter().map(BirthdayResponse::from).collect(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct SessionResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user_id: Uuid,
    pub profile: ProfileResponse,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ModifyUserResponse {
    pub profile: ProfileResponse,
    /// Present when the email changed; previous tokens stop working.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct PasswordResponse {
    pub password: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

//=========================================================================================
// Helpers
//=========================================================================================

fn session_response(token: IssuedToken, profile: Profile) -> SessionResponse {
    SessionResponse {
        token: token.token,
        expires_at: token.expires_at,
        user_id: profile.user_id,
        profile: profile.into(),
    }
}

/// Reads the optional token-lifetime header. Values above one year are capped.
pub fn requested_token_duration(headers: &HeaderMap) -> Result<Option<Duration>, ApiError> {
    let Some(value) = headers.get(TOKEN_DURATION_HEADER) else {
        return Ok(None);
    };
    let hours = value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|h| *h > 0)
        .ok_or_else(|| {
            ApiError::BadRequest("X-Jwt-Token-Duration must be a positive number of hours".to_string())
        })?;
    Ok(Some(Duration::hours(hours.min(MAX_TOKEN_HOURS))))
}

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    let regex = EMAIL_REGEX
        .get_or_init(|| Regex::new(EMAIL_PATTERN))
        .as_ref()
        .map_err(|e| ApiError::Internal(format!("Email pattern failed to compile: {}", e)))?;
    if regex.is_match(email.trim()) {
        Ok(())
    } else {
        Err(ApiError::BadRequest("Invalid email format".to_string()))
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET /health - Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// GET /generate-password - A random password for new users
#[utoipa::path(
    get,
    path = "/generate-password",
    responses((status = 200, description = "Generated password", body = PasswordResponse))
)]
pub async fn generate_password_handler(State(state): State<Arc<AppState>>) -> Json<PasswordResponse> {
    Json(PasswordResponse {
        password: state.issuer.generate_secret(),
    })
}

/// POST /register - Create a new user
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterRequest,
    params(
        ("X-Jwt-Token-Duration" = Option<i64>, Header, description = "Session lifetime in hours.")
    ),
    responses(
        (status = 201, description = "User created successfully", body = SessionResponse),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "Email or password already registered"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_email(&req.email)?;
    let ttl = requested_token_duration(&headers)?;

    let registration = Registration {
        email: req.email,
        secret: req.password,
        reminder_time: req.reminder_time,
        timezone: req.timezone,
        contact_token: req.telegram_bot_api_key,
        contact_id: req.telegram_user_id,
    };
    let grant = state.issuer.register(registration, ttl).await?;

    Ok((StatusCode::CREATED, Json(session_response(grant.token, grant.profile))))
}

/// POST /login - Exchange credentials for a session token
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    params(
        ("X-Jwt-Token-Duration" = Option<i64>, Header, description = "Session lifetime in hours.")
    ),
    responses(
        (status = 200, description = "Login successful", body = SessionResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let ttl = requested_token_duration(&headers)?;
    let grant = state.issuer.login(req.into(), ttl).await?;
    Ok(Json(session_response(grant.token, grant.profile)))
}

/// GET /me - The caller's profile
#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Current profile", body = ProfileResponse),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer" = []))
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let profile = state.issuer.profile(&user).await?;
    Ok(Json(profile.into()))
}

/// PUT /modify-user - Change any subset of the caller's settings
#[utoipa::path(
    put,
    path = "/modify-user",
    request_body = ModifyUserRequest,
    responses(
        (status = 200, description = "Profile updated", body = ModifyUserResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Missing token or wrong current password"),
        (status = 409, description = "Email or password already registered"),
        (status = 500, description = "Internal server error")
    ),
    security(("bearer" = []))
)]
pub async fn modify_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Json(req): Json<ModifyUserRequest>,
) -> Result<Json<ModifyUserResponse>, ApiError> {
    if let Some(email) = &req.new_email {
        validate_email(email)?;
    }
    let ttl = requested_token_duration(&headers)?;

    let changes = ProfileChanges {
        current_secret: req.current_password,
        new_email: req.new_email,
        new_secret: req.new_password,
        new_reminder_time: req.new_reminder_time,
        new_timezone: req.new_timezone,
        new_contact_token: req.new_telegram_bot_api_key,
        new_contact_id: req.new_telegram_user_id,
    };
    let modified = state.issuer.modify_profile(&user, changes, ttl).await?;

    Ok(Json(ModifyUserResponse {
        profile: modified.profile.into(),
        token: modified.token.map(|t| t.token),
    }))
}

/// DELETE /delete-user - Remove the caller and all their birthdays
#[utoipa::path(
    delete,
    path = "/delete-user",
    responses(
        (status = 200, description = "User deleted", body = SuccessResponse),
        (status = 401, description = "Missing or invalid token"),
        (status = 500, description = "Internal server error")
    ),
    security(("bearer" = []))
)]
pub async fn delete_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state.issuer.delete_profile(&user).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn email_format() {
        assert!(validate_email("someone@hbd.wtf").is_ok());
        assert!(validate_email(" first.last+tag@mail.example.org ").is_ok());
        for bad in ["", "no-at-sign", "a@b", "a@b.c", "spaces in@hbd.wtf"] {
            assert!(validate_email(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn token_duration_header() {
        let mut headers = HeaderMap::new();
        assert!(requested_token_duration(&headers).unwrap().is_none());

        headers.insert(TOKEN_DURATION_HEADER, HeaderValue::from_static("48"));
        assert_eq!(requested_token_duration(&headers).unwrap(), Some(Duration::hours(48)));

        headers.insert(TOKEN_DURATION_HEADER, HeaderValue::from_static("999999"));
        assert_eq!(
            requested_token_duration(&headers).unwrap(),
            Some(Duration::hours(MAX_TOKEN_HOURS))
        );

        for bad in ["0", "-3", "soon"] {
            headers.insert(TOKEN_DURATION_HEADER, HeaderValue::from_static(bad));
            assert!(requested_token_duration(&headers).is_err());
        }
    }

    #[test]
    fn login_body_resolves_to_explicit_credentials() {
        let both: LoginRequest = serde_json::from_str(r#"{"email":"a@hbd.wtf","password":"p"}"#).unwrap();
        assert!(matches!(Credentials::from(both), Credentials::EmailAndSecret { .. }));

        let only: LoginRequest = serde_json::from_str(r#"{"password":"p"}"#).unwrap();
        assert!(matches!(Credentials::from(only), Credentials::SecretOnly { .. }));

        assert!(serde_json::from_str::<LoginRequest>(r#"{"email":"a@hbd.wtf"}"#).is_err());
    }
}
