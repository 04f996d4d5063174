//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the birthday endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::ApiError;
use crate::web::auth::{
    self, BirthdayResponse, HealthResponse, LoginRequest, ModifyUserRequest, ModifyUserResponse, PasswordResponse,
    ProfileResponse, RegisterRequest, SessionResponse, SuccessResponse,
};
use crate::web::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use hbd_core::{Clock, CoreError, User};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::health_handler,
        auth::generate_password_handler,
        auth::register_handler,
        auth::login_handler,
        auth::me_handler,
        auth::modify_user_handler,
        auth::delete_user_handler,
        add_birthday_handler,
        modify_birthday_handler,
        delete_birthday_handler,
        check_birthdays_handler,
    ),
    components(
        schemas(
            RegisterRequest,
            LoginRequest,
            ModifyUserRequest,
            ModifyUserResponse,
            SessionResponse,
            ProfileResponse,
            BirthdayResponse,
            SuccessResponse,
            PasswordResponse,
            HealthResponse,
            AddBirthdayRequest,
            ModifyBirthdayRequest,
            DeleteBirthdayRequest,
            CheckBirthdaysResponse,
        )
    ),
    modifiers(&BearerSecurity),
    tags(
        (name = "HBD API", description = "Birthday reminders delivered through Telegram.")
    )
)]
pub struct ApiDoc;

/// Registers the `bearer` scheme referenced by the protected routes.
struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct AddBirthdayRequest {
    pub name: String,
    /// `YYYY-MM-DD`, `0000-MM-DD` or `MM-DD` when the year is unknown.
    pub date: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ModifyBirthdayRequest {
    pub id: Uuid,
    pub name: String,
    pub date: String,
}

#[derive(Deserialize, ToSchema)]
pub struct DeleteBirthdayRequest {
    pub id: Uuid,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct CheckBirthdaysResponse {
    pub success: bool,
    /// Number of birthdays included in the message sent, zero if none.
    pub notified: usize,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Add a birthday to the caller's list.
#[utoipa::path(
    post,
    path = "/add-birthday",
    request_body = AddBirthdayRequest,
    responses(
        (status = 201, description = "Birthday added", body = BirthdayResponse),
        (status = 400, description = "Invalid name or date"),
        (status = 409, description = "Same name and date already stored")
    ),
    security(("bearer" = []))
)]
pub async fn add_birthday_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(req): Json<AddBirthdayRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.issuer.add_date(&user, &req.name, &req.date).await?;
    Ok((StatusCode::CREATED, Json(BirthdayResponse::from(&record))))
}

/// Replace the name and date of one of the caller's birthdays.
#[utoipa::path(
    put,
    path = "/modify-birthday",
    request_body = ModifyBirthdayRequest,
    responses(
        (status = 200, description = "Birthday updated", body = BirthdayResponse),
        (status = 400, description = "Invalid name or date"),
        (status = 404, description = "No such birthday for this user"),
        (status = 409, description = "Same name and date already stored")
    ),
    security(("bearer" = []))
)]
pub async fn modify_birthday_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(req): Json<ModifyBirthdayRequest>,
) -> Result<Json<BirthdayResponse>, ApiError> {
    let record = state
        .issuer
        .modify_date(&user, req.id, &req.name, &req.date)
        .await?;
    Ok(Json(BirthdayResponse::from(&record)))
}

/// Remove one of the caller's birthdays.
#[utoipa::path(
    delete,
    path = "/delete-birthday",
    request_body = DeleteBirthdayRequest,
    responses(
        (status = 200, description = "Birthday deleted", body = SuccessResponse),
        (status = 404, description = "No such birthday for this user")
    ),
    security(("bearer" = []))
)]
pub async fn delete_birthday_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(req): Json<DeleteBirthdayRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state.issuer.delete_date(&user, req.id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Send today's reminder for the caller right away, ignoring the reminder time.
///
/// A delivery failure or unreadable contact data is logged and reported as
/// `success: false` rather than failing the request.
#[utoipa::path(
    post,
    path = "/check-birthdays",
    responses(
        (status = 200, description = "Check finished; `success` is false when delivery failed", body = CheckBirthdaysResponse),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer" = []))
)]
pub async fn check_birthdays_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<CheckBirthdaysResponse>, ApiError> {
    let now = state.clock.now();
    match state.scheduler.check_user(&user, now).await {
        Ok(notified) => Ok(Json(CheckBirthdaysResponse {
            success: true,
            notified,
        })),
        Err(e @ (CoreError::Notification(_) | CoreError::Crypto(_))) => {
            warn!(user_id = %user.id, "On-demand birthday check failed: {}", e);
            Ok(Json(CheckBirthdaysResponse {
                success: false,
                notified: 0,
            }))
        }
        Err(e) => Err(e.into()),
    }
}
