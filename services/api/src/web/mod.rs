pub mod auth;
pub mod middleware;
pub mod rate_limit;
pub mod rest;
pub mod state;

pub use middleware::require_auth;
pub use rate_limit::rate_limit;

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::error::ApiError;
use auth::{
    delete_user_handler, generate_password_handler, health_handler, login_handler, me_handler, modify_user_handler,
    register_handler, TOKEN_DURATION_HEADER,
};
use rest::{add_birthday_handler, check_birthdays_handler, delete_birthday_handler, modify_birthday_handler, ApiDoc};
use state::AppState;

/// Builds the complete application router: public and bearer-protected
/// routes, rate limiting, CORS and the Swagger UI.
pub fn router(app_state: Arc<AppState>) -> Result<Router, ApiError> {
    let origin = app_state
        .config
        .cors_origin
        .parse::<HeaderValue>()
        .map_err(|e| ApiError::Internal(format!("Invalid CORS origin: {}", e)))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            ACCEPT,
            HeaderName::from_static(TOKEN_DURATION_HEADER),
        ]);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/generate-password", get(generate_password_handler))
        .route("/register", post(register_handler))
        .route("/login", post(login_handler));

    // Protected routes (bearer token required)
    let protected_routes = Router::new()
        .route("/me", get(me_handler))
        .route("/modify-user", put(modify_user_handler))
        .route("/delete-user", delete(delete_user_handler))
        .route("/add-birthday", post(add_birthday_handler))
        .route("/modify-birthday", put(modify_birthday_handler))
        .route("/delete-birthday", delete(delete_birthday_handler))
        .route("/check-birthdays", post(check_birthdays_handler))
        .layer(axum_middleware::from_fn_with_state(app_state.clone(), require_auth));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(axum_middleware::from_fn_with_state(app_state.clone(), rate_limit))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    Ok(Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())))
}
