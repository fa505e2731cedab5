use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints that need no principal: health, self-registration, login and the
/// email availability check.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        .route("/health", get(|| async { "ok" }))
        // POST /register
        // Creates a disabled customer with the basic USER role.
        .route("/register", post(handlers::register))
        // POST /login
        .route("/login", post(handlers::login))
        // GET /users/exists?email=...
        .route("/users/exists", get(handlers::user_exists))
}
