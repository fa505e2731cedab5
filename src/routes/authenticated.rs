use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, patch, put},
};

/// Authenticated Router Module
///
/// Every handler here receives a resolved `AuthUser` and passes its security
/// context into the policy layer, which applies the per-operation checks.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // --- Own account ---
        .route("/me", get(handlers::get_me))
        .route("/me/password", put(handlers::change_my_password))
        .route(
            "/me/public-key",
            put(handlers::set_my_public_key).delete(handlers::clear_my_public_key),
        )
        // --- Lookups ---
        // GET /users?email=&username=&enabled=&user_type=&roles=&page=&size=&sort=&direction=
        .route("/users", get(handlers::list_users))
        .route("/users/by-email", get(handlers::get_user_by_email))
        .route("/users/by-roles", get(handlers::get_users_by_roles))
        .route("/users/{id}", get(handlers::get_user))
        .route("/roles", get(handlers::get_roles))
        // --- Profile updates ---
        .route("/users/{id}/icon-src", put(handlers::update_icon_src))
        .route("/users/{id}/icon", put(handlers::update_icon))
        // PATCH: only the fields present in the body change.
        .route("/employees/{email}", patch(handlers::merge_employee))
        .route("/customers/{email}", patch(handlers::merge_customer))
}
