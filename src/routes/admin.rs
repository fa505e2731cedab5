use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, post, put},
};

/// Admin Router Module
///
/// Account administration. The router only guarantees an authenticated
/// caller; each operation checks its own authority (USER_CREATE_SPECIAL,
/// USER_DISABLE, USER_GRANT_ROLES, USER_DELETE).
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // POST /admin/employees
        .route("/employees", post(handlers::create_employee))
        // POST /admin/users/{id}/enable
        .route("/users/{id}/enable", post(handlers::enable_user))
        // POST /admin/users/{id}/disable
        .route("/users/{id}/disable", post(handlers::disable_user))
        // PUT /admin/users/{id}/roles
        // Replaces the account's role set.
        .route("/users/{id}/roles", put(handlers::grant_roles))
        // DELETE /admin/users/{id}
        .route("/users/{id}", delete(handlers::delete_user))
}
