use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Policy core: authorization, caching and the store contract.
pub mod cache;
pub mod error;
pub mod models;
pub mod password;
pub mod repository;
pub mod security;
pub mod service;
pub mod validation;

// HTTP shell and configuration.
pub mod auth;
pub mod config;
pub mod handlers;
pub mod routes;

use auth::AuthUser;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::{ServiceError, ServiceResult};
pub use repository::{InMemoryUserStore, StoreState, UserStore};
pub use security::{Authority, Principal, SecurityContext};
pub use service::{AccessControlledUserStore, ServiceState};

/// ApiDoc
///
/// OpenAPI document for every routed operation, served at
/// `/api-docs/openapi.json` and browsable at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::register, handlers::login, handlers::user_exists,
        handlers::get_me, handlers::change_my_password, handlers::set_my_public_key,
        handlers::clear_my_public_key, handlers::list_users, handlers::get_user_by_email,
        handlers::get_users_by_roles, handlers::get_user, handlers::update_icon_src,
        handlers::update_icon, handlers::merge_employee, handlers::merge_customer,
        handlers::get_roles, handlers::create_employee, handlers::enable_user,
        handlers::disable_user, handlers::grant_roles, handlers::delete_user
    ),
    components(
        schemas(
            models::User, models::UserKind, models::UserType, models::NewEmployee,
            models::NewCustomer, models::ProfilePatch, models::EmployeePatch,
            models::CustomerPatch, models::SortField, models::Direction,
            models::LoginRequest, models::TokenResponse, models::ChangePasswordRequest,
            models::PublicKeyRequest, models::IconSrcRequest, models::GrantRolesRequest,
            models::ExistsResponse, security::Role, security::Authority,
            error::ErrorResponse,
        )
    ),
    tags(
        (name = "user-policy", description = "Access-controlled user account API")
    )
)]
pub struct ApiDoc;

/// AppState
///
/// Shared, cloneable state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The access-controlled user store (policy, cache and backing store).
    pub service: ServiceState,
    /// The loaded, immutable environment configuration.
    pub config: AppConfig,
}

impl AppState {
    /// Wires the role registry, password hasher and cache around `store`.
    pub fn build(config: AppConfig, store: StoreState) -> ServiceResult<Self> {
        let roles = config.role_registry()?;
        let passwords = password::PasswordService::new(&config.hashing)?;
        let service = Arc::new(AccessControlledUserStore::new(store, roles, passwords));

        Ok(Self { service, config })
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for ServiceState {
    fn from_ref(app_state: &AppState) -> ServiceState {
        app_state.service.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Rejects the request before it reaches a handler unless `AuthUser` resolves
/// (401, or 503 when the store cannot be reached).
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles public, authenticated and admin routes, the Swagger UI, and the
/// request-id / tracing / CORS layers.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let protected = authenticated::authenticated_routes()
        .nest("/admin", admin::admin_routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(protected)
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for one HTTP request, carrying method, URI and the `x-request-id` so
/// every log line of the request (policy decisions included) is correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
