use crate::{
    AppState,
    auth::{AuthUser, issue_token},
    error::{ErrorResponse, ServiceError},
    models::{
        ChangePasswordRequest, CustomerPatch, Direction, EmployeePatch, ExistsResponse,
        GrantRolesRequest, IconSrcRequest, LoginRequest, NewCustomer, NewEmployee, PageRequest,
        Pager, PublicKeyRequest, SortField, TokenResponse, User, UserCriteria, UserType,
    },
    security::Role,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::collections::BTreeSet;
use utoipa::IntoParams;

// --- Query Structs ---

/// EmailQuery
///
/// `?email=` for the exists and by-email lookups.
#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EmailQuery {
    pub email: String,
}

/// UserPageQuery
///
/// Filters and paging for GET /users. Text filters are case-insensitive
/// fragments; `roles` is a comma-separated list matched with "any of".
#[derive(Deserialize, IntoParams, Default)]
#[into_params(parameter_in = Query)]
pub struct UserPageQuery {
    pub email: Option<String>,
    pub username: Option<String>,
    pub enabled: Option<bool>,
    pub user_type: Option<UserType>,
    pub roles: Option<String>,
    /// Zero-based page number (default 0).
    pub page: Option<u32>,
    /// Page size, 1..=200 (default 20).
    pub size: Option<u32>,
    pub sort: Option<SortField>,
    pub direction: Option<Direction>,
}

/// RolesPageQuery
///
/// Paging for GET /users/by-roles.
#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RolesPageQuery {
    pub email: Option<String>,
    /// Comma-separated role names.
    pub roles: String,
    pub page: Option<u32>,
    pub size: Option<u32>,
    pub sort: Option<SortField>,
    pub direction: Option<Direction>,
}

fn page_request(
    page: Option<u32>,
    size: Option<u32>,
    sort: Option<SortField>,
    direction: Option<Direction>,
) -> PageRequest {
    let defaults = PageRequest::default();
    let request = PageRequest::new(page.unwrap_or(defaults.page), size.unwrap_or(defaults.size));
    match sort {
        Some(field) => request.sorted(field, direction.unwrap_or_default()),
        None => request,
    }
}

fn split_roles(raw: Option<&str>) -> BTreeSet<String> {
    raw.into_iter()
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// --- Public Handlers ---

/// register
///
/// [Public Route] Self-registration. Creates a disabled customer and grants
/// it the basic `USER` role; an administrator enables it.
#[utoipa::path(
    post,
    path = "/register",
    request_body = NewCustomer,
    responses(
        (status = 201, description = "Registered", body = User),
        (status = 400, description = "Invalid input or email taken", body = ErrorResponse)
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<NewCustomer>,
) -> Result<(StatusCode, Json<User>), ServiceError> {
    let user = state.service.add_customer(payload).await?;
    let user = state.service.grant_user_role(user.id).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// login
///
/// [Public Route] Exchanges credentials for a bearer token.
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 401, description = "Bad credentials", body = ErrorResponse)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ServiceError> {
    let principal = state
        .service
        .authenticate(&payload.email, &payload.password)
        .await?;
    Ok(Json(issue_token(&state.config, &principal)?))
}

#[utoipa::path(
    get,
    path = "/users/exists",
    params(EmailQuery),
    responses((status = 200, description = "Whether the email is registered", body = ExistsResponse))
)]
pub async fn user_exists(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> Result<Json<ExistsResponse>, ServiceError> {
    let exists = state.service.is_exist(&query.email).await?;
    Ok(Json(ExistsResponse { exists }))
}

// --- Authenticated Handlers ---

/// get_me
///
/// [Authenticated Route] The caller's own account.
#[utoipa::path(
    get,
    path = "/me",
    responses((status = 200, description = "Current user", body = User))
)]
pub async fn get_me(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<User>, ServiceError> {
    let user = state
        .service
        .get_user_by_email(&auth.context(), auth.principal.identity())
        .await?;
    Ok(Json(user))
}

#[utoipa::path(
    put,
    path = "/me/password",
    request_body = ChangePasswordRequest,
    responses((status = 204, description = "Password changed"))
)]
pub async fn change_my_password(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ServiceError> {
    state
        .service
        .change_password(&auth.context(), auth.principal.identity(), &payload.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/me/public-key",
    request_body = PublicKeyRequest,
    responses((status = 200, description = "Key stored", body = User))
)]
pub async fn set_my_public_key(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<PublicKeyRequest>,
) -> Result<Json<User>, ServiceError> {
    let user = state
        .service
        .set_public_key(&auth.context(), payload.public_key)
        .await?;
    Ok(Json(user))
}

#[utoipa::path(
    delete,
    path = "/me/public-key",
    responses((status = 200, description = "Key cleared", body = User))
)]
pub async fn clear_my_public_key(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<User>, ServiceError> {
    let user = state.service.clear_public_key(&auth.context()).await?;
    Ok(Json(user))
}

/// list_users
///
/// [Authenticated Route] Paged, filtered account listing. Password hashes are
/// never part of the content.
#[utoipa::path(
    get,
    path = "/users",
    params(UserPageQuery),
    responses(
        (status = 200, description = "One page of users", body = Pager<User>),
        (status = 400, description = "Page size out of range", body = ErrorResponse)
    )
)]
pub async fn list_users(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<UserPageQuery>,
) -> Result<Json<Pager<User>>, ServiceError> {
    let criteria = UserCriteria {
        email: query.email,
        username: query.username,
        enabled: query.enabled,
        user_type: query.user_type,
        roles: split_roles(query.roles.as_deref()),
    };
    let page = page_request(query.page, query.size, query.sort, query.direction);

    let pager = state
        .service
        .get_user_pager(&auth.context(), criteria, page)
        .await?;
    Ok(Json(pager))
}

#[utoipa::path(
    get,
    path = "/users/by-email",
    params(EmailQuery),
    responses(
        (status = 200, description = "User", body = User),
        (status = 403, description = "Not allowed to read this account", body = ErrorResponse),
        (status = 404, description = "Unknown email", body = ErrorResponse)
    )
)]
pub async fn get_user_by_email(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> Result<Json<User>, ServiceError> {
    let user = state
        .service
        .get_user_by_email(&auth.context(), &query.email)
        .await?;
    Ok(Json(user))
}

#[utoipa::path(
    get,
    path = "/users/by-roles",
    params(RolesPageQuery),
    responses((status = 200, description = "Users holding any of the roles", body = Pager<User>))
)]
pub async fn get_users_by_roles(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<RolesPageQuery>,
) -> Result<Json<Pager<User>>, ServiceError> {
    let roles = split_roles(Some(&query.roles));
    let page = page_request(query.page, query.size, query.sort, query.direction);

    let pager = state
        .service
        .get_page_by_roles(&auth.context(), query.email, roles, page)
        .await?;
    Ok(Json(pager))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 403, description = "Not allowed to read this account", body = ErrorResponse),
        (status = 404, description = "Not Found", body = ErrorResponse)
    )
)]
pub async fn get_user(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<User>, ServiceError> {
    let user = state.service.get_user(&auth.context(), id).await?;
    Ok(Json(user))
}

#[utoipa::path(
    put,
    path = "/users/{id}/icon-src",
    params(("id" = i64, Path, description = "User id")),
    request_body = IconSrcRequest,
    responses((status = 200, description = "Updated", body = User))
)]
pub async fn update_icon_src(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<IconSrcRequest>,
) -> Result<Json<User>, ServiceError> {
    let user = state
        .service
        .update_icon_src(&auth.context(), id, payload.icon_src)
        .await?;
    Ok(Json(user))
}

/// update_icon
///
/// [Authenticated Route] Stores the raw request body as the account icon.
#[utoipa::path(
    put,
    path = "/users/{id}/icon",
    params(("id" = i64, Path, description = "User id")),
    request_body(content = String, content_type = "application/octet-stream", description = "Raw icon bytes"),
    responses((status = 200, description = "Updated", body = User))
)]
pub async fn update_icon(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<Json<User>, ServiceError> {
    let user = state
        .service
        .update_icon(&auth.context(), id, body.to_vec())
        .await?;
    Ok(Json(user))
}

/// merge_employee
///
/// [Authenticated Route] Partial update of an employee. Absent fields are left
/// unchanged; a non-empty `roles` set additionally needs USER_GRANT_ROLES.
#[utoipa::path(
    patch,
    path = "/employees/{email}",
    params(("email" = String, Path, description = "Employee email")),
    request_body = EmployeePatch,
    responses(
        (status = 200, description = "Merged", body = User),
        (status = 403, description = "Not allowed to update this account", body = ErrorResponse)
    )
)]
pub async fn merge_employee(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(email): Path<String>,
    Json(patch): Json<EmployeePatch>,
) -> Result<Json<User>, ServiceError> {
    let user = state
        .service
        .merge_employee(&auth.context(), &email, patch)
        .await?;
    Ok(Json(user))
}

#[utoipa::path(
    patch,
    path = "/customers/{email}",
    params(("email" = String, Path, description = "Customer email")),
    request_body = CustomerPatch,
    responses(
        (status = 200, description = "Merged", body = User),
        (status = 403, description = "Not allowed to update this account", body = ErrorResponse)
    )
)]
pub async fn merge_customer(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(email): Path<String>,
    Json(patch): Json<CustomerPatch>,
) -> Result<Json<User>, ServiceError> {
    let user = state
        .service
        .merge_customer(&auth.context(), &email, patch)
        .await?;
    Ok(Json(user))
}

#[utoipa::path(
    get,
    path = "/roles",
    responses((status = 200, description = "Every grantable role", body = [Role]))
)]
pub async fn get_roles(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Role>>, ServiceError> {
    Ok(Json(state.service.get_roles(&auth.context()).await?))
}

// --- Admin Handlers ---
//
// Mounted under /admin. Whether the caller may perform the operation is
// decided by the policy layer, not by the route.

#[utoipa::path(
    post,
    path = "/admin/employees",
    request_body = NewEmployee,
    responses(
        (status = 201, description = "Employee created", body = User),
        (status = 403, description = "Missing USER_CREATE_SPECIAL", body = ErrorResponse)
    )
)]
pub async fn create_employee(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<NewEmployee>,
) -> Result<(StatusCode, Json<User>), ServiceError> {
    let user = state.service.add_employee(&auth.context(), payload).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    post,
    path = "/admin/users/{id}/enable",
    params(("id" = i64, Path, description = "User id")),
    responses((status = 200, description = "Enabled", body = User))
)]
pub async fn enable_user(
    _auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<User>, ServiceError> {
    Ok(Json(state.service.enable_user(id).await?))
}

#[utoipa::path(
    post,
    path = "/admin/users/{id}/disable",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "Disabled", body = User),
        (status = 403, description = "Missing USER_DISABLE", body = ErrorResponse)
    )
)]
pub async fn disable_user(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<User>, ServiceError> {
    Ok(Json(state.service.disable_user(&auth.context(), id).await?))
}

#[utoipa::path(
    put,
    path = "/admin/users/{id}/roles",
    params(("id" = i64, Path, description = "User id")),
    request_body = GrantRolesRequest,
    responses(
        (status = 200, description = "Roles replaced", body = User),
        (status = 400, description = "Unknown role", body = ErrorResponse),
        (status = 403, description = "Missing USER_GRANT_ROLES", body = ErrorResponse)
    )
)]
pub async fn grant_roles(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<GrantRolesRequest>,
) -> Result<Json<User>, ServiceError> {
    let user = state
        .service
        .grant_roles(&auth.context(), id, &payload.roles)
        .await?;
    Ok(Json(user))
}

#[utoipa::path(
    delete,
    path = "/admin/users/{id}",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Missing USER_DELETE", body = ErrorResponse),
        (status = 404, description = "Not Found", body = ErrorResponse)
    )
)]
pub async fn delete_user(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ServiceError> {
    state.service.delete_user(&auth.context(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
