use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use utoipa::ToSchema;

// --- Core Account Schemas ---

/// User
///
/// The canonical account record. `email` is the immutable business key and the
/// cache key; `id` is assigned by the store on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub name: Option<String>,
    /// Argon2id PHC string. Never serialized; stripped from paged results.
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub enabled: bool,
    pub roles: BTreeSet<String>,
    pub kind: UserKind,
    pub description: Option<String>,
    pub telephone: Option<String>,
    pub address: Option<String>,
    pub icon_src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub icon: Option<Vec<u8>>,
    pub public_key: Option<String>,
    #[schema(value_type = String)]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = String)]
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Copy safe to hand out in listings.
    pub fn sanitized(mut self) -> Self {
        self.password_hash = None;
        self
    }

    pub fn user_type(&self) -> UserType {
        self.kind.user_type()
    }
}

/// UserKind
///
/// Employees carry no extra fields; customers carry their affiliation and title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UserKind {
    Employee,
    Customer {
        affiliation: Option<String>,
        title: Option<String>,
    },
}

impl UserKind {
    pub fn user_type(&self) -> UserType {
        match self {
            UserKind::Employee => UserType::Employee,
            UserKind::Customer { .. } => UserType::Customer,
        }
    }
}

/// UserType
///
/// Discriminant of `UserKind`, used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Employee,
    Customer,
}

/// NewUser
///
/// Insert payload handed to the store. The store assigns `id` and timestamps.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub name: Option<String>,
    pub password_hash: String,
    pub enabled: bool,
    pub roles: BTreeSet<String>,
    pub kind: UserKind,
    pub description: Option<String>,
    pub telephone: Option<String>,
    pub address: Option<String>,
}

// --- Request Payloads (Input Schemas) ---

/// NewEmployee
///
/// Input for creating an employee account (privileged).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct NewEmployee {
    pub email: String,
    pub password: String,
    pub username: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub telephone: Option<String>,
    pub address: Option<String>,
}

/// NewCustomer
///
/// Input for self-registration (POST /register).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct NewCustomer {
    pub email: String,
    pub password: String,
    pub username: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub telephone: Option<String>,
    pub address: Option<String>,
    pub affiliation: Option<String>,
    pub title: Option<String>,
}

/// ProfilePatch
///
/// Fields shared by both account kinds. `None` means "leave as is".
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telephone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl ProfilePatch {
    pub fn apply_to(&self, user: &mut User) {
        if let Some(username) = &self.username {
            user.username = username.clone();
        }
        overwrite(&mut user.name, &self.name);
        overwrite(&mut user.description, &self.description);
        overwrite(&mut user.telephone, &self.telephone);
        overwrite(&mut user.address, &self.address);
    }
}

/// EmployeePatch
///
/// Partial update for an employee. A non-empty `roles` set replaces the
/// account's roles; `None` or an empty set leaves them untouched.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct EmployeePatch {
    #[serde(flatten)]
    pub profile: ProfilePatch,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<BTreeSet<String>>,
}

/// CustomerPatch
///
/// Partial update for a customer; same rules as `EmployeePatch`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct CustomerPatch {
    #[serde(flatten)]
    pub profile: ProfilePatch,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<BTreeSet<String>>,
}

/// Only a non-empty role set counts as a replacement.
pub fn replacement_roles(roles: &Option<BTreeSet<String>>) -> Option<&BTreeSet<String>> {
    roles.as_ref().filter(|set| !set.is_empty())
}

fn overwrite<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
    if let Some(v) = value {
        *target = Some(v.clone());
    }
}

// --- Query & Paging ---

/// UserCriteria
///
/// Filter for paged user queries. Text fields match case-insensitive
/// fragments; `roles` matches accounts holding any of the listed roles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Default)]
pub struct UserCriteria {
    pub email: Option<String>,
    pub username: Option<String>,
    pub enabled: Option<bool>,
    pub user_type: Option<UserType>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl UserCriteria {
    pub fn matches(&self, user: &User) -> bool {
        let contains = |haystack: &str, needle: &Option<String>| {
            needle
                .as_ref()
                .is_none_or(|n| haystack.to_lowercase().contains(&n.to_lowercase()))
        };

        contains(&user.email, &self.email)
            && contains(&user.username, &self.username)
            && self.enabled.is_none_or(|e| user.enabled == e)
            && self.user_type.is_none_or(|t| user.user_type() == t)
            && (self.roles.is_empty() || self.roles.iter().any(|r| user.roles.contains(r)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Id,
    Email,
    Username,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Default)]
pub struct Sort {
    pub field: SortField,
    pub direction: Direction,
}

/// PageRequest
///
/// Zero-based page number, page size and optional sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
    pub sort: Option<Sort>,
}

impl PageRequest {
    pub const MAX_SIZE: u32 = 200;

    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page,
            size,
            sort: None,
        }
    }

    pub fn sorted(mut self, field: SortField, direction: Direction) -> Self {
        self.sort = Some(Sort { field, direction });
        self
    }

    pub fn offset(&self) -> usize {
        self.page as usize * self.size as usize
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, 20)
    }
}

/// Page
///
/// Raw store result: one slice of content plus the total match count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub total_elements: u64,
}

/// Pager
///
/// Page enriched with its position, as served to callers and cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Pager<T> {
    pub content: Vec<T>,
    pub page_number: u32,
    pub page_size: u32,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl<T> Pager<T> {
    pub fn from_page(page: Page<T>, request: &PageRequest) -> Self {
        let size = u64::from(request.size.max(1));
        Self {
            content: page.content,
            page_number: request.page,
            page_size: request.size,
            total_elements: page.total_elements,
            total_pages: page.total_elements.div_ceil(size),
        }
    }
}

impl<T> From<Pager<T>> for Page<T> {
    fn from(pager: Pager<T>) -> Self {
        Page {
            content: pager.content,
            total_elements: pager.total_elements,
        }
    }
}

// --- HTTP Payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// TokenResponse
///
/// Returned by POST /login: a signed bearer token for subsequent requests.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PublicKeyRequest {
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IconSrcRequest {
    pub icon_src: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GrantRolesRequest {
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExistsResponse {
    pub exists: bool,
}
