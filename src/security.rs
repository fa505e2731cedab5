use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::error::{ServiceError, ServiceResult};

// --- Authorities ---

/// Authority
///
/// The closed set of capabilities the policy layer understands. Role
/// definitions are parsed into this enum when the registry is built, so a
/// misspelled authority fails at startup instead of silently granting nothing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Authority {
    UserCreateSpecial,
    UserDisable,
    UserGrantRoles,
    UserDelete,
    UserReadAll,
    UserReadSelf,
    UserUpdateAll,
    UserUpdateSelf,
}

impl Authority {
    pub const ALL: [Authority; 8] = [
        Authority::UserCreateSpecial,
        Authority::UserDisable,
        Authority::UserGrantRoles,
        Authority::UserDelete,
        Authority::UserReadAll,
        Authority::UserReadSelf,
        Authority::UserUpdateAll,
        Authority::UserUpdateSelf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserCreateSpecial => "USER_CREATE_SPECIAL",
            Self::UserDisable => "USER_DISABLE",
            Self::UserGrantRoles => "USER_GRANT_ROLES",
            Self::UserDelete => "USER_DELETE",
            Self::UserReadAll => "USER_READ_ALL",
            Self::UserReadSelf => "USER_READ_SELF",
            Self::UserUpdateAll => "USER_UPDATE_ALL",
            Self::UserUpdateSelf => "USER_UPDATE_SELF",
        }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Authority {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Authority::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ServiceError::validation(format!("unknown authority `{s}`")))
    }
}

// --- Principal & Context ---

/// Principal
///
/// The authenticated identity behind a call: the account email plus the
/// authorities derived from its roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Principal {
    identity: String,
    authorities: BTreeSet<Authority>,
}

impl Principal {
    pub fn new(identity: impl Into<String>, authorities: impl IntoIterator<Item = Authority>) -> Self {
        Self {
            identity: identity.into(),
            authorities: authorities.into_iter().collect(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn authorities(&self) -> &BTreeSet<Authority> {
        &self.authorities
    }

    pub fn has_authority(&self, authority: Authority) -> bool {
        self.authorities.contains(&authority)
    }

    /// Exact identity comparison. No case folding: self-service rules match
    /// the identity the principal was authenticated with.
    pub fn is(&self, identity: &str) -> bool {
        self.identity == identity
    }
}

/// SecurityContext
///
/// Carries the principal (or its absence) for one logical request. Passed by
/// reference into every policy operation instead of living in ambient state.
#[derive(Debug, Clone, Default)]
pub struct SecurityContext {
    principal: Option<Principal>,
}

impl SecurityContext {
    pub fn anonymous() -> Self {
        Self { principal: None }
    }

    pub fn authenticated(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn require(&self) -> ServiceResult<&Principal> {
        self.principal.as_ref().ok_or(ServiceError::Unauthenticated)
    }

    /// Pre-check: the principal must hold `authority`.
    pub fn require_authority(
        &self,
        authority: Authority,
        operation: &'static str,
    ) -> ServiceResult<&Principal> {
        let principal = self.require()?;
        authorize(principal.has_authority(authority), principal, operation)?;
        Ok(principal)
    }
}

// --- Predicates ---

/// Turns a predicate outcome into `AccessDenied`, logging the refusal.
pub fn authorize(allowed: bool, principal: &Principal, operation: &'static str) -> ServiceResult<()> {
    if allowed {
        Ok(())
    } else {
        tracing::warn!(
            principal = %principal.identity(),
            operation,
            "access denied"
        );
        Err(ServiceError::AccessDenied { operation })
    }
}

/// USER_READ_ALL, or USER_READ_SELF on the principal's own account.
pub fn can_read(principal: &Principal, target_email: &str) -> bool {
    principal.has_authority(Authority::UserReadAll)
        || (principal.has_authority(Authority::UserReadSelf) && principal.is(target_email))
}

/// USER_UPDATE_ALL, or USER_UPDATE_SELF on the principal's own account.
pub fn can_update(principal: &Principal, target_email: &str) -> bool {
    principal.has_authority(Authority::UserUpdateAll)
        || (principal.has_authority(Authority::UserUpdateSelf) && principal.is(target_email))
}

// --- Roles ---

pub const ROLE_ADMIN: &str = "ADMIN";
pub const ROLE_MANAGER: &str = "MANAGER";
pub const ROLE_EMPLOYEE: &str = "EMPLOYEE";
pub const ROLE_USER: &str = "USER";

/// Role
///
/// A named bundle of authorities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub name: String,
    pub authorities: BTreeSet<Authority>,
}

/// RoleRegistry
///
/// Read-mostly reference data: every role a user can be granted. Built once at
/// startup and shared.
#[derive(Debug, Clone)]
pub struct RoleRegistry {
    roles: BTreeMap<String, Role>,
}

impl RoleRegistry {
    /// Builds a registry from raw `role -> [authority name]` definitions,
    /// rejecting unknown authority names and empty role names.
    pub fn from_definitions(definitions: HashMap<String, Vec<String>>) -> ServiceResult<Self> {
        let mut roles = BTreeMap::new();
        for (name, authority_names) in definitions {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(ServiceError::validation("role name must not be empty"));
            }
            let authorities = authority_names
                .iter()
                .map(|a| a.parse::<Authority>())
                .collect::<ServiceResult<BTreeSet<_>>>()?;
            roles.insert(name.clone(), Role { name, authorities });
        }
        // Account creation and bootstrap grant these by name.
        for required in [ROLE_ADMIN, ROLE_EMPLOYEE, ROLE_USER] {
            if !roles.contains_key(required) {
                return Err(ServiceError::validation(format!(
                    "role registry must define the `{required}` role"
                )));
            }
        }
        Ok(Self { roles })
    }

    pub fn get(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    pub fn roles(&self) -> Vec<Role> {
        self.roles.values().cloned().collect()
    }

    /// Checks that every name is a registered role.
    pub fn resolve_names<'a, I>(&self, names: I) -> ServiceResult<BTreeSet<String>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        names
            .into_iter()
            .map(|name| {
                self.roles
                    .get(name.as_str())
                    .map(|role| role.name.clone())
                    .ok_or_else(|| ServiceError::validation(format!("unknown role `{name}`")))
            })
            .collect()
    }

    /// Union of the authorities of every known role in `role_names`.
    /// Unknown names contribute nothing.
    pub fn authorities_for<'a, I>(&self, role_names: I) -> BTreeSet<Authority>
    where
        I: IntoIterator<Item = &'a String>,
    {
        role_names
            .into_iter()
            .filter_map(|name| self.roles.get(name.as_str()))
            .flat_map(|role| role.authorities.iter().copied())
            .collect()
    }
}

impl Default for RoleRegistry {
    fn default() -> Self {
        use Authority::*;

        fn role(name: &str, authorities: &[Authority]) -> (String, Role) {
            (
                name.to_string(),
                Role {
                    name: name.to_string(),
                    authorities: authorities.iter().copied().collect(),
                },
            )
        }

        let roles = [
            role(ROLE_ADMIN, &Authority::ALL),
            role(
                ROLE_MANAGER,
                &[
                    UserCreateSpecial,
                    UserDisable,
                    UserReadAll,
                    UserUpdateAll,
                    UserReadSelf,
                    UserUpdateSelf,
                ],
            ),
            role(ROLE_EMPLOYEE, &[UserReadAll, UserReadSelf, UserUpdateSelf]),
            role(ROLE_USER, &[UserReadSelf, UserUpdateSelf]),
        ]
        .into_iter()
        .collect();

        Self { roles }
    }
}
