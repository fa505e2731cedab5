//! The access-controlled user store.
//!
//! Every operation runs the same three stages: an authorization check (on the
//! inputs before the store is touched, or on the loaded entity before it is
//! returned), the delegated store call, then a cache sync. A failed check
//! leaves both the store and the caches untouched.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::cache::{CacheStats, CachedUser, PageKey, UserCaches};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    CustomerPatch, EmployeePatch, NewCustomer, NewEmployee, NewUser, Page, PageRequest, Pager,
    User, UserCriteria, UserKind, UserType, replacement_roles,
};
use crate::password::PasswordService;
use crate::repository::StoreState;
use crate::security::{
    Authority, Principal, ROLE_ADMIN, ROLE_EMPLOYEE, ROLE_USER, Role, RoleRegistry,
    SecurityContext, authorize, can_read, can_update,
};
use crate::validation::{
    normalize_email, require_non_empty, validate_email, validate_id, validate_page,
    validate_password,
};

/// CacheSync
///
/// What a successful write does to the caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheSync {
    /// Overwrite the user's entry.
    Put,
    /// Overwrite the user's entry and drop every cached page.
    PutAndEvictPages,
    /// Drop the user's entry and every cached page.
    EvictAndEvictPages,
}

/// AccessControlledUserStore
///
/// Wraps a `UserStore` with per-operation authorization and a two-tier cache
/// (users by email, paged query results).
pub struct AccessControlledUserStore {
    store: StoreState,
    roles: Arc<RoleRegistry>,
    passwords: PasswordService,
    caches: UserCaches,
}

/// ServiceState
///
/// Shared handle used by the HTTP layer.
pub type ServiceState = Arc<AccessControlledUserStore>;

impl AccessControlledUserStore {
    pub fn new(store: StoreState, roles: RoleRegistry, passwords: PasswordService) -> Self {
        Self {
            store,
            roles: Arc::new(roles),
            passwords,
            caches: UserCaches::new(),
        }
    }

    pub fn role_registry(&self) -> &RoleRegistry {
        &self.roles
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.caches.stats()
    }

    // --- Account creation ---

    /// Creates a disabled employee holding only the `EMPLOYEE` role.
    pub async fn add_employee(&self, ctx: &SecurityContext, input: NewEmployee) -> ServiceResult<User> {
        ctx.require_authority(Authority::UserCreateSpecial, "add_employee")?;

        let new = self.new_user(
            &input.email,
            &input.password,
            input.username,
            UserKind::Employee,
            BTreeSet::from([ROLE_EMPLOYEE.to_string()]),
        )?;
        let new = NewUser {
            name: input.name,
            description: input.description,
            telephone: input.telephone,
            address: input.address,
            ..new
        };

        let user = self.store.insert(new).await?;
        tracing::info!(user_id = user.id, email = %user.email, "employee created");
        Ok(self.sync(user, CacheSync::PutAndEvictPages))
    }

    /// Open registration. The account starts disabled and without roles;
    /// `grant_user_role` gives it the basic role.
    pub async fn add_customer(&self, input: NewCustomer) -> ServiceResult<User> {
        let kind = UserKind::Customer {
            affiliation: input.affiliation,
            title: input.title,
        };
        let new = self.new_user(&input.email, &input.password, input.username, kind, BTreeSet::new())?;
        let new = NewUser {
            name: input.name,
            description: input.description,
            telephone: input.telephone,
            address: input.address,
            ..new
        };

        let user = self.store.insert(new).await?;
        tracing::info!(user_id = user.id, email = %user.email, "customer registered");
        Ok(self.sync(user, CacheSync::PutAndEvictPages))
    }

    /// Startup bootstrap: an enabled `ADMIN` employee, created once.
    pub async fn provision_admin(&self, email: &str, password: &str) -> ServiceResult<User> {
        if let Some(existing) = self.store.find_by_email(&normalize_email(email)).await? {
            tracing::info!(email = %existing.email, "bootstrap admin already present");
            return Ok(existing);
        }

        let new = self.new_user(
            email,
            password,
            "admin".to_string(),
            UserKind::Employee,
            BTreeSet::from([ROLE_ADMIN.to_string()]),
        )?;
        let user = self.store.insert(NewUser { enabled: true, ..new }).await?;
        tracing::info!(user_id = user.id, email = %user.email, "bootstrap admin created");
        Ok(self.sync(user, CacheSync::PutAndEvictPages))
    }

    fn new_user(
        &self,
        email: &str,
        password: &str,
        username: String,
        kind: UserKind,
        roles: BTreeSet<String>,
    ) -> ServiceResult<NewUser> {
        validate_email(email)?;
        validate_password(password)?;
        require_non_empty("username", &username)?;

        Ok(NewUser {
            email: normalize_email(email),
            username,
            name: None,
            password_hash: self.passwords.hash(password)?,
            enabled: false,
            roles,
            kind,
            description: None,
            telephone: None,
            address: None,
        })
    }

    // --- Account state ---

    pub async fn enable_user(&self, id: i64) -> ServiceResult<User> {
        let mut user = self.load_by_id(id).await?;
        user.enabled = true;
        let user = self.store.save(user).await?;
        tracing::info!(user_id = id, "user enabled");
        Ok(self.sync(user, CacheSync::PutAndEvictPages))
    }

    pub async fn disable_user(&self, ctx: &SecurityContext, id: i64) -> ServiceResult<User> {
        ctx.require_authority(Authority::UserDisable, "disable_user")?;

        let mut user = self.load_by_id(id).await?;
        user.enabled = false;
        let user = self.store.save(user).await?;
        tracing::info!(user_id = id, "user disabled");
        Ok(self.sync(user, CacheSync::PutAndEvictPages))
    }

    /// Replaces the account's roles with `role_names`.
    pub async fn grant_roles(
        &self,
        ctx: &SecurityContext,
        id: i64,
        role_names: &[String],
    ) -> ServiceResult<User> {
        ctx.require_authority(Authority::UserGrantRoles, "grant_roles")?;
        let roles = self.roles.resolve_names(role_names)?;

        let mut user = self.load_by_id(id).await?;
        user.roles = roles;
        let user = self.store.save(user).await?;
        tracing::info!(user_id = id, roles = ?user.roles, "roles granted");
        Ok(self.sync(user, CacheSync::PutAndEvictPages))
    }

    /// Adds the basic `USER` role. Called right after registration.
    pub async fn grant_user_role(&self, id: i64) -> ServiceResult<User> {
        let mut user = self.load_by_id(id).await?;
        user.roles.insert(ROLE_USER.to_string());
        let user = self.store.save(user).await?;
        Ok(self.sync(user, CacheSync::Put))
    }

    // --- Passwords ---

    /// Self-service only: the principal must be exactly `email`.
    pub async fn change_password(
        &self,
        ctx: &SecurityContext,
        email: &str,
        new_password: &str,
    ) -> ServiceResult<User> {
        let principal = ctx.require()?;
        authorize(principal.is(email), principal, "change_password")?;

        self.set_password(email, new_password).await
    }

    /// Forgot-password flow. No caller check; the caller has proven control of
    /// the mailbox by other means.
    pub async fn change_password_by_email(&self, email: &str, new_password: &str) -> ServiceResult<User> {
        self.set_password(email, new_password).await
    }

    async fn set_password(&self, email: &str, new_password: &str) -> ServiceResult<User> {
        validate_password(new_password)?;

        let mut user = self.load_by_email(email).await?;
        user.password_hash = Some(self.passwords.hash(new_password)?);
        let user = self.store.save(user).await?;
        tracing::info!(user_id = user.id, "password changed");
        Ok(self.sync(user, CacheSync::Put))
    }

    // --- Deletion ---

    pub async fn delete_user(&self, ctx: &SecurityContext, id: i64) -> ServiceResult<()> {
        ctx.require_authority(Authority::UserDelete, "delete_user")?;

        let user = self.load_by_id(id).await?;
        if !self.store.delete(id).await? {
            return Err(ServiceError::user_not_found(id));
        }
        tracing::info!(user_id = id, email = %user.email, "user deleted");
        self.sync(user, CacheSync::EvictAndEvictPages);
        Ok(())
    }

    // --- Reads ---

    /// Post-checked read by id. Not cached.
    pub async fn get_user(&self, ctx: &SecurityContext, id: i64) -> ServiceResult<User> {
        let principal = ctx.require()?;
        validate_id(id)?;

        match self.store.find_by_id(id).await? {
            Some(user) => {
                authorize(can_read(principal, &user.email), principal, "get_user")?;
                Ok(user)
            }
            // Only callers allowed to read everyone learn that the id is free.
            None => {
                authorize(principal.has_authority(Authority::UserReadAll), principal, "get_user")?;
                Err(ServiceError::user_not_found(id))
            }
        }
    }

    /// Post-checked, read-through by email. Unknown emails are cached as
    /// `Missing` and reported as `NotFound`.
    pub async fn get_user_by_email(&self, ctx: &SecurityContext, email: &str) -> ServiceResult<User> {
        let principal = ctx.require()?;
        require_non_empty("email", email)?;
        let key = normalize_email(email);

        let entry = match self.caches.users.get(&key) {
            Some(entry) => {
                tracing::debug!(email = %key, "user cache hit");
                authorize(can_read(principal, email), principal, "get_user_by_email")?;
                entry
            }
            None => {
                tracing::debug!(email = %key, "user cache miss");
                let seen = self.caches.users.generation();
                let entry = CachedUser::from(self.store.find_by_email(&key).await?);
                authorize(can_read(principal, email), principal, "get_user_by_email")?;
                self.caches.users.put_if_unchanged(key.clone(), entry.clone(), seen);
                entry
            }
        };

        match entry {
            CachedUser::Present(user) => Ok(user),
            CachedUser::Missing => Err(ServiceError::user_not_found(key)),
        }
    }

    /// Builds the principal for an already-authenticated identity (bearer
    /// token subject). Reads through the user cache; no authorization.
    pub async fn resolve_principal(&self, email: &str) -> ServiceResult<Principal> {
        let key = normalize_email(email);

        let entry = match self.caches.users.get(&key) {
            Some(entry) => entry,
            None => {
                let seen = self.caches.users.generation();
                let entry = CachedUser::from(self.store.find_by_email(&key).await?);
                self.caches.users.put_if_unchanged(key.clone(), entry.clone(), seen);
                entry
            }
        };

        match entry {
            CachedUser::Present(user) if user.enabled => Ok(self.principal_for(&user)),
            _ => Err(ServiceError::Unauthenticated),
        }
    }

    pub async fn is_exist(&self, email: &str) -> ServiceResult<bool> {
        validate_email(email)?;
        Ok(self.store.exists_by_email(&normalize_email(email)).await?)
    }

    pub async fn get_roles(&self, ctx: &SecurityContext) -> ServiceResult<Vec<Role>> {
        ctx.require()?;
        Ok(self.roles.roles())
    }

    // --- Paged queries ---

    pub async fn get_user_pager(
        &self,
        ctx: &SecurityContext,
        criteria: UserCriteria,
        page: PageRequest,
    ) -> ServiceResult<Pager<User>> {
        ctx.require()?;
        validate_page(&page)?;

        let key = PageKey::Users {
            criteria: criteria.clone(),
            page,
        };
        self.cached_page(key, &criteria, &page).await
    }

    /// Same query and cache entry as `get_user_pager`, without paging metadata.
    pub async fn get_user_page(
        &self,
        ctx: &SecurityContext,
        criteria: UserCriteria,
        page: PageRequest,
    ) -> ServiceResult<Page<User>> {
        self.get_user_pager(ctx, criteria, page).await.map(Page::from)
    }

    /// Accounts whose email contains `email` (if given) and that hold any of
    /// `role_names`.
    pub async fn get_page_by_roles(
        &self,
        ctx: &SecurityContext,
        email: Option<String>,
        role_names: BTreeSet<String>,
        page: PageRequest,
    ) -> ServiceResult<Pager<User>> {
        ctx.require()?;
        validate_page(&page)?;

        let email = email.filter(|e| !e.trim().is_empty());
        let criteria = UserCriteria {
            email: email.clone(),
            roles: role_names.clone(),
            ..UserCriteria::default()
        };
        let key = PageKey::ByRoles {
            email,
            roles: role_names,
            page,
        };
        self.cached_page(key, &criteria, &page).await
    }

    async fn cached_page(
        &self,
        key: PageKey,
        criteria: &UserCriteria,
        page: &PageRequest,
    ) -> ServiceResult<Pager<User>> {
        if let Some(pager) = self.caches.pages.get(&key) {
            tracing::debug!(?key, "pager cache hit");
            return Ok(pager);
        }

        let seen = self.caches.pages.generation();
        let raw = self.store.find_page(criteria, page).await?;
        let sanitized = Page {
            content: raw.content.into_iter().map(User::sanitized).collect(),
            total_elements: raw.total_elements,
        };
        let pager = Pager::from_page(sanitized, page);
        self.caches.pages.put_if_unchanged(key, pager.clone(), seen);
        Ok(pager)
    }

    // --- Profile updates ---

    pub async fn merge_employee(
        &self,
        ctx: &SecurityContext,
        email: &str,
        patch: EmployeePatch,
    ) -> ServiceResult<User> {
        let principal = ctx.require()?;
        authorize(can_update(principal, email), principal, "merge_employee")?;
        let roles = self.patch_roles(principal, &patch.roles)?;

        let mut user = self.load_by_email(email).await?;
        if user.user_type() != UserType::Employee {
            return Err(ServiceError::validation(format!("{email} is not an employee")));
        }

        patch.profile.apply_to(&mut user);
        if let Some(roles) = roles {
            user.roles = roles;
        }

        let user = self.store.save(user).await?;
        tracing::info!(user_id = user.id, "employee merged");
        Ok(self.sync(user, CacheSync::PutAndEvictPages))
    }

    pub async fn merge_customer(
        &self,
        ctx: &SecurityContext,
        email: &str,
        patch: CustomerPatch,
    ) -> ServiceResult<User> {
        let principal = ctx.require()?;
        authorize(can_update(principal, email), principal, "merge_customer")?;
        let roles = self.patch_roles(principal, &patch.roles)?;

        let mut user = self.load_by_email(email).await?;
        let UserKind::Customer { affiliation, title } = &mut user.kind else {
            return Err(ServiceError::validation(format!("{email} is not a customer")));
        };
        if let Some(value) = patch.affiliation {
            *affiliation = Some(value);
        }
        if let Some(value) = patch.title {
            *title = Some(value);
        }

        patch.profile.apply_to(&mut user);
        if let Some(roles) = roles {
            user.roles = roles;
        }

        let user = self.store.save(user).await?;
        tracing::info!(user_id = user.id, "customer merged");
        Ok(self.sync(user, CacheSync::PutAndEvictPages))
    }

    /// A non-empty role set in a patch is a role grant and needs
    /// USER_GRANT_ROLES on top of the update permission.
    fn patch_roles(
        &self,
        principal: &Principal,
        roles: &Option<BTreeSet<String>>,
    ) -> ServiceResult<Option<BTreeSet<String>>> {
        let Some(roles) = replacement_roles(roles) else {
            return Ok(None);
        };
        authorize(
            principal.has_authority(Authority::UserGrantRoles),
            principal,
            "merge_roles",
        )?;
        self.roles.resolve_names(roles).map(Some)
    }

    pub async fn update_icon_src(
        &self,
        ctx: &SecurityContext,
        id: i64,
        icon_src: String,
    ) -> ServiceResult<User> {
        ctx.require()?;
        require_non_empty("icon_src", &icon_src)?;

        let mut user = self.load_by_id(id).await?;
        user.icon_src = Some(icon_src);
        let user = self.store.save(user).await?;
        Ok(self.sync(user, CacheSync::Put))
    }

    pub async fn update_icon(&self, ctx: &SecurityContext, id: i64, icon: Vec<u8>) -> ServiceResult<User> {
        ctx.require()?;

        let mut user = self.load_by_id(id).await?;
        user.icon = Some(icon);
        let user = self.store.save(user).await?;
        Ok(self.sync(user, CacheSync::Put))
    }

    // --- Public keys (always the caller's own account) ---

    pub async fn set_public_key(&self, ctx: &SecurityContext, public_key: String) -> ServiceResult<User> {
        let principal = ctx.require()?;
        require_non_empty("public_key", &public_key)?;

        let mut user = self.load_by_email(principal.identity()).await?;
        user.public_key = Some(public_key);
        let user = self.store.save(user).await?;
        Ok(self.sync(user, CacheSync::Put))
    }

    pub async fn clear_public_key(&self, ctx: &SecurityContext) -> ServiceResult<User> {
        let principal = ctx.require()?;

        let mut user = self.load_by_email(principal.identity()).await?;
        user.public_key = None;
        let user = self.store.save(user).await?;
        Ok(self.sync(user, CacheSync::Put))
    }

    // --- Authentication ---

    /// Verifies credentials against the store (bypassing the cache). Unknown
    /// emails, wrong passwords and disabled accounts are indistinguishable.
    pub async fn authenticate(&self, email: &str, password: &str) -> ServiceResult<Principal> {
        let user = self.store.find_by_email(&normalize_email(email)).await?;

        let verified = user.filter(|u| {
            u.enabled
                && u.password_hash
                    .as_deref()
                    .is_some_and(|hash| self.passwords.verify(password, hash))
        });

        match verified {
            Some(user) => {
                tracing::info!(email = %user.email, "authenticated");
                Ok(self.principal_for(&user))
            }
            None => {
                tracing::warn!(email, "authentication failed");
                Err(ServiceError::AuthenticationFailed)
            }
        }
    }

    // --- Helpers ---

    fn principal_for(&self, user: &User) -> Principal {
        Principal::new(user.email.clone(), self.roles.authorities_for(&user.roles))
    }

    async fn load_by_id(&self, id: i64) -> ServiceResult<User> {
        validate_id(id)?;
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::user_not_found(id))
    }

    async fn load_by_email(&self, email: &str) -> ServiceResult<User> {
        require_non_empty("email", email)?;
        self.store
            .find_by_email(&normalize_email(email))
            .await?
            .ok_or_else(|| ServiceError::user_not_found(email))
    }

    /// Applies the cache side of a successful write and hands the user back.
    fn sync(&self, user: User, sync: CacheSync) -> User {
        let key = normalize_email(&user.email);
        match sync {
            CacheSync::Put => {
                self.caches.users.put(key, CachedUser::Present(user.clone()));
            }
            CacheSync::PutAndEvictPages => {
                self.caches.users.put(key, CachedUser::Present(user.clone()));
                self.caches.pages.evict_all();
            }
            CacheSync::EvictAndEvictPages => {
                self.caches.users.evict(&key);
                self.caches.pages.evict_all();
            }
        }
        user
    }
}
