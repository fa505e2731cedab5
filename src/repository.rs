use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};

use crate::error::StoreError;
use crate::models::{Direction, NewUser, Page, PageRequest, SortField, User, UserCriteria};

/// UserStore Trait
///
/// The persistence contract the policy layer delegates to. Implementations do
/// no authorization and no caching; both are the caller's job.
///
/// **Send + Sync + async_trait** make `Arc<dyn UserStore>` shareable across
/// tokio tasks.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Persists a new account and assigns its id. Fails with
    /// `DuplicateEmail` if the email is taken (case-insensitively).
    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;

    /// Case-insensitive email lookup.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Overwrites an existing account. Fails with `Missing` if the id is gone.
    async fn save(&self, user: User) -> Result<User, StoreError>;

    /// Returns `true` if a row was removed.
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;

    async fn find_page(
        &self,
        criteria: &UserCriteria,
        page: &PageRequest,
    ) -> Result<Page<User>, StoreError>;

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError>;
}

/// StoreState
///
/// Shared handle to the backing store.
pub type StoreState = Arc<dyn UserStore>;

/// InMemoryUserStore
///
/// Process-local `UserStore`. Counts every call, and can be switched into an
/// "unavailable" mode where every call fails, to exercise outage handling.
#[derive(Default)]
pub struct InMemoryUserStore {
    table: RwLock<Table>,
    calls: AtomicUsize,
    unavailable: AtomicBool,
}

#[derive(Default)]
struct Table {
    rows: BTreeMap<i64, User>,
    last_id: i64,
}

impl Table {
    fn id_for_email(&self, email: &str) -> Option<i64> {
        self.rows
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .map(|u| u.id)
    }
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of store calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(AtomicOrdering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    fn enter(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store switched off".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn insert(&self, new: NewUser) -> Result<User, StoreError> {
        self.enter()?;
        let mut table = self.table.write();

        if table.id_for_email(&new.email).is_some() {
            return Err(StoreError::DuplicateEmail(new.email));
        }

        table.last_id += 1;
        let now = Utc::now();
        let user = User {
            id: table.last_id,
            email: new.email,
            username: new.username,
            name: new.name,
            password_hash: Some(new.password_hash),
            enabled: new.enabled,
            roles: new.roles,
            kind: new.kind,
            description: new.description,
            telephone: new.telephone,
            address: new.address,
            icon_src: None,
            icon: None,
            public_key: None,
            created_at: now,
            updated_at: now,
        };
        table.rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        self.enter()?;
        Ok(self.table.read().rows.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.enter()?;
        let table = self.table.read();
        Ok(table
            .id_for_email(email)
            .and_then(|id| table.rows.get(&id).cloned()))
    }

    async fn save(&self, mut user: User) -> Result<User, StoreError> {
        self.enter()?;
        let mut table = self.table.write();
        let Some(existing) = table.rows.get_mut(&user.id) else {
            return Err(StoreError::Missing(user.id));
        };
        user.updated_at = Utc::now();
        *existing = user.clone();
        Ok(user)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        self.enter()?;
        Ok(self.table.write().rows.remove(&id).is_some())
    }

    async fn find_page(
        &self,
        criteria: &UserCriteria,
        page: &PageRequest,
    ) -> Result<Page<User>, StoreError> {
        self.enter()?;
        let table = self.table.read();

        let mut matched: Vec<&User> = table.rows.values().filter(|u| criteria.matches(u)).collect();
        if let Some(sort) = page.sort {
            matched.sort_by(|a, b| {
                let ordering = compare(a, b, sort.field);
                match sort.direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                }
            });
        }

        let total_elements = matched.len() as u64;
        let content = matched
            .into_iter()
            .skip(page.offset())
            .take(page.size as usize)
            .cloned()
            .collect();

        Ok(Page {
            content,
            total_elements,
        })
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
        self.enter()?;
        Ok(self.table.read().id_for_email(email).is_some())
    }
}

fn compare(a: &User, b: &User, field: SortField) -> Ordering {
    match field {
        SortField::Id => a.id.cmp(&b.id),
        SortField::Email => a.email.cmp(&b.email),
        SortField::Username => a.username.cmp(&b.username),
        SortField::CreatedAt => a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)),
    }
}
