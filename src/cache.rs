use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

use crate::models::{PageRequest, Pager, User, UserCriteria};

pub const USER_CACHE: &str = "userCache";
pub const USER_PAGER_CACHE: &str = "userPagerCache";

/// CacheNamespace
///
/// One named partition of the in-process cache. Entries never expire; the
/// write path evicts them explicitly.
///
/// Every access takes the namespace lock, so a reader sees a whole old value
/// or a whole new one, and `evict_all` clears the partition under a single
/// write lock.
///
/// Write-path mutations (`put`, `evict`, `evict_all`) advance a generation
/// counter held under the same lock. Read-through fills go through
/// `put_if_unchanged` with the generation seen before the backing read, and
/// are dropped when any write landed in between.
pub struct CacheNamespace<K, V> {
    name: &'static str,
    inner: RwLock<Entries<K, V>>,
}

struct Entries<K, V> {
    map: HashMap<K, V>,
    generation: u64,
}

impl<K, V> Entries<K, V> {
    fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

impl<K, V> CacheNamespace<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: RwLock::new(Entries {
                map: HashMap::new(),
                generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.read().map.get(key).cloned()
    }

    /// Current write generation. Capture it before reading the backing store
    /// and hand it to `put_if_unchanged`.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    pub fn put(&self, key: K, value: V) {
        let mut inner = self.inner.write();
        inner.map.insert(key, value);
        inner.bump();
    }

    /// Read-through fill. Stores `value` only if no write-path mutation
    /// happened since `seen` was taken; returns whether it was stored.
    pub fn put_if_unchanged(&self, key: K, value: V, seen: u64) -> bool {
        let mut inner = self.inner.write();
        if inner.generation != seen {
            tracing::debug!(cache = self.name, "stale fill dropped");
            return false;
        }
        inner.map.insert(key, value);
        true
    }

    pub fn evict<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let mut inner = self.inner.write();
        inner.map.remove(key);
        inner.bump();
    }

    pub fn evict_all(&self) {
        let mut inner = self.inner.write();
        tracing::debug!(cache = self.name, evicted = inner.map.len(), "cache cleared");
        inner.map.clear();
        inner.bump();
    }

    pub fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// CachedUser
///
/// Value stored in the user cache. `Missing` records a lookup that found no
/// account, so repeated lookups of an unknown email skip the store.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedUser {
    Present(User),
    Missing,
}

impl From<Option<User>> for CachedUser {
    fn from(user: Option<User>) -> Self {
        match user {
            Some(user) => CachedUser::Present(user),
            None => CachedUser::Missing,
        }
    }
}

/// PageKey
///
/// Full argument tuple of a cached paged query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PageKey {
    Users {
        criteria: UserCriteria,
        page: PageRequest,
    },
    ByRoles {
        email: Option<String>,
        roles: BTreeSet<String>,
        page: PageRequest,
    },
}

/// CacheStats
///
/// Entry counts per namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub users: usize,
    pub pages: usize,
}

/// UserCaches
///
/// The two namespaces the policy layer keeps consistent with writes: users by
/// normalized email, and paged query results.
pub struct UserCaches {
    pub users: CacheNamespace<String, CachedUser>,
    pub pages: CacheNamespace<PageKey, Pager<User>>,
}

impl UserCaches {
    pub fn new() -> Self {
        Self {
            users: CacheNamespace::new(USER_CACHE),
            pages: CacheNamespace::new(USER_PAGER_CACHE),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            users: self.users.len(),
            pages: self.pages.len(),
        }
    }
}

impl Default for UserCaches {
    fn default() -> Self {
        Self::new()
    }
}
