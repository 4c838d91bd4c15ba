//! Read-through, write-through cache decorator for repositories.
//!
//! [`Cached`] wraps any [`Repository`] whose entity is [`Cacheable`] and
//! implements the same repository traits, so services and message handlers
//! never know whether a cache is present.
//!
//! | operation            | store | cache                                   |
//! |----------------------|-------|-----------------------------------------|
//! | `get_by_id` hit      | -     | read                                    |
//! | `get_by_id` miss     | read  | write found row with TTL                |
//! | `create`             | write | write new row                           |
//! | `update`             | write | refresh or evict, per [`UpdatePolicy`]  |
//! | `delete`             | write | evict                                   |
//! | `mark_out_of_stock`  | write | refresh                                 |
//! | `evict_cached`       | -     | evict                                   |
//!
//! Cache failures never surface. An unreachable backend, a timeout or an
//! undecodable entry is logged at `warn` and the operation continues as if
//! the cache were disabled. Undecodable entries are also deleted.

use crate::metrics::CacheMetrics;
use orderdesk_core::cache::cache_key;
use orderdesk_core::{
    CacheBackend, Cacheable, Page, Product, ProductId, ProductRepository, Repository, Result,
    UpdatePolicy, User, UserRepository,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A repository fronted by an optional cache.
#[derive(Clone)]
pub struct Cached<R: Repository> {
    inner: R,
    cache: Option<Arc<dyn CacheBackend>>,
    ttl: Duration,
}

impl<R> Cached<R>
where
    R: Repository,
    R::Entity: Cacheable,
{
    /// Wrap `inner`. `None` disables caching entirely.
    #[must_use]
    pub fn new(inner: R, cache: Option<Arc<dyn CacheBackend>>) -> Self {
        Self {
            inner,
            cache,
            ttl: <R::Entity as Cacheable>::DEFAULT_TTL,
        }
    }

    /// Override the entity's default time-to-live.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The wrapped repository.
    #[must_use]
    pub const fn inner(&self) -> &R {
        &self.inner
    }

    /// Whether a cache backend is attached.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    async fn load(&self, key: &str) -> Option<R::Entity> {
        let cache = self.cache.as_ref()?;
        let prefix = <R::Entity as Cacheable>::PREFIX;

        let raw = match cache.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                CacheMetrics::record_miss(prefix);
                return None;
            }
            Err(error) => {
                warn!(%key, %error, "Cache read failed, falling back to store");
                CacheMetrics::record_error(prefix, "get");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(entity) => {
                debug!(%key, "Cache hit");
                CacheMetrics::record_hit(prefix);
                Some(entity)
            }
            Err(error) => {
                warn!(%key, %error, "Discarding undecodable cache entry");
                CacheMetrics::record_error(prefix, "decode");
                self.evict(key).await;
                None
            }
        }
    }

    async fn store(&self, entity: &R::Entity) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let prefix = <R::Entity as Cacheable>::PREFIX;
        let key = cache_key::<R::Entity>(entity.cache_id());

        let raw = match serde_json::to_string(entity) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(%key, %error, "Could not encode entity for cache");
                CacheMetrics::record_error(prefix, "encode");
                return;
            }
        };

        if let Err(error) = cache.set(&key, raw, self.ttl).await {
            warn!(%key, %error, "Cache write failed");
            CacheMetrics::record_error(prefix, "set");
            // A failed overwrite may leave the previous value behind.
            self.evict(&key).await;
        }
    }

    async fn evict(&self, key: &str) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        if let Err(error) = cache.delete(key).await {
            warn!(%key, %error, "Cache eviction failed");
            CacheMetrics::record_error(<R::Entity as Cacheable>::PREFIX, "delete");
        }
    }
}

impl<R> Repository for Cached<R>
where
    R: Repository,
    R::Entity: Cacheable,
{
    type Id = R::Id;
    type Entity = R::Entity;
    type New = R::New;
    type Patch = R::Patch;
    type Filter = R::Filter;

    async fn get_by_id(&self, id: R::Id) -> Result<Option<R::Entity>> {
        let key = cache_key::<R::Entity>(id);
        if let Some(hit) = self.load(&key).await {
            return Ok(Some(hit));
        }

        let found = self.inner.get_by_id(id).await?;
        if let Some(entity) = &found {
            self.store(entity).await;
        }
        Ok(found)
    }

    async fn get_by_filters(&self, page: Page, filter: &R::Filter) -> Result<Vec<R::Entity>> {
        self.inner.get_by_filters(page, filter).await
    }

    async fn create(&self, new: R::New) -> Result<R::Entity> {
        let created = self.inner.create(new).await?;
        self.store(&created).await;
        Ok(created)
    }

    async fn update(&self, id: R::Id, patch: &R::Patch) -> Result<R::Entity> {
        let updated = self.inner.update(id, patch).await?;
        match <R::Entity as Cacheable>::UPDATE_POLICY {
            UpdatePolicy::Refresh => self.store(&updated).await,
            UpdatePolicy::Evict => self.evict(&cache_key::<R::Entity>(id)).await,
        }
        Ok(updated)
    }

    async fn delete(&self, id: R::Id) -> Result<()> {
        self.inner.delete(id).await?;
        self.evict(&cache_key::<R::Entity>(id)).await;
        Ok(())
    }
}

impl<R> UserRepository for Cached<R>
where
    R: UserRepository,
{
    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        self.inner.get_by_email(email).await
    }
}

impl<R> ProductRepository for Cached<R>
where
    R: ProductRepository,
{
    async fn mark_out_of_stock(&self, id: ProductId) -> Result<Product> {
        let product = self.inner.mark_out_of_stock(id).await?;
        self.store(&product).await;
        Ok(product)
    }

    async fn evict_cached(&self, id: ProductId) {
        self.evict(&cache_key::<Product>(id)).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use orderdesk_core::{NewProduct, NewUser, Patch, ProductPatch, UserPatch};
    use orderdesk_testing::{InMemoryCache, InMemoryProducts, InMemoryStore, InMemoryUsers};

    fn products(store: &InMemoryStore, cache: &InMemoryCache) -> Cached<InMemoryProducts> {
        Cached::new(store.products(), Some(Arc::new(cache.clone())))
    }

    fn users(store: &InMemoryStore, cache: &InMemoryCache) -> Cached<InMemoryUsers> {
        Cached::new(store.users(), Some(Arc::new(cache.clone())))
    }

    fn widget() -> NewProduct {
        NewProduct {
            name: "Widget".into(),
            quantity: 2,
        }
    }

    fn alice() -> NewUser {
        NewUser {
            login: "alice".into(),
            email: "a@x.com".into(),
            description: None,
        }
    }

    #[tokio::test]
    async fn create_writes_through_with_entity_ttl() {
        let store = InMemoryStore::new();
        let cache = InMemoryCache::new();

        let product = products(&store, &cache).create(widget()).await.unwrap();
        let user = users(&store, &cache).create(alice()).await.unwrap();

        let product_key = format!("product:{}", product.id);
        let user_key = format!("user:{}", user.id);
        assert_eq!(cache.ttl_of(&product_key), Some(Duration::from_secs(600)));
        assert_eq!(cache.ttl_of(&user_key), Some(Duration::from_secs(3600)));

        let cached: Product = serde_json::from_str(&cache.raw(&product_key).unwrap()).unwrap();
        assert_eq!(cached, product);
    }

    #[tokio::test]
    async fn hit_does_not_touch_store() {
        let store = InMemoryStore::new();
        let cache = InMemoryCache::new();
        let repo = products(&store, &cache);
        let product = repo.create(widget()).await.unwrap();

        store.set_unreachable(true);
        let found = repo.get_by_id(product.id).await.unwrap();
        assert_eq!(found, Some(product));
    }

    #[tokio::test]
    async fn miss_populates_cache() {
        let store = InMemoryStore::new();
        let cache = InMemoryCache::new();
        let product = store.products().create(widget()).await.unwrap();
        let key = format!("product:{}", product.id);
        assert!(!cache.contains(&key));

        let found = products(&store, &cache).get_by_id(product.id).await.unwrap();
        assert_eq!(found, Some(product));
        assert!(cache.contains(&key));
    }

    #[tokio::test]
    async fn product_update_refreshes_entry() {
        let store = InMemoryStore::new();
        let cache = InMemoryCache::new();
        let repo = products(&store, &cache);
        let product = repo.create(widget()).await.unwrap();

        let updated = repo
            .update(product.id, &ProductPatch::quantity(9))
            .await
            .unwrap();

        let cached: Product =
            serde_json::from_str(&cache.raw(&format!("product:{}", product.id)).unwrap()).unwrap();
        assert_eq!(cached, updated);
        assert_eq!(cached.quantity, 9);
    }

    #[tokio::test]
    async fn user_update_evicts_entry() {
        let store = InMemoryStore::new();
        let cache = InMemoryCache::new();
        let repo = users(&store, &cache);
        let user = repo.create(alice()).await.unwrap();
        let key = format!("user:{}", user.id);

        let patch = UserPatch {
            description: Patch::Set("vip".into()),
            ..UserPatch::default()
        };
        repo.update(user.id, &patch).await.unwrap();
        assert!(!cache.contains(&key));

        let reloaded = repo.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.description.as_deref(), Some("vip"));
        assert!(cache.contains(&key));
    }

    #[tokio::test]
    async fn delete_evicts_both_entities() {
        let store = InMemoryStore::new();
        let cache = InMemoryCache::new();
        let product = products(&store, &cache).create(widget()).await.unwrap();
        let user = users(&store, &cache).create(alice()).await.unwrap();

        products(&store, &cache).delete(product.id).await.unwrap();
        users(&store, &cache).delete(user.id).await.unwrap();

        assert!(!cache.contains(&format!("product:{}", product.id)));
        assert!(!cache.contains(&format!("user:{}", user.id)));
        assert_eq!(products(&store, &cache).get_by_id(product.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unreachable_cache_falls_back_to_store() {
        let store = InMemoryStore::new();
        let cache = InMemoryCache::new();
        cache.set_unreachable(true);
        let repo = products(&store, &cache);

        let product = repo.create(widget()).await.unwrap();
        assert_eq!(repo.get_by_id(product.id).await.unwrap(), Some(product.clone()));
        let updated = repo
            .update(product.id, &ProductPatch::quantity(1))
            .await
            .unwrap();
        assert_eq!(updated.quantity, 1);
        repo.delete(product.id).await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss_and_removed() {
        let store = InMemoryStore::new();
        let cache = InMemoryCache::new();
        let product = store.products().create(widget()).await.unwrap();
        let key = format!("product:{}", product.id);
        cache.insert_raw(&key, "{not json");

        let found = products(&store, &cache).get_by_id(product.id).await.unwrap();
        assert_eq!(found, Some(product.clone()));

        let cached: Product = serde_json::from_str(&cache.raw(&key).unwrap()).unwrap();
        assert_eq!(cached, product);
    }

    #[tokio::test]
    async fn disabled_cache_is_plain_store() {
        let store = InMemoryStore::new();
        let repo = Cached::new(store.products(), None);
        assert!(!repo.is_enabled());
        let product = repo.create(widget()).await.unwrap();
        assert_eq!(repo.get_by_id(product.id).await.unwrap(), Some(product));
    }

    #[tokio::test]
    async fn evict_cached_drops_stale_stock() {
        let store = InMemoryStore::new();
        let cache = InMemoryCache::new();
        let repo = products(&store, &cache);
        let mut product = repo.create(widget()).await.unwrap();

        product.quantity = 0;
        store.put_product(product.clone());
        repo.evict_cached(product.id).await;

        assert_eq!(repo.get_by_id(product.id).await.unwrap().unwrap().quantity, 0);
    }

    #[tokio::test]
    async fn custom_ttl_is_used() {
        let store = InMemoryStore::new();
        let cache = InMemoryCache::new();
        let repo = products(&store, &cache).with_ttl(Duration::from_secs(5));
        let product = repo.create(widget()).await.unwrap();
        assert_eq!(
            cache.ttl_of(&format!("product:{}", product.id)),
            Some(Duration::from_secs(5))
        );
    }
}
