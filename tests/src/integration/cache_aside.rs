//! # Cache-Aside Correctness
//!
//! After an invalidation the next read always goes to the loader, whether
//! the invalidation came from the write path or from a product event.

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use ec_02_retry_pipeline::RetryPolicy;
    use ec_04_cache_aside::{
        entity_key, query_key, CacheAside, ProductCacheInvalidator, DEFAULT_ENTITY_TTL,
        DEFAULT_SEARCH_TTL, PRODUCT_NAMESPACE, PRODUCT_SEARCH_NAMESPACE,
    };
    use parking_lot::RwLock;
    use serde::{Deserialize, Serialize};
    use shared_bus::{CommerceEvent, ProductSnapshot, PublishContext};
    use shared_cache::InMemoryStore;

    use crate::fixtures::Harness;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Product {
        id: String,
        price_cents: u64,
    }

    /// Stand-in for the authoritative database.
    #[derive(Default)]
    struct Catalogue {
        rows: RwLock<HashMap<String, Product>>,
        reads: AtomicUsize,
    }

    impl Catalogue {
        fn load(&self, id: &str) -> Option<Product> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.rows.read().get(id).cloned()
        }

        fn write(&self, product: Product) {
            self.rows.write().insert(product.id.clone(), product);
        }

        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    fn product(price_cents: u64) -> Product {
        Product {
            id: "p-1".to_string(),
            price_cents,
        }
    }

    async fn read(cache: &CacheAside, db: &Catalogue) -> Option<Product> {
        let key = entity_key(PRODUCT_NAMESPACE, "p-1");
        let loaded: Result<Option<Product>, Infallible> = cache
            .get_or_load_optional(&key, DEFAULT_ENTITY_TTL, || async { Ok(db.load("p-1")) })
            .await;
        loaded.unwrap()
    }

    #[tokio::test]
    async fn test_read_after_write_goes_to_loader() {
        let cache = CacheAside::new(Arc::new(InMemoryStore::new()));
        let db = Catalogue::default();
        db.write(product(1_000));

        assert_eq!(read(&cache, &db).await, Some(product(1_000)));
        assert_eq!(read(&cache, &db).await, Some(product(1_000)));
        assert_eq!(db.reads(), 1);

        let key = entity_key(PRODUCT_NAMESPACE, "p-1");
        let written: Result<(), Infallible> = cache
            .write_and_invalidate(&[key], &[PRODUCT_SEARCH_NAMESPACE], || async {
                db.write(product(1_500));
                Ok(())
            })
            .await;
        written.unwrap();

        assert_eq!(read(&cache, &db).await, Some(product(1_500)));
        assert_eq!(db.reads(), 2);
    }

    #[tokio::test]
    async fn test_search_results_are_dropped_with_entity_write() {
        let store = InMemoryStore::new();
        let cache = CacheAside::new(Arc::new(store.clone()));
        let params = serde_json::json!({"search": "lamp", "limit": 20});
        let search = query_key(PRODUCT_SEARCH_NAMESPACE, &params);
        let searches = AtomicUsize::new(0);

        for _ in 0..2 {
            let _: Result<Vec<String>, Infallible> = cache
                .get_or_load(&search, DEFAULT_SEARCH_TTL, || async {
                    searches.fetch_add(1, Ordering::SeqCst);
                    Ok(vec!["p-1".to_string()])
                })
                .await;
        }
        assert_eq!(searches.load(Ordering::SeqCst), 1);

        cache
            .invalidate_namespace(PRODUCT_SEARCH_NAMESPACE)
            .await
            .unwrap();
        let _: Result<Vec<String>, Infallible> = cache
            .get_or_load(&search, DEFAULT_SEARCH_TTL, || async {
                searches.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            })
            .await;
        assert_eq!(searches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_product_event_invalidates_through_broker() {
        let hx = Harness::new(
            "catalogue.product-cache",
            "product-service",
            "product.#",
            RetryPolicy::new(3, Duration::from_secs(30)),
        )
        .await;
        let store = InMemoryStore::new();
        let cache = Arc::new(CacheAside::new(Arc::new(store.clone())));
        let db = Catalogue::default();
        db.write(product(1_000));
        assert_eq!(read(&cache, &db).await, Some(product(1_000)));

        db.write(product(800));
        hx.publisher()
            .publish(
                &CommerceEvent::ProductUpdated(ProductSnapshot {
                    id: "p-1".to_string(),
                    title: "Lamp".to_string(),
                    price_cents: 800,
                    quantity: 3,
                    seller_id: "s-1".to_string(),
                    image: None,
                }),
                PublishContext::generated(),
            )
            .await
            .unwrap();

        let processor = hx.processor(ProductCacheInvalidator::new(Arc::clone(&cache)));
        let probe = store.clone();
        hx.run_until(processor, 1, move || probe.is_empty()).await;

        assert_eq!(read(&cache, &db).await, Some(product(800)));
        assert_eq!(db.reads(), 2);
    }

    #[tokio::test]
    async fn test_cache_outage_never_blocks_reads() {
        let store = InMemoryStore::new();
        store.set_available(false);
        let cache = CacheAside::new(Arc::new(store));
        let db = Catalogue::default();
        db.write(product(1_000));

        assert_eq!(read(&cache, &db).await, Some(product(1_000)));
        assert_eq!(read(&cache, &db).await, Some(product(1_000)));
        assert_eq!(db.reads(), 2);
        assert_eq!(cache.stats().errors, 2);
    }
}
